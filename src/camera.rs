//! Video pass-through camera properties
//!
//! [`CameraController`] caches what the runtime reports for every camera
//! property and performs writes under the [`LockType::Camera`] lock. The cache
//! is refreshed from `MrCameraPropertyChange` events, not from writes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ClientError, ClientResult};
use crate::runtime::{
    CameraPropertyConfigType, CameraPropertyMode, CameraPropertyType, CameraPropertyValue,
    LockType, Runtime,
};

/// Cached state of one camera property.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CameraPropertyInfo {
    pub config_type: CameraPropertyConfigType,
    pub supported_modes: Vec<CameraPropertyMode>,
    /// Every value for list properties, `[min, max]` for range properties.
    pub supported_values: Vec<CameraPropertyValue>,
    pub current_mode: Option<CameraPropertyMode>,
    pub current_value: Option<CameraPropertyValue>,
}

impl CameraPropertyInfo {
    pub fn supports_mode(&self, mode: CameraPropertyMode) -> bool {
        self.supported_modes.contains(&mode)
    }
}

pub fn property_type_name(property: CameraPropertyType, brief: bool) -> &'static str {
    use CameraPropertyType::*;
    match (property, brief) {
        (ExposureTime, false) => "Exposure Time",
        (ExposureTime, true) => "Exp",
        (IsoValue, false) => "ISO Value",
        (IsoValue, true) => "ISO",
        (WhiteBalance, false) => "White Balance",
        (WhiteBalance, true) => "WB",
        (FlickerCompensation, false) => "Flicker Compensation",
        (FlickerCompensation, true) => "Flick",
        (Sharpness, false) => "Sharpness",
        (Sharpness, true) => "Sharp",
        (EyeReprojection, false) => "Eye Reprojection",
        (EyeReprojection, true) => "EyeReproj",
        (AutoExposureBehavior, false) => "AE Behavior",
        (AutoExposureBehavior, true) => "AEBehavior",
        (FocusDistance, false) => "Focus Distance",
        (FocusDistance, true) => "FocDist",
    }
}

pub fn mode_name(mode: CameraPropertyMode) -> &'static str {
    match mode {
        CameraPropertyMode::Off => "Off",
        CameraPropertyMode::Auto => "Auto",
        CameraPropertyMode::Manual => "Manual",
    }
}

/// Value formatted for `property`. Auto-exposure behavior values are preset names.
pub fn value_to_string(property: CameraPropertyType, value: CameraPropertyValue) -> String {
    if property == CameraPropertyType::AutoExposureBehavior {
        if let CameraPropertyValue::Int(preset) = value {
            return match preset {
                0 => "Normal".to_string(),
                1 => "Prevent Overexposure".to_string(),
                other => {
                    log::error!("Invalid AE behavior: {other}");
                    "Unknown".to_string()
                }
            };
        }
    }
    value.to_string()
}

/// Reported value that follows `current`, or `None` after the last one.
///
/// Range properties report only `[min, max]`, so cycling jumps between the bounds.
fn next_manual_value(
    info: &CameraPropertyInfo,
    current: CameraPropertyValue,
) -> Result<Option<CameraPropertyValue>, String> {
    let index = info
        .supported_values
        .iter()
        .position(|v| *v == current)
        .ok_or_else(|| format!("Error finding current value: {current}"))?;
    Ok(info.supported_values.get(index + 1).copied())
}

/// Mirrors the runtime's camera configuration.
pub struct CameraController {
    runtime: Arc<dyn Runtime>,
    infos: BTreeMap<CameraPropertyType, CameraPropertyInfo>,
}

impl CameraController {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        let infos = CameraPropertyType::ALL
            .iter()
            .map(|t| (*t, CameraPropertyInfo::default()))
            .collect();
        Self { runtime, infos }
    }

    pub fn property_types(&self) -> &'static [CameraPropertyType] {
        &CameraPropertyType::ALL
    }

    pub fn property_info(&self, property: CameraPropertyType) -> Option<&CameraPropertyInfo> {
        self.infos.get(&property)
    }

    /// Fill the cache from the runtime, or clear it when MR is not available.
    pub fn enumerate(&mut self, mr_available: bool) -> ClientResult<()> {
        for property in CameraPropertyType::ALL {
            let info = if mr_available {
                let runtime = &self.runtime;
                let read = |call, e| ClientError::runtime(call, e);
                CameraPropertyInfo {
                    config_type: runtime
                        .camera_property_config_type(property)
                        .map_err(|e| read("MRGetCameraPropertyConfigType", e))?,
                    supported_modes: runtime
                        .camera_property_modes(property)
                        .map_err(|e| read("MRGetCameraPropertyModes", e))?,
                    supported_values: runtime
                        .camera_property_values(property)
                        .map_err(|e| read("MRGetCameraPropertyValues", e))?,
                    current_mode: Some(
                        runtime
                            .camera_property_mode(property)
                            .map_err(|e| read("MRGetCameraPropertyMode", e))?,
                    ),
                    current_value: Some(
                        runtime
                            .camera_property_value(property)
                            .map_err(|e| read("MRGetCameraPropertyValue", e))?,
                    ),
                }
            } else {
                CameraPropertyInfo::default()
            };
            self.infos.insert(property, info);
        }
        Ok(())
    }

    /// Run `write` while holding the camera lock.
    fn with_camera_lock<T>(
        &self,
        write: impl FnOnce(&dyn Runtime) -> ClientResult<T>,
    ) -> ClientResult<T> {
        let locked = self
            .runtime
            .lock(LockType::Camera)
            .map_err(|e| ClientError::runtime("Lock", e))?;
        if !locked {
            log::warn!("Could not change mixed reality camera settings.");
            return Err(ClientError::LockRejected(LockType::Camera));
        }

        let result = write(self.runtime.as_ref());

        if let Err(e) = self.runtime.unlock(LockType::Camera) {
            log::error!("Unlocking camera config failed: {e}");
        }
        result
    }

    pub fn set_auto_mode(&self, property: CameraPropertyType) -> ClientResult<()> {
        self.set_mode(property, CameraPropertyMode::Auto)
    }

    /// Unsupported modes are logged and ignored.
    pub fn set_mode(&self, property: CameraPropertyType, mode: CameraPropertyMode) -> ClientResult<()> {
        let supported = self
            .infos
            .get(&property)
            .is_some_and(|info| info.supports_mode(mode));
        if !supported {
            log::warn!(
                "Requested mode ({}) not supported for property: {}",
                mode_name(mode),
                property_type_name(property, false)
            );
            return Ok(());
        }

        self.with_camera_lock(|runtime| {
            runtime
                .set_camera_property_mode(property, mode)
                .map_err(|e| ClientError::runtime("MRSetCameraPropertyMode", e))
        })
    }

    pub fn set_value(&self, property: CameraPropertyType, value: CameraPropertyValue) -> ClientResult<()> {
        self.with_camera_lock(|runtime| {
            runtime
                .set_camera_property_value(property, value)
                .map_err(|e| ClientError::runtime("MRSetCameraPropertyValue", e))
        })
    }

    /// Step to the next manual value, or to the next mode once the values run out.
    ///
    /// Switching into manual mode starts from the first supported value.
    pub fn apply_next_mode_or_value(&self, property: CameraPropertyType) -> ClientResult<()> {
        self.with_camera_lock(|runtime| {
            let info = CameraPropertyInfo {
                config_type: runtime
                    .camera_property_config_type(property)
                    .map_err(|e| ClientError::runtime("MRGetCameraPropertyConfigType", e))?,
                supported_modes: runtime
                    .camera_property_modes(property)
                    .map_err(|e| ClientError::runtime("MRGetCameraPropertyModes", e))?,
                supported_values: runtime
                    .camera_property_values(property)
                    .map_err(|e| ClientError::runtime("MRGetCameraPropertyValues", e))?,
                current_mode: None,
                current_value: None,
            };
            let mode = runtime
                .camera_property_mode(property)
                .map_err(|e| ClientError::runtime("MRGetCameraPropertyMode", e))?;

            if mode == CameraPropertyMode::Manual {
                let value = runtime
                    .camera_property_value(property)
                    .map_err(|e| ClientError::runtime("MRGetCameraPropertyValue", e))?;
                match next_manual_value(&info, value) {
                    Ok(Some(next)) => {
                        log::info!(
                            "Setting the camera property manual value to: {}",
                            value_to_string(property, next)
                        );
                        return runtime
                            .set_camera_property_value(property, next)
                            .map_err(|e| ClientError::runtime("MRSetCameraPropertyValue", e));
                    }
                    Ok(None) => {}
                    Err(message) => {
                        log::error!("{message}");
                        return Ok(());
                    }
                }
            }

            let Some(index) = info.supported_modes.iter().position(|m| *m == mode) else {
                log::error!("Error finding current mode: {}", mode_name(mode));
                return Ok(());
            };
            let next_mode = info.supported_modes[(index + 1) % info.supported_modes.len()];
            log::info!("Setting the camera property mode to: {}", mode_name(next_mode));
            if next_mode == CameraPropertyMode::Manual {
                if let Some(first) = info.supported_values.first() {
                    runtime
                        .set_camera_property_value(property, *first)
                        .map_err(|e| ClientError::runtime("MRSetCameraPropertyValue", e))?;
                }
            }
            runtime
                .set_camera_property_mode(property, next_mode)
                .map_err(|e| ClientError::runtime("MRSetCameraPropertyMode", e))
        })
    }

    /// Reset every property. The cache follows through the resulting change events.
    pub fn reset_properties_to_defaults(&self) -> ClientResult<()> {
        self.with_camera_lock(|runtime| {
            runtime
                .reset_camera_properties()
                .map_err(|e| ClientError::runtime("MRResetCameraProperties", e))
        })
    }

    /// Handle an `MrCameraPropertyChange` event.
    pub fn on_camera_property_changed(&mut self, property: CameraPropertyType) {
        let Some(info) = self.infos.get_mut(&property) else {
            return;
        };
        match self.runtime.camera_property_mode(property) {
            Ok(mode) => info.current_mode = Some(mode),
            Err(e) => log::error!("Reading camera property mode failed: {e}"),
        }
        match self.runtime.camera_property_value(property) {
            Ok(value) => info.current_value = Some(value),
            Err(e) => log::error!("Reading camera property value failed: {e}"),
        }
        log::info!(
            "EVENT: Camera prop changed: {}. {}",
            property_type_name(property, false),
            self.property_as_string(property)
        );
    }

    /// Value when in manual mode, otherwise the mode name.
    pub fn property_as_string(&self, property: CameraPropertyType) -> String {
        let Some(info) = self.infos.get(&property) else {
            return String::new();
        };
        match (info.current_mode, info.current_value) {
            (Some(CameraPropertyMode::Manual), Some(value)) => value_to_string(property, value),
            (Some(mode), _) => mode_name(mode).to_string(),
            (None, _) => "-".to_string(),
        }
    }

    /// Log the cached mode or value of every property.
    pub fn log_current_config(&self) {
        log::info!("Current camera config:");
        for property in CameraPropertyType::ALL {
            log::info!(
                "  {}: {}",
                property_type_name(property, false),
                self.property_as_string(property)
            );
        }
    }

    pub fn log_supported_properties(&self) {
        log::info!("Supported camera properties:");
        for (property, info) in &self.infos {
            let modes = if info.supported_modes.is_empty() {
                "(none)".to_string()
            } else {
                info.supported_modes
                    .iter()
                    .map(|m| mode_name(*m))
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            log::info!("  Camera property: {}", property_type_name(*property, false));
            log::info!("    Modes ({}): {modes}", info.supported_modes.len());
            match info.config_type {
                CameraPropertyConfigType::List => {
                    let values = info
                        .supported_values
                        .iter()
                        .map(|v| value_to_string(*property, *v))
                        .collect::<Vec<_>>()
                        .join(", ");
                    log::info!("    Manual values ({}): {values}", info.supported_values.len());
                }
                CameraPropertyConfigType::Range => {
                    if let [min, max] = info.supported_values.as_slice() {
                        log::info!("    Manual value range: {min} - {max}");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Event, SimulatedRuntime};

    fn controller() -> (Arc<SimulatedRuntime>, CameraController) {
        let runtime = Arc::new(SimulatedRuntime::default());
        let mut controller = CameraController::new(runtime.clone());
        controller.enumerate(true).unwrap();
        (runtime, controller)
    }

    fn drain_events(runtime: &SimulatedRuntime, controller: &mut CameraController) {
        while let Some(event) = runtime.poll_event() {
            if let Event::MrCameraPropertyChange { property } = event {
                controller.on_camera_property_changed(property);
            }
        }
    }

    #[test]
    fn test_names() {
        assert_eq!(property_type_name(CameraPropertyType::IsoValue, true), "ISO");
        assert_eq!(property_type_name(CameraPropertyType::FocusDistance, false), "Focus Distance");
        assert_eq!(
            value_to_string(CameraPropertyType::AutoExposureBehavior, CameraPropertyValue::Int(1)),
            "Prevent Overexposure"
        );
        assert_eq!(
            value_to_string(CameraPropertyType::ExposureTime, CameraPropertyValue::Double(5000.0)),
            "5000.00"
        );
    }

    #[test]
    fn test_enumerate_unavailable_clears_cache() {
        let (_runtime, mut controller) = controller();
        assert!(!controller
            .property_info(CameraPropertyType::ExposureTime)
            .unwrap()
            .supported_modes
            .is_empty());
        controller.enumerate(false).unwrap();
        assert_eq!(
            controller.property_info(CameraPropertyType::ExposureTime),
            Some(&CameraPropertyInfo::default())
        );
    }

    #[test]
    fn test_next_mode_seeds_first_value() {
        let (runtime, mut controller) = controller();
        controller
            .apply_next_mode_or_value(CameraPropertyType::ExposureTime)
            .unwrap();
        drain_events(&runtime, &mut controller);

        let info = controller.property_info(CameraPropertyType::ExposureTime).unwrap();
        assert_eq!(info.current_mode, Some(CameraPropertyMode::Manual));
        assert_eq!(info.current_value, Some(CameraPropertyValue::Double(1000.0)));
        assert_eq!(controller.property_as_string(CameraPropertyType::ExposureTime), "1000.00");

        controller
            .apply_next_mode_or_value(CameraPropertyType::ExposureTime)
            .unwrap();
        drain_events(&runtime, &mut controller);
        let info = controller.property_info(CameraPropertyType::ExposureTime).unwrap();
        assert_eq!(info.current_value, Some(CameraPropertyValue::Double(2000.0)));
    }

    #[test]
    fn test_last_value_wraps_mode() {
        let (runtime, mut controller) = controller();
        controller
            .set_mode(CameraPropertyType::IsoValue, CameraPropertyMode::Manual)
            .unwrap();
        controller
            .set_value(CameraPropertyType::IsoValue, CameraPropertyValue::Int(1600))
            .unwrap();
        controller
            .apply_next_mode_or_value(CameraPropertyType::IsoValue)
            .unwrap();
        drain_events(&runtime, &mut controller);
        assert_eq!(controller.property_as_string(CameraPropertyType::IsoValue), "Auto");
    }

    #[test]
    fn test_range_property_cycles_between_bounds() {
        let (runtime, mut controller) = controller();
        let sharpness = CameraPropertyType::Sharpness;
        controller.set_value(sharpness, CameraPropertyValue::Int(0)).unwrap();
        drain_events(&runtime, &mut controller);

        controller.apply_next_mode_or_value(sharpness).unwrap();
        drain_events(&runtime, &mut controller);
        assert_eq!(
            controller.property_info(sharpness).unwrap().current_value,
            Some(CameraPropertyValue::Int(10))
        );

        // Past the maximum the only mode is re-entered at the minimum.
        controller.apply_next_mode_or_value(sharpness).unwrap();
        drain_events(&runtime, &mut controller);
        let info = controller.property_info(sharpness).unwrap();
        assert_eq!(info.current_mode, Some(CameraPropertyMode::Manual));
        assert_eq!(info.current_value, Some(CameraPropertyValue::Int(0)));
    }

    #[test]
    fn test_value_between_bounds_is_left_alone() {
        let (runtime, controller) = controller();
        runtime.clear_calls();
        controller
            .apply_next_mode_or_value(CameraPropertyType::Sharpness)
            .unwrap();
        assert_eq!(
            runtime.count_calls(|c| matches!(
                c,
                crate::runtime::RuntimeCall::SetCameraPropertyValue(..)
                    | crate::runtime::RuntimeCall::SetCameraPropertyMode(..)
            )),
            0
        );
    }

    #[test]
    fn test_write_rejected_while_locked_elsewhere() {
        let (runtime, mut controller) = controller();
        runtime.hold_lock_as_other_client(LockType::Camera);

        let err = controller
            .set_mode(CameraPropertyType::ExposureTime, CameraPropertyMode::Manual)
            .unwrap_err();
        assert!(matches!(err, ClientError::LockRejected(LockType::Camera)));
        assert_eq!(runtime.pending_event_count(), 0);
        drain_events(&runtime, &mut controller);
        assert_eq!(controller.property_as_string(CameraPropertyType::ExposureTime), "Auto");
    }

    #[test]
    fn test_unsupported_mode_ignored() {
        let (runtime, controller) = controller();
        controller
            .set_auto_mode(CameraPropertyType::Sharpness)
            .unwrap();
        assert_eq!(runtime.count_calls(|c| matches!(c, crate::runtime::RuntimeCall::Lock(..))), 0);
    }
}
