//! Simulated camera properties, chroma-key slots, locks and compositing.

use std::collections::BTreeMap;

use glam::DVec3;

use super::{invalid, Inner, LockHolder, RuntimeCall, SimState, SimulatedRuntime};
use crate::chroma_key::{key_weight, rgb_to_hsv};
use crate::runtime::*;

#[derive(Debug, Clone)]
pub(super) struct SimCameraProperty {
    pub(super) config_type: CameraPropertyConfigType,
    pub(super) modes: Vec<CameraPropertyMode>,
    pub(super) values: Vec<CameraPropertyValue>,
    pub(super) mode: CameraPropertyMode,
    pub(super) value: CameraPropertyValue,
}

impl SimCameraProperty {
    fn list(
        modes: &[CameraPropertyMode],
        values: Vec<CameraPropertyValue>,
        mode: CameraPropertyMode,
        value: CameraPropertyValue,
    ) -> Self {
        Self {
            config_type: CameraPropertyConfigType::List,
            modes: modes.to_vec(),
            values,
            mode,
            value,
        }
    }

    fn range(
        modes: &[CameraPropertyMode],
        min: CameraPropertyValue,
        max: CameraPropertyValue,
        mode: CameraPropertyMode,
        value: CameraPropertyValue,
    ) -> Self {
        Self {
            config_type: CameraPropertyConfigType::Range,
            modes: modes.to_vec(),
            values: vec![min, max],
            mode,
            value,
        }
    }

    fn accepts(&self, value: CameraPropertyValue) -> bool {
        match self.config_type {
            CameraPropertyConfigType::List => self.values.contains(&value),
            CameraPropertyConfigType::Range => match (self.values[0], self.values[1], value) {
                (CameraPropertyValue::Int(lo), CameraPropertyValue::Int(hi), CameraPropertyValue::Int(v)) => {
                    (lo..=hi).contains(&v)
                }
                (
                    CameraPropertyValue::Double(lo),
                    CameraPropertyValue::Double(hi),
                    CameraPropertyValue::Double(v),
                ) => (lo..=hi).contains(&v),
                _ => false,
            },
        }
    }
}

pub(super) fn default_camera_properties() -> BTreeMap<CameraPropertyType, SimCameraProperty> {
    use CameraPropertyMode::{Auto, Manual, Off};
    use CameraPropertyValue::{Bool, Double, Int};

    let mut properties = BTreeMap::new();
    properties.insert(
        CameraPropertyType::ExposureTime,
        SimCameraProperty::list(
            &[Auto, Manual],
            vec![Double(1000.0), Double(2000.0), Double(5000.0), Double(10000.0), Double(20000.0)],
            Auto,
            Double(5000.0),
        ),
    );
    properties.insert(
        CameraPropertyType::IsoValue,
        SimCameraProperty::list(
            &[Auto, Manual],
            vec![Int(100), Int(200), Int(400), Int(800), Int(1600)],
            Auto,
            Int(200),
        ),
    );
    properties.insert(
        CameraPropertyType::WhiteBalance,
        SimCameraProperty::list(
            &[Auto, Manual],
            vec![Int(2000), Int(3000), Int(4000), Int(5000), Int(6500), Int(8000)],
            Auto,
            Int(5000),
        ),
    );
    properties.insert(
        CameraPropertyType::FlickerCompensation,
        SimCameraProperty::list(&[Manual], vec![Int(50), Int(60)], Manual, Int(50)),
    );
    properties.insert(
        CameraPropertyType::Sharpness,
        SimCameraProperty::range(&[Manual], Int(0), Int(10), Manual, Int(4)),
    );
    properties.insert(
        CameraPropertyType::EyeReprojection,
        SimCameraProperty::list(&[Off, Manual], vec![Bool(false), Bool(true)], Off, Bool(false)),
    );
    properties.insert(
        CameraPropertyType::AutoExposureBehavior,
        SimCameraProperty::list(&[Manual], vec![Int(0), Int(1)], Manual, Int(0)),
    );
    properties.insert(
        CameraPropertyType::FocusDistance,
        SimCameraProperty::range(&[Auto, Manual], Double(0.0), Double(1.0), Auto, Double(1.0)),
    );
    properties
}

/// Slot 0 keys a saturated green screen.
pub(super) fn default_chroma_key_config() -> ChromaKeyConfig {
    ChromaKeyConfig::Hsv(ChromaKeyHsv {
        target_color: DVec3::new(0.355, 1.0, 1.0),
        tolerance: DVec3::new(0.15, 0.60, 0.92),
        falloff: DVec3::new(0.03, 0.03, 0.03),
    })
}

pub(super) fn require_lock(state: &SimState, lock: LockType) -> RuntimeResult<()> {
    match state.locks.get(&lock) {
        Some(LockHolder::Client) => Ok(()),
        _ => Err(RuntimeError::new(30, format!("{lock:?} config not locked"))),
    }
}

pub(super) fn with_property<T>(
    inner: &Inner,
    property: CameraPropertyType,
    read: impl FnOnce(&SimCameraProperty) -> T,
) -> RuntimeResult<T> {
    let state = inner.state.lock();
    state
        .camera
        .get(&property)
        .map(read)
        .ok_or_else(|| invalid("unknown camera property"))
}

pub(super) fn set_property_mode(
    inner: &Inner,
    property: CameraPropertyType,
    mode: CameraPropertyMode,
) -> RuntimeResult<()> {
    {
        let mut state = inner.state.lock();
        require_lock(&state, LockType::Camera)?;
        let entry = state
            .camera
            .get_mut(&property)
            .ok_or_else(|| invalid("unknown camera property"))?;
        if !entry.modes.contains(&mode) {
            return Err(invalid(format!("{mode:?} not supported for {property:?}")));
        }
        entry.mode = mode;
        state
            .events
            .push_back(Event::MrCameraPropertyChange { property });
    }
    inner.record(RuntimeCall::SetCameraPropertyMode(property, mode));
    Ok(())
}

pub(super) fn set_property_value(
    inner: &Inner,
    property: CameraPropertyType,
    value: CameraPropertyValue,
) -> RuntimeResult<()> {
    {
        let mut state = inner.state.lock();
        require_lock(&state, LockType::Camera)?;
        let entry = state
            .camera
            .get_mut(&property)
            .ok_or_else(|| invalid("unknown camera property"))?;
        if !entry.accepts(value) {
            return Err(invalid(format!("{value} not supported for {property:?}")));
        }
        entry.value = value;
        state
            .events
            .push_back(Event::MrCameraPropertyChange { property });
    }
    inner.record(RuntimeCall::SetCameraPropertyValue(property, value));
    Ok(())
}

pub(super) fn reset_properties(inner: &Inner) -> RuntimeResult<()> {
    {
        let mut state = inner.state.lock();
        require_lock(&state, LockType::Camera)?;
        state.camera = default_camera_properties();
        for property in CameraPropertyType::ALL {
            state
                .events
                .push_back(Event::MrCameraPropertyChange { property });
        }
    }
    inner.record(RuntimeCall::ResetCameraProperties);
    Ok(())
}

pub(super) fn set_chroma_key_config(
    inner: &Inner,
    index: usize,
    config: &ChromaKeyConfig,
) -> RuntimeResult<()> {
    {
        let mut state = inner.state.lock();
        require_lock(&state, LockType::ChromaKey)?;
        let slot = state
            .chroma_slots
            .get_mut(index)
            .ok_or_else(|| invalid("chroma key index out of range"))?;
        *slot = *config;
        state.events.push_back(Event::MrChromaKeyConfigChange);
    }
    inner.record(RuntimeCall::SetChromaKeyConfig(index));
    Ok(())
}

impl SimulatedRuntime {
    /// Take `lock` on behalf of another client.
    pub fn hold_lock_as_other_client(&self, lock: LockType) {
        self.inner
            .state
            .lock()
            .locks
            .insert(lock, LockHolder::OtherClient);
    }

    pub fn release_other_client_lock(&self, lock: LockType) {
        let mut state = self.inner.state.lock();
        if state.locks.get(&lock) == Some(&LockHolder::OtherClient) {
            state.locks.remove(&lock);
        }
    }

    /// Whether the client currently holds `lock`.
    pub fn client_holds_lock(&self, lock: LockType) -> bool {
        self.inner.state.lock().locks.get(&lock) == Some(&LockHolder::Client)
    }

    /// Composite one pixel of the last submitted layer over a video pixel.
    ///
    /// `layer` is the straight-alpha color the client rendered, `video` the
    /// camera color. Returns the displayed RGB.
    pub fn composite_pixel(&self, layer: [f32; 4], video: [f32; 3]) -> [f32; 3] {
        let state = self.inner.state.lock();
        let flags = state
            .last_submit
            .as_ref()
            .and_then(|s| s.layers.first())
            .map(|l| l.flags)
            .unwrap_or_default();

        if !state.mr.video_render {
            return [layer[0], layer[1], layer[2]];
        }

        let weight = if flags.contains(LayerFlags::CHROMA_KEY_MASKING) {
            if !state.mr.chroma_key {
                0.0
            } else {
                let hsv = rgb_to_hsv(DVec3::new(video[0] as f64, video[1] as f64, video[2] as f64));
                state
                    .chroma_slots
                    .iter()
                    .filter_map(|slot| match slot {
                        ChromaKeyConfig::Hsv(params) => Some(key_weight(params, hsv)),
                        ChromaKeyConfig::Disabled => None,
                    })
                    .fold(0.0f64, f64::max) as f32
            }
        } else if flags.contains(LayerFlags::ALPHA_BLEND) {
            layer[3]
        } else {
            1.0
        };

        let mut out = [0.0; 3];
        for c in 0..3 {
            out[c] = layer[c] * weight + video[c] * (1.0 - weight);
        }
        out
    }
}
