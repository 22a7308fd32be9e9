//! Mixed-reality session switches
//!
//! [`MrSession`] applies a desired [`MrOptions`] state to the runtime, logging
//! every option that changes, and reacts to MR device connect and disconnect
//! events.

use std::sync::Arc;

use crate::error::{ClientError, ClientResult};
use crate::runtime::{
    CubemapMode, EnvironmentCubemapConfig, Event, LockType, MrDeviceStatus, PropertyKey, Runtime,
};

/// Desired MR state.
#[derive(Debug, Clone, PartialEq)]
pub struct MrOptions {
    pub client_priority: i32,
    pub video_rendering: bool,
    pub video_depth_estimation: bool,
    pub chroma_keying: bool,
    /// 0 renders VR from the user's eyes, 1 from the video cameras.
    pub vr_view_offset: f64,
    /// Turn video rendering back on when the MR device reconnects.
    pub react_to_connection_events: bool,
    pub cubemap_mode: CubemapMode,
}

impl Default for MrOptions {
    fn default() -> Self {
        Self {
            client_priority: 0,
            video_rendering: false,
            video_depth_estimation: false,
            chroma_keying: false,
            vr_view_offset: 1.0,
            react_to_connection_events: true,
            cubemap_mode: CubemapMode::Fixed6500K,
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "ON"
    } else {
        "OFF"
    }
}

fn cubemap_mode_name(mode: CubemapMode) -> &'static str {
    match mode {
        CubemapMode::AutoAdapt => "Auto Adapt",
        CubemapMode::Fixed6500K => "Fixed 6500K",
    }
}

pub struct MrSession {
    runtime: Arc<dyn Runtime>,
    options: MrOptions,
    mr_available: bool,
}

impl MrSession {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self {
            runtime,
            options: MrOptions::default(),
            mr_available: false,
        }
    }

    /// Query MR availability and apply `options` in full.
    ///
    /// Returns whether MR features are available.
    pub fn init(&mut self, options: MrOptions) -> ClientResult<bool> {
        self.runtime
            .sync_properties()
            .map_err(|e| ClientError::runtime("SyncProperties", e))?;
        let available = self
            .runtime
            .property_bool(PropertyKey::MrAvailable)
            .unwrap_or(false);

        self.options = options;
        self.mr_available = available;
        if available {
            log::info!("Mixed Reality features available");
        } else {
            log::warn!("Mixed Reality features not available");
        }
        let desired = self.options.clone();
        self.apply(desired, true)?;
        Ok(available)
    }

    pub fn options(&self) -> &MrOptions {
        &self.options
    }

    pub fn mr_available(&self) -> bool {
        self.mr_available
    }

    /// Whether the compositor is currently showing video pass-through.
    pub fn video_rendering(&self) -> bool {
        self.options.video_rendering
    }

    pub fn set_video_rendering(&mut self, enabled: bool) -> ClientResult<()> {
        let result = self
            .runtime
            .set_video_render(enabled)
            .map_err(|e| ClientError::runtime("MRSetVideoRender", e));
        if result.is_ok() {
            log::info!("Video rendering: {}", on_off(enabled));
        }
        self.options.video_rendering = enabled && result.is_ok();
        result
    }

    /// Apply `desired`, touching only options that differ unless `force` is set.
    ///
    /// Every option is attempted; the first failure is returned.
    pub fn apply(&mut self, desired: MrOptions, force: bool) -> ClientResult<()> {
        let previous = std::mem::replace(&mut self.options, desired.clone());
        let mut first_error: Option<ClientError> = None;
        let mut note = |result: ClientResult<()>| {
            if let Err(e) = result {
                log::error!("{e}");
                first_error.get_or_insert(e);
            }
        };

        if force || desired.client_priority != previous.client_priority {
            let result = self
                .runtime
                .set_priority(desired.client_priority)
                .map_err(|e| ClientError::runtime("SessionSetPriority", e));
            if result.is_ok() {
                log::info!("Client priority: {}", desired.client_priority);
            }
            note(result);
        }

        if !self.mr_available {
            if desired.video_rendering {
                log::warn!("Video pass-through requested but Mixed Reality is not available");
                self.options.video_rendering = false;
                if previous.video_rendering {
                    note(
                        self.runtime
                            .set_video_render(false)
                            .map_err(|e| ClientError::runtime("MRSetVideoRender", e)),
                    );
                }
            }
            return first_error.map_or(Ok(()), Err);
        }

        if force || desired.video_rendering != previous.video_rendering {
            let result = self
                .runtime
                .set_video_render(desired.video_rendering)
                .map_err(|e| ClientError::runtime("MRSetVideoRender", e));
            match &result {
                Ok(()) => log::info!("Video rendering: {}", on_off(desired.video_rendering)),
                Err(_) => self.options.video_rendering = false,
            }
            note(result);
        }

        if force || desired.video_depth_estimation != previous.video_depth_estimation {
            let result = self
                .runtime
                .set_video_depth_estimation(desired.video_depth_estimation)
                .map_err(|e| ClientError::runtime("MRSetVideoDepthEstimation", e));
            if result.is_ok() {
                log::info!(
                    "Video depth estimation: {}",
                    on_off(desired.video_depth_estimation)
                );
            }
            note(result);
        }

        if force || desired.chroma_keying != previous.chroma_keying {
            let result = self
                .runtime
                .set_chroma_key(desired.chroma_keying)
                .map_err(|e| ClientError::runtime("MRSetChromaKey", e));
            if result.is_ok() {
                log::info!("Chroma keying: {}", on_off(desired.chroma_keying));
            }
            note(result);
        }

        if force || desired.vr_view_offset != previous.vr_view_offset {
            let result = self
                .runtime
                .set_vr_view_offset(desired.vr_view_offset)
                .map_err(|e| ClientError::runtime("MRSetVRViewOffset", e));
            if result.is_ok() {
                log::info!("VR view offset: {:.1}", desired.vr_view_offset);
            }
            note(result);
        }

        if force || desired.react_to_connection_events != previous.react_to_connection_events {
            log::info!(
                "Handling connection events: {}",
                on_off(desired.react_to_connection_events)
            );
        }

        if force || desired.cubemap_mode != previous.cubemap_mode {
            note(self.set_cubemap_mode(desired.cubemap_mode));
        }

        first_error.map_or(Ok(()), Err)
    }

    fn set_cubemap_mode(&self, mode: CubemapMode) -> ClientResult<()> {
        let locked = self
            .runtime
            .lock(LockType::EnvironmentCubemap)
            .map_err(|e| ClientError::runtime("Lock", e))?;
        if !locked {
            log::warn!("Could not change cubemap config.");
            return Err(ClientError::LockRejected(LockType::EnvironmentCubemap));
        }

        let result = self
            .runtime
            .set_environment_cubemap_config(&EnvironmentCubemapConfig { mode })
            .map_err(|e| ClientError::runtime("MRSetEnvironmentCubemapConfig", e));
        if result.is_ok() {
            log::info!("Cubemap mode: {}", cubemap_mode_name(mode));
        }

        if let Err(e) = self.runtime.unlock(LockType::EnvironmentCubemap) {
            log::error!("Unlocking cubemap config failed: {e}");
        }
        result
    }

    /// React to an MR device connecting or disconnecting.
    pub fn on_mr_available(&mut self, available: bool, force_set_state: bool) -> ClientResult<()> {
        self.mr_available = available;

        if available {
            if self.options.react_to_connection_events && !self.options.video_rendering {
                log::info!("Enabling video rendering on MR available event..");
                self.set_video_rendering(true)?;
            }
        } else {
            log::error!("Mixed Reality features not available.");
            if self.options.react_to_connection_events && self.options.video_rendering {
                log::info!("Disabling video rendering on MR unavailable event..");
                self.set_video_rendering(false)?;
            }
        }

        if force_set_state {
            let desired = self.options.clone();
            self.apply(desired, true)?;
        }
        Ok(())
    }

    /// Handle a runtime event. Returns `true` if MR availability changed.
    pub fn handle_event(&mut self, event: &Event) -> ClientResult<bool> {
        match event {
            Event::MrDeviceStatus(status) => {
                let available = *status == MrDeviceStatus::Connected;
                log::info!(
                    "EVENT: Mixed reality device status: {}",
                    if available { "Connected" } else { "Disconnected" }
                );
                let changed = available != self.mr_available;
                // A connecting device has none of our state yet.
                self.on_mr_available(available, available)?;
                Ok(changed)
            }
            Event::DataStreamStart { stream_id } => {
                log::info!("EVENT: Data stream started: id={}", stream_id.0);
                Ok(false)
            }
            Event::DataStreamStop { stream_id } => {
                log::info!("EVENT: Data stream stopped: id={}", stream_id.0);
                Ok(false)
            }
            Event::MrChromaKeyConfigChange => {
                log::info!("EVENT: Chroma key config changed");
                Ok(false)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RuntimeCall, SimulatedConfig, SimulatedRuntime};

    fn session(options: MrOptions) -> (Arc<SimulatedRuntime>, MrSession) {
        let runtime = Arc::new(SimulatedRuntime::default());
        let mut session = MrSession::new(runtime.clone());
        session.init(options).unwrap();
        (runtime, session)
    }

    #[test]
    fn test_init_forces_every_option() {
        let (runtime, session) = session(MrOptions {
            video_rendering: true,
            client_priority: 3,
            ..Default::default()
        });
        assert!(session.mr_available());
        let state = runtime.mr_state();
        assert!(state.video_render);
        assert_eq!(state.priority, 3);
        assert_eq!(state.vr_view_offset, 1.0);
        assert_eq!(
            runtime.count_calls(|c| matches!(c, RuntimeCall::SetEnvironmentCubemapConfig(_))),
            1
        );
    }

    #[test]
    fn test_apply_only_changed_options() {
        let (runtime, mut session) = session(MrOptions::default());
        runtime.clear_calls();

        let mut desired = session.options().clone();
        desired.video_depth_estimation = true;
        session.apply(desired, false).unwrap();

        assert_eq!(runtime.calls(), vec![RuntimeCall::SetVideoDepthEstimation(true)]);
    }

    #[test]
    fn test_unavailable_disables_video() {
        let runtime = Arc::new(SimulatedRuntime::new(SimulatedConfig {
            mr_available: false,
            ..Default::default()
        }));
        let mut session = MrSession::new(runtime.clone());
        let available = session
            .init(MrOptions {
                video_rendering: true,
                ..Default::default()
            })
            .unwrap();
        assert!(!available);
        assert!(!session.video_rendering());
        assert!(!runtime.mr_state().video_render);
    }

    #[test]
    fn test_reconnect_restores_video() {
        let (runtime, mut session) = session(MrOptions {
            video_rendering: true,
            ..Default::default()
        });

        assert!(session
            .handle_event(&Event::MrDeviceStatus(MrDeviceStatus::Disconnected))
            .unwrap());
        assert!(!runtime.mr_state().video_render);
        assert!(!session.video_rendering());

        assert!(session
            .handle_event(&Event::MrDeviceStatus(MrDeviceStatus::Connected))
            .unwrap());
        assert!(runtime.mr_state().video_render);
    }

    #[test]
    fn test_connect_after_unavailable_start_sends_every_option() {
        let runtime = Arc::new(SimulatedRuntime::new(SimulatedConfig {
            mr_available: false,
            ..Default::default()
        }));
        let mut session = MrSession::new(runtime.clone());
        assert!(!session
            .init(MrOptions {
                video_rendering: true,
                video_depth_estimation: true,
                chroma_keying: true,
                vr_view_offset: 0.5,
                cubemap_mode: CubemapMode::AutoAdapt,
                ..Default::default()
            })
            .unwrap());
        assert_eq!(
            runtime.count_calls(|c| matches!(c, RuntimeCall::SetVideoDepthEstimation(_))),
            0
        );

        runtime.set_mr_connected(true);
        runtime.clear_calls();
        assert!(session
            .handle_event(&Event::MrDeviceStatus(MrDeviceStatus::Connected))
            .unwrap());

        let calls = runtime.calls();
        for expected in [
            RuntimeCall::SetVideoRender(true),
            RuntimeCall::SetVideoDepthEstimation(true),
            RuntimeCall::SetChromaKey(true),
            RuntimeCall::SetVrViewOffset(0.5),
            RuntimeCall::SetEnvironmentCubemapConfig(CubemapMode::AutoAdapt),
        ] {
            assert!(calls.contains(&expected), "missing {expected:?} in {calls:?}");
        }
        let state = runtime.mr_state();
        assert!(state.video_render);
        assert!(state.video_depth_estimation);
        assert!(state.chroma_key);
        assert_eq!(state.vr_view_offset, 0.5);
        assert_eq!(state.cubemap.mode, CubemapMode::AutoAdapt);
    }

    #[test]
    fn test_cubemap_lock_rejected() {
        let (runtime, mut session) = session(MrOptions::default());
        runtime.hold_lock_as_other_client(LockType::EnvironmentCubemap);

        let mut desired = session.options().clone();
        desired.cubemap_mode = CubemapMode::AutoAdapt;
        let err = session.apply(desired, false).unwrap_err();
        assert!(matches!(
            err,
            ClientError::LockRejected(LockType::EnvironmentCubemap)
        ));
        assert_eq!(runtime.mr_state().cubemap.mode, CubemapMode::Fixed6500K);
    }
}
