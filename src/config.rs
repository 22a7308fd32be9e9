//! Client configuration
//!
//! [`ClientConfig`] holds what the user asked for. [`ClientConfig::validate`]
//! resolves the dependencies between options against the device and returns
//! the [`RendererSettings`] the frame engine actually runs with.

use std::path::PathBuf;
use std::str::FromStr;

use crate::backend::{DeviceCapabilities, TextureFormat};
use crate::error::{ClientError, ClientResult};
use crate::mr_session::MrOptions;
use crate::resources::MAX_INSTANCES;
use crate::runtime::{
    ChannelFlags, CubemapMode, GraphicsApi, StreamFormat, StreamType, SwapChainFormat,
};

/// Default cap on the number of animated scene objects.
pub const DEFAULT_MAX_DONUTS: usize = 100_000;

/// Depth buffer format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthFormat {
    #[default]
    D32,
    D24S8,
    D32S8,
}

impl DepthFormat {
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24S8 | Self::D32S8)
    }

    pub fn swap_chain_format(self) -> SwapChainFormat {
        match self {
            Self::D32 => SwapChainFormat::Depth32Float,
            Self::D24S8 => SwapChainFormat::Depth24Stencil8,
            Self::D32S8 => SwapChainFormat::Depth32FloatStencil8,
        }
    }

    pub fn texture_format(self) -> TextureFormat {
        self.swap_chain_format().into()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::D32 => "d32",
            Self::D24S8 => "d24s8",
            Self::D32S8 => "d32s8",
        }
    }
}

impl FromStr for DepthFormat {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "d32" => Ok(Self::D32),
            "d24s8" => Ok(Self::D24S8),
            "d32s8" => Ok(Self::D32S8),
            other => Err(ClientError::InvalidConfig(format!(
                "unknown depth format: {other}"
            ))),
        }
    }
}

/// A data stream to start at session init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub stream_type: StreamType,
    pub format: StreamFormat,
    pub channels: ChannelFlags,
}

impl StreamRequest {
    pub fn new(stream_type: StreamType, format: StreamFormat, channels: ChannelFlags) -> Self {
        Self {
            stream_type,
            format,
            channels,
        }
    }
}

/// Options recognised by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api: GraphicsApi,
    /// Record GPU work instead of creating a device.
    pub headless: bool,
    pub stereo: bool,
    pub use_depth_layers: bool,
    pub depth_format: DepthFormat,
    pub use_reverse_depth: bool,
    pub use_occlusion_mesh: bool,
    pub use_velocity: bool,
    pub use_sli: bool,
    pub use_slave_gpu: bool,
    pub use_dynamic_viewports: bool,
    pub use_vrs: bool,
    pub visualize_vrs: bool,
    pub use_gaze: bool,
    pub render_vst: bool,
    pub depth_test_vst: bool,
    pub chroma_key_enabled: bool,
    pub no_srgb: bool,
    pub show_mirror_window: bool,
    pub draw_always: bool,
    pub disable_animation: bool,
    pub disable_vr_scene: bool,
    pub max_donuts: usize,
    pub profile_start_frame: Option<u64>,
    pub profile_frame_count: Option<usize>,
    /// Where the frame-time CSV is written.
    pub profile_output: PathBuf,
    pub print_fps: bool,
    pub client_priority: i32,
    pub video_depth_estimation: bool,
    pub vr_view_offset: f64,
    pub react_to_connection_events: bool,
    pub cubemap_mode: CubemapMode,
    pub use_markers: bool,
    pub streams: Vec<StreamRequest>,
    /// Hand stream buffers to the render thread instead of the callback thread.
    pub delayed_buffer_handling: bool,
    /// Directory for stream snapshots.
    pub snapshot_dir: PathBuf,
    /// Stop after this many rendered frames.
    pub frame_limit: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api: GraphicsApi::D3D11,
            headless: false,
            stereo: false,
            use_depth_layers: false,
            depth_format: DepthFormat::D32,
            use_reverse_depth: false,
            use_occlusion_mesh: false,
            use_velocity: false,
            use_sli: false,
            use_slave_gpu: false,
            use_dynamic_viewports: false,
            use_vrs: false,
            visualize_vrs: false,
            use_gaze: false,
            render_vst: false,
            depth_test_vst: false,
            chroma_key_enabled: false,
            no_srgb: false,
            show_mirror_window: false,
            draw_always: false,
            disable_animation: false,
            disable_vr_scene: false,
            max_donuts: DEFAULT_MAX_DONUTS,
            profile_start_frame: None,
            profile_frame_count: None,
            profile_output: PathBuf::from("frame_times.csv"),
            print_fps: false,
            client_priority: 0,
            video_depth_estimation: false,
            vr_view_offset: 1.0,
            react_to_connection_events: true,
            cubemap_mode: CubemapMode::Fixed6500K,
            use_markers: false,
            streams: Vec::new(),
            delayed_buffer_handling: false,
            snapshot_dir: PathBuf::from("."),
            frame_limit: None,
        }
    }
}

/// Frame-time sampling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileWindow {
    pub start_frame: u64,
    pub frame_count: usize,
}

/// Resolved renderer state.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererSettings {
    pub api: GraphicsApi,
    pub stereo: bool,
    /// Depth is rendered into a depth swap chain and submitted.
    pub depth_layers: bool,
    pub depth_format: DepthFormat,
    pub reverse_depth: bool,
    pub occlusion_mesh: bool,
    pub velocity: bool,
    /// GPU nodes rendered on, 1 or 2.
    pub node_count: u32,
    /// Render every view on the second node.
    pub slave_gpu: bool,
    pub dynamic_viewports: bool,
    pub vrs: bool,
    pub visualize_vrs: bool,
    pub gaze: bool,
    pub render_vst: bool,
    pub depth_test_vst: bool,
    pub chroma_key: bool,
    pub srgb: bool,
    pub mirror_window: bool,
    pub draw_always: bool,
    pub animate: bool,
    pub render_vr_scene: bool,
    /// Scene objects created, bounded by the per-frame instance budget.
    pub max_objects: usize,
    pub profile: Option<ProfileWindow>,
}

impl RendererSettings {
    pub fn sli(&self) -> bool {
        self.node_count > 1
    }

    pub fn color_format(&self) -> SwapChainFormat {
        if self.srgb {
            SwapChainFormat::Rgba8Srgb
        } else {
            SwapChainFormat::Rgba8Unorm
        }
    }

    /// GPU node that renders `view`.
    pub fn node_for_view(&self, view: usize) -> u32 {
        if !self.sli() {
            0
        } else if self.slave_gpu {
            1
        } else {
            (view % 2) as u32
        }
    }

    /// Turn video pass-through off when the MR device is missing.
    pub fn restrict_to_mr(&mut self, mr_available: bool) {
        if mr_available || !self.render_vst {
            return;
        }
        log::warn!("Video pass-through requested but mixed reality is not available");
        self.render_vst = false;
        self.depth_test_vst = false;
        self.chroma_key = false;
    }
}

impl ClientConfig {
    /// Resolve option dependencies for a device with `caps`.
    pub fn validate(&self, caps: &DeviceCapabilities) -> ClientResult<RendererSettings> {
        let mut reverse_depth = self.use_reverse_depth;
        if reverse_depth && self.api == GraphicsApi::Gl {
            log::warn!("Reverse depth is not supported with {}", self.api.name());
            reverse_depth = false;
        }

        let animate = !self.disable_animation;
        let mut velocity = self.use_velocity;
        if velocity && !animate {
            log::warn!("Velocity disabled because animation is disabled");
            velocity = false;
        }

        let depth_layers = self.use_depth_layers || reverse_depth || velocity;
        if depth_layers && !self.use_depth_layers {
            log::info!("Depth layers enabled for reverse depth or velocity");
        }

        let mut occlusion_mesh = self.use_occlusion_mesh;
        if occlusion_mesh && !self.depth_format.has_stencil() {
            log::warn!(
                "Occlusion mesh needs a stencil depth format, {} has none",
                self.depth_format.name()
            );
            occlusion_mesh = false;
        }

        let mut sli = self.use_sli;
        if sli && !matches!(self.api, GraphicsApi::D3D12 | GraphicsApi::Gl) {
            log::warn!("SLI is only supported with d3d12 and gl");
            sli = false;
        }
        if sli && caps.node_count < 2 {
            log::warn!("SLI requested but the device has {} node(s)", caps.node_count);
            sli = false;
        }
        let mut slave_gpu = self.use_slave_gpu;
        if slave_gpu && !sli {
            log::warn!("Slave GPU rendering requires SLI");
            slave_gpu = false;
        }

        if self.depth_test_vst && !depth_layers {
            return Err(ClientError::InvalidConfig(
                "VST depth testing requires depth layers".into(),
            ));
        }

        let vrs = self.use_vrs && caps.vrs_supported;
        if self.use_vrs && !vrs {
            log::warn!("Variable rate shading is not supported by {}", caps.adapter_name);
        }
        let mut visualize_vrs = self.visualize_vrs;
        if visualize_vrs && !vrs {
            log::warn!("VRS visualization requires variable rate shading");
            visualize_vrs = false;
        }

        let max_objects = self.max_donuts.min(MAX_INSTANCES as usize);
        let profile = match (self.profile_start_frame, self.profile_frame_count) {
            (Some(start_frame), Some(frame_count)) => Some(ProfileWindow {
                start_frame,
                frame_count,
            }),
            (None, None) => None,
            _ => {
                log::warn!("Profiling needs both a start frame and a frame count");
                None
            }
        };

        Ok(RendererSettings {
            api: self.api,
            stereo: self.stereo,
            depth_layers,
            depth_format: self.depth_format,
            reverse_depth,
            occlusion_mesh,
            velocity,
            node_count: if sli { 2 } else { 1 },
            slave_gpu,
            dynamic_viewports: self.use_dynamic_viewports,
            vrs,
            visualize_vrs,
            gaze: self.use_gaze,
            render_vst: self.render_vst,
            depth_test_vst: self.depth_test_vst,
            chroma_key: self.chroma_key_enabled,
            srgb: !self.no_srgb,
            mirror_window: self.show_mirror_window,
            draw_always: self.draw_always,
            animate,
            render_vr_scene: !self.disable_vr_scene,
            max_objects,
            profile,
        })
    }

    /// MR session state requested by this configuration.
    pub fn mr_options(&self) -> MrOptions {
        MrOptions {
            client_priority: self.client_priority,
            video_rendering: self.render_vst,
            video_depth_estimation: self.video_depth_estimation,
            chroma_keying: self.chroma_key_enabled,
            vr_view_offset: self.vr_view_offset,
            react_to_connection_events: self.react_to_connection_events,
            cubemap_mode: self.cubemap_mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.api, GraphicsApi::D3D11);
        assert_eq!(config.max_donuts, 100_000);
        let settings = config.validate(&caps()).unwrap();
        assert!(!settings.depth_layers);
        assert!(settings.srgb);
        assert_eq!(settings.node_count, 1);
        assert_eq!(settings.max_objects, MAX_INSTANCES as usize);
        assert!(settings.profile.is_none());
    }

    #[test]
    fn test_depth_format_parse() {
        assert_eq!("D24S8".parse::<DepthFormat>().unwrap(), DepthFormat::D24S8);
        assert!("d16".parse::<DepthFormat>().unwrap_err().is_fatal());
        assert!(!DepthFormat::D32.has_stencil());
        assert_eq!(
            DepthFormat::D32S8.texture_format(),
            TextureFormat::Depth32FloatStencil8
        );
    }

    #[test]
    fn test_reverse_depth_forces_depth_layers() {
        let config = ClientConfig {
            use_reverse_depth: true,
            ..Default::default()
        };
        let settings = config.validate(&caps()).unwrap();
        assert!(settings.reverse_depth && settings.depth_layers);

        let gl = ClientConfig {
            api: GraphicsApi::Gl,
            ..config
        };
        let settings = gl.validate(&caps()).unwrap();
        assert!(!settings.reverse_depth && !settings.depth_layers);
    }

    #[test]
    fn test_occlusion_needs_stencil() {
        let mut config = ClientConfig {
            use_occlusion_mesh: true,
            ..Default::default()
        };
        assert!(!config.validate(&caps()).unwrap().occlusion_mesh);
        config.depth_format = DepthFormat::D24S8;
        assert!(config.validate(&caps()).unwrap().occlusion_mesh);
    }

    #[test]
    fn test_velocity_rules() {
        let config = ClientConfig {
            use_velocity: true,
            ..Default::default()
        };
        let settings = config.validate(&caps()).unwrap();
        assert!(settings.velocity && settings.depth_layers);

        let still = ClientConfig {
            disable_animation: true,
            ..config
        };
        let settings = still.validate(&caps()).unwrap();
        assert!(!settings.velocity && !settings.animate);
    }

    #[test]
    fn test_sli_rules() {
        let two_nodes = DeviceCapabilities {
            node_count: 2,
            ..Default::default()
        };
        let config = ClientConfig {
            use_sli: true,
            use_slave_gpu: true,
            ..Default::default()
        };
        // d3d11 cannot drive linked nodes.
        let settings = config.validate(&two_nodes).unwrap();
        assert!(!settings.sli() && !settings.slave_gpu);

        let d3d12 = ClientConfig {
            api: GraphicsApi::D3D12,
            use_slave_gpu: false,
            ..config
        };
        let settings = d3d12.validate(&two_nodes).unwrap();
        assert!(settings.sli());
        assert_eq!(
            (0..4).map(|v| settings.node_for_view(v)).collect::<Vec<_>>(),
            vec![0, 1, 0, 1]
        );
        assert!(!d3d12.validate(&caps()).unwrap().sli());

        let slave = ClientConfig {
            use_slave_gpu: true,
            ..d3d12
        };
        let settings = slave.validate(&two_nodes).unwrap();
        assert!((0..4).all(|v| settings.node_for_view(v) == 1));
    }

    #[test]
    fn test_vst_depth_without_depth_is_fatal() {
        let config = ClientConfig {
            depth_test_vst: true,
            ..Default::default()
        };
        let err = config.validate(&caps()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_vrs_needs_device_support() {
        let config = ClientConfig {
            use_vrs: true,
            visualize_vrs: true,
            ..Default::default()
        };
        let settings = config.validate(&caps()).unwrap();
        assert!(!settings.vrs && !settings.visualize_vrs);

        let vrs_caps = DeviceCapabilities {
            vrs_supported: true,
            ..Default::default()
        };
        let settings = config.validate(&vrs_caps).unwrap();
        assert!(settings.vrs && settings.visualize_vrs);
    }

    #[test]
    fn test_vst_dropped_without_mr() {
        let config = ClientConfig {
            render_vst: true,
            chroma_key_enabled: true,
            ..Default::default()
        };
        let mut settings = config.validate(&caps()).unwrap();
        settings.restrict_to_mr(true);
        assert!(settings.render_vst);
        settings.restrict_to_mr(false);
        assert!(!settings.render_vst && !settings.chroma_key);
    }

    #[test]
    fn test_profile_window() {
        let config = ClientConfig {
            profile_start_frame: Some(10),
            profile_frame_count: Some(100),
            ..Default::default()
        };
        assert_eq!(
            config.validate(&caps()).unwrap().profile,
            Some(ProfileWindow {
                start_frame: 10,
                frame_count: 100
            })
        );
        let partial = ClientConfig {
            profile_frame_count: None,
            ..config
        };
        assert!(partial.validate(&caps()).unwrap().profile.is_none());
    }
}
