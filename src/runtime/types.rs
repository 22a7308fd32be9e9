//! Session, frame, swap-chain and layer types exchanged with the runtime.

use std::fmt;

use bitflags::bitflags;
use glam::{DMat4, DVec3, Vec2};

/// Error returned by a failed runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    /// Runtime error code (never zero).
    pub code: i64,
    /// Human readable description, as reported by the runtime.
    pub message: String,
}

impl RuntimeError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Graphics API the client renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GraphicsApi {
    #[default]
    D3D11,
    D3D12,
    Gl,
    Vulkan,
}

impl GraphicsApi {
    /// Depth range convention of the API's clip space.
    pub fn clip_range(self) -> ClipRange {
        match self {
            Self::Gl => ClipRange::MinusOneToOne,
            Self::D3D11 | Self::D3D12 | Self::Vulkan => ClipRange::ZeroToOne,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::D3D11 => "d3d11",
            Self::D3D12 => "d3d12",
            Self::Gl => "gl",
            Self::Vulkan => "vk",
        }
    }
}

impl std::str::FromStr for GraphicsApi {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "d3d11" => Ok(Self::D3D11),
            "d3d12" => Ok(Self::D3D12),
            "gl" => Ok(Self::Gl),
            "vk" | "vulkan" => Ok(Self::Vulkan),
            other => Err(format!("unknown renderer: {other}")),
        }
    }
}

/// Normalized device depth range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipRange {
    ZeroToOne,
    MinusOneToOne,
}

/// Session properties queried with `SyncProperties` / `GetProperty*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    MrAvailable,
    GazeAllowed,
    HmdConnected,
    UserPresence,
}

/// Eye-relative tangents of a view frustum. Left and bottom are negative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FovTangents {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GazeStatus {
    #[default]
    Invalid,
    Adjust,
    Valid,
}

/// Gaze sample used for foveated rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gaze {
    pub status: GazeStatus,
    /// Normalized forward direction in view space (-Z is straight ahead).
    pub forward: DVec3,
    pub capture_time: i64,
    pub frame_number: i64,
}

/// Per-view frame data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewInfo {
    pub enabled: bool,
    pub view_matrix: DMat4,
    pub projection_matrix: DMat4,
}

/// Produced once per displayed frame by `WaitSync`.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub frame_number: i64,
    /// Target display time in nanoseconds.
    pub display_time: i64,
    pub views: Vec<ViewInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisplayKind {
    Context,
    Focus,
}

/// Static description of one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewDescription {
    pub width: i32,
    pub height: i32,
    pub display: DisplayKind,
    pub eye: Eye,
}

/// Which recommended texture size to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureSizeType {
    Stereo,
    Quad,
    DynamicFoveation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoseType {
    LeftEye,
    RightEye,
    Center,
}

/// Rectangle in an atlas texture, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn overlaps(&self, other: &Viewport) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

/// Runtime swap chain handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainId(pub u64);

/// Native texture handle owned by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeTexture(pub u64);

/// Texture formats the runtime can allocate swap chains in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapChainFormat {
    Rgba8Srgb,
    Rgba8Unorm,
    Rgba8Uint,
    Depth32Float,
    Depth24Stencil8,
    Depth32FloatStencil8,
}

impl SwapChainFormat {
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Self::Depth32Float | Self::Depth24Stencil8 | Self::Depth32FloatStencil8
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(self, Self::Depth24Stencil8 | Self::Depth32FloatStencil8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainConfig {
    pub texture_format: SwapChainFormat,
    pub texture_width: i32,
    pub texture_height: i32,
    pub number_of_textures: i32,
    pub texture_array_size: i32,
}

/// Region of a swap chain image referenced from a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainViewport {
    pub swap_chain: SwapChainId,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub array_index: i32,
}

impl SwapChainViewport {
    pub fn new(swap_chain: SwapChainId, viewport: Viewport) -> Self {
        Self {
            swap_chain,
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            array_index: 0,
        }
    }
}

/// One mirror window view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MirrorView {
    pub view_index: i32,
    pub viewport: SwapChainViewport,
}

bitflags! {
    /// Compositor hints for a submitted layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LayerFlags: u64 {
        /// Alpha-blend the layer over the video pass-through.
        const ALPHA_BLEND = 1 << 0;
        /// Depth-test the layer against the video depth.
        const DEPTH_TESTING = 1 << 1;
        const INVERT_ALPHA = 1 << 2;
        /// The occluded area of each view was not rendered.
        const USING_OCCLUSION_MESH = 1 << 3;
        /// Apply chroma-key masking to this layer.
        const CHROMA_KEY_MASKING = 1 << 4;
        /// The layer was rendered with foveated viewports.
        const FOVEATED = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Space {
    #[default]
    Local,
    View,
}

/// Depth swap chain attached to a layer view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewExtensionDepth {
    pub min_depth: f64,
    pub max_depth: f64,
    pub near_z: f64,
    pub far_z: f64,
    pub viewport: SwapChainViewport,
}

/// Velocity swap chain attached to a layer view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewExtensionVelocity {
    pub velocity_scale: f64,
    pub includes_hmd_motion: bool,
    pub viewport: SwapChainViewport,
}

/// One view of a multi-projection layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerMultiProjView {
    pub projection: DMat4,
    pub view: DMat4,
    pub viewport: SwapChainViewport,
    pub depth: Option<ViewExtensionDepth>,
    pub velocity: Option<ViewExtensionVelocity>,
}

/// A multi-projection layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMultiProj {
    pub flags: LayerFlags,
    pub space: Space,
    pub views: Vec<LayerMultiProjView>,
}

/// Argument of `EndFrameWithLayers`.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitInfoLayers {
    pub frame_number: i64,
    pub reserved: i32,
    pub layers: Vec<LayerMultiProj>,
}

impl SubmitInfoLayers {
    /// Submission that only advances the compositor.
    pub fn empty(frame_number: i64) -> Self {
        Self {
            frame_number,
            reserved: 0,
            layers: Vec::new(),
        }
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindingOrder {
    Clockwise,
    CounterClockwise,
}

/// 2D triangle list covering the invisible part of a view.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OcclusionMesh {
    pub vertices: Vec<Vec2>,
}

impl OcclusionMesh {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

/// Variable-rate shading rates, coarsest last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShadingRate {
    X16PerPixel,
    X8PerPixel,
    X4PerPixel,
    X2PerPixel,
    Rate1x1,
    Rate1x2,
    Rate2x1,
    Rate2x2,
    Rate2x4,
    Rate4x2,
    Rate4x4,
    Cull,
}

/// Maps the runtime's tile-rate indices to device shading rates.
pub type ShadingRateTable = [ShadingRate; 16];

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VrsFlags: u32 {
        /// Mark occluded tiles as culled.
        const OCCLUSION_MAP = 1 << 0;
        /// Views are stereo (no focus views).
        const STEREO = 1 << 1;
        /// Center the high-rate region on the gaze.
        const GAZE = 1 << 2;
    }
}

/// Request for the runtime to fill a tile-rate image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariableRateShadingConfig {
    pub view_index: u32,
    /// Viewport in tiles.
    pub viewport: Viewport,
    pub flags: VrsFlags,
    pub inner_radius: f32,
    pub outer_radius: f32,
    pub gaze: Option<Gaze>,
}

/// CPU copy of an R8 tile-rate image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VrsImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl VrsImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width * height) as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, rate: u8) {
        let index = (y * self.width + x) as usize;
        self.data[index] = rate;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonId {
    Application,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MrDeviceStatus {
    Connected,
    Disconnected,
}

/// Events delivered through `PollEvent`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    Visibility {
        visible: bool,
    },
    Foreground {
        is_foreground: bool,
    },
    StandbyStatus {
        on_standby: bool,
    },
    Button {
        button: ButtonId,
        pressed: bool,
    },
    /// Recommended texture sizes changed; swap chains must be rebuilt.
    TextureSizeChange {
        type_mask: u32,
    },
    /// The occlusion mesh of a view changed.
    VisibilityMeshChange {
        view_index: u32,
    },
    MrDeviceStatus(MrDeviceStatus),
    MrCameraPropertyChange {
        property: super::CameraPropertyType,
    },
    MrChromaKeyConfigChange,
    DataStreamStart {
        stream_id: super::StreamId,
    },
    DataStreamStop {
        stream_id: super::StreamId,
    },
}
