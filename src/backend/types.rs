//! Common types shared between backends

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};

use crate::runtime::{SwapChainFormat, Viewport};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    /// Velocity targets.
    Rgba8Uint,
    Bgra8UnormSrgb,
    /// Shading-rate tiles.
    R8Uint,
    Depth32Float,
    Depth24PlusStencil8,
    Depth32FloatStencil8,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float
                | TextureFormat::Depth24PlusStencil8
                | TextureFormat::Depth32FloatStencil8
        )
    }

    pub fn has_stencil(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth24PlusStencil8 | TextureFormat::Depth32FloatStencil8
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::R8Uint => 1,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Rgba8Uint
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24PlusStencil8 => 4,
            TextureFormat::Depth32FloatStencil8 => 8,
        }
    }
}

impl From<SwapChainFormat> for TextureFormat {
    fn from(format: SwapChainFormat) -> Self {
        match format {
            SwapChainFormat::Rgba8Srgb => TextureFormat::Rgba8UnormSrgb,
            SwapChainFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
            SwapChainFormat::Rgba8Uint => TextureFormat::Rgba8Uint,
            SwapChainFormat::Depth32Float => TextureFormat::Depth32Float,
            SwapChainFormat::Depth24Stencil8 => TextureFormat::Depth24PlusStencil8,
            SwapChainFormat::Depth32FloatStencil8 => TextureFormat::Depth32FloatStencil8,
        }
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const STORAGE_BINDING = 1 << 3;
        const RENDER_ATTACHMENT = 1 << 4;
    }
}

bitflags! {
    /// Buffer usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const COPY_DST = 1 << 0;
        const VERTEX = 1 << 1;
        const INDEX = 1 << 2;
        const UNIFORM = 1 << 3;
    }
}

bitflags! {
    /// GPU nodes of a linked-adapter device a resource lives on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct NodeMask: u32 {
        const NODE_0 = 1 << 0;
        const NODE_1 = 1 << 1;
    }
}

impl NodeMask {
    /// Mask of a single node.
    pub fn node(index: u32) -> Self {
        Self::from_bits_truncate(1 << index)
    }

    /// Union mask covering the first `count` nodes.
    pub fn first(count: u32) -> Self {
        (0..count.max(1)).fold(Self::empty(), |mask, i| mask | Self::node(i))
    }
}

impl Default for NodeMask {
    fn default() -> Self {
        Self::NODE_0
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub node_mask: NodeMask,
}

impl TextureDescriptor {
    pub fn new(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.into()),
            width,
            height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
            node_mask: NodeMask::default(),
        }
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_node_mask(mut self, node_mask: NodeMask) -> Self {
        self.node_mask = node_mask;
        self
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
    pub node_mask: NodeMask,
}

impl BufferDescriptor {
    pub fn new(label: impl Into<String>, size: u64, usage: BufferUsage) -> Self {
        Self {
            label: Some(label.into()),
            size,
            usage: usage | BufferUsage::COPY_DST,
            node_mask: NodeMask::default(),
        }
    }

    pub fn with_node_mask(mut self, node_mask: NodeMask) -> Self {
        self.node_mask = node_mask;
        self
    }
}

/// Color, depth and optional velocity attachments rendered together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetDescriptor {
    pub color: super::TextureHandle,
    pub depth: Option<super::TextureHandle>,
    pub velocity: Option<super::TextureHandle>,
}

/// Pixel rectangle in a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }
}

impl From<Viewport> for Rect {
    fn from(viewport: Viewport) -> Self {
        Self {
            x: viewport.x.max(0) as u32,
            y: viewport.y.max(0) as u32,
            width: viewport.width.max(0) as u32,
            height: viewport.height.max(0) as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    /// Evaluate `value <op> reference`.
    pub fn test<T: PartialOrd>(self, value: T, reference: T) -> bool {
        match self {
            CompareFunction::Never => false,
            CompareFunction::Less => value < reference,
            CompareFunction::Equal => value == reference,
            CompareFunction::LessEqual => value <= reference,
            CompareFunction::Greater => value > reference,
            CompareFunction::NotEqual => value != reference,
            CompareFunction::GreaterEqual => value >= reference,
            CompareFunction::Always => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOperation {
    Keep,
    Zero,
    Replace,
}

/// Stencil test applied to both faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilState {
    /// Compared as `reference <compare> stored`.
    pub compare: CompareFunction,
    pub pass_op: StencilOperation,
    pub read_mask: u32,
    pub write_mask: u32,
}

impl StencilState {
    pub const DISABLED: Self = Self {
        compare: CompareFunction::Always,
        pass_op: StencilOperation::Keep,
        read_mask: 0,
        write_mask: 0,
    };

    /// Unconditionally write the reference value.
    pub const WRITE_REFERENCE: Self = Self {
        compare: CompareFunction::Always,
        pass_op: StencilOperation::Replace,
        read_mask: 0xFF,
        write_mask: 0xFF,
    };

    /// Pass where the stored value equals the reference, leave the buffer untouched.
    pub const TEST_EQUAL: Self = Self {
        compare: CompareFunction::Equal,
        pass_op: StencilOperation::Keep,
        read_mask: 0xFF,
        write_mask: 0,
    };

    pub fn is_enabled(&self) -> bool {
        *self != Self::DISABLED
    }

    /// Whether a fragment over `stored` passes with `reference`.
    pub fn passes(&self, stored: u32, reference: u32) -> bool {
        self.compare
            .test(reference & self.read_mask, stored & self.read_mask)
    }

    /// Stencil value after a passing fragment.
    pub fn apply(&self, stored: u32, reference: u32) -> u32 {
        let written = match self.pass_op {
            StencilOperation::Keep => stored,
            StencilOperation::Zero => 0,
            StencilOperation::Replace => reference,
        };
        (stored & !self.write_mask) | (written & self.write_mask)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub write_enabled: bool,
    pub compare: CompareFunction,
}

impl DepthState {
    pub const DISABLED: Self = Self {
        write_enabled: false,
        compare: CompareFunction::Always,
    };

    /// Depth test and write with the compare matching the depth convention.
    pub fn enabled(reverse_depth: bool) -> Self {
        Self {
            write_enabled: true,
            compare: if reverse_depth {
                CompareFunction::Greater
            } else {
                CompareFunction::Less
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque,
    AlphaBlend,
}

/// Pipeline variants the frame engine draws with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    Grid,
    GridBlended,
    Scene,
    SceneBlended,
    Occlusion,
    VrsVisualize,
}

impl PipelineKind {
    pub fn name(self) -> &'static str {
        match self {
            PipelineKind::Grid => "grid",
            PipelineKind::GridBlended => "grid_blended",
            PipelineKind::Scene => "scene",
            PipelineKind::SceneBlended => "scene_blended",
            PipelineKind::Occlusion => "occlusion",
            PipelineKind::VrsVisualize => "vrs_visualize",
        }
    }
}

/// Render pipeline descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDescriptor {
    pub kind: PipelineKind,
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    /// Also write motion vectors to a second color target.
    pub velocity: bool,
    pub depth: DepthState,
    pub stencil: StencilState,
    pub blend: BlendMode,
    pub node_mask: NodeMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Values written by a clearing pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
    pub stencil: u32,
}

impl ClearValues {
    /// Depth clear value for the depth convention: far maps to 0 under reverse-Z.
    pub fn depth_for(reverse_depth: bool) -> f32 {
        if reverse_depth {
            0.0
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear(ClearValues),
    Load,
}

/// What the device can do, queried once at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub adapter_name: String,
    /// Linked GPU nodes behind the device.
    pub node_count: u32,
    pub vrs_supported: bool,
    /// Pixels per shading-rate tile edge.
    pub vrs_tile_size: u32,
    pub max_texture_dimension: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            adapter_name: String::from("unknown"),
            node_count: 1,
            vrs_supported: false,
            vrs_tile_size: 16,
            max_texture_dimension: 8192,
        }
    }
}

/// Per-view constant block, laid out as the shaders expect.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewConstants {
    pub view: Mat4,
    pub projection: Mat4,
    pub inverse_view_projection: Mat4,
    /// Eye position in world space, w = 1.
    pub eye: Vec4,
    /// Width, height, 1/width, 1/height.
    pub viewport_size: Vec4,
    /// Exposure, white balance gain, velocity precision, shading-rate tile size.
    pub params: Vec4,
}

/// Vertex of the scene meshes.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneVertex {
    pub position: Vec3,
    pub normal: Vec3,
}

/// Per-instance transforms: current pose and the pose one velocity step ahead.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectRenderData {
    pub world: Mat4,
    pub next_world: Mat4,
}

/// Vertex of an occlusion mesh, already in normalized device coordinates.
pub type OcclusionVertex = Vec2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_swap_chain() {
        assert_eq!(
            TextureFormat::from(SwapChainFormat::Depth24Stencil8),
            TextureFormat::Depth24PlusStencil8
        );
        assert!(TextureFormat::from(SwapChainFormat::Depth32FloatStencil8).has_stencil());
        assert!(!TextureFormat::Depth32Float.has_stencil());
        assert!(!TextureFormat::Rgba8Uint.is_depth());
    }

    #[test]
    fn test_node_mask() {
        assert_eq!(NodeMask::node(1), NodeMask::NODE_1);
        assert_eq!(NodeMask::first(2), NodeMask::NODE_0 | NodeMask::NODE_1);
        assert_eq!(NodeMask::first(0), NodeMask::NODE_0);
    }

    #[test]
    fn test_occlusion_stencil_roundtrip() {
        // Prepass writes 1 over covered pixels.
        let stored = StencilState::WRITE_REFERENCE.apply(0, 1);
        assert_eq!(stored, 1);

        // Later passes test against 0 and never write.
        assert!(!StencilState::TEST_EQUAL.passes(stored, 0));
        assert!(StencilState::TEST_EQUAL.passes(0, 0));
        assert_eq!(StencilState::TEST_EQUAL.apply(stored, 0), stored);
    }

    #[test]
    fn test_depth_convention() {
        assert_eq!(DepthState::enabled(true).compare, CompareFunction::Greater);
        assert_eq!(DepthState::enabled(false).compare, CompareFunction::Less);
        assert_eq!(ClearValues::depth_for(true), 0.0);
        assert_eq!(ClearValues::depth_for(false), 1.0);
    }

    #[test]
    fn test_gpu_layouts() {
        assert_eq!(std::mem::size_of::<ViewConstants>(), 240);
        assert_eq!(std::mem::size_of::<SceneVertex>(), 24);
        assert_eq!(std::mem::size_of::<ObjectRenderData>(), 128);
    }

    #[test]
    fn test_rect_from_viewport() {
        let rect = Rect::from(Viewport::new(1152, 0, 1152, 1152));
        assert_eq!(rect, Rect::new(1152, 0, 1152, 1152));
        assert!(rect.contains(1152, 10));
        assert!(!rect.contains(10, 10));
    }
}
