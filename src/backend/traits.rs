//! Core backend abstraction traits
//!
//! [`GraphicsBackend`] is the capability set the frame engine renders through.
//! Commands are recorded between [`GraphicsBackend::begin_commands`] and
//! [`GraphicsBackend::submit`]; draw state is set inside a pass.

use std::ops::Range;

use thiserror::Error;

use crate::backend::types::*;
use crate::frame::FrameFence;
use crate::runtime::{NativeTexture, VrsImage};

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to import texture: {0}")]
    ImportFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to present: {0}")]
    PresentFailed(String),
    #[error("Write of {len} bytes at offset {offset} exceeds buffer size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a set of attachments rendered together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetHandle(pub(crate) u64);

/// Handle to a render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &DeviceCapabilities;

    // Resources

    /// Wrap a runtime-owned swap-chain image without copying.
    fn import_texture(
        &mut self,
        native: NativeTexture,
        desc: &TextureDescriptor,
    ) -> BackendResult<TextureHandle>;

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    fn destroy_texture(&mut self, texture: TextureHandle);

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle>;

    fn destroy_render_target(&mut self, target: RenderTargetHandle);

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    fn destroy_buffer(&mut self, buffer: BufferHandle);

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle>;

    // Command recording

    /// Start recording for GPU node `node`.
    fn begin_commands(&mut self, node: u32);

    fn begin_pass(&mut self, target: RenderTargetHandle, load: LoadOp);

    fn end_pass(&mut self);

    fn set_viewport(&mut self, rect: Rect);

    fn set_scissor(&mut self, rect: Rect);

    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    fn set_stencil_reference(&mut self, reference: u32);

    /// Bind a constant block at `offset` of `buffer`.
    fn set_constants(&mut self, buffer: BufferHandle, offset: u64);

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64);

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>);

    // Variable rate shading

    /// Upload a CPU tile-rate image into an `R8Uint` texture.
    fn update_shading_rate_image(
        &mut self,
        texture: TextureHandle,
        image: &VrsImage,
    ) -> BackendResult<()>;

    /// Steer the rasterizer with `texture`, or restore full-rate shading.
    fn set_shading_rate_image(&mut self, texture: Option<TextureHandle>);

    // Multi-GPU and presentation

    /// Copy `rect` of `texture` from node `src_node` to node `dst_node`.
    fn copy_cross_node(&mut self, texture: TextureHandle, src_node: u32, dst_node: u32, rect: Rect);

    /// Show `texture` in the OS mirror window.
    fn present_mirror(&mut self, texture: TextureHandle) -> BackendResult<()>;

    /// Execute everything recorded since `begin_commands`; `fence` reaches
    /// `value` once the GPU retires it.
    fn submit(&mut self, fence: &FrameFence, value: u64) -> BackendResult<()>;

    /// Block until `fence` reaches `value`, driving the device if needed.
    fn wait_fence(&mut self, fence: &FrameFence, value: u64);

    /// Report a device lost during earlier work.
    fn check_device(&self) -> BackendResult<()>;
}
