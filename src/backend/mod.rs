//! Backend abstraction layer
//!
//! Provides the traits and types every GPU backend implements, the recording
//! [`DummyBackend`] used in headless runs and tests, and the wgpu backend.

pub mod dummy;
pub mod traits;
pub mod types;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use dummy::{DrawRecord, DummyBackend, DummyCommand, DummyRecorder};
pub use traits::*;
pub use types::*;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuBackend;

use std::ops::Range;

use crate::error::ClientResult;
use crate::frame::FrameFence;
use crate::runtime::{GraphicsApi, NativeTexture, VrsImage};

/// The backend selected at startup.
pub enum Backend {
    Dummy(DummyBackend),
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Box<WgpuBackend>),
}

impl Backend {
    /// Create the backend for `api`. `headless` selects the recording backend
    /// regardless of the API.
    pub fn create(api: GraphicsApi, headless: bool) -> ClientResult<Self> {
        if headless {
            log::info!("Using headless backend for {}", api.name());
            return Ok(Backend::Dummy(DummyBackend::new()));
        }
        Self::create_device(api)
    }

    #[cfg(feature = "wgpu-backend")]
    fn create_device(api: GraphicsApi) -> ClientResult<Self> {
        let backend = WgpuBackend::new(api)?;
        log::info!(
            "Using wgpu backend for {} on {}",
            api.name(),
            backend.capabilities().adapter_name
        );
        Ok(Backend::Wgpu(Box::new(backend)))
    }

    #[cfg(not(feature = "wgpu-backend"))]
    fn create_device(api: GraphicsApi) -> ClientResult<Self> {
        Err(crate::error::ClientError::BackendUnavailable(format!(
            "{} requires the wgpu-backend feature",
            api.name()
        )))
    }
}

impl From<DummyBackend> for Backend {
    fn from(backend: DummyBackend) -> Self {
        Backend::Dummy(backend)
    }
}

macro_rules! dispatch {
    ($self:ident, $backend:ident => $call:expr) => {
        match $self {
            Backend::Dummy($backend) => $call,
            #[cfg(feature = "wgpu-backend")]
            Backend::Wgpu($backend) => $call,
        }
    };
}

impl GraphicsBackend for Backend {
    fn name(&self) -> &'static str {
        dispatch!(self, b => b.name())
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        dispatch!(self, b => b.capabilities())
    }

    fn import_texture(
        &mut self,
        native: NativeTexture,
        desc: &TextureDescriptor,
    ) -> BackendResult<TextureHandle> {
        dispatch!(self, b => b.import_texture(native, desc))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        dispatch!(self, b => b.create_texture(desc))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        dispatch!(self, b => b.destroy_texture(texture))
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        dispatch!(self, b => b.create_render_target(desc))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        dispatch!(self, b => b.destroy_render_target(target))
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        dispatch!(self, b => b.create_buffer(desc))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        dispatch!(self, b => b.write_buffer(buffer, offset, data))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        dispatch!(self, b => b.destroy_buffer(buffer))
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        dispatch!(self, b => b.create_pipeline(desc))
    }

    fn begin_commands(&mut self, node: u32) {
        dispatch!(self, b => b.begin_commands(node))
    }

    fn begin_pass(&mut self, target: RenderTargetHandle, load: LoadOp) {
        dispatch!(self, b => b.begin_pass(target, load))
    }

    fn end_pass(&mut self) {
        dispatch!(self, b => b.end_pass())
    }

    fn set_viewport(&mut self, rect: Rect) {
        dispatch!(self, b => b.set_viewport(rect))
    }

    fn set_scissor(&mut self, rect: Rect) {
        dispatch!(self, b => b.set_scissor(rect))
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        dispatch!(self, b => b.set_pipeline(pipeline))
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        dispatch!(self, b => b.set_stencil_reference(reference))
    }

    fn set_constants(&mut self, buffer: BufferHandle, offset: u64) {
        dispatch!(self, b => b.set_constants(buffer, offset))
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        dispatch!(self, b => b.set_vertex_buffer(slot, buffer, offset))
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        dispatch!(self, b => b.set_index_buffer(buffer, format))
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        dispatch!(self, b => b.draw(vertices, instances))
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        dispatch!(self, b => b.draw_indexed(indices, base_vertex, instances))
    }

    fn update_shading_rate_image(
        &mut self,
        texture: TextureHandle,
        image: &VrsImage,
    ) -> BackendResult<()> {
        dispatch!(self, b => b.update_shading_rate_image(texture, image))
    }

    fn set_shading_rate_image(&mut self, texture: Option<TextureHandle>) {
        dispatch!(self, b => b.set_shading_rate_image(texture))
    }

    fn copy_cross_node(&mut self, texture: TextureHandle, src_node: u32, dst_node: u32, rect: Rect) {
        dispatch!(self, b => b.copy_cross_node(texture, src_node, dst_node, rect))
    }

    fn present_mirror(&mut self, texture: TextureHandle) -> BackendResult<()> {
        dispatch!(self, b => b.present_mirror(texture))
    }

    fn submit(&mut self, fence: &FrameFence, value: u64) -> BackendResult<()> {
        dispatch!(self, b => b.submit(fence, value))
    }

    fn wait_fence(&mut self, fence: &FrameFence, value: u64) {
        dispatch!(self, b => b.wait_fence(fence, value))
    }

    fn check_device(&self) -> BackendResult<()> {
        dispatch!(self, b => b.check_device())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_backend() {
        let backend = Backend::create(GraphicsApi::D3D12, true).unwrap();
        assert_eq!(backend.name(), "Dummy Backend");
        assert_eq!(backend.capabilities().node_count, 1);
    }
}
