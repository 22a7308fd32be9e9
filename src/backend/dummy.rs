//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations. Every call is logged at
//! trace level and appended to a [`DummyRecorder`] that tests inspect to check
//! pass order, pipeline state and draw counts.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;

use super::traits::*;
use super::types::*;
use crate::frame::FrameFence;
use crate::runtime::{NativeTexture, VrsImage};

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum DummyCommand {
    ImportTexture {
        native: NativeTexture,
        texture: TextureHandle,
    },
    BeginCommands {
        node: u32,
    },
    BeginPass {
        target: RenderTargetHandle,
        node: u32,
        load: LoadOp,
    },
    EndPass,
    SetViewport(Rect),
    SetScissor(Rect),
    SetPipeline {
        pipeline: PipelineHandle,
        kind: PipelineKind,
    },
    SetStencilReference(u32),
    SetConstants {
        buffer: BufferHandle,
        offset: u64,
    },
    Draw(DrawRecord),
    UpdateShadingRate {
        texture: TextureHandle,
    },
    SetShadingRate(Option<TextureHandle>),
    CopyCrossNode {
        texture: TextureHandle,
        src_node: u32,
        dst_node: u32,
        rect: Rect,
    },
    PresentMirror(TextureHandle),
    Submit {
        value: u64,
    },
}

/// A draw together with the state it was issued with.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub node: u32,
    pub pipeline: PipelineDescriptor,
    pub stencil_reference: u32,
    pub viewport: Option<Rect>,
    pub indexed: bool,
    pub element_count: u32,
    pub instances: Range<u32>,
}

#[derive(Debug, Default)]
struct Recording {
    commands: Vec<DummyCommand>,
    textures: HashMap<u64, TextureDescriptor>,
    imported: HashMap<NativeTexture, u64>,
    render_targets: HashMap<u64, RenderTargetDescriptor>,
    buffers: HashMap<u64, Vec<u8>>,
    pipelines: HashMap<u64, PipelineDescriptor>,
    device_lost: bool,
    hold_submissions: bool,
    pending: Vec<(FrameFence, u64)>,
}

/// Shared view of everything a [`DummyBackend`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct DummyRecorder {
    recording: Arc<Mutex<Recording>>,
}

impl DummyRecorder {
    pub fn commands(&self) -> Vec<DummyCommand> {
        self.recording.lock().commands.clone()
    }

    pub fn clear(&self) {
        self.recording.lock().commands.clear();
    }

    /// Draws recorded so far, oldest first.
    pub fn draws(&self) -> Vec<DrawRecord> {
        self.recording
            .lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                DummyCommand::Draw(draw) => Some(draw.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn pipeline(&self, pipeline: PipelineHandle) -> Option<PipelineDescriptor> {
        self.recording.lock().pipelines.get(&pipeline.0).cloned()
    }

    /// Descriptors of every pipeline created for `kind`.
    pub fn pipelines_of(&self, kind: PipelineKind) -> Vec<PipelineDescriptor> {
        self.recording
            .lock()
            .pipelines
            .values()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect()
    }

    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<Vec<u8>> {
        self.recording.lock().buffers.get(&buffer.0).cloned()
    }

    pub fn texture(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.recording.lock().textures.get(&texture.0).cloned()
    }

    pub fn live_texture_count(&self) -> usize {
        self.recording.lock().textures.len()
    }

    pub fn live_buffer_count(&self) -> usize {
        self.recording.lock().buffers.len()
    }

    /// Make every later `check_device` report a lost device.
    pub fn lose_device(&self) {
        self.recording.lock().device_lost = true;
    }

    /// Keep fences unsignaled after submit until [`DummyRecorder::retire_all`].
    pub fn hold_submissions(&self, hold: bool) {
        self.recording.lock().hold_submissions = hold;
    }

    /// Signal every held submission.
    pub fn retire_all(&self) {
        let pending = std::mem::take(&mut self.recording.lock().pending);
        for (fence, value) in pending {
            fence.signal(value);
        }
    }
}

/// Dummy GPU backend.
#[derive(Debug)]
pub struct DummyBackend {
    capabilities: DeviceCapabilities,
    recorder: DummyRecorder,
    next_id: u64,
    node: u32,
    in_pass: bool,
    pipeline: Option<PipelineHandle>,
    stencil_reference: u32,
    viewport: Option<Rect>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::with_capabilities(DeviceCapabilities {
            adapter_name: String::from("Dummy Adapter"),
            ..Default::default()
        })
    }

    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Self {
        log::trace!("DummyBackend: created with {:?}", capabilities);
        Self {
            capabilities,
            recorder: DummyRecorder::default(),
            next_id: 1,
            node: 0,
            in_pass: false,
            pipeline: None,
            stencil_reference: 0,
            viewport: None,
        }
    }

    /// Handle to the call log, valid after the backend moves into the engine.
    pub fn recorder(&self) -> DummyRecorder {
        self.recorder.clone()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&self, command: DummyCommand) {
        self.recorder.recording.lock().commands.push(command);
    }

    fn record_draw(&self, indexed: bool, element_count: u32, instances: Range<u32>) {
        let mut recording = self.recorder.recording.lock();
        if !self.in_pass {
            log::warn!("DummyBackend: draw outside of a render pass ignored");
            return;
        }
        let Some(pipeline) = self
            .pipeline
            .and_then(|p| recording.pipelines.get(&p.0).cloned())
        else {
            log::warn!("DummyBackend: draw without a pipeline ignored");
            return;
        };
        log::trace!(
            "DummyBackend: draw {} x{} with {}",
            element_count,
            instances.len(),
            pipeline.kind.name()
        );
        recording.commands.push(DummyCommand::Draw(DrawRecord {
            node: self.node,
            pipeline,
            stencil_reference: self.stencil_reference,
            viewport: self.viewport,
            indexed,
            element_count,
            instances,
        }));
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn import_texture(
        &mut self,
        native: NativeTexture,
        desc: &TextureDescriptor,
    ) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: importing native texture {} {:?} ({}x{})",
            native.0,
            desc.format,
            desc.width,
            desc.height
        );
        let id = self.next_id();
        {
            let mut recording = self.recorder.recording.lock();
            recording.textures.insert(id, desc.clone());
            recording.imported.insert(native, id);
        }
        self.record(DummyCommand::ImportTexture {
            native,
            texture: TextureHandle(id),
        });
        Ok(TextureHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let id = self.next_id();
        self.recorder
            .recording
            .lock()
            .textures
            .insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        let mut recording = self.recorder.recording.lock();
        recording.textures.remove(&texture.0);
        recording.imported.retain(|_, id| *id != texture.0);
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        {
            let recording = self.recorder.recording.lock();
            let attachments = std::iter::once(desc.color)
                .chain(desc.depth)
                .chain(desc.velocity);
            for texture in attachments {
                if !recording.textures.contains_key(&texture.0) {
                    return Err(BackendError::InvalidHandle("texture"));
                }
            }
        }
        let id = self.next_id();
        self.recorder
            .recording
            .lock()
            .render_targets
            .insert(id, *desc);
        Ok(RenderTargetHandle(id))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.recorder
            .recording
            .lock()
            .render_targets
            .remove(&target.0);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.next_id();
        self.recorder
            .recording
            .lock()
            .buffers
            .insert(id, vec![0u8; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        log::trace!(
            "DummyBackend: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        let mut recording = self.recorder.recording.lock();
        let contents = recording
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::InvalidHandle("buffer"))?;
        let end = offset + data.len() as u64;
        if end > contents.len() as u64 {
            return Err(BackendError::OutOfBounds {
                offset,
                len: data.len() as u64,
                size: contents.len() as u64,
            });
        }
        contents[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.recorder.recording.lock().buffers.remove(&buffer.0);
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        log::trace!("DummyBackend: creating {} pipeline", desc.kind.name());
        if desc.stencil.is_enabled() && !desc.depth_format.is_some_and(|f| f.has_stencil()) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{} pipeline uses stencil without a stencil format",
                desc.kind.name()
            )));
        }
        let id = self.next_id();
        self.recorder
            .recording
            .lock()
            .pipelines
            .insert(id, desc.clone());
        Ok(PipelineHandle(id))
    }

    fn begin_commands(&mut self, node: u32) {
        self.node = node;
        self.record(DummyCommand::BeginCommands { node });
    }

    fn begin_pass(&mut self, target: RenderTargetHandle, load: LoadOp) {
        self.in_pass = true;
        self.pipeline = None;
        self.stencil_reference = 0;
        self.viewport = None;
        self.record(DummyCommand::BeginPass {
            target,
            node: self.node,
            load,
        });
    }

    fn end_pass(&mut self) {
        self.in_pass = false;
        self.record(DummyCommand::EndPass);
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.viewport = Some(rect);
        self.record(DummyCommand::SetViewport(rect));
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.record(DummyCommand::SetScissor(rect));
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        let kind = self
            .recorder
            .recording
            .lock()
            .pipelines
            .get(&pipeline.0)
            .map(|p| p.kind);
        let Some(kind) = kind else {
            log::warn!("DummyBackend: unknown pipeline {}", pipeline.0);
            return;
        };
        self.pipeline = Some(pipeline);
        self.record(DummyCommand::SetPipeline { pipeline, kind });
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.stencil_reference = reference;
        self.record(DummyCommand::SetStencilReference(reference));
    }

    fn set_constants(&mut self, buffer: BufferHandle, offset: u64) {
        self.record(DummyCommand::SetConstants { buffer, offset });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        log::trace!(
            "DummyBackend: vertex buffer {} at slot {} offset {}",
            buffer.0,
            slot,
            offset
        );
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        log::trace!("DummyBackend: index buffer {} {:?}", buffer.0, format);
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.record_draw(false, vertices.len() as u32, instances);
    }

    fn draw_indexed(&mut self, indices: Range<u32>, _base_vertex: i32, instances: Range<u32>) {
        self.record_draw(true, indices.len() as u32, instances);
    }

    fn update_shading_rate_image(
        &mut self,
        texture: TextureHandle,
        image: &VrsImage,
    ) -> BackendResult<()> {
        let desc = self
            .recorder
            .recording
            .lock()
            .textures
            .get(&texture.0)
            .cloned()
            .ok_or(BackendError::InvalidHandle("texture"))?;
        if desc.format != TextureFormat::R8Uint
            || desc.width != image.width
            || desc.height != image.height
        {
            return Err(BackendError::Unsupported(format!(
                "shading rate image {}x{} does not match {:?}",
                image.width, image.height, desc.label
            )));
        }
        self.record(DummyCommand::UpdateShadingRate { texture });
        Ok(())
    }

    fn set_shading_rate_image(&mut self, texture: Option<TextureHandle>) {
        self.record(DummyCommand::SetShadingRate(texture));
    }

    fn copy_cross_node(&mut self, texture: TextureHandle, src_node: u32, dst_node: u32, rect: Rect) {
        log::trace!(
            "DummyBackend: copy {:?} node {} -> {}",
            rect,
            src_node,
            dst_node
        );
        self.record(DummyCommand::CopyCrossNode {
            texture,
            src_node,
            dst_node,
            rect,
        });
    }

    fn present_mirror(&mut self, texture: TextureHandle) -> BackendResult<()> {
        self.record(DummyCommand::PresentMirror(texture));
        Ok(())
    }

    fn submit(&mut self, fence: &FrameFence, value: u64) -> BackendResult<()> {
        self.check_device()?;
        log::trace!("DummyBackend: submit, fence value {}", value);
        self.record(DummyCommand::Submit { value });

        // Signal immediately since we don't do real GPU work
        let mut recording = self.recorder.recording.lock();
        if recording.hold_submissions {
            recording.pending.push((fence.clone(), value));
        } else {
            fence.signal(value);
        }
        Ok(())
    }

    fn wait_fence(&mut self, fence: &FrameFence, value: u64) {
        if !fence.is_complete(value) {
            log::trace!("DummyBackend: waiting for fence value {}", value);
        }
        fence.wait_for_value(value);
    }

    fn check_device(&self) -> BackendResult<()> {
        if self.recorder.recording.lock().device_lost {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }
}
