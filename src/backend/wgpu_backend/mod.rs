//! wgpu backend implementation
//!
//! The device is created without a surface. Runtime swap-chain images are
//! represented by device-local stand-in textures keyed by their native handle;
//! the compositor hand-off itself happens through the runtime.

#[cfg(feature = "mirror-window")]
mod mirror;
mod shaders;

#[cfg(feature = "mirror-window")]
pub use mirror::MirrorSurface;

use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::frame::FrameFence;
use crate::runtime::{GraphicsApi, NativeTexture, VrsImage};

/// Buffered render pass command
#[derive(Clone)]
enum RenderCommand {
    SetPipeline(PipelineHandle),
    SetConstants { buffer: BufferHandle, offset: u32 },
    SetVertexBuffer { slot: u32, buffer: BufferHandle, offset: u64 },
    SetIndexBuffer { buffer: BufferHandle, format: IndexFormat },
    SetViewport(Rect),
    SetScissorRect(Rect),
    SetStencilReference(u32),
    SetShadingRate(Option<TextureHandle>),
    Draw { vertices: Range<u32>, instances: Range<u32> },
    DrawIndexed { indices: Range<u32>, base_vertex: i32, instances: Range<u32> },
}

/// Pending render pass with buffered commands
struct PendingRenderPass {
    target: RenderTargetHandle,
    load: LoadOp,
    commands: Vec<RenderCommand>,
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct PipelineEntry {
    pipeline: wgpu::RenderPipeline,
    kind: PipelineKind,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: DeviceCapabilities,
    device_lost: Arc<AtomicBool>,

    frame_shader: wgpu::ShaderModule,
    vrs_shader: wgpu::ShaderModule,
    constants_layout: wgpu::BindGroupLayout,
    rate_image_layout: wgpu::BindGroupLayout,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, TextureEntry>,
    imported: HashMap<NativeTexture, u64>,
    render_targets: HashMap<u64, RenderTargetDescriptor>,
    render_pipelines: HashMap<u64, PipelineEntry>,
    constant_bind_groups: HashMap<u64, wgpu::BindGroup>,
    rate_image_bind_groups: HashMap<u64, wgpu::BindGroup>,

    // Handle counters
    next_buffer_id: u64,
    next_texture_id: u64,
    next_target_id: u64,
    next_pipeline_id: u64,

    // Command encoding
    encoder: Option<wgpu::CommandEncoder>,

    // Pending pass - commands are buffered here and executed on end_pass
    pending_render_pass: Option<PendingRenderPass>,

    #[cfg(feature = "mirror-window")]
    mirror: Option<MirrorSurface>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Rgba8Uint => wgpu::TextureFormat::Rgba8Uint,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::R8Uint => wgpu::TextureFormat::R8Uint,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            TextureFormat::Depth32FloatStencil8 => wgpu::TextureFormat::Depth32FloatStencil8,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_stencil_operation(op: StencilOperation) -> wgpu::StencilOperation {
        match op {
            StencilOperation::Keep => wgpu::StencilOperation::Keep,
            StencilOperation::Zero => wgpu::StencilOperation::Zero,
            StencilOperation::Replace => wgpu::StencilOperation::Replace,
        }
    }

    fn convert_stencil_state(state: StencilState) -> wgpu::StencilState {
        if !state.is_enabled() {
            return wgpu::StencilState::default();
        }
        let face = wgpu::StencilFaceState {
            compare: Self::convert_compare_function(state.compare),
            fail_op: wgpu::StencilOperation::Keep,
            depth_fail_op: wgpu::StencilOperation::Keep,
            pass_op: Self::convert_stencil_operation(state.pass_op),
        };
        wgpu::StencilState {
            front: face,
            back: face,
            read_mask: state.read_mask,
            write_mask: state.write_mask,
        }
    }

    fn backends_for(api: GraphicsApi) -> wgpu::Backends {
        match api {
            // No D3D11 backend in wgpu; let it choose among the primary ones.
            GraphicsApi::D3D11 => wgpu::Backends::PRIMARY,
            GraphicsApi::D3D12 => wgpu::Backends::DX12,
            GraphicsApi::Gl => wgpu::Backends::GL,
            GraphicsApi::Vulkan => wgpu::Backends::VULKAN,
        }
    }

    /// Entry points of the pipeline variant.
    fn entry_points(desc: &PipelineDescriptor) -> (&'static str, &'static str) {
        match desc.kind {
            PipelineKind::Grid => ("vs_fullscreen", "fs_grid"),
            PipelineKind::GridBlended => ("vs_fullscreen", "fs_grid_blended"),
            PipelineKind::Scene | PipelineKind::SceneBlended if desc.velocity => {
                ("vs_scene", "fs_scene_velocity")
            }
            PipelineKind::Scene | PipelineKind::SceneBlended => ("vs_scene", "fs_scene"),
            PipelineKind::Occlusion => ("vs_occlusion", "fs_occlusion"),
            PipelineKind::VrsVisualize => ("vs_fullscreen", "fs_vrs"),
        }
    }
}

const SCENE_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

const INSTANCE_ATTRIBUTES: [wgpu::VertexAttribute; 8] = wgpu::vertex_attr_array![
    2 => Float32x4, 3 => Float32x4, 4 => Float32x4, 5 => Float32x4,
    6 => Float32x4, 7 => Float32x4, 8 => Float32x4, 9 => Float32x4
];

const OCCLUSION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

impl WgpuBackend {
    /// Create a headless device on the backend matching `api`.
    pub fn new(api: GraphicsApi) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(api))
    }

    pub async fn new_async(api: GraphicsApi) -> BackendResult<Self> {
        let backends = if std::env::var("WGPU_BACKEND").is_ok() {
            wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all())
        } else {
            Self::backends_for(api)
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| {
                BackendError::InitializationFailed(format!("No {} adapter found", api.name()))
            })?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let required_features =
            adapter.features() & wgpu::Features::DEPTH32FLOAT_STENCIL8;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Render Device"),
                    required_features,
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        let device_lost = Arc::new(AtomicBool::new(false));
        {
            let device_lost = device_lost.clone();
            device.on_uncaptured_error(Box::new(move |error| {
                log::error!("wgpu error: {}", error);
                if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                    device_lost.store(true, Ordering::SeqCst);
                }
            }));
        }

        let capabilities = DeviceCapabilities {
            adapter_name: adapter_info.name.clone(),
            node_count: 1,
            vrs_supported: false,
            vrs_tile_size: 16,
            max_texture_dimension: device.limits().max_texture_dimension_2d,
        };

        let frame_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Frame Shaders"),
            source: wgpu::ShaderSource::Wgsl(shaders::frame_module().into()),
        });
        let vrs_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Shading Rate Visualization"),
            source: wgpu::ShaderSource::Wgsl(shaders::vrs_module().into()),
        });

        let constants_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("View Constants Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: wgpu::BufferSize::new(
                        std::mem::size_of::<ViewConstants>() as u64
                    ),
                },
                count: None,
            }],
        });
        let rate_image_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Shading Rate Image Layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Uint,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            capabilities,
            device_lost,
            frame_shader,
            vrs_shader,
            constants_layout,
            rate_image_layout,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            imported: HashMap::new(),
            render_targets: HashMap::new(),
            render_pipelines: HashMap::new(),
            constant_bind_groups: HashMap::new(),
            rate_image_bind_groups: HashMap::new(),
            next_buffer_id: 1,
            next_texture_id: 1,
            next_target_id: 1,
            next_pipeline_id: 1,
            encoder: None,
            pending_render_pass: None,
            #[cfg(feature = "mirror-window")]
            mirror: None,
        })
    }

    /// Get the wgpu device
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Get the wgpu queue
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Present the mirror into `window` from now on.
    #[cfg(feature = "mirror-window")]
    pub fn attach_mirror(&mut self, window: Arc<winit::window::Window>) -> BackendResult<()> {
        let surface = MirrorSurface::new(&self.instance, &self.adapter, &self.device, window)?;
        self.mirror = Some(surface);
        Ok(())
    }

    #[cfg(feature = "mirror-window")]
    pub fn resize_mirror(&mut self, width: u32, height: u32) {
        if let Some(mirror) = self.mirror.as_mut() {
            mirror.resize(&self.device, width, height);
        }
    }

    fn insert_texture(&mut self, texture: wgpu::Texture, desc: &TextureDescriptor) -> TextureHandle {
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        TextureHandle(id)
    }

    fn allocate_texture(&self, desc: &TextureDescriptor, usage: wgpu::TextureUsages) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage,
            view_formats: &[],
        })
    }

    fn check_texture_size(&self, desc: &TextureDescriptor) -> BackendResult<()> {
        let max = self.capabilities.max_texture_dimension;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, max
            )));
        }
        if desc.format == TextureFormat::Depth32FloatStencil8
            && !self
                .device
                .features()
                .contains(wgpu::Features::DEPTH32FLOAT_STENCIL8)
        {
            return Err(BackendError::Unsupported(
                "Depth32FloatStencil8 textures".into(),
            ));
        }
        Ok(())
    }

    fn push_command(&mut self, command: RenderCommand) {
        if let Some(pending) = self.pending_render_pass.as_mut() {
            pending.commands.push(command);
        } else {
            log::warn!("wgpu: command recorded outside of a render pass ignored");
        }
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn import_texture(
        &mut self,
        native: NativeTexture,
        desc: &TextureDescriptor,
    ) -> BackendResult<TextureHandle> {
        if let Some(&id) = self.imported.get(&native) {
            return Ok(TextureHandle(id));
        }
        self.check_texture_size(desc)
            .map_err(|e| BackendError::ImportFailed(e.to_string()))?;

        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        if !desc.format.is_depth() && desc.format != TextureFormat::Rgba8Uint {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        let texture = self.allocate_texture(desc, usage);
        let handle = self.insert_texture(texture, desc);
        self.imported.insert(native, handle.0);
        log::debug!(
            "wgpu: imported swap chain image {} as texture {} ({:?})",
            native.0,
            handle.0,
            desc.format
        );
        Ok(handle)
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        self.check_texture_size(desc)?;
        let texture = self.allocate_texture(desc, Self::convert_texture_usage(desc.usage));
        Ok(self.insert_texture(texture, desc))
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(&texture.0) {
            entry.texture.destroy();
        }
        self.imported.retain(|_, id| *id != texture.0);
        self.rate_image_bind_groups.remove(&texture.0);
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        let attachments = std::iter::once(desc.color)
            .chain(desc.depth)
            .chain(desc.velocity);
        for texture in attachments {
            if !self.textures.contains_key(&texture.0) {
                return Err(BackendError::InvalidHandle("texture"));
            }
        }
        let id = self.next_target_id;
        self.next_target_id += 1;
        self.render_targets.insert(id, *desc);
        Ok(RenderTargetHandle(id))
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.render_targets.remove(&target.0);
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);

        Ok(BufferHandle(id))
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let buf = self
            .buffers
            .get(&buffer.0)
            .ok_or(BackendError::InvalidHandle("buffer"))?;
        let len = data.len() as u64;
        if offset + len > buf.size() {
            return Err(BackendError::OutOfBounds {
                offset,
                len,
                size: buf.size(),
            });
        }
        self.queue.write_buffer(buf, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.destroy();
        }
        self.constant_bind_groups.remove(&buffer.0);
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        if desc.stencil.is_enabled() && !desc.depth_format.is_some_and(|f| f.has_stencil()) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "{} pipeline uses stencil without a stencil format",
                desc.kind.name()
            )));
        }

        let (vs_entry, fs_entry) = Self::entry_points(desc);
        let (shader, layouts): (&wgpu::ShaderModule, Vec<&wgpu::BindGroupLayout>) = match desc.kind {
            PipelineKind::VrsVisualize => (
                &self.vrs_shader,
                vec![&self.constants_layout, &self.rate_image_layout],
            ),
            _ => (&self.frame_shader, vec![&self.constants_layout]),
        };

        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(desc.kind.name()),
                bind_group_layouts: &layouts,
                push_constant_ranges: &[],
            });

        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = match desc.kind {
            PipelineKind::Scene | PipelineKind::SceneBlended => vec![
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<SceneVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &SCENE_VERTEX_ATTRIBUTES,
                },
                wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<ObjectRenderData>() as u64,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &INSTANCE_ATTRIBUTES,
                },
            ],
            PipelineKind::Occlusion => vec![wgpu::VertexBufferLayout {
                array_stride: std::mem::size_of::<OcclusionVertex>() as u64,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &OCCLUSION_ATTRIBUTES,
            }],
            _ => Vec::new(),
        };

        let color_writes = if desc.kind == PipelineKind::Occlusion {
            wgpu::ColorWrites::empty()
        } else {
            wgpu::ColorWrites::ALL
        };
        let blend = match desc.blend {
            BlendMode::Opaque => None,
            BlendMode::AlphaBlend => Some(wgpu::BlendState::ALPHA_BLENDING),
        };
        let mut color_targets = vec![Some(wgpu::ColorTargetState {
            format: Self::convert_texture_format(desc.color_format),
            blend,
            write_mask: color_writes,
        })];
        if desc.velocity {
            let writes_velocity =
                matches!(desc.kind, PipelineKind::Scene | PipelineKind::SceneBlended);
            color_targets.push(Some(wgpu::ColorTargetState {
                format: wgpu::TextureFormat::Rgba8Uint,
                blend: None,
                write_mask: if writes_velocity {
                    wgpu::ColorWrites::ALL
                } else {
                    wgpu::ColorWrites::empty()
                },
            }));
        }

        let depth_stencil = desc.depth_format.map(|format| wgpu::DepthStencilState {
            format: Self::convert_texture_format(format),
            depth_write_enabled: desc.depth.write_enabled,
            depth_compare: Self::convert_compare_function(desc.depth.compare),
            stencil: Self::convert_stencil_state(desc.stencil),
            bias: wgpu::DepthBiasState::default(),
        });

        let cull_mode = match desc.kind {
            PipelineKind::Scene | PipelineKind::SceneBlended => Some(wgpu::Face::Back),
            _ => None,
        };

        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.kind.name()),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: shader,
                    entry_point: vs_entry,
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: shader,
                    entry_point: fs_entry,
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });

        let id = self.next_pipeline_id;
        self.next_pipeline_id += 1;
        self.render_pipelines.insert(
            id,
            PipelineEntry {
                pipeline,
                kind: desc.kind,
            },
        );

        Ok(PipelineHandle(id))
    }

    fn begin_commands(&mut self, node: u32) {
        if self.encoder.is_some() {
            // Single-node device: every node records into the same encoder.
            log::trace!("wgpu: continuing recording for node {}", node);
            return;
        }
        log::trace!("wgpu: recording for node {}", node);
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                }),
        );
    }

    fn begin_pass(&mut self, target: RenderTargetHandle, load: LoadOp) {
        // Store the pass for later execution
        self.pending_render_pass = Some(PendingRenderPass {
            target,
            load,
            commands: Vec::new(),
        });
    }

    fn end_pass(&mut self) {
        // Take the pending pass and encoder temporarily
        let Some(pending) = self.pending_render_pass.take() else {
            return;
        };
        let Some(mut encoder) = self.encoder.take() else {
            log::warn!("wgpu: render pass without begin_commands dropped");
            return;
        };
        let Some(target) = self.render_targets.get(&pending.target.0).copied() else {
            log::warn!("wgpu: render pass on unknown target {}", pending.target.0);
            self.encoder = Some(encoder);
            return;
        };

        let (color_load, depth_load, stencil_load) = match pending.load {
            LoadOp::Clear(values) => (
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: values.color[0] as f64,
                    g: values.color[1] as f64,
                    b: values.color[2] as f64,
                    a: values.color[3] as f64,
                }),
                wgpu::LoadOp::Clear(values.depth),
                wgpu::LoadOp::Clear(values.stencil),
            ),
            LoadOp::Load => (wgpu::LoadOp::Load, wgpu::LoadOp::Load, wgpu::LoadOp::Load),
        };

        {
            // Build color attachments
            let mut color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = Vec::new();
            if let Some(color) = self.textures.get(&target.color.0) {
                color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                    view: &color.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load,
                        store: wgpu::StoreOp::Store,
                    },
                }));
            }
            if let Some(velocity) = target.velocity.and_then(|v| self.textures.get(&v.0)) {
                color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                    view: &velocity.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match color_load {
                            wgpu::LoadOp::Clear(_) => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            wgpu::LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                }));
            }

            // Build depth attachment
            let depth_attachment = target
                .depth
                .and_then(|d| self.textures.get(&d.0))
                .map(|depth| wgpu::RenderPassDepthStencilAttachment {
                    view: &depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: depth_load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: depth.desc.format.has_stencil().then_some(wgpu::Operations {
                        load: stencil_load,
                        store: wgpu::StoreOp::Store,
                    }),
                });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Layer Pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let mut current_kind = None;
            let mut rate_image = None;

            // Execute buffered commands
            for cmd in &pending.commands {
                match cmd {
                    RenderCommand::SetPipeline(handle) => {
                        if let Some(entry) = self.render_pipelines.get(&handle.0) {
                            render_pass.set_pipeline(&entry.pipeline);
                            current_kind = Some(entry.kind);
                        }
                    }
                    RenderCommand::SetConstants { buffer, offset } => {
                        if let Some(bg) = self.constant_bind_groups.get(&buffer.0) {
                            render_pass.set_bind_group(0, bg, &[*offset]);
                        }
                    }
                    RenderCommand::SetVertexBuffer { slot, buffer, offset } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            render_pass.set_vertex_buffer(*slot, buf.slice(*offset..));
                        }
                    }
                    RenderCommand::SetIndexBuffer { buffer, format } => {
                        if let Some(buf) = self.buffers.get(&buffer.0) {
                            let wgpu_format = match format {
                                IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
                                IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
                            };
                            render_pass.set_index_buffer(buf.slice(..), wgpu_format);
                        }
                    }
                    RenderCommand::SetViewport(rect) => {
                        render_pass.set_viewport(
                            rect.x as f32,
                            rect.y as f32,
                            rect.width as f32,
                            rect.height as f32,
                            0.0,
                            1.0,
                        );
                    }
                    RenderCommand::SetScissorRect(rect) => {
                        render_pass.set_scissor_rect(rect.x, rect.y, rect.width, rect.height);
                    }
                    RenderCommand::SetStencilReference(reference) => {
                        render_pass.set_stencil_reference(*reference);
                    }
                    RenderCommand::SetShadingRate(texture) => {
                        rate_image = *texture;
                    }
                    RenderCommand::Draw { vertices, instances } => {
                        if current_kind == Some(PipelineKind::VrsVisualize) {
                            let Some(bg) = rate_image.and_then(|t| self.rate_image_bind_groups.get(&t.0))
                            else {
                                continue;
                            };
                            render_pass.set_bind_group(1, bg, &[]);
                        }
                        render_pass.draw(vertices.clone(), instances.clone());
                    }
                    RenderCommand::DrawIndexed { indices, base_vertex, instances } => {
                        render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone());
                    }
                }
            }
            // render_pass is dropped here, ending the pass
        }

        // Put encoder back
        self.encoder = Some(encoder);
    }

    fn set_viewport(&mut self, rect: Rect) {
        self.push_command(RenderCommand::SetViewport(rect));
    }

    fn set_scissor(&mut self, rect: Rect) {
        self.push_command(RenderCommand::SetScissorRect(rect));
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.push_command(RenderCommand::SetPipeline(pipeline));
    }

    fn set_stencil_reference(&mut self, reference: u32) {
        self.push_command(RenderCommand::SetStencilReference(reference));
    }

    fn set_constants(&mut self, buffer: BufferHandle, offset: u64) {
        if !self.constant_bind_groups.contains_key(&buffer.0) {
            let Some(buf) = self.buffers.get(&buffer.0) else {
                log::warn!("wgpu: constants from unknown buffer {}", buffer.0);
                return;
            };
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("View Constants"),
                layout: &self.constants_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buf,
                        offset: 0,
                        size: wgpu::BufferSize::new(std::mem::size_of::<ViewConstants>() as u64),
                    }),
                }],
            });
            self.constant_bind_groups.insert(buffer.0, bind_group);
        }
        self.push_command(RenderCommand::SetConstants {
            buffer,
            offset: offset as u32,
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, offset: u64) {
        self.push_command(RenderCommand::SetVertexBuffer { slot, buffer, offset });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        self.push_command(RenderCommand::SetIndexBuffer { buffer, format });
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.push_command(RenderCommand::Draw { vertices, instances });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32, instances: Range<u32>) {
        self.push_command(RenderCommand::DrawIndexed {
            indices,
            base_vertex,
            instances,
        });
    }

    fn update_shading_rate_image(
        &mut self,
        texture: TextureHandle,
        image: &VrsImage,
    ) -> BackendResult<()> {
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        if entry.desc.format != TextureFormat::R8Uint
            || entry.desc.width != image.width
            || entry.desc.height != image.height
        {
            return Err(BackendError::Unsupported(format!(
                "shading rate image {}x{} does not match {:?}",
                image.width, image.height, entry.desc.label
            )));
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &image.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(image.width),
                rows_per_image: Some(image.height),
            },
            wgpu::Extent3d {
                width: image.width,
                height: image.height,
                depth_or_array_layers: 1,
            },
        );
        if !self.rate_image_bind_groups.contains_key(&texture.0) {
            let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Shading Rate Image"),
                layout: &self.rate_image_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&entry.view),
                }],
            });
            self.rate_image_bind_groups.insert(texture.0, bind_group);
        }
        Ok(())
    }

    fn set_shading_rate_image(&mut self, texture: Option<TextureHandle>) {
        // No hardware rate images here; the texture only feeds the visualization.
        self.push_command(RenderCommand::SetShadingRate(texture));
    }

    fn copy_cross_node(&mut self, texture: TextureHandle, src_node: u32, dst_node: u32, rect: Rect) {
        log::trace!(
            "wgpu: single node device, copy of texture {} {:?} from node {} to {} skipped",
            texture.0,
            rect,
            src_node,
            dst_node
        );
    }

    #[cfg(feature = "mirror-window")]
    fn present_mirror(&mut self, texture: TextureHandle) -> BackendResult<()> {
        let Some(mirror) = self.mirror.as_mut() else {
            return Ok(());
        };
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        mirror.present(&self.device, &self.queue, &entry.view)
    }

    #[cfg(not(feature = "mirror-window"))]
    fn present_mirror(&mut self, texture: TextureHandle) -> BackendResult<()> {
        log::trace!("wgpu: no mirror window, texture {} not presented", texture.0);
        Ok(())
    }

    fn submit(&mut self, fence: &FrameFence, value: u64) -> BackendResult<()> {
        self.check_device()?;
        if self.pending_render_pass.is_some() {
            log::warn!("wgpu: submitting with an open render pass, closing it");
            self.end_pass();
        }
        let command_buffer = self.encoder.take().map(|encoder| encoder.finish());
        self.queue.submit(command_buffer);

        let fence = fence.clone();
        self.queue
            .on_submitted_work_done(move || fence.signal(value));
        Ok(())
    }

    fn wait_fence(&mut self, fence: &FrameFence, value: u64) {
        while !fence.is_complete(value) {
            if self.device_lost.load(Ordering::SeqCst) {
                log::error!("wgpu: device lost while waiting for fence value {}", value);
                return;
            }
            self.device.poll(wgpu::Maintain::Wait);
        }
    }

    fn check_device(&self) -> BackendResult<()> {
        if self.device_lost.load(Ordering::SeqCst) {
            Err(BackendError::DeviceLost)
        } else {
            Ok(())
        }
    }
}
