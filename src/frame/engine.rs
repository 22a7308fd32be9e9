//! The per-frame render loop.
//!
//! Each rendered frame runs, in order:
//! 1. `WaitSync` and scene animation
//! 2. `BeginFrameWithLayers` and swap-chain acquire
//! 3. instance upload for every GPU node
//! 4. per enabled view: viewport, VRS, constants, occlusion prepass, grid, scene
//! 5. SLI copies, mirror, GPU submit
//! 6. release and `EndFrameWithLayers`
//!
//! Events that change the swap chains are deferred to the next frame
//! boundary; occlusion meshes are rebuilt as soon as the GPU is idle.

use std::sync::Arc;

use glam::{DMat4, Vec4};

use crate::backend::{
    ClearValues, GraphicsBackend, IndexFormat, LoadOp, NodeMask, Rect, RenderTargetHandle,
    TextureFormat, TextureHandle, ViewConstants,
};
use crate::config::RendererSettings;
use crate::context::Context;
use crate::error::{ClientError, ClientResult};
use crate::pipeline::{OcclusionMeshes, PipelineSet, PipelineSettings, VrsMap, OCCLUDED_VIEWS};
use crate::resources::{ConstantRing, GpuGeometry, MAX_INSTANCES, MIN_CONSTANT_SLOTS};
use crate::runtime::projection::{projection_from_tangents, update_near_far_planes};
use crate::runtime::{
    ButtonId, Event, FrameInfo, Gaze, LayerFlags, PoseType, Runtime, Space, Viewport,
};
use crate::view::{LayerConfig, MultiLayerView, ViewSubmission, ViewportSets};

use super::in_flight::{InFlightRing, FRAMES_IN_FLIGHT};
use super::scene::{
    gaze_object_position, scene_meshes, velocity_scale, Scene, GAZE_OBJECT_DISTANCE,
    VELOCITY_PRECISION,
};

/// Near clip distance in meters.
pub const NEAR_PLANE: f64 = 0.1;
/// Far clip distance in meters.
pub const FAR_PLANE: f64 = 1000.0;

const CLEAR_COLOR: [f32; 4] = [0.15, 0.15, 0.18, 1.0];

/// What happened to one iteration of the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Not visible and not drawing always; nothing was synced.
    Idle,
    /// VR rendering is off; an empty frame kept the compositor going.
    Invalidated,
    Rendered(FrameReport),
    /// A transient error dropped the frame after it was reported.
    Abandoned,
}

/// Summary of a rendered frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame_number: i64,
    pub views_rendered: usize,
    pub foveated: bool,
    pub layer_flags: LayerFlags,
    pub instance_count: u32,
    pub dropped_instances: u32,
}

/// Video pass-through switches that may change while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VstState {
    pub render: bool,
    pub depth_test: bool,
    pub chroma_key: bool,
}

/// Depth values submitted for the near and far planes.
pub fn clip_planes(reverse_depth: bool) -> (f64, f64) {
    if reverse_depth {
        (FAR_PLANE, NEAR_PLANE)
    } else {
        (NEAR_PLANE, FAR_PLANE)
    }
}

/// Layer flags for the current render state.
pub fn layer_flags(vst: VstState, foveated: bool, occlusion_mesh: bool) -> LayerFlags {
    let mut flags = LayerFlags::empty();
    if vst.render {
        flags |= LayerFlags::ALPHA_BLEND;
    }
    if foveated {
        flags |= LayerFlags::FOVEATED;
    }
    if vst.depth_test {
        flags |= LayerFlags::DEPTH_TESTING;
    }
    if occlusion_mesh {
        flags |= LayerFlags::USING_OCCLUSION_MESH;
    }
    if vst.chroma_key {
        flags |= LayerFlags::CHROMA_KEY_MASKING;
    }
    flags
}

fn view_constants(view: &DMat4, projection: &DMat4, viewport: Viewport, tile_size: u32) -> ViewConstants {
    let view_f = view.as_mat4();
    let projection_f = projection.as_mat4();
    let width = viewport.width.max(1) as f32;
    let height = viewport.height.max(1) as f32;
    ViewConstants {
        view: view_f,
        projection: projection_f,
        inverse_view_projection: (projection_f * view_f).inverse(),
        eye: view.inverse().w_axis.as_vec4(),
        viewport_size: Vec4::new(width, height, 1.0 / width, 1.0 / height),
        params: Vec4::new(1.0, 1.0, VELOCITY_PRECISION as f32, tile_size as f32),
    }
}

/// Drives rendering of the client's layer into the runtime swap chains.
pub struct FrameEngine {
    runtime: Arc<dyn Runtime>,
    context: Context,
    settings: RendererSettings,
    view: MultiLayerView,
    viewports: ViewportSets,
    pipelines: PipelineSet,
    occlusion: Option<OcclusionMeshes>,
    vrs: Option<VrsMap>,
    geometries: Vec<GpuGeometry>,
    constants: Vec<ConstantRing>,
    ring: InFlightRing,
    scene: Scene,
    vst: VstState,
    visible: bool,
    render_vr: bool,
    resize_pending: bool,
    frames_rendered: u64,
}

impl FrameEngine {
    pub fn new<B: GraphicsBackend + ?Sized>(
        runtime: Arc<dyn Runtime>,
        backend: &mut B,
        settings: RendererSettings,
        context: Context,
    ) -> ClientResult<Self> {
        let node_count = settings.node_count.max(1);
        let node_mask = NodeMask::first(node_count);
        let viewports =
            ViewportSets::new(runtime.as_ref(), settings.stereo, settings.dynamic_viewports);
        let atlas = viewports.atlas_size();

        let depth_format = settings.depth_format;
        let layer = LayerConfig {
            color_format: settings.color_format(),
            depth_format: settings
                .depth_layers
                .then(|| depth_format.swap_chain_format()),
            velocity: settings.velocity,
            local_depth_format: (!settings.depth_layers).then(|| depth_format.texture_format()),
            space: Space::Local,
        };
        let mut view = MultiLayerView::new(
            Arc::clone(&runtime),
            backend,
            settings.api,
            vec![layer],
            atlas,
            node_mask,
        )?;
        if settings.mirror_window {
            let aspect = viewports.static_set().get(0).map_or(1.0, |vp| vp.aspect());
            view.create_mirror(backend, aspect)?;
        }

        let pipelines = PipelineSet::create(
            backend,
            &PipelineSettings {
                color_format: TextureFormat::from(settings.color_format()),
                depth_format: Some(depth_format.texture_format()),
                velocity: settings.velocity,
                reverse_depth: settings.reverse_depth,
                occlusion_mesh: settings.occlusion_mesh,
                visualize_vrs: settings.visualize_vrs,
                node_mask,
            },
        )?;
        let occlusion = settings
            .occlusion_mesh
            .then(|| OcclusionMeshes::new(runtime.as_ref(), backend, node_count))
            .transpose()?;
        let vrs = settings
            .vrs
            .then(|| VrsMap::new(backend, atlas, node_count, settings.stereo, settings.gaze))
            .transpose()?;

        let mut geometries = Vec::new();
        for mesh in scene_meshes() {
            geometries.push(GpuGeometry::upload(backend, &mesh, node_mask)?);
        }
        let mut constants = Vec::with_capacity(node_count as usize);
        for node in 0..node_count {
            constants.push(ConstantRing::new(
                backend,
                MIN_CONSTANT_SLOTS,
                NodeMask::node(node),
                &format!("view_constants_node{node}"),
            )?);
        }
        let ring = InFlightRing::new(backend, FRAMES_IN_FLIGHT, node_count, MAX_INSTANCES)?;

        let mut scene = Scene::new(settings.max_objects);
        scene.set_render_vr_scene(settings.render_vr_scene);

        log::info!(
            "Frame engine ready: {} views, atlas {}x{}, {} node(s), depth {}{}",
            viewports.view_count(),
            atlas.0,
            atlas.1,
            node_count,
            depth_format.name(),
            if settings.reverse_depth { " (reversed)" } else { "" }
        );

        let vst = VstState {
            render: settings.render_vst,
            depth_test: settings.depth_test_vst,
            chroma_key: settings.chroma_key,
        };
        Ok(Self {
            runtime,
            context,
            settings,
            view,
            viewports,
            pipelines,
            occlusion,
            vrs,
            geometries,
            constants,
            ring,
            scene,
            vst,
            visible: true,
            render_vr: true,
            resize_pending: false,
            frames_rendered: 0,
        })
    }

    pub fn settings(&self) -> &RendererSettings {
        &self.settings
    }

    pub fn view(&self) -> &MultiLayerView {
        &self.view
    }

    pub fn viewports(&self) -> &ViewportSets {
        &self.viewports
    }

    pub fn pipelines(&self) -> &PipelineSet {
        &self.pipelines
    }

    pub fn occlusion(&self) -> Option<&OcclusionMeshes> {
        self.occlusion.as_ref()
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn vst(&self) -> VstState {
        self.vst
    }

    /// Follow the MR session's pass-through state.
    pub fn set_vst(&mut self, vst: VstState) {
        if vst != self.vst {
            log::info!(
                "Layer compositing: blend {}, depth test {}, chroma key {}",
                vst.render,
                vst.depth_test,
                vst.chroma_key
            );
        }
        self.vst = vst;
    }

    /// Turn VR rendering off to only keep the compositor fed with empty frames.
    pub fn set_render_vr(&mut self, enabled: bool) {
        if enabled != self.render_vr {
            log::info!("VR rendering: {}", if enabled { "ON" } else { "OFF" });
        }
        self.render_vr = enabled;
    }

    pub fn render_vr(&self) -> bool {
        self.render_vr
    }

    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// React to a runtime event. Returns whether the engine consumed it.
    pub fn handle_event<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        event: &Event,
    ) -> ClientResult<bool> {
        match *event {
            Event::Visibility { visible } => {
                log::info!("Visible: {visible}");
                self.visible = visible;
            }
            Event::Button {
                button: ButtonId::Application,
                pressed: true,
            } => {
                log::info!("Requesting gaze calibration");
                if let Err(e) = self.runtime.request_gaze_calibration() {
                    self.context
                        .report(&ClientError::runtime("RequestGazeCalibration", e));
                }
            }
            Event::TextureSizeChange { type_mask } => {
                log::info!("Texture sizes changed (mask {type_mask:#x})");
                self.resize_pending = true;
            }
            Event::VisibilityMeshChange { view_index } => {
                let Some(occlusion) = self.occlusion.as_mut() else {
                    return Ok(true);
                };
                self.ring.wait_idle(backend);
                occlusion.rebuild(self.runtime.as_ref(), backend, view_index as usize)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Rebuild the swap chains and atlas-sized resources at current sizes.
    fn apply_resize<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> ClientResult<()> {
        self.resize_pending = false;
        self.ring.wait_idle(backend);

        self.viewports = ViewportSets::new(
            self.runtime.as_ref(),
            self.settings.stereo,
            self.settings.dynamic_viewports,
        );
        let atlas = self.viewports.atlas_size();
        self.view.recreate_swap_chains(backend, atlas)?;

        if let Some(vrs) = self.vrs.take() {
            vrs.destroy(backend);
            self.vrs = Some(VrsMap::new(
                backend,
                atlas,
                self.settings.node_count.max(1),
                self.settings.stereo,
                self.settings.gaze,
            )?);
        }
        Ok(())
    }

    /// Run one iteration of the frame loop.
    ///
    /// Transient errors are reported through the context and turn into
    /// [`FrameOutcome::Abandoned`]; fatal errors are returned.
    pub fn frame<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> ClientResult<FrameOutcome> {
        self.frame_with(backend, |_, _| {})
    }

    /// Like [`FrameEngine::frame`], calling `on_sync` with the fresh frame
    /// info once the runtime has synced and before anything is drawn.
    pub fn frame_with<B, F>(&mut self, backend: &mut B, on_sync: F) -> ClientResult<FrameOutcome>
    where
        B: GraphicsBackend + ?Sized,
        F: FnOnce(&FrameInfo, &mut Scene),
    {
        if !self.visible && !self.settings.draw_always {
            return Ok(FrameOutcome::Idle);
        }
        if self.resize_pending {
            self.apply_resize(backend)?;
        }

        if let Err(e) = self.view.sync_frame().map(|_| ()) {
            return self.transient(e);
        }
        if let Some(info) = self.view.frame_info() {
            on_sync(info, &mut self.scene);
        }

        if !self.render_vr {
            if let Err(e) = self.view.invalidate_frame() {
                return self.transient(e);
            }
            return Ok(FrameOutcome::Invalidated);
        }

        let gaze = if self.settings.gaze || self.settings.dynamic_viewports || self.settings.vrs {
            self.runtime.rendering_gaze()
        } else {
            None
        };
        self.update_scene(gaze.as_ref());

        match self.render(backend, gaze.as_ref()) {
            Ok(report) => {
                self.frames_rendered += 1;
                Ok(FrameOutcome::Rendered(report))
            }
            Err(e) => self.transient(e),
        }
    }

    fn transient(&self, error: ClientError) -> ClientResult<FrameOutcome> {
        if error.is_fatal() {
            return Err(error);
        }
        self.context.report(&error);
        Ok(FrameOutcome::Abandoned)
    }

    fn update_scene(&mut self, gaze: Option<&Gaze>) {
        if self.settings.animate {
            self.scene.animate(self.view.delta_time());
        }
        let target = gaze.filter(|_| self.settings.gaze).map(|gaze| {
            let head = self.runtime.frame_pose(PoseType::Center);
            gaze_object_position(&head, gaze.forward, GAZE_OBJECT_DISTANCE)
        });
        self.scene.set_gaze(target);
    }

    fn render<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        gaze: Option<&Gaze>,
    ) -> ClientResult<FrameReport> {
        let frame_info = self
            .view
            .frame_info()
            .cloned()
            .ok_or_else(|| ClientError::InvalidConfig("render before sync".into()))?;

        let (layout, foveated) = self
            .viewports
            .select(gaze.is_some() && self.settings.dynamic_viewports);
        let viewports = layout.viewports().to_vec();

        // On acquire failure the view has already submitted an empty frame.
        self.view.begin_frame()?;

        match self.record(backend, &frame_info, &viewports, foveated, gaze) {
            Ok(report) => {
                self.view.end_frame()?;
                Ok(report)
            }
            Err(e) => {
                if let Err(end) = self.view.abandon_frame() {
                    self.context.report(&end);
                }
                Err(e)
            }
        }
    }

    fn record<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        frame_info: &FrameInfo,
        viewports: &[Viewport],
        foveated: bool,
        gaze: Option<&Gaze>,
    ) -> ClientResult<FrameReport> {
        let groups = self.scene.instance_groups();
        let slot = self.ring.begin(backend);
        let mut instance_count = 0;
        let mut dropped = 0;
        for node in 0..slot.node_count() {
            let Some(instances) = slot.instances_mut(node) else {
                continue;
            };
            for (geometry, data) in &groups {
                instances.push_group(*geometry, data);
            }
            instances.upload(backend)?;
            instance_count = instances.instance_count();
            dropped = instances.dropped();
        }
        if dropped > 0 {
            log::warn!("Instance budget exceeded: {dropped} objects not drawn");
        }

        let vst = self.vst;
        let layer = self
            .view
            .layer_mut(0)
            .ok_or_else(|| ClientError::InvalidConfig("no layer".into()))?;
        let mut clear_color = CLEAR_COLOR;
        if vst.render {
            clear_color[3] = 0.0;
        }
        layer.set_clear_color(clear_color);
        let clear = ClearValues {
            color: clear_color,
            depth: ClearValues::depth_for(self.settings.reverse_depth),
            stencil: 0,
        };
        let target = self.view.render_target(backend, 0)?;

        let mut open_node = None;
        let drawn = self.draw_views(
            backend,
            target,
            clear,
            frame_info,
            viewports,
            foveated,
            gaze,
            &mut open_node,
        );
        if open_node.is_some() {
            backend.end_pass();
        }
        let rendered_nodes = drawn?;

        if self.settings.sli() {
            self.copy_to_primary_node(backend, viewports, &rendered_nodes);
        }
        self.view.present_mirror(backend)?;
        self.ring.submit(backend)?;
        backend.check_device()?;

        let flags = layer_flags(vst, foveated, self.settings.occlusion_mesh);
        if let Some(layer) = self.view.layer_mut(0) {
            layer.set_flags(flags);
        }

        Ok(FrameReport {
            frame_number: frame_info.frame_number,
            views_rendered: rendered_nodes.len(),
            foveated,
            layer_flags: flags,
            instance_count,
            dropped_instances: dropped,
        })
    }

    /// Draw every enabled view. Returns the view index and node of each.
    #[allow(clippy::too_many_arguments)]
    fn draw_views<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        target: RenderTargetHandle,
        clear: ClearValues,
        frame_info: &FrameInfo,
        viewports: &[Viewport],
        foveated: bool,
        gaze: Option<&Gaze>,
        open_node: &mut Option<u32>,
    ) -> ClientResult<Vec<(usize, u32)>> {
        let mut cleared = vec![false; self.settings.node_count.max(1) as usize];
        let mut rendered = Vec::new();

        for (index, info) in frame_info.views.iter().enumerate().take(viewports.len()) {
            if !info.enabled {
                continue;
            }
            let viewport = viewports[index];
            let node = self.settings.node_for_view(index);

            if *open_node != Some(node) {
                if open_node.take().is_some() {
                    backend.end_pass();
                }
                backend.begin_commands(node);
                let load = match cleared.get_mut(node as usize) {
                    Some(done) if !*done => {
                        *done = true;
                        LoadOp::Clear(clear)
                    }
                    _ => LoadOp::Load,
                };
                backend.begin_pass(target, load);
                *open_node = Some(node);
            }

            let submission =
                self.draw_view(backend, index, &info.view_matrix, viewport, node, foveated, gaze)?;
            if let Some(layer) = self.view.layer_mut(0) {
                layer.push_view(submission);
            }
            rendered.push((index, node));
        }
        Ok(rendered)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_view<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        index: usize,
        view_matrix: &DMat4,
        viewport: Viewport,
        node: u32,
        foveated: bool,
        gaze: Option<&Gaze>,
    ) -> ClientResult<ViewSubmission> {
        let rect = Rect::from(viewport);
        backend.set_viewport(rect);
        backend.set_scissor(rect);

        if let Some(vrs) = self.vrs.as_mut() {
            vrs.update(
                self.runtime.as_ref(),
                backend,
                index as u32,
                viewport,
                node,
                gaze.filter(|_| self.settings.gaze),
            )?;
        }

        let tangents = match gaze.filter(|_| foveated) {
            Some(gaze) => self.runtime.foveated_fov_tangents(index, gaze),
            None => self.runtime.fov_tangents(index),
        };
        let mut projection = projection_from_tangents(&tangents);
        let (near_z, far_z) = clip_planes(self.settings.reverse_depth);
        update_near_far_planes(
            &mut projection,
            self.settings.api.clip_range(),
            near_z,
            far_z,
        );

        let tile_size = backend.capabilities().vrs_tile_size;
        let constants = view_constants(view_matrix, &projection, viewport, tile_size);
        let ring = self
            .constants
            .get_mut(node as usize)
            .ok_or_else(|| ClientError::InvalidConfig(format!("no constants on node {node}")))?;
        let allocation = ring.write(backend, &constants)?;
        backend.set_constants(ring.buffer(), allocation.offset);

        if index < OCCLUDED_VIEWS {
            if let (Some(occlusion), Some(pipeline)) = (&self.occlusion, self.pipelines.occlusion()) {
                occlusion.draw(backend, pipeline, index, node);
            }
        }
        backend.set_stencil_reference(0);

        let blended = self.vst.render;
        if self.scene.render_vr_scene() {
            backend.set_pipeline(self.pipelines.grid(blended));
            backend.draw(0..3, 0..1);
        }

        if let Some(instances) = self.ring.current().instances(node) {
            if !instances.groups().is_empty() {
                backend.set_pipeline(self.pipelines.scene(blended));
            }
            for group in instances.groups() {
                let Some(geometry) = self.geometries.get(group.geometry.0) else {
                    continue;
                };
                backend.set_vertex_buffer(0, geometry.vertex_buffer, 0);
                backend.set_vertex_buffer(1, instances.buffer(), group.byte_offset);
                backend.set_index_buffer(geometry.index_buffer, IndexFormat::Uint32);
                backend.draw_indexed(0..geometry.index_count, 0, 0..group.instance_count);
            }
        }

        if let (Some(vrs), Some(pipeline)) = (&self.vrs, self.pipelines.vrs_visualize()) {
            vrs.visualize(backend, pipeline, node);
        }
        if self.vrs.is_some() {
            backend.set_shading_rate_image(None);
        }

        log::trace!("View {index} drawn on node {node} at {viewport:?}");
        Ok(ViewSubmission {
            projection,
            view: *view_matrix,
            viewport,
            near_z,
            far_z,
            velocity_scale: velocity_scale(),
        })
    }

    /// Bring everything rendered on secondary nodes into node 0, which the
    /// compositor reads.
    fn copy_to_primary_node<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        viewports: &[Viewport],
        rendered: &[(usize, u32)],
    ) {
        let Some(layer) = self.view.layer(0) else {
            return;
        };
        let images: Vec<TextureHandle> = std::iter::once(layer.color())
            .chain(layer.depth())
            .chain(layer.velocity())
            .filter_map(|chain| chain.current_image())
            .collect();

        backend.begin_commands(0);
        for &(index, node) in rendered.iter().filter(|(_, node)| *node != 0) {
            let rect = Rect::from(viewports[index]);
            for &texture in &images {
                backend.copy_cross_node(texture, node, 0, rect);
            }
        }
    }

    /// Block until the GPU has retired every submitted frame.
    pub fn wait_idle<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        self.ring.wait_idle(backend);
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        let Self {
            view,
            occlusion,
            vrs,
            geometries,
            constants,
            ring,
            ..
        } = self;
        ring.destroy(backend);
        for geometry in &geometries {
            geometry.destroy(backend);
        }
        for ring in constants {
            ring.destroy(backend);
        }
        if let Some(occlusion) = occlusion {
            occlusion.destroy(backend);
        }
        if let Some(vrs) = vrs {
            vrs.destroy(backend);
        }
        view.destroy(backend);
        log::info!("Frame engine destroyed");
    }
}

impl std::fmt::Debug for FrameEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEngine")
            .field("view", &self.view)
            .field("visible", &self.visible)
            .field("render_vr", &self.render_vr)
            .field("frames_rendered", &self.frames_rendered)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, DummyCommand, PipelineKind};
    use crate::config::{ClientConfig, DepthFormat};
    use crate::runtime::projection::near_far_from_projection;
    use crate::runtime::{ClipRange, GazeStatus, RuntimeCall, SimulatedRuntime};
    use glam::{DVec3, Mat4};

    fn engine_with(
        config: ClientConfig,
    ) -> (Arc<SimulatedRuntime>, DummyBackend, FrameEngine) {
        let runtime = Arc::new(SimulatedRuntime::default());
        let mut backend = DummyBackend::new();
        let settings = config.validate(backend.capabilities()).unwrap();
        let engine =
            FrameEngine::new(runtime.clone(), &mut backend, settings, Context::new()).unwrap();
        (runtime, backend, engine)
    }

    fn small_config() -> ClientConfig {
        ClientConfig {
            max_donuts: 20,
            show_mirror_window: false,
            ..Default::default()
        }
    }

    fn rendered(outcome: FrameOutcome) -> FrameReport {
        match outcome {
            FrameOutcome::Rendered(report) => report,
            other => panic!("expected a rendered frame, got {other:?}"),
        }
    }

    #[test]
    fn test_clip_planes() {
        assert_eq!(clip_planes(false), (0.1, 1000.0));
        assert_eq!(clip_planes(true), (1000.0, 0.1));
    }

    #[test]
    fn test_layer_flags() {
        assert_eq!(layer_flags(VstState::default(), false, false), LayerFlags::empty());
        let vst = VstState {
            render: true,
            depth_test: true,
            chroma_key: false,
        };
        assert_eq!(
            layer_flags(vst, true, true),
            LayerFlags::ALPHA_BLEND
                | LayerFlags::DEPTH_TESTING
                | LayerFlags::FOVEATED
                | LayerFlags::USING_OCCLUSION_MESH
        );
    }

    #[test]
    fn test_frame_renders_all_views() {
        let (runtime, mut backend, mut engine) = engine_with(small_config());
        let recorder = backend.recorder();

        let report = rendered(engine.frame(&mut backend).unwrap());
        assert_eq!(report.views_rendered, 4);
        assert_eq!(report.instance_count, 20);
        assert_eq!(report.layer_flags, LayerFlags::empty());

        let submit = runtime.last_submit().unwrap();
        assert_eq!(submit.frame_number, report.frame_number);
        assert_eq!(submit.layers[0].views.len(), 4);
        assert_eq!(runtime.acquired_image_count(), 0);

        let clears = recorder
            .commands()
            .iter()
            .filter(|c| matches!(c, DummyCommand::BeginPass { load: LoadOp::Clear(_), .. }))
            .count();
        assert_eq!(clears, 1);
        let grids = recorder
            .draws()
            .iter()
            .filter(|d| d.pipeline.kind == PipelineKind::Grid)
            .count();
        assert_eq!(grids, 4);
        engine.destroy(&mut backend);
        assert_eq!(recorder.live_buffer_count(), 0);
    }

    #[test]
    fn test_submitted_projection_matches_tangents() {
        let (runtime, mut backend, mut engine) = engine_with(ClientConfig {
            use_reverse_depth: true,
            ..small_config()
        });
        rendered(engine.frame(&mut backend).unwrap());

        let submit = runtime.last_submit().unwrap();
        for (index, view) in submit.layers[0].views.iter().enumerate() {
            let mut expected = projection_from_tangents(&runtime.fov_tangents(index));
            update_near_far_planes(&mut expected, ClipRange::ZeroToOne, 1000.0, 0.1);
            assert_eq!(view.projection, expected);
            let (near, far) = near_far_from_projection(&view.projection, ClipRange::ZeroToOne);
            assert!((near - 1000.0).abs() < 1e-6 && (far - 0.1).abs() < 1e-6);
            let depth = view.depth.unwrap();
            assert_eq!((depth.near_z, depth.far_z), (1000.0, 0.1));
        }
    }

    #[test]
    fn test_reverse_depth_clear_and_compare() {
        let (_runtime, mut backend, mut engine) = engine_with(ClientConfig {
            use_reverse_depth: true,
            ..small_config()
        });
        let recorder = backend.recorder();
        rendered(engine.frame(&mut backend).unwrap());
        let clear = recorder.commands().into_iter().find_map(|c| match c {
            DummyCommand::BeginPass {
                load: LoadOp::Clear(values),
                ..
            } => Some(values),
            _ => None,
        });
        assert_eq!(clear.unwrap().depth, 0.0);
        let scene = recorder.pipelines_of(PipelineKind::Scene);
        assert_eq!(scene[0].depth.compare, crate::backend::CompareFunction::Greater);
    }

    #[test]
    fn test_invisible_frames_skip_sync() {
        let (runtime, mut backend, mut engine) = engine_with(small_config());
        engine
            .handle_event(&mut backend, &Event::Visibility { visible: false })
            .unwrap();
        runtime.clear_calls();
        assert_eq!(engine.frame(&mut backend).unwrap(), FrameOutcome::Idle);
        assert_eq!(runtime.count_calls(|c| matches!(c, RuntimeCall::WaitSync { .. })), 0);
    }

    #[test]
    fn test_vr_disabled_submits_empty_frame() {
        let (runtime, mut backend, mut engine) = engine_with(small_config());
        engine.set_render_vr(false);
        assert_eq!(engine.frame(&mut backend).unwrap(), FrameOutcome::Invalidated);
        assert_eq!(runtime.last_submit().unwrap().layer_count(), 0);
    }

    #[test]
    fn test_failed_acquire_abandons_frame() {
        let (runtime, mut backend, mut engine) = engine_with(small_config());
        runtime.fail_next_acquire();
        assert_eq!(engine.frame(&mut backend).unwrap(), FrameOutcome::Abandoned);
        assert_eq!(runtime.acquired_image_count(), 0);
        assert_eq!(runtime.count_calls(|c| *c == RuntimeCall::BeginFrame), 1);
        assert_eq!(
            runtime.count_calls(|c| matches!(c, RuntimeCall::EndFrame(_))),
            1
        );
        rendered(engine.frame(&mut backend).unwrap());
    }

    #[test]
    fn test_lost_device_is_fatal() {
        let (_runtime, mut backend, mut engine) = engine_with(small_config());
        backend.recorder().lose_device();
        let err = engine.frame(&mut backend).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_foveation_needs_valid_gaze() {
        let (runtime, mut backend, mut engine) = engine_with(ClientConfig {
            use_dynamic_viewports: true,
            use_gaze: true,
            ..small_config()
        });
        let report = rendered(engine.frame(&mut backend).unwrap());
        assert!(!report.foveated);
        assert!(engine.scene().gaze_object().is_none());

        runtime.set_gaze(Some(Gaze {
            status: GazeStatus::Valid,
            forward: DVec3::NEG_Z,
            capture_time: 0,
            frame_number: 0,
        }));
        let report = rendered(engine.frame(&mut backend).unwrap());
        assert!(report.foveated);
        assert!(report.layer_flags.contains(LayerFlags::FOVEATED));
        assert!(engine.scene().gaze_object().is_some());
        // Gaze marker plus the donuts.
        assert_eq!(report.instance_count, 21);
    }

    #[test]
    fn test_occlusion_prepass_per_context_view() {
        let (_runtime, mut backend, mut engine) = engine_with(ClientConfig {
            use_occlusion_mesh: true,
            depth_format: DepthFormat::D24S8,
            ..small_config()
        });
        let recorder = backend.recorder();
        let report = rendered(engine.frame(&mut backend).unwrap());
        assert!(report.layer_flags.contains(LayerFlags::USING_OCCLUSION_MESH));

        let draws = recorder.draws();
        let occlusion: Vec<_> = draws
            .iter()
            .filter(|d| d.pipeline.kind == PipelineKind::Occlusion)
            .collect();
        assert_eq!(occlusion.len(), 2);
        assert!(occlusion.iter().all(|d| d.stencil_reference == 1));
        assert!(draws
            .iter()
            .filter(|d| d.pipeline.kind != PipelineKind::Occlusion)
            .all(|d| d.stencil_reference == 0));
    }

    #[test]
    fn test_visibility_mesh_change_rebuilds_one_view() {
        let (runtime, mut backend, mut engine) = engine_with(ClientConfig {
            use_occlusion_mesh: true,
            depth_format: DepthFormat::D32S8,
            ..small_config()
        });
        rendered(engine.frame(&mut backend).unwrap());
        let view0 = engine.occlusion().unwrap().buffer(0, 0);

        runtime.change_visibility_mesh(1);
        let event = runtime.poll_event().unwrap();
        assert!(engine.handle_event(&mut backend, &event).unwrap());
        let occlusion = engine.occlusion().unwrap();
        assert_eq!(occlusion.rebuild_count(1), 1);
        assert_eq!(occlusion.rebuild_count(0), 0);
        assert_eq!(occlusion.buffer(0, 0), view0);
    }

    #[test]
    fn test_texture_size_change_recreates_at_boundary() {
        let (runtime, mut backend, mut engine) = engine_with(small_config());
        rendered(engine.frame(&mut backend).unwrap());
        engine
            .handle_event(&mut backend, &Event::TextureSizeChange { type_mask: 1 })
            .unwrap();
        assert!(engine.resize_pending());
        runtime.clear_calls();

        rendered(engine.frame(&mut backend).unwrap());
        assert!(!engine.resize_pending());
        let calls = runtime.calls();
        let created = calls
            .iter()
            .position(|c| matches!(c, RuntimeCall::CreateSwapChain(..)))
            .unwrap();
        let synced = calls
            .iter()
            .position(|c| matches!(c, RuntimeCall::WaitSync { .. }))
            .unwrap();
        assert!(created < synced);
    }

    #[test]
    fn test_application_button_requests_calibration() {
        let (runtime, mut backend, mut engine) = engine_with(small_config());
        let event = Event::Button {
            button: ButtonId::Application,
            pressed: true,
        };
        assert!(engine.handle_event(&mut backend, &event).unwrap());
        assert_eq!(
            runtime.count_calls(|c| *c == RuntimeCall::RequestGazeCalibration),
            1
        );
        assert!(!engine
            .handle_event(&mut backend, &Event::MrChromaKeyConfigChange)
            .unwrap());
    }

    #[test]
    fn test_disabled_vr_scene_hides_grid_and_donuts() {
        let (_runtime, mut backend, mut engine) = engine_with(ClientConfig {
            disable_vr_scene: true,
            ..small_config()
        });
        let recorder = backend.recorder();
        let report = rendered(engine.frame(&mut backend).unwrap());
        assert_eq!(report.instance_count, 0);
        assert!(recorder
            .draws()
            .iter()
            .all(|d| d.pipeline.kind != PipelineKind::Grid));
    }

    #[test]
    fn test_view_constants_layout() {
        let view = DMat4::from_translation(DVec3::new(0.0, -1.6, 0.0));
        let projection = DMat4::IDENTITY;
        let constants = view_constants(&view, &projection, Viewport::new(0, 0, 100, 50), 16);
        assert!((constants.eye.y - 1.6).abs() < 1e-6);
        assert_eq!(constants.viewport_size, Vec4::new(100.0, 50.0, 0.01, 0.02));
        assert_eq!(constants.params.w, 16.0);
        assert!(constants
            .inverse_view_projection
            .abs_diff_eq(Mat4::from_translation(glam::Vec3::new(0.0, 1.6, 0.0)), 1e-6));
    }
}
