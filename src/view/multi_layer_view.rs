//! Layers of swap chains submitted together each frame.
//!
//! [`MultiLayerView`] drives the runtime side of a frame:
//!
//! ```ignore
//! let info = view.sync_frame()?;          // WaitSync
//! view.begin_frame()?;                    // BeginFrameWithLayers + acquire
//! let rt = view.render_target(&mut backend, 0)?;
//! // ... render, then describe each view:
//! view.layer_mut(0).push_view(submission);
//! view.end_frame()?;                      // release + EndFrameWithLayers
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use glam::DMat4;

use crate::backend::{
    BackendError, GraphicsBackend, NodeMask, RenderTargetDescriptor, RenderTargetHandle,
    TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
};
use crate::error::{ClientError, ClientResult};
use crate::runtime::{
    FrameInfo, GraphicsApi, LayerFlags, LayerMultiProj, LayerMultiProjView, MirrorView, Runtime,
    Space, SubmitInfoLayers, SwapChainFormat, SwapChainViewport, ViewExtensionDepth,
    ViewExtensionVelocity, Viewport,
};

use super::swap_chain::SwapChain;

/// Mirror window width per eye.
pub const MIRROR_EYE_WIDTH: i32 = 512;

/// Swap chains of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerConfig {
    pub color_format: SwapChainFormat,
    pub depth_format: Option<SwapChainFormat>,
    /// Requires `depth_format`.
    pub velocity: bool,
    /// Client-owned depth buffer used when no depth swap chain is submitted.
    pub local_depth_format: Option<TextureFormat>,
    pub space: Space,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            color_format: SwapChainFormat::Rgba8Srgb,
            depth_format: None,
            velocity: false,
            local_depth_format: None,
            space: Space::Local,
        }
    }
}

/// What the compositor needs to know about one rendered view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewSubmission {
    pub projection: DMat4,
    pub view: DMat4,
    pub viewport: Viewport,
    /// Distance written to the depth extension for depth 0.
    pub near_z: f64,
    /// Distance written to the depth extension for depth 1.
    pub far_z: f64,
    pub velocity_scale: f64,
}

type TargetKey = (u32, Option<u32>, Option<u32>);

/// One multi-projection layer and its swap chains.
#[derive(Debug)]
pub struct Layer {
    config: LayerConfig,
    color: SwapChain,
    depth: Option<SwapChain>,
    velocity: Option<SwapChain>,
    /// One per color image, indexed like the color chain.
    local_depth: Vec<TextureHandle>,
    targets: HashMap<TargetKey, RenderTargetHandle>,
    flags: LayerFlags,
    clear_color: [f32; 4],
    views: Vec<LayerMultiProjView>,
}

impl Layer {
    fn create<B: GraphicsBackend + ?Sized>(
        runtime: &dyn Runtime,
        backend: &mut B,
        api: GraphicsApi,
        config: LayerConfig,
        (width, height): (i32, i32),
        node_mask: NodeMask,
    ) -> ClientResult<Self> {
        if config.velocity && config.depth_format.is_none() {
            return Err(ClientError::InvalidConfig(
                "velocity layers need a depth swap chain".into(),
            ));
        }

        let color = SwapChain::create(
            runtime,
            backend,
            api,
            SwapChain::config(config.color_format, width, height),
            node_mask,
            "color",
        )?;
        let depth = match config.depth_format {
            Some(format) => match SwapChain::create(
                runtime,
                backend,
                api,
                SwapChain::config(format, width, height),
                node_mask,
                "depth",
            ) {
                Ok(chain) => Some(chain),
                Err(e) => {
                    color.destroy(runtime, backend);
                    return Err(e);
                }
            },
            None => None,
        };
        let velocity = if config.velocity {
            match SwapChain::create(
                runtime,
                backend,
                api,
                SwapChain::config(SwapChainFormat::Rgba8Uint, width, height),
                node_mask,
                "velocity",
            ) {
                Ok(chain) => Some(chain),
                Err(e) => {
                    if let Some(depth) = depth {
                        depth.destroy(runtime, backend);
                    }
                    color.destroy(runtime, backend);
                    return Err(e);
                }
            }
        } else {
            None
        };

        let mut local_depth = Vec::new();
        if let (None, Some(format)) = (&depth, config.local_depth_format) {
            for index in 0..color.image_count() {
                let desc = TextureDescriptor::new(
                    format!("local_depth_{index}"),
                    width as u32,
                    height as u32,
                    format,
                )
                .with_usage(TextureUsage::RENDER_ATTACHMENT)
                .with_node_mask(node_mask);
                match backend.create_texture(&desc) {
                    Ok(texture) => local_depth.push(texture),
                    Err(e) => {
                        for texture in local_depth {
                            backend.destroy_texture(texture);
                        }
                        if let Some(velocity) = velocity {
                            velocity.destroy(runtime, backend);
                        }
                        color.destroy(runtime, backend);
                        return Err(e.into());
                    }
                }
            }
        }

        Ok(Self {
            config,
            color,
            depth,
            velocity,
            local_depth,
            targets: HashMap::new(),
            flags: LayerFlags::empty(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            views: Vec::new(),
        })
    }

    fn chains_mut(&mut self) -> impl Iterator<Item = &mut SwapChain> {
        std::iter::once(&mut self.color)
            .chain(self.depth.as_mut())
            .chain(self.velocity.as_mut())
    }

    fn acquire(&mut self, runtime: &dyn Runtime) -> ClientResult<()> {
        for chain in self.chains_mut() {
            chain.acquire(runtime)?;
        }
        Ok(())
    }

    /// Release every held image, attempting all of them.
    fn release(&mut self, runtime: &dyn Runtime) -> ClientResult<()> {
        let mut result = Ok(());
        for chain in self.chains_mut() {
            if let Err(e) = chain.release(runtime) {
                log::error!("{e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    fn destroy<B: GraphicsBackend + ?Sized>(self, runtime: &dyn Runtime, backend: &mut B) {
        for (_, target) in self.targets {
            backend.destroy_render_target(target);
        }
        self.color.destroy(runtime, backend);
        if let Some(depth) = self.depth {
            depth.destroy(runtime, backend);
        }
        if let Some(velocity) = self.velocity {
            velocity.destroy(runtime, backend);
        }
        for texture in self.local_depth {
            backend.destroy_texture(texture);
        }
    }

    pub fn layer_config(&self) -> &LayerConfig {
        &self.config
    }

    pub fn color(&self) -> &SwapChain {
        &self.color
    }

    pub fn depth(&self) -> Option<&SwapChain> {
        self.depth.as_ref()
    }

    pub fn velocity(&self) -> Option<&SwapChain> {
        self.velocity.as_ref()
    }

    /// Format of the depth attachment rendered into, submitted or not.
    pub fn depth_format(&self) -> Option<TextureFormat> {
        self.config
            .depth_format
            .map(TextureFormat::from)
            .or(self.config.local_depth_format)
    }

    pub fn flags(&self) -> LayerFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: LayerFlags) {
        self.flags = flags;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, color: [f32; 4]) {
        self.clear_color = color;
    }

    /// Views described so far this frame.
    pub fn submitted_views(&self) -> &[LayerMultiProjView] {
        &self.views
    }

    /// Describe a rendered view for the compositor.
    pub fn push_view(&mut self, submission: ViewSubmission) {
        let depth = self.depth.as_ref().map(|chain| ViewExtensionDepth {
            min_depth: 0.0,
            max_depth: 1.0,
            near_z: submission.near_z,
            far_z: submission.far_z,
            viewport: SwapChainViewport::new(chain.id(), submission.viewport),
        });
        let velocity = self.velocity.as_ref().map(|chain| ViewExtensionVelocity {
            velocity_scale: submission.velocity_scale,
            includes_hmd_motion: false,
            viewport: SwapChainViewport::new(chain.id(), submission.viewport),
        });
        self.views.push(LayerMultiProjView {
            projection: submission.projection,
            view: submission.view,
            viewport: SwapChainViewport::new(self.color.id(), submission.viewport),
            depth,
            velocity,
        });
    }

    fn render_target<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
    ) -> ClientResult<RenderTargetHandle> {
        let color_index = self.color.acquired_index().ok_or_else(|| {
            ClientError::InvalidConfig("render target requested outside a frame".into())
        })?;
        let depth_index = self.depth.as_ref().and_then(SwapChain::acquired_index);
        let velocity_index = self.velocity.as_ref().and_then(SwapChain::acquired_index);
        let key = (color_index, depth_index, velocity_index);
        if let Some(target) = self.targets.get(&key) {
            return Ok(*target);
        }

        let pick = |chain: &Option<SwapChain>, index: Option<u32>| {
            chain.as_ref().zip(index).and_then(|(c, i)| c.image(i))
        };
        let color = self
            .color
            .image(color_index)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        let depth = pick(&self.depth, depth_index)
            .or_else(|| self.local_depth.get(color_index as usize).copied());
        let target = backend.create_render_target(&RenderTargetDescriptor {
            color,
            depth,
            velocity: pick(&self.velocity, velocity_index),
        })?;
        self.targets.insert(key, target);
        Ok(target)
    }

    fn to_submit(&self) -> LayerMultiProj {
        LayerMultiProj {
            flags: self.flags,
            space: self.config.space,
            views: self.views.clone(),
        }
    }
}

/// Owns the layers of the client and the per-frame runtime handshake.
pub struct MultiLayerView {
    runtime: Arc<dyn Runtime>,
    api: GraphicsApi,
    node_mask: NodeMask,
    configs: Vec<LayerConfig>,
    atlas: (i32, i32),
    layers: Vec<Layer>,
    mirror: Option<SwapChain>,
    frame_info: Option<FrameInfo>,
    frame_time: f64,
    delta_time: f64,
    in_frame: bool,
}

impl MultiLayerView {
    /// Create every layer's swap chains at `atlas` size.
    pub fn new<B: GraphicsBackend + ?Sized>(
        runtime: Arc<dyn Runtime>,
        backend: &mut B,
        api: GraphicsApi,
        configs: Vec<LayerConfig>,
        atlas: (i32, i32),
        node_mask: NodeMask,
    ) -> ClientResult<Self> {
        let mut view = Self {
            runtime,
            api,
            node_mask,
            configs,
            atlas,
            layers: Vec::new(),
            mirror: None,
            frame_info: None,
            frame_time: 0.0,
            delta_time: 0.0,
            in_frame: false,
        };
        view.create_swap_chains(backend)?;
        Ok(view)
    }

    fn create_swap_chains<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> ClientResult<()> {
        for config in self.configs.clone() {
            match Layer::create(
                self.runtime.as_ref(),
                backend,
                self.api,
                config,
                self.atlas,
                self.node_mask,
            ) {
                Ok(layer) => self.layers.push(layer),
                Err(e) => {
                    for layer in self.layers.drain(..) {
                        layer.destroy(self.runtime.as_ref(), backend);
                    }
                    return Err(e);
                }
            }
        }
        log::info!(
            "Created {} layer(s) with a {}x{} atlas",
            self.layers.len(),
            self.atlas.0,
            self.atlas.1
        );
        Ok(())
    }

    /// Tear down and rebuild every swap chain at a new atlas size.
    ///
    /// Must be called between frames.
    pub fn recreate_swap_chains<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        atlas: (i32, i32),
    ) -> ClientResult<()> {
        if self.in_frame {
            return Err(ClientError::InvalidConfig(
                "swap chains cannot be rebuilt inside a frame".into(),
            ));
        }
        log::info!("Recreating swap chains at {}x{}", atlas.0, atlas.1);
        for layer in self.layers.drain(..) {
            layer.destroy(self.runtime.as_ref(), backend);
        }
        self.atlas = atlas;
        self.create_swap_chains(backend)
    }

    /// Create the mirror swap chain and register two side-by-side views.
    ///
    /// `aspect` is width over height of the first view.
    pub fn create_mirror<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        aspect: f64,
    ) -> ClientResult<()> {
        let height = (MIRROR_EYE_WIDTH as f64 / aspect.max(f64::EPSILON)).round() as i32;
        let chain = SwapChain::create(
            self.runtime.as_ref(),
            backend,
            self.api,
            SwapChain::config(SwapChainFormat::Rgba8Srgb, MIRROR_EYE_WIDTH * 2, height),
            self.node_mask,
            "mirror",
        )?;
        let views: Vec<_> = (0..2)
            .map(|eye| MirrorView {
                view_index: eye,
                viewport: SwapChainViewport::new(
                    chain.id(),
                    Viewport::new(eye * MIRROR_EYE_WIDTH, 0, MIRROR_EYE_WIDTH, height),
                ),
            })
            .collect();
        self.runtime
            .set_mirror_config(&views)
            .map_err(|e| ClientError::runtime("SetMirrorConfig", e))?;
        self.mirror = Some(chain);
        Ok(())
    }

    /// Show the mirror image in the OS window. Call inside a frame.
    pub fn present_mirror<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> ClientResult<()> {
        let Some(mirror) = self.mirror.as_mut() else {
            return Ok(());
        };
        let index = mirror.acquire(self.runtime.as_ref())?;
        let presented = match mirror.image(index) {
            Some(texture) => backend.present_mirror(texture).map_err(ClientError::from),
            None => Ok(()),
        };
        let released = mirror.release(self.runtime.as_ref());
        presented.and(released)
    }

    pub fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Wait for the next frame slot and record its timing.
    pub fn sync_frame(&mut self) -> ClientResult<&FrameInfo> {
        let info = self
            .runtime
            .wait_sync()
            .map_err(|e| ClientError::runtime("WaitSync", e))?;
        let time = info.display_time as f64 * 1e-9;
        self.delta_time = if self.frame_info.is_some() {
            (time - self.frame_time).max(0.0)
        } else {
            0.0
        };
        self.frame_time = time;
        Ok(self.frame_info.insert(info))
    }

    /// Begin the frame and acquire an image from every swap chain.
    ///
    /// If an image cannot be acquired, whatever was acquired is released, an
    /// empty frame is submitted and the acquire error is returned.
    pub fn begin_frame(&mut self) -> ClientResult<()> {
        let frame_number = self.frame_number();
        self.runtime
            .begin_frame_with_layers()
            .map_err(|e| ClientError::runtime("BeginFrameWithLayers", e))?;
        self.in_frame = true;

        let runtime = Arc::clone(&self.runtime);
        let mut acquired = Ok(());
        for layer in &mut self.layers {
            layer.views.clear();
            if acquired.is_ok() {
                acquired = layer.acquire(runtime.as_ref());
            }
        }

        if let Err(e) = acquired {
            for layer in &mut self.layers {
                let _ = layer.release(runtime.as_ref());
            }
            self.in_frame = false;
            runtime
                .end_frame_with_layers(&SubmitInfoLayers::empty(frame_number))
                .map_err(|e| ClientError::runtime("EndFrameWithLayers", e))?;
            return Err(e);
        }
        Ok(())
    }

    /// Submit the layers and release every acquired image.
    ///
    /// Layers that described no views are left out of the submission.
    pub fn end_frame(&mut self) -> ClientResult<()> {
        if !self.in_frame {
            return Err(ClientError::InvalidConfig("end_frame without begin_frame".into()));
        }
        let submit = SubmitInfoLayers {
            frame_number: self.frame_number(),
            reserved: 0,
            layers: self
                .layers
                .iter()
                .filter(|layer| !layer.views.is_empty())
                .map(Layer::to_submit)
                .collect(),
        };

        let runtime = Arc::clone(&self.runtime);
        let mut released = Ok(());
        for layer in &mut self.layers {
            let result = layer.release(runtime.as_ref());
            if released.is_ok() {
                released = result;
            }
        }
        self.in_frame = false;

        runtime
            .end_frame_with_layers(&submit)
            .map_err(|e| ClientError::runtime("EndFrameWithLayers", e))?;
        released
    }

    /// Drop the views described so far, release every image and submit no layers.
    pub fn abandon_frame(&mut self) -> ClientResult<()> {
        for layer in &mut self.layers {
            layer.views.clear();
        }
        self.end_frame()
    }

    /// Submit an empty frame so the compositor keeps advancing.
    pub fn invalidate_frame(&mut self) -> ClientResult<()> {
        let frame_number = self.frame_number();
        self.runtime
            .begin_frame_with_layers()
            .map_err(|e| ClientError::runtime("BeginFrameWithLayers", e))?;
        self.runtime
            .end_frame_with_layers(&SubmitInfoLayers::empty(frame_number))
            .map_err(|e| ClientError::runtime("EndFrameWithLayers", e))
    }

    /// Render target over the images acquired for `layer` this frame.
    pub fn render_target<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        layer: usize,
    ) -> ClientResult<RenderTargetHandle> {
        self.layers
            .get_mut(layer)
            .ok_or_else(|| ClientError::InvalidConfig(format!("no layer {layer}")))?
            .render_target(backend)
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    pub fn atlas_size(&self) -> (i32, i32) {
        self.atlas
    }

    pub fn frame_info(&self) -> Option<&FrameInfo> {
        self.frame_info.as_ref()
    }

    /// Frame number of the last synced frame, 0 before the first sync.
    pub fn frame_number(&self) -> i64 {
        self.frame_info.as_ref().map_or(0, |info| info.frame_number)
    }

    /// Display time of the current frame in seconds.
    pub fn frame_time(&self) -> f64 {
        self.frame_time
    }

    /// Seconds between the last two synced frames.
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Release every swap chain back to the runtime.
    pub fn destroy<B: GraphicsBackend + ?Sized>(mut self, backend: &mut B) {
        let runtime = Arc::clone(&self.runtime);
        for layer in self.layers.drain(..) {
            layer.destroy(runtime.as_ref(), backend);
        }
        if let Some(mirror) = self.mirror.take() {
            mirror.destroy(runtime.as_ref(), backend);
        }
    }
}

impl std::fmt::Debug for MultiLayerView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiLayerView")
            .field("api", &self.api)
            .field("atlas", &self.atlas)
            .field("layers", &self.layers.len())
            .field("mirror", &self.mirror.is_some())
            .field("frame_number", &self.frame_number())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::runtime::{RuntimeCall, SimulatedRuntime};

    fn view_with(config: LayerConfig) -> (Arc<SimulatedRuntime>, DummyBackend, MultiLayerView) {
        let runtime = Arc::new(SimulatedRuntime::default());
        let mut backend = DummyBackend::new();
        let view = MultiLayerView::new(
            runtime.clone(),
            &mut backend,
            GraphicsApi::D3D11,
            vec![config],
            (2304, 1152),
            NodeMask::NODE_0,
        )
        .unwrap();
        (runtime, backend, view)
    }

    fn submission(viewport: Viewport) -> ViewSubmission {
        ViewSubmission {
            projection: DMat4::IDENTITY,
            view: DMat4::IDENTITY,
            viewport,
            near_z: 0.1,
            far_z: 1000.0,
            velocity_scale: 1.0,
        }
    }

    /// Build a depth layer when only `budget` swap chains can be created.
    fn assert_failed_layer_frees_chains(budget: usize, velocity: bool) {
        let runtime = Arc::new(SimulatedRuntime::default());
        let mut backend = DummyBackend::new();
        let recorder = backend.recorder();
        runtime.limit_swap_chain_creations(budget);

        let result = MultiLayerView::new(
            runtime.clone(),
            &mut backend,
            GraphicsApi::D3D11,
            vec![LayerConfig {
                depth_format: Some(SwapChainFormat::Depth32Float),
                velocity,
                ..Default::default()
            }],
            (2304, 1152),
            NodeMask::NODE_0,
        );
        assert!(result.is_err());
        assert_eq!(runtime.live_swap_chain_count(), 0);
        assert_eq!(recorder.live_texture_count(), 0);
    }

    #[test]
    fn test_failed_depth_chain_frees_color_chain() {
        assert_failed_layer_frees_chains(1, false);
    }

    #[test]
    fn test_failed_velocity_chain_frees_earlier_chains() {
        assert_failed_layer_frees_chains(2, true);
    }

    #[test]
    fn test_frame_handshake_order() {
        let (runtime, mut backend, mut view) = view_with(LayerConfig::default());
        runtime.clear_calls();

        let frame_number = view.sync_frame().unwrap().frame_number;
        view.begin_frame().unwrap();
        view.render_target(&mut backend, 0).unwrap();
        view.layer_mut(0)
            .unwrap()
            .push_view(submission(Viewport::new(0, 0, 1152, 1152)));
        view.end_frame().unwrap();

        let calls = runtime.calls();
        assert!(matches!(calls[0], RuntimeCall::WaitSync { .. }));
        assert_eq!(calls[1], RuntimeCall::BeginFrame);
        assert!(matches!(calls[2], RuntimeCall::AcquireImage(_, 0)));
        assert!(matches!(calls[3], RuntimeCall::ReleaseImage(_)));
        let RuntimeCall::EndFrame(submit) = &calls[4] else {
            panic!("expected EndFrame, got {:?}", calls[4]);
        };
        assert_eq!(submit.frame_number, frame_number);
        assert_eq!(submit.layer_count(), 1);
        assert_eq!(runtime.acquired_image_count(), 0);
        view.destroy(&mut backend);
    }

    #[test]
    fn test_depth_and_velocity_extensions() {
        let (runtime, mut backend, mut view) = view_with(LayerConfig {
            depth_format: Some(SwapChainFormat::Depth32Float),
            velocity: true,
            ..Default::default()
        });
        view.sync_frame().unwrap();
        view.begin_frame().unwrap();
        assert_eq!(runtime.acquired_image_count(), 3);
        let layer = view.layer_mut(0).unwrap();
        layer.push_view(submission(Viewport::new(0, 0, 1152, 1152)));

        let submitted = &layer.submitted_views()[0];
        let depth = submitted.depth.unwrap();
        assert_eq!((depth.min_depth, depth.max_depth), (0.0, 1.0));
        assert_eq!((depth.near_z, depth.far_z), (0.1, 1000.0));
        assert!(!submitted.velocity.unwrap().includes_hmd_motion);
        view.end_frame().unwrap();
        view.destroy(&mut backend);
    }

    #[test]
    fn test_render_targets_cached_per_image() {
        let (_runtime, mut backend, mut view) = view_with(LayerConfig::default());
        let mut targets = Vec::new();
        for _ in 0..4 {
            view.sync_frame().unwrap();
            view.begin_frame().unwrap();
            targets.push(view.render_target(&mut backend, 0).unwrap());
            view.end_frame().unwrap();
        }
        // Three images in the ring, so the fourth frame reuses the first target.
        assert_eq!(targets[0], targets[3]);
        assert_ne!(targets[0], targets[1]);
        view.destroy(&mut backend);
    }

    #[test]
    fn test_local_depth_follows_color_image() {
        let (runtime, mut backend, mut view) = view_with(LayerConfig {
            local_depth_format: Some(TextureFormat::Depth24PlusStencil8),
            ..Default::default()
        });
        let recorder = backend.recorder();
        assert_eq!(runtime.live_swap_chain_count(), 1);
        assert_eq!(
            view.layer(0).unwrap().depth_format(),
            Some(TextureFormat::Depth24PlusStencil8)
        );
        // Three imported color images plus three local depth buffers.
        assert_eq!(recorder.live_texture_count(), 6);

        view.sync_frame().unwrap();
        view.begin_frame().unwrap();
        view.render_target(&mut backend, 0).unwrap();
        let layer = view.layer_mut(0).unwrap();
        layer.push_view(submission(Viewport::new(0, 0, 1152, 1152)));
        assert!(layer.submitted_views()[0].depth.is_none());
        view.end_frame().unwrap();

        view.destroy(&mut backend);
        assert_eq!(recorder.live_texture_count(), 0);
    }

    #[test]
    fn test_acquire_failure_submits_empty_frame() {
        let (runtime, mut backend, mut view) = view_with(LayerConfig::default());
        view.sync_frame().unwrap();
        runtime.fail_next_acquire();
        assert!(view.begin_frame().is_err());
        assert!(!view.in_frame());
        assert_eq!(runtime.last_submit().unwrap().layer_count(), 0);
        assert_eq!(runtime.acquired_image_count(), 0);

        // The next frame proceeds normally.
        view.sync_frame().unwrap();
        view.begin_frame().unwrap();
        view.end_frame().unwrap();
        view.destroy(&mut backend);
    }

    #[test]
    fn test_invalidate_frame() {
        let (runtime, mut backend, mut view) = view_with(LayerConfig::default());
        let frame_number = view.sync_frame().unwrap().frame_number;
        view.invalidate_frame().unwrap();
        let submit = runtime.last_submit().unwrap();
        assert_eq!(submit.frame_number, frame_number);
        assert_eq!(submit.layer_count(), 0);
        view.destroy(&mut backend);
    }

    #[test]
    fn test_velocity_requires_depth() {
        let runtime = Arc::new(SimulatedRuntime::default());
        let mut backend = DummyBackend::new();
        let result = MultiLayerView::new(
            runtime,
            &mut backend,
            GraphicsApi::D3D11,
            vec![LayerConfig {
                velocity: true,
                ..Default::default()
            }],
            (2304, 1152),
            NodeMask::NODE_0,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_recreate_swap_chains() {
        let (runtime, mut backend, mut view) = view_with(LayerConfig {
            depth_format: Some(SwapChainFormat::Depth24Stencil8),
            ..Default::default()
        });
        assert_eq!(runtime.live_swap_chain_count(), 2);
        view.recreate_swap_chains(&mut backend, (3072, 2688)).unwrap();
        assert_eq!(runtime.live_swap_chain_count(), 2);
        assert_eq!(view.layer(0).unwrap().color().size(), (3072, 2688));
        view.destroy(&mut backend);
        assert_eq!(runtime.live_swap_chain_count(), 0);
    }

    #[test]
    fn test_mirror_views() {
        let (runtime, mut backend, mut view) = view_with(LayerConfig::default());
        view.create_mirror(&mut backend, 1.0).unwrap();
        let mirror = runtime.mirror_views();
        assert_eq!(mirror.len(), 2);
        assert_eq!(mirror[1].viewport.x, MIRROR_EYE_WIDTH);
        assert_eq!(mirror[1].viewport.height, 512);

        let recorder = backend.recorder();
        view.sync_frame().unwrap();
        view.begin_frame().unwrap();
        view.present_mirror(&mut backend).unwrap();
        view.end_frame().unwrap();
        assert!(recorder
            .commands()
            .iter()
            .any(|c| matches!(c, crate::backend::DummyCommand::PresentMirror(_))));
        assert_eq!(runtime.acquired_image_count(), 0);
        view.destroy(&mut backend);
    }
}
