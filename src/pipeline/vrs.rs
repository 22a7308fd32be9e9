//! Variable rate shading image.
//!
//! One `R8Uint` tile-rate texture per GPU node covers the whole atlas. Before a
//! view is drawn the runtime fills that view's tiles (finest around the view
//! center or the gaze, culled under the occlusion area) and the result is
//! uploaded and bound to the rasterizer.

use crate::backend::{
    BackendResult, GraphicsBackend, NodeMask, PipelineHandle, TextureDescriptor, TextureHandle,
    TextureFormat, TextureUsage,
};
use crate::error::{ClientError, ClientResult};
use crate::runtime::{
    Gaze, GazeStatus, Runtime, ShadingRate, ShadingRateTable, VariableRateShadingConfig,
    VrsFlags, VrsImage, Viewport,
};

/// Runtime rate index to device shading rate.
pub const SHADING_RATE_TABLE: ShadingRateTable = [
    ShadingRate::X16PerPixel,
    ShadingRate::X8PerPixel,
    ShadingRate::X4PerPixel,
    ShadingRate::X2PerPixel,
    ShadingRate::Rate1x1,
    ShadingRate::Rate1x2,
    ShadingRate::Rate2x1,
    ShadingRate::Rate2x2,
    ShadingRate::Rate2x4,
    ShadingRate::Rate4x2,
    ShadingRate::Rate4x4,
    ShadingRate::Cull,
    ShadingRate::Cull,
    ShadingRate::Cull,
    ShadingRate::Cull,
    ShadingRate::Cull,
];

const INNER_RADIUS: f32 = 0.1;
const OUTER_RADIUS: f32 = 0.15;

/// Viewport in pixels to viewport in tiles.
pub fn map_to_vrs_texture(viewport: Viewport, tile_size: u32) -> Viewport {
    let tile = tile_size.max(1) as i32;
    Viewport::new(
        viewport.x / tile,
        viewport.y / tile,
        viewport.width / tile,
        viewport.height / tile,
    )
}

/// Fill request for one view.
///
/// The gaze flag follows the availability of a gaze sample; the sample itself
/// is only passed on when it is valid.
pub fn shading_rate_config(
    view_index: u32,
    viewport: Viewport,
    tile_size: u32,
    stereo: bool,
    use_gaze: bool,
    gaze: Option<&Gaze>,
) -> VariableRateShadingConfig {
    let mut flags = VrsFlags::OCCLUSION_MAP;
    if stereo {
        flags |= VrsFlags::STEREO;
    }
    if use_gaze && gaze.is_some() {
        flags |= VrsFlags::GAZE;
    }
    VariableRateShadingConfig {
        view_index,
        viewport: map_to_vrs_texture(viewport, tile_size),
        flags,
        inner_radius: INNER_RADIUS,
        outer_radius: OUTER_RADIUS,
        gaze: gaze
            .filter(|g| use_gaze && g.status == GazeStatus::Valid)
            .copied(),
    }
}

/// Tile-rate image and its per-node textures.
#[derive(Debug)]
pub struct VrsMap {
    textures: Vec<TextureHandle>,
    image: VrsImage,
    tile_size: u32,
    stereo: bool,
    use_gaze: bool,
}

impl VrsMap {
    /// Create a map for an atlas of `atlas` pixels using the device tile size.
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        atlas: (i32, i32),
        node_count: u32,
        stereo: bool,
        use_gaze: bool,
    ) -> BackendResult<Self> {
        let tile_size = backend.capabilities().vrs_tile_size.max(1);
        let width = (atlas.0.max(0) as u32).div_ceil(tile_size);
        let height = (atlas.1.max(0) as u32).div_ceil(tile_size);

        let mut textures = Vec::with_capacity(node_count.max(1) as usize);
        for node in 0..node_count.max(1) {
            let desc = TextureDescriptor::new(
                format!("vrs_node{node}"),
                width,
                height,
                TextureFormat::R8Uint,
            )
            .with_usage(TextureUsage::COPY_DST | TextureUsage::TEXTURE_BINDING)
            .with_node_mask(NodeMask::node(node));
            match backend.create_texture(&desc) {
                Ok(texture) => textures.push(texture),
                Err(e) => {
                    for texture in textures {
                        backend.destroy_texture(texture);
                    }
                    return Err(e);
                }
            }
        }

        log::info!("VRS map {width}x{height} tiles of {tile_size} px");
        Ok(Self {
            textures,
            image: VrsImage::new(width, height),
            tile_size,
            stereo,
            use_gaze,
        })
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn image(&self) -> &VrsImage {
        &self.image
    }

    pub fn texture(&self, node: u32) -> Option<TextureHandle> {
        self.textures.get(node as usize).copied()
    }

    /// Refill the tiles of one view and bind the result on `node`.
    pub fn update<B: GraphicsBackend + ?Sized>(
        &mut self,
        runtime: &dyn Runtime,
        backend: &mut B,
        view_index: u32,
        viewport: Viewport,
        node: u32,
        gaze: Option<&Gaze>,
    ) -> ClientResult<()> {
        let config = shading_rate_config(
            view_index,
            viewport,
            self.tile_size,
            self.stereo,
            self.use_gaze,
            gaze,
        );
        runtime
            .fill_variable_rate_shading(&config, &SHADING_RATE_TABLE, &mut self.image)
            .map_err(|e| ClientError::runtime("UpdateVariableRateShadingTexture", e))?;

        let texture = self
            .texture(node)
            .ok_or_else(|| ClientError::InvalidConfig(format!("no VRS texture on node {node}")))?;
        backend.update_shading_rate_image(texture, &self.image)?;
        backend.set_shading_rate_image(Some(texture));
        Ok(())
    }

    /// Overlay the shading rates onto the bound target.
    pub fn visualize<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        pipeline: PipelineHandle,
        node: u32,
    ) {
        let Some(texture) = self.texture(node) else {
            return;
        };
        backend.set_pipeline(pipeline);
        backend.set_shading_rate_image(Some(texture));
        backend.draw(0..3, 0..1);
        backend.set_shading_rate_image(None);
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        for texture in self.textures {
            backend.destroy_texture(texture);
        }
    }
}
