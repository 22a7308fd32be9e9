//! Render pipelines of the frame engine
//!
//! Each view is drawn in three steps:
//! 1. Occlusion prepass - stencils the invisible part of the view to 1
//! 2. Grid - background grid, depth off, rejects stenciled pixels
//! 3. Scene - instanced objects, depth on, rejects stenciled pixels
//!
//! An optional VRS visualisation overlays the shading-rate image afterwards.

pub mod occlusion;
pub mod vrs;

pub use occlusion::{OcclusionMeshes, OCCLUDED_VIEWS, OCCLUSION_STENCIL_REFERENCE};
pub use vrs::{map_to_vrs_texture, shading_rate_config, VrsMap, SHADING_RATE_TABLE};

use crate::backend::{
    BackendResult, BlendMode, DepthState, GraphicsBackend, NodeMask, PipelineDescriptor,
    PipelineHandle, PipelineKind, StencilState, TextureFormat,
};

/// State every pipeline of the set is built against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSettings {
    pub color_format: TextureFormat,
    pub depth_format: Option<TextureFormat>,
    pub velocity: bool,
    pub reverse_depth: bool,
    /// Requires a stencil `depth_format`.
    pub occlusion_mesh: bool,
    pub visualize_vrs: bool,
    pub node_mask: NodeMask,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            color_format: TextureFormat::Rgba8UnormSrgb,
            depth_format: Some(TextureFormat::Depth32Float),
            velocity: false,
            reverse_depth: false,
            occlusion_mesh: false,
            visualize_vrs: false,
            node_mask: NodeMask::NODE_0,
        }
    }
}

/// Every pipeline variant a frame may bind.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSet {
    settings: PipelineSettings,
    grid: PipelineHandle,
    grid_blended: PipelineHandle,
    scene: PipelineHandle,
    scene_blended: PipelineHandle,
    occlusion: Option<PipelineHandle>,
    vrs_visualize: Option<PipelineHandle>,
}

impl PipelineSet {
    pub fn create<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        settings: &PipelineSettings,
    ) -> BackendResult<Self> {
        // Pixels stenciled by the prepass are rejected everywhere else.
        let stencil = if settings.occlusion_mesh {
            StencilState::TEST_EQUAL
        } else {
            StencilState::DISABLED
        };
        let scene_depth = if settings.depth_format.is_some() {
            DepthState::enabled(settings.reverse_depth)
        } else {
            DepthState::DISABLED
        };

        let mut create = |kind, depth, stencil, blend| {
            backend.create_pipeline(&PipelineDescriptor {
                kind,
                color_format: settings.color_format,
                depth_format: settings.depth_format,
                velocity: settings.velocity,
                depth,
                stencil,
                blend,
                node_mask: settings.node_mask,
            })
        };

        let grid = create(PipelineKind::Grid, DepthState::DISABLED, stencil, BlendMode::Opaque)?;
        let grid_blended = create(
            PipelineKind::GridBlended,
            DepthState::DISABLED,
            stencil,
            BlendMode::AlphaBlend,
        )?;
        let scene = create(PipelineKind::Scene, scene_depth, stencil, BlendMode::Opaque)?;
        let scene_blended = create(
            PipelineKind::SceneBlended,
            scene_depth,
            stencil,
            BlendMode::AlphaBlend,
        )?;
        let occlusion = settings
            .occlusion_mesh
            .then(|| {
                create(
                    PipelineKind::Occlusion,
                    DepthState::DISABLED,
                    StencilState::WRITE_REFERENCE,
                    BlendMode::Opaque,
                )
            })
            .transpose()?;
        let vrs_visualize = settings
            .visualize_vrs
            .then(|| {
                create(
                    PipelineKind::VrsVisualize,
                    DepthState::DISABLED,
                    StencilState::DISABLED,
                    BlendMode::AlphaBlend,
                )
            })
            .transpose()?;

        log::debug!(
            "Created pipelines (occlusion: {}, vrs overlay: {}, reverse depth: {})",
            occlusion.is_some(),
            vrs_visualize.is_some(),
            settings.reverse_depth
        );
        Ok(Self {
            settings: *settings,
            grid,
            grid_blended,
            scene,
            scene_blended,
            occlusion,
            vrs_visualize,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Background grid; `blended` when composited over video pass-through.
    pub fn grid(&self, blended: bool) -> PipelineHandle {
        if blended {
            self.grid_blended
        } else {
            self.grid
        }
    }

    pub fn scene(&self, blended: bool) -> PipelineHandle {
        if blended {
            self.scene_blended
        } else {
            self.scene
        }
    }

    pub fn occlusion(&self) -> Option<PipelineHandle> {
        self.occlusion
    }

    pub fn vrs_visualize(&self) -> Option<PipelineHandle> {
        self.vrs_visualize
    }
}
