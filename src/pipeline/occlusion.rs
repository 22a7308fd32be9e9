//! Occlusion-mesh stencil prepass.
//!
//! The runtime reports, per context view, the triangles covering pixels the
//! lenses never show. They are drawn first with the stencil set to
//! [`OCCLUSION_STENCIL_REFERENCE`]; grid and scene pipelines then only pass
//! where the stencil is still 0.

use crate::backend::{BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, NodeMask, PipelineHandle};
use crate::error::{ClientError, ClientResult};
use crate::runtime::{Runtime, WindingOrder};

/// Views that have an occlusion mesh; focus views are fully visible.
pub const OCCLUDED_VIEWS: usize = 2;

/// Stencil value written over occluded pixels.
pub const OCCLUSION_STENCIL_REFERENCE: u32 = 1;

#[derive(Debug, Clone, Copy, Default)]
struct MeshBuffer {
    buffer: Option<BufferHandle>,
    vertex_count: u32,
}

/// Occlusion vertex buffers for every occluded view on every GPU node.
#[derive(Debug)]
pub struct OcclusionMeshes {
    node_count: u32,
    /// Indexed by view, then node.
    views: Vec<Vec<MeshBuffer>>,
    rebuilds: [u32; OCCLUDED_VIEWS],
}

impl OcclusionMeshes {
    pub fn new<B: GraphicsBackend + ?Sized>(
        runtime: &dyn Runtime,
        backend: &mut B,
        node_count: u32,
    ) -> ClientResult<Self> {
        let mut meshes = Self {
            node_count: node_count.max(1),
            views: vec![Vec::new(); OCCLUDED_VIEWS],
            rebuilds: [0; OCCLUDED_VIEWS],
        };
        for view in 0..OCCLUDED_VIEWS {
            meshes.load_view(runtime, backend, view)?;
        }
        Ok(meshes)
    }

    fn load_view<B: GraphicsBackend + ?Sized>(
        &mut self,
        runtime: &dyn Runtime,
        backend: &mut B,
        view: usize,
    ) -> ClientResult<()> {
        let mesh = runtime
            .create_occlusion_mesh(view, WindingOrder::CounterClockwise)
            .map_err(|e| ClientError::runtime("CreateOcclusionMesh", e))?;

        let mut buffers = Vec::with_capacity(self.node_count as usize);
        for node in 0..self.node_count {
            if mesh.is_empty() {
                buffers.push(MeshBuffer::default());
                continue;
            }
            let bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
            let buffer = backend.create_buffer(
                &BufferDescriptor::new(
                    format!("occlusion_mesh_{view}_node{node}"),
                    bytes.len() as u64,
                    BufferUsage::VERTEX,
                )
                .with_node_mask(NodeMask::node(node)),
            )?;
            backend.write_buffer(buffer, 0, bytes)?;
            buffers.push(MeshBuffer {
                buffer: Some(buffer),
                vertex_count: mesh.vertices.len() as u32,
            });
        }

        log::debug!(
            "Occlusion mesh for view {}: {} vertices",
            view,
            mesh.vertices.len()
        );
        self.views[view] = buffers;
        Ok(())
    }

    /// Replace the buffers of `view` with the runtime's current mesh.
    ///
    /// The GPU must be idle: the old buffers are destroyed immediately.
    /// Views without an occlusion mesh are ignored.
    pub fn rebuild<B: GraphicsBackend + ?Sized>(
        &mut self,
        runtime: &dyn Runtime,
        backend: &mut B,
        view: usize,
    ) -> ClientResult<()> {
        if view >= OCCLUDED_VIEWS {
            return Ok(());
        }
        for mesh in self.views[view].drain(..) {
            if let Some(buffer) = mesh.buffer {
                backend.destroy_buffer(buffer);
            }
        }
        self.load_view(runtime, backend, view)?;
        self.rebuilds[view] += 1;
        log::info!("Rebuilt occlusion mesh of view {view}");
        Ok(())
    }

    pub fn vertex_count(&self, view: usize) -> u32 {
        self.views
            .get(view)
            .and_then(|nodes| nodes.first())
            .map_or(0, |mesh| mesh.vertex_count)
    }

    /// Buffer of `view` on `node`, if the mesh is non-empty.
    pub fn buffer(&self, view: usize, node: u32) -> Option<BufferHandle> {
        self.views
            .get(view)
            .and_then(|nodes| nodes.get(node as usize))
            .and_then(|mesh| mesh.buffer)
    }

    /// Times `view` was rebuilt since creation.
    pub fn rebuild_count(&self, view: usize) -> u32 {
        self.rebuilds.get(view).copied().unwrap_or(0)
    }

    /// Stencil the occluded area of `view`. Returns whether anything was drawn.
    pub fn draw<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        pipeline: PipelineHandle,
        view: usize,
        node: u32,
    ) -> bool {
        let Some(mesh) = self
            .views
            .get(view)
            .and_then(|nodes| nodes.get(node as usize))
            .filter(|mesh| mesh.vertex_count > 0)
        else {
            return false;
        };
        let Some(buffer) = mesh.buffer else {
            return false;
        };
        backend.set_pipeline(pipeline);
        backend.set_stencil_reference(OCCLUSION_STENCIL_REFERENCE);
        backend.set_vertex_buffer(0, buffer, 0);
        backend.draw(0..mesh.vertex_count, 0..1);
        true
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        for buffer in self.views.into_iter().flatten().filter_map(|mesh| mesh.buffer) {
            backend.destroy_buffer(buffer);
        }
    }
}
