//! Scene meshes and their GPU buffers.

use glam::Vec3;

use crate::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, NodeMask,
    SceneVertex,
};

/// Index of an uploaded mesh in the engine's geometry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub usize);

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<SceneVertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Mesh::new("cube");

        let faces = [Vec3::Z, -Vec3::Z, Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y];
        for normal in faces {
            // Two axes spanning the face, ordered so the winding is counter-clockwise.
            let up = if normal.y.abs() > 0.9 { Vec3::Z } else { Vec3::Y };
            let right = up.cross(normal);
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            let base = mesh.vertices.len() as u32;
            for (u, v) in corners {
                mesh.vertices.push(SceneVertex {
                    position: (normal + right * u + up * v) * 0.5,
                    normal,
                });
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a torus in the XZ plane.
    pub fn torus(major_radius: f32, minor_radius: f32, segments: u32, sides: u32) -> Self {
        let mut mesh = Mesh::new("torus");
        let segments = segments.max(3);
        let sides = sides.max(3);

        let tau = std::f32::consts::TAU;
        for i in 0..=segments {
            let theta = i as f32 / segments as f32 * tau;
            let ring_center = Vec3::new(theta.cos(), 0.0, theta.sin());
            for j in 0..=sides {
                let phi = j as f32 / sides as f32 * tau;
                let normal = ring_center * phi.cos() + Vec3::Y * phi.sin();
                mesh.vertices.push(SceneVertex {
                    position: ring_center * major_radius + normal * minor_radius,
                    normal,
                });
            }
        }

        for i in 0..segments {
            for j in 0..sides {
                let current = i * (sides + 1) + j;
                let next = current + sides + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }
}

/// Vertex and index buffers of an uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuGeometry {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub index_count: u32,
}

impl GpuGeometry {
    pub fn upload<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        mesh: &Mesh,
        node_mask: NodeMask,
    ) -> BackendResult<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&mesh.vertices);
        let index_bytes: &[u8] = bytemuck::cast_slice(&mesh.indices);

        let vertex_buffer = backend.create_buffer(
            &BufferDescriptor::new(
                format!("{}_vertices", mesh.name),
                vertex_bytes.len() as u64,
                BufferUsage::VERTEX,
            )
            .with_node_mask(node_mask),
        )?;
        backend.write_buffer(vertex_buffer, 0, vertex_bytes)?;

        let index_buffer = backend.create_buffer(
            &BufferDescriptor::new(
                format!("{}_indices", mesh.name),
                index_bytes.len() as u64,
                BufferUsage::INDEX,
            )
            .with_node_mask(node_mask),
        )?;
        backend.write_buffer(index_buffer, 0, index_bytes)?;

        log::debug!(
            "Uploaded mesh {} ({} triangles)",
            mesh.name,
            mesh.triangle_count()
        );

        Ok(Self {
            vertex_buffer,
            index_buffer,
            index_count: mesh.index_count(),
        })
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        backend.destroy_buffer(self.vertex_buffer);
        backend.destroy_buffer(self.index_buffer);
    }
}
