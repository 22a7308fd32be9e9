//! Per-frame instance data.

use crate::backend::{
    BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend, NodeMask,
    ObjectRenderData,
};

use super::geometry::GeometryId;

/// Maximum instances per frame slot.
pub const MAX_INSTANCES: u32 = 5000;

/// Consecutive instances drawn with the same geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceGroup {
    pub geometry: GeometryId,
    /// Byte offset of the first instance in the buffer.
    pub byte_offset: u64,
    pub instance_count: u32,
}

/// Dynamic vertex buffer of [`ObjectRenderData`] plus its draw groups.
///
/// Filled on the CPU between [`InstanceBuffer::begin`] and
/// [`InstanceBuffer::upload`]; the total never exceeds the capacity.
#[derive(Debug)]
pub struct InstanceBuffer {
    buffer: BufferHandle,
    capacity: u32,
    staging: Vec<ObjectRenderData>,
    groups: Vec<InstanceGroup>,
    dropped: u32,
}

impl InstanceBuffer {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        capacity: u32,
        node_mask: NodeMask,
        label: &str,
    ) -> BackendResult<Self> {
        let stride = std::mem::size_of::<ObjectRenderData>() as u64;
        let buffer = backend.create_buffer(
            &BufferDescriptor::new(label, stride * capacity.max(1) as u64, BufferUsage::VERTEX)
                .with_node_mask(node_mask),
        )?;
        Ok(Self {
            buffer,
            capacity,
            staging: Vec::with_capacity(capacity as usize),
            groups: Vec::new(),
            dropped: 0,
        })
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Forget last frame's contents.
    pub fn begin(&mut self) {
        self.staging.clear();
        self.groups.clear();
        self.dropped = 0;
    }

    /// Append a group; instances beyond the capacity are dropped.
    ///
    /// Returns how many instances were accepted.
    pub fn push_group(&mut self, geometry: GeometryId, instances: &[ObjectRenderData]) -> u32 {
        let free = self.capacity as usize - self.staging.len();
        let accepted = instances.len().min(free);
        self.dropped += (instances.len() - accepted) as u32;
        if accepted == 0 {
            return 0;
        }

        let stride = std::mem::size_of::<ObjectRenderData>() as u64;
        self.groups.push(InstanceGroup {
            geometry,
            byte_offset: self.staging.len() as u64 * stride,
            instance_count: accepted as u32,
        });
        self.staging.extend_from_slice(&instances[..accepted]);
        accepted as u32
    }

    pub fn groups(&self) -> &[InstanceGroup] {
        &self.groups
    }

    pub fn instance_count(&self) -> u32 {
        self.staging.len() as u32
    }

    /// Instances rejected since the last `begin`.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    pub fn upload<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) -> BackendResult<()> {
        if self.dropped > 0 {
            log::warn!(
                "Instance buffer full: {} instances dropped (capacity {})",
                self.dropped,
                self.capacity
            );
        }
        if self.staging.is_empty() {
            return Ok(());
        }
        backend.write_buffer(self.buffer, 0, bytemuck::cast_slice(&self.staging))
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}
