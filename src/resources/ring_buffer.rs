//! Ring of per-view constant blocks.
//!
//! One uniform buffer is carved into fixed 256-byte aligned slots. Each view of
//! each frame writes its constants into the next slot and binds it with a
//! dynamic offset, so nothing the GPU may still be reading is overwritten as
//! long as the ring holds more slots than the frames in flight consume.
//!
//! ```ignore
//! let mut ring = ConstantRing::new(&mut backend, 16, NodeMask::NODE_0, "view_constants")?;
//! let alloc = ring.write(&mut backend, &constants)?;
//! backend.set_constants(ring.buffer(), alloc.offset);
//! ```

use bytemuck::Pod;

use crate::backend::{
    BackendError, BackendResult, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend,
    NodeMask,
};

/// Smallest number of slots a ring is created with.
pub const MIN_CONSTANT_SLOTS: u32 = 16;

/// A sub-allocation from a ring buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingAllocation {
    /// Byte offset into the ring buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

impl RingAllocation {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Constant buffer ring with one aligned slot per allocation.
#[derive(Debug)]
pub struct ConstantRing {
    buffer: BufferHandle,
    slot_size: u64,
    slot_count: u32,
    next_slot: u32,
    wrap_count: u64,
}

impl ConstantRing {
    /// Alignment of every slot, the usual minimum dynamic uniform offset.
    pub const ALIGNMENT: u64 = 256;

    /// Create a ring of at least [`MIN_CONSTANT_SLOTS`] slots of up to 256 bytes.
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        slot_count: u32,
        node_mask: NodeMask,
        label: &str,
    ) -> BackendResult<Self> {
        Self::with_slot_size(backend, slot_count, Self::ALIGNMENT, node_mask, label)
    }

    pub fn with_slot_size<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        slot_count: u32,
        slot_size: u64,
        node_mask: NodeMask,
        label: &str,
    ) -> BackendResult<Self> {
        let slot_count = slot_count.max(MIN_CONSTANT_SLOTS);
        let slot_size = align_up(slot_size.max(1), Self::ALIGNMENT);
        let descriptor = BufferDescriptor::new(
            format!("{label}_ring"),
            slot_size * slot_count as u64,
            BufferUsage::UNIFORM,
        )
        .with_node_mask(node_mask);
        let buffer = backend.create_buffer(&descriptor)?;

        Ok(Self {
            buffer,
            slot_size,
            slot_count,
            next_slot: 0,
            wrap_count: 0,
        })
    }

    /// Get the underlying GPU buffer.
    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    pub fn slot_size(&self) -> u64 {
        self.slot_size
    }

    /// Get the number of times the ring has wrapped around.
    pub fn wrap_count(&self) -> u64 {
        self.wrap_count
    }

    /// Claim the next slot, wrapping to the start after the last one.
    pub fn allocate(&mut self, size: u64) -> Option<RingAllocation> {
        if size > self.slot_size {
            return None;
        }
        let offset = self.next_slot as u64 * self.slot_size;
        self.next_slot += 1;
        if self.next_slot == self.slot_count {
            self.next_slot = 0;
            self.wrap_count += 1;
        }
        Some(RingAllocation::new(offset, size))
    }

    /// Allocate a slot and upload `value` into it.
    pub fn write<B: GraphicsBackend + ?Sized, T: Pod>(
        &mut self,
        backend: &mut B,
        value: &T,
    ) -> BackendResult<RingAllocation> {
        let bytes = bytemuck::bytes_of(value);
        let alloc = self
            .allocate(bytes.len() as u64)
            .ok_or(BackendError::OutOfBounds {
                offset: 0,
                len: bytes.len() as u64,
                size: self.slot_size,
            })?;
        backend.write_buffer(self.buffer, alloc.offset, bytes)?;
        Ok(alloc)
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}

/// Align a value up to the given alignment.
#[inline]
fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
