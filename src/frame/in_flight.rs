//! Ring of frame slots the CPU records into while the GPU drains older ones.

use crate::backend::{BackendResult, GraphicsBackend, NodeMask};
use crate::resources::InstanceBuffer;

use super::sync::FrameFence;

/// Frames recorded ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Lifecycle of a frame slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Recording,
    /// Submitted with this fence value and not yet known to be retired.
    Submitted(u64),
}

/// Per-slot resources: one instance buffer per GPU node.
#[derive(Debug)]
pub struct FrameSlot {
    state: SlotState,
    instances: Vec<InstanceBuffer>,
}

impl FrameSlot {
    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn instances(&self, node: u32) -> Option<&InstanceBuffer> {
        self.instances.get(node as usize)
    }

    pub fn instances_mut(&mut self, node: u32) -> Option<&mut InstanceBuffer> {
        self.instances.get_mut(node as usize)
    }

    pub fn node_count(&self) -> u32 {
        self.instances.len() as u32
    }
}

/// Fixed ring of [`FrameSlot`]s sharing one value-based fence.
#[derive(Debug)]
pub struct InFlightRing {
    fence: FrameFence,
    slots: Vec<FrameSlot>,
    current: usize,
    last_submitted: u64,
}

impl InFlightRing {
    pub fn new<B: GraphicsBackend + ?Sized>(
        backend: &mut B,
        depth: usize,
        node_count: u32,
        instance_capacity: u32,
    ) -> BackendResult<Self> {
        let mut slots = Vec::with_capacity(depth.max(1));
        for slot in 0..depth.max(1) {
            let mut instances = Vec::with_capacity(node_count.max(1) as usize);
            for node in 0..node_count.max(1) {
                instances.push(InstanceBuffer::new(
                    backend,
                    instance_capacity,
                    NodeMask::node(node),
                    &format!("instances_slot{slot}_node{node}"),
                )?);
            }
            slots.push(FrameSlot {
                state: SlotState::Free,
                instances,
            });
        }
        Ok(Self {
            fence: FrameFence::new(),
            slots,
            // The first `begin` moves to slot 0.
            current: depth.max(1) - 1,
            last_submitted: 0,
        })
    }

    pub fn fence(&self) -> &FrameFence {
        &self.fence
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot> {
        self.slots.get(index)
    }

    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[self.current]
    }

    /// Fence value of the most recent submission.
    pub fn last_submitted(&self) -> u64 {
        self.last_submitted
    }

    /// Advance to the next slot and start recording into it.
    ///
    /// Blocks until the GPU has retired the slot's previous submission.
    pub fn begin<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> &mut FrameSlot {
        self.current = (self.current + 1) % self.slots.len();
        let fence = &self.fence;
        let slot = &mut self.slots[self.current];
        match slot.state {
            SlotState::Submitted(value) => {
                if !fence.is_complete(value) {
                    log::trace!("Waiting for frame slot fence value {value}");
                    backend.wait_fence(fence, value);
                }
            }
            SlotState::Recording => {
                log::warn!("Frame slot {} was never submitted", self.current);
            }
            SlotState::Free => {}
        }
        slot.state = SlotState::Recording;
        for instances in &mut slot.instances {
            instances.begin();
        }
        slot
    }

    /// Submit the recording slot. Returns the fence value it retires with.
    pub fn submit<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> BackendResult<u64> {
        let value = self.last_submitted + 1;
        backend.submit(&self.fence, value)?;
        self.last_submitted = value;
        self.slots[self.current].state = SlotState::Submitted(value);
        Ok(value)
    }

    /// Refresh slot states from the fence without blocking.
    pub fn retire(&mut self) {
        let completed = self.fence.completed_value();
        for slot in &mut self.slots {
            if matches!(slot.state, SlotState::Submitted(value) if value <= completed) {
                slot.state = SlotState::Free;
            }
        }
    }

    /// Block until every submission has retired.
    pub fn wait_idle<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        if self.last_submitted > 0 {
            backend.wait_fence(&self.fence, self.last_submitted);
        }
        self.retire();
    }

    pub fn destroy<B: GraphicsBackend + ?Sized>(mut self, backend: &mut B) {
        self.wait_idle(backend);
        for slot in self.slots {
            for instances in slot.instances {
                instances.destroy(backend);
            }
        }
    }
}
