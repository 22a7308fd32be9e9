//! GPU resources owned by the frame engine: meshes, instance data and constants.

pub mod geometry;
pub mod instance_buffer;
pub mod ring_buffer;

pub use geometry::{GeometryId, GpuGeometry, Mesh};
pub use instance_buffer::{InstanceBuffer, InstanceGroup, MAX_INSTANCES};
pub use ring_buffer::{ConstantRing, RingAllocation, MIN_CONSTANT_SLOTS};
