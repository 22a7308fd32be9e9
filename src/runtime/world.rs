//! World model types: tracked objects and their components.

use bitflags::bitflags;
use glam::{DMat4, DVec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldObjectId(pub u64);

/// Visual marker id printed on the marker.
pub type MarkerId = u64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WorldFlags: u32 {
        const USE_OBJECT_MARKERS = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ComponentTypeMask: u32 {
        const POSE = 1 << 0;
        const OBJECT_MARKER = 1 << 1;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectMarkerFlags: u32 {
        /// Extrapolate the pose instead of filtering it as stationary.
        const DO_PREDICTION = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PoseFlags: u32 {
        const HAS_POSITION = 1 << 0;
        const HAS_ORIENTATION = 1 << 1;
        const HAS_VELOCITY = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldObject {
    pub id: WorldObjectId,
    pub type_mask: ComponentTypeMask,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseComponent {
    pub pose: DMat4,
    pub velocity: DVec3,
    pub angular_velocity: DVec3,
    pub flags: PoseFlags,
    /// Time of the last observation. Unchanged while the object is occluded.
    pub time_stamp: i64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectMarkerComponent {
    pub id: MarkerId,
    /// Physical size in meters (width, height, depth).
    pub size: DVec3,
    pub flags: ObjectMarkerFlags,
}
