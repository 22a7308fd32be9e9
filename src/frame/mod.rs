//! Frame loop
//!
//! The [`FrameEngine`] turns runtime frame slots into rendered layers. Around
//! it sit the pieces it owns: the in-flight ring that paces CPU recording
//! against the GPU, the animated [`Scene`], and frame-time profiling.

pub mod engine;
pub mod in_flight;
pub mod profiler;
pub mod scene;
pub mod sync;

pub use engine::{
    clip_planes, layer_flags, FrameEngine, FrameOutcome, FrameReport, VstState, FAR_PLANE,
    NEAR_PLANE,
};
pub use in_flight::{FrameSlot, InFlightRing, SlotState, FRAMES_IN_FLIGHT};
pub use profiler::{FpsCounter, FrameProfiler, FPS_REPORT_INTERVAL};
pub use scene::{Scene, SceneObject};
pub use sync::FrameFence;
