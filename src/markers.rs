//! Visual marker tracking
//!
//! Wraps a runtime world created with object markers enabled and exposes the
//! markers seen this frame as a plain list.

use std::sync::Arc;
use std::time::Duration;

use glam::{DMat4, DVec3};

use crate::error::{ClientError, ClientResult};
use crate::runtime::{
    ComponentTypeMask, MarkerId, ObjectMarkerFlags, Runtime, WorldFlags, WorldId,
};

/// Marker ids printed on the standard marker sheets.
pub const MARKER_ID_RANGE: std::ops::RangeInclusive<MarkerId> = 100..=499;

/// How long a marker stays in the list after it was last observed.
pub const MARKER_LIFETIME: Duration = Duration::from_secs(2);

const VOLUME_STEP: f64 = 0.05;
const DEFAULT_VOLUME_MULTIPLIER: f64 = 0.1;

/// A marker visible this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerObject {
    pub pose: DMat4,
    /// Width, 0, height in meters.
    pub size: DVec3,
    pub id: MarkerId,
    pub predicted: bool,
}

impl MarkerObject {
    /// Scale of the box drawn for the marker. The height is the sum of the
    /// sides times `volume_multiplier`.
    pub fn render_scale(&self, volume_multiplier: f64) -> DVec3 {
        DVec3::new(
            self.size.x,
            (self.size.x + self.size.z) * volume_multiplier,
            self.size.z,
        )
    }
}

pub struct MarkerTracker {
    runtime: Arc<dyn Runtime>,
    world: WorldId,
    markers: Vec<MarkerObject>,
    locked: bool,
    volume_multiplier: f64,
}

impl MarkerTracker {
    /// Create the world, set lifetimes for the whole id range and enable
    /// prediction for odd ids. Even ids stay stationary with extra filtering.
    pub fn new(runtime: Arc<dyn Runtime>) -> ClientResult<Self> {
        let world = runtime
            .world_init(WorldFlags::USE_OBJECT_MARKERS)
            .map_err(|e| ClientError::runtime("WorldInit", e))?;

        let ids: Vec<MarkerId> = MARKER_ID_RANGE.collect();
        runtime
            .world_set_object_marker_timeouts(world, &ids, MARKER_LIFETIME.as_nanos() as i64)
            .map_err(|e| ClientError::runtime("WorldSetObjectMarkerTimeouts", e))?;

        let predicted: Vec<MarkerId> = ids.iter().copied().filter(|id| id % 2 == 1).collect();
        runtime
            .world_set_object_marker_flags(world, &predicted, ObjectMarkerFlags::DO_PREDICTION)
            .map_err(|e| ClientError::runtime("WorldSetObjectMarkerFlags", e))?;

        Ok(Self {
            runtime,
            world,
            markers: Vec::new(),
            locked: false,
            volume_multiplier: DEFAULT_VOLUME_MULTIPLIER,
        })
    }

    /// Refresh the marker list for a frame displayed at `display_time`.
    ///
    /// Does nothing while the list is locked.
    pub fn update(&mut self, display_time: i64) -> ClientResult<()> {
        if self.locked {
            return Ok(());
        }

        self.runtime
            .world_sync(self.world)
            .map_err(|e| ClientError::runtime("WorldSync", e))?;

        let mask = ComponentTypeMask::POSE | ComponentTypeMask::OBJECT_MARKER;
        self.markers.clear();
        if self.runtime.world_object_count(self.world, mask) == 0 {
            return Ok(());
        }

        for object in self.runtime.world_objects(self.world, mask) {
            // The pose time stamp stays put while the marker is occluded.
            let pose = self
                .runtime
                .world_pose_component(self.world, object.id, display_time)
                .map_err(|e| ClientError::runtime("WorldGetPoseComponent", e))?;
            let marker = self
                .runtime
                .world_object_marker_component(self.world, object.id)
                .map_err(|e| ClientError::runtime("WorldGetObjectMarkerComponent", e))?;

            self.markers.push(MarkerObject {
                pose: pose.pose,
                size: DVec3::new(marker.size.x, 0.0, marker.size.z),
                id: marker.id,
                predicted: marker.flags.contains(ObjectMarkerFlags::DO_PREDICTION),
            });
        }
        log::trace!("{} markers visible", self.markers.len());
        Ok(())
    }

    pub fn markers(&self) -> &[MarkerObject] {
        &self.markers
    }

    /// Freeze or unfreeze the marker list.
    pub fn toggle_lock(&mut self) -> bool {
        self.locked = !self.locked;
        log::info!(
            "Lock Markers {}",
            if self.locked { "ENABLED" } else { "DISABLED" }
        );
        self.locked
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn update_volume(&mut self, increase: bool) -> f64 {
        self.volume_multiplier += if increase { VOLUME_STEP } else { -VOLUME_STEP };
        log::info!(
            "Marker volume {} to {:.2}",
            if increase { "Increased" } else { "Decreased" },
            self.volume_multiplier
        );
        self.volume_multiplier
    }

    pub fn volume_multiplier(&self) -> f64 {
        self.volume_multiplier
    }
}

impl Drop for MarkerTracker {
    fn drop(&mut self) {
        self.runtime.world_destroy(self.world);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{RuntimeCall, SimulatedRuntime};

    fn tracker() -> (Arc<SimulatedRuntime>, MarkerTracker) {
        let runtime = Arc::new(SimulatedRuntime::default());
        let tracker = MarkerTracker::new(runtime.clone()).unwrap();
        (runtime, tracker)
    }

    #[test]
    fn test_init_configures_id_range() {
        let (runtime, _tracker) = tracker();
        let calls = runtime.calls();
        assert!(calls.contains(&RuntimeCall::SetMarkerTimeouts {
            count: 400,
            timeout_ns: 2_000_000_000
        }));
        assert!(calls.contains(&RuntimeCall::SetMarkerFlags {
            count: 200,
            flags: ObjectMarkerFlags::DO_PREDICTION
        }));
    }

    #[test]
    fn test_marker_visible_for_lifetime() {
        let (runtime, mut tracker) = tracker();
        runtime.observe_marker(120, DMat4::IDENTITY, (0.15, 0.15));
        tracker.update(runtime.current_time()).unwrap();
        assert_eq!(tracker.markers().len(), 1);
        assert_eq!(tracker.markers()[0].id, 120);
        assert!(!tracker.markers()[0].predicted);

        for _ in 0..19 {
            runtime.advance_clock(Duration::from_millis(100));
            tracker.update(runtime.current_time()).unwrap();
            assert_eq!(tracker.markers().len(), 1);
        }
        runtime.advance_clock(Duration::from_millis(150));
        tracker.update(runtime.current_time()).unwrap();
        assert!(tracker.markers().is_empty());
    }

    #[test]
    fn test_odd_ids_predicted() {
        let (runtime, mut tracker) = tracker();
        runtime.observe_marker(121, DMat4::IDENTITY, (0.1, 0.2));
        tracker.update(runtime.current_time()).unwrap();
        let marker = tracker.markers()[0];
        assert!(marker.predicted);
        assert_eq!(marker.size, DVec3::new(0.1, 0.0, 0.2));
    }

    #[test]
    fn test_lock_freezes_list() {
        let (runtime, mut tracker) = tracker();
        runtime.observe_marker(200, DMat4::IDENTITY, (0.1, 0.1));
        tracker.update(runtime.current_time()).unwrap();
        assert!(tracker.toggle_lock());

        runtime.advance_clock(Duration::from_secs(5));
        tracker.update(runtime.current_time()).unwrap();
        assert_eq!(tracker.markers().len(), 1);

        assert!(!tracker.toggle_lock());
        tracker.update(runtime.current_time()).unwrap();
        assert!(tracker.markers().is_empty());
    }

    #[test]
    fn test_volume_multiplier() {
        let (_runtime, mut tracker) = tracker();
        let up = tracker.update_volume(true);
        assert!((up - 0.15).abs() < 1e-12);
        let marker = MarkerObject {
            pose: DMat4::IDENTITY,
            size: DVec3::new(0.2, 0.0, 0.2),
            id: 100,
            predicted: false,
        };
        assert!((marker.render_scale(up).y - 0.06).abs() < 1e-12);
    }
}
