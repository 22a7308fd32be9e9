//! Simulated marker world.

use std::collections::{BTreeMap, HashMap};

use glam::{DMat4, DVec3};

use super::{invalid, Inner, RuntimeCall, SimulatedRuntime};
use crate::runtime::*;

/// Timeout of markers the client never configured.
const DEFAULT_MARKER_TIMEOUT_NS: i64 = 0;

#[derive(Debug, Clone)]
struct SimMarker {
    object: WorldObjectId,
    pose: DMat4,
    velocity: DVec3,
    size: DVec3,
    last_seen_ns: i64,
}

#[derive(Debug, Default)]
pub(super) struct SimWorld {
    markers: BTreeMap<MarkerId, SimMarker>,
    timeouts: HashMap<MarkerId, i64>,
    flags: HashMap<MarkerId, ObjectMarkerFlags>,
    /// Markers visible as of the last sync.
    visible: Vec<MarkerId>,
}

impl SimWorld {
    fn marker_by_object(&self, object: WorldObjectId) -> Option<(MarkerId, &SimMarker)> {
        self.visible
            .iter()
            .filter_map(|id| self.markers.get(id).map(|m| (*id, m)))
            .find(|(_, m)| m.object == object)
    }
}

pub(super) fn init(inner: &Inner, flags: WorldFlags) -> RuntimeResult<WorldId> {
    if !flags.contains(WorldFlags::USE_OBJECT_MARKERS) {
        return Err(invalid("world without object markers is not supported"));
    }
    let id = {
        let mut state = inner.state.lock();
        let id = WorldId(state.next_world);
        state.next_world += 1;
        state.worlds.insert(id, SimWorld::default());
        id
    };
    inner.record(RuntimeCall::WorldInit);
    Ok(id)
}

pub(super) fn sync(inner: &Inner, world: WorldId) -> RuntimeResult<()> {
    {
        let mut state = inner.state.lock();
        let now = state.now_ns;
        let world = state
            .worlds
            .get_mut(&world)
            .ok_or_else(|| invalid("unknown world"))?;
        let timeouts = &world.timeouts;
        world.visible = world
            .markers
            .iter()
            .filter(|(id, marker)| {
                let timeout = timeouts
                    .get(*id)
                    .copied()
                    .unwrap_or(DEFAULT_MARKER_TIMEOUT_NS);
                now - marker.last_seen_ns <= timeout
            })
            .map(|(id, _)| *id)
            .collect();
    }
    inner.record(RuntimeCall::WorldSync);
    Ok(())
}

pub(super) fn objects(inner: &Inner, world: WorldId, mask: ComponentTypeMask) -> Vec<WorldObject> {
    let markers_mask = ComponentTypeMask::POSE | ComponentTypeMask::OBJECT_MARKER;
    if !markers_mask.contains(mask) {
        return Vec::new();
    }
    let state = inner.state.lock();
    let Some(world) = state.worlds.get(&world) else {
        return Vec::new();
    };
    world
        .visible
        .iter()
        .filter_map(|id| world.markers.get(id))
        .map(|m| WorldObject {
            id: m.object,
            type_mask: markers_mask,
        })
        .collect()
}

pub(super) fn pose_component(
    inner: &Inner,
    world: WorldId,
    object: WorldObjectId,
    display_time: i64,
) -> RuntimeResult<PoseComponent> {
    let state = inner.state.lock();
    let world = state
        .worlds
        .get(&world)
        .ok_or_else(|| invalid("unknown world"))?;
    let (id, marker) = world
        .marker_by_object(object)
        .ok_or_else(|| invalid("unknown object"))?;

    let flags = world.flags.get(&id).copied().unwrap_or_default();
    let mut pose = marker.pose;
    let mut pose_flags = PoseFlags::HAS_POSITION | PoseFlags::HAS_ORIENTATION;
    if flags.contains(ObjectMarkerFlags::DO_PREDICTION) {
        let dt = (display_time - marker.last_seen_ns) as f64 * 1e-9;
        pose.w_axis += (marker.velocity * dt).extend(0.0);
        pose_flags |= PoseFlags::HAS_VELOCITY;
    }

    Ok(PoseComponent {
        pose,
        velocity: marker.velocity,
        angular_velocity: DVec3::ZERO,
        flags: pose_flags,
        time_stamp: marker.last_seen_ns,
        confidence: 1.0,
    })
}

pub(super) fn marker_component(
    inner: &Inner,
    world: WorldId,
    object: WorldObjectId,
) -> RuntimeResult<ObjectMarkerComponent> {
    let state = inner.state.lock();
    let world = state
        .worlds
        .get(&world)
        .ok_or_else(|| invalid("unknown world"))?;
    let (id, marker) = world
        .marker_by_object(object)
        .ok_or_else(|| invalid("unknown object"))?;
    Ok(ObjectMarkerComponent {
        id,
        size: marker.size,
        flags: world.flags.get(&id).copied().unwrap_or_default(),
    })
}

pub(super) fn set_timeouts(
    inner: &Inner,
    world: WorldId,
    markers: &[MarkerId],
    timeout_ns: i64,
) -> RuntimeResult<()> {
    {
        let mut state = inner.state.lock();
        let world = state
            .worlds
            .get_mut(&world)
            .ok_or_else(|| invalid("unknown world"))?;
        for id in markers {
            world.timeouts.insert(*id, timeout_ns);
        }
    }
    inner.record(RuntimeCall::SetMarkerTimeouts {
        count: markers.len(),
        timeout_ns,
    });
    Ok(())
}

pub(super) fn set_flags(
    inner: &Inner,
    world: WorldId,
    markers: &[MarkerId],
    flags: ObjectMarkerFlags,
) -> RuntimeResult<()> {
    {
        let mut state = inner.state.lock();
        let world = state
            .worlds
            .get_mut(&world)
            .ok_or_else(|| invalid("unknown world"))?;
        for id in markers {
            world.flags.insert(*id, flags);
        }
    }
    inner.record(RuntimeCall::SetMarkerFlags {
        count: markers.len(),
        flags,
    });
    Ok(())
}

impl SimulatedRuntime {
    /// Report that marker `id` was seen now at `pose`. `size` is width and height in meters.
    pub fn observe_marker(&self, id: MarkerId, pose: DMat4, size: (f64, f64)) {
        self.observe_moving_marker(id, pose, DVec3::ZERO, size);
    }

    pub fn observe_moving_marker(&self, id: MarkerId, pose: DMat4, velocity: DVec3, size: (f64, f64)) {
        let mut state = self.inner.state.lock();
        let now = state.now_ns;
        for world in state.worlds.values_mut() {
            let object = WorldObjectId(id);
            let marker = world.markers.entry(id).or_insert_with(|| SimMarker {
                object,
                pose,
                velocity,
                size: DVec3::new(size.0, 0.0, size.1),
                last_seen_ns: now,
            });
            marker.pose = pose;
            marker.velocity = velocity;
            marker.size = DVec3::new(size.0, 0.0, size.1);
            marker.last_seen_ns = now;
        }
    }
}
