//! Animated scene content: the donut field, the gaze marker and tracked markers.

use glam::{DMat4, DVec3, Mat4, Quat, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::ObjectRenderData;
use crate::markers::MarkerObject;
use crate::resources::{GeometryId, Mesh};

/// Time step used to extrapolate `next_world` for velocity layers.
pub const VELOCITY_TIME_DELTA: f64 = 1.0 / 60.0;
/// Velocity texture precision, in units per pixel.
pub const VELOCITY_PRECISION: f64 = 32.0;

/// Seed of the donut layout, fixed so every run shows the same field.
pub const DONUT_SEED: u64 = 123;
const DONUT_LAYERS: usize = 20;
const DONUT_ROWS: usize = 5;
const DONUTS_PER_ROW: usize = 14;

/// Geometry slots the scene draws with. The engine uploads them in this order.
pub const TORUS_GEOMETRY: GeometryId = GeometryId(0);
pub const CUBE_GEOMETRY: GeometryId = GeometryId(1);

/// Distance of the gaze marker from the head, in meters.
pub const GAZE_OBJECT_DISTANCE: f64 = 2.0;
const GAZE_OBJECT_SCALE: f32 = 0.02;

/// Scale submitted in the velocity extension.
pub fn velocity_scale() -> f64 {
    1.0 / (VELOCITY_TIME_DELTA * VELOCITY_PRECISION)
}

/// Meshes indexed by the geometry ids above.
pub fn scene_meshes() -> Vec<Mesh> {
    vec![Mesh::torus(0.25, 0.125, 256, 64), Mesh::cube()]
}

/// A rigid object spinning around a fixed axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneObject {
    pub position: Vec3,
    pub scale: Vec3,
    pub orientation: Quat,
    pub rotation_axis: Vec3,
    /// Radians per second.
    pub rotation_speed: f32,
}

impl SceneObject {
    pub fn new(position: Vec3, scale: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            scale,
            orientation,
            rotation_axis: Vec3::Y,
            rotation_speed: 0.0,
        }
    }

    /// Orientation after spinning for `dt` seconds.
    pub fn orientation_after(&self, dt: f64) -> Quat {
        if self.rotation_speed.abs() <= f32::EPSILON {
            return self.orientation;
        }
        let spin = Quat::from_axis_angle(self.rotation_axis, self.rotation_speed * dt as f32);
        (self.orientation * spin).normalize()
    }

    pub fn apply_velocity(&mut self, dt: f64) {
        self.orientation = self.orientation_after(dt);
    }

    pub fn world(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.orientation, self.position)
    }

    pub fn render_data(&self) -> ObjectRenderData {
        let next = Mat4::from_scale_rotation_translation(
            self.scale,
            self.orientation_after(VELOCITY_TIME_DELTA),
            self.position,
        );
        ObjectRenderData {
            world: self.world(),
            next_world: next,
        }
    }
}

/// Lay out up to `max` donuts on concentric cylinders around the origin.
pub fn create_donuts(max: usize, seed: u64) -> Vec<SceneObject> {
    let mut rng = StdRng::seed_from_u64(seed);
    let angle = std::f32::consts::TAU / DONUTS_PER_ROW as f32;
    let mut donuts = Vec::with_capacity(max.min(DONUT_LAYERS * DONUT_ROWS * DONUTS_PER_ROW));

    'layout: for layer in 0..DONUT_LAYERS {
        let z = 0.75 + 2.0 * layer as f32;
        let layer_offset = layer as f32 * angle / DONUT_LAYERS as f32;
        for row in 0..DONUT_ROWS {
            let y = -1.0 + 3.0 * row as f32 / (DONUT_ROWS - 1) as f32;
            for i in 0..DONUTS_PER_ROW {
                if donuts.len() >= max {
                    break 'layout;
                }
                let rotate = Quat::from_axis_angle(Vec3::Y, angle * i as f32 + layer_offset);
                let position = rotate * Vec3::new(0.0, y, z);
                let orientation = rotate * Quat::from_axis_angle(Vec3::X, 90f32.to_radians());

                let axis = Vec3::new(
                    rng.random_range(-1.0..=1.0),
                    rng.random_range(-1.0..=1.0),
                    rng.random_range(-1.0..=1.0),
                );
                let speed: f32 = rng.random_range(30.0..=120.0);

                donuts.push(SceneObject {
                    position,
                    scale: Vec3::ONE,
                    orientation,
                    rotation_axis: axis.try_normalize().unwrap_or(Vec3::Y),
                    rotation_speed: speed.to_radians(),
                });
            }
        }
    }

    log::info!("Created {} donuts", donuts.len());
    donuts
}

/// Where the gaze marker sits: `distance` along the gaze ray from the head.
pub fn gaze_object_position(head: &DMat4, forward: DVec3, distance: f64) -> Vec3 {
    head.transform_point3(forward.normalize_or_zero() * distance).as_vec3()
}

/// Per-frame objects grouped by the geometry they are drawn with.
#[derive(Debug, Default)]
pub struct Scene {
    donuts: Vec<SceneObject>,
    gaze_object: Option<SceneObject>,
    marker_objects: Vec<SceneObject>,
    render_vr_scene: bool,
}

impl Scene {
    pub fn new(max_donuts: usize) -> Self {
        Self {
            donuts: create_donuts(max_donuts, DONUT_SEED),
            gaze_object: None,
            marker_objects: Vec::new(),
            render_vr_scene: true,
        }
    }

    pub fn donuts(&self) -> &[SceneObject] {
        &self.donuts
    }

    pub fn gaze_object(&self) -> Option<&SceneObject> {
        self.gaze_object.as_ref()
    }

    pub fn render_vr_scene(&self) -> bool {
        self.render_vr_scene
    }

    /// Hide the donut field and the grid while keeping helper objects.
    pub fn set_render_vr_scene(&mut self, render: bool) {
        self.render_vr_scene = render;
    }

    pub fn animate(&mut self, dt: f64) {
        for donut in &mut self.donuts {
            donut.apply_velocity(dt);
        }
    }

    /// Place the gaze marker, or hide it with `None`.
    pub fn set_gaze(&mut self, target: Option<Vec3>) {
        self.gaze_object = target.map(|position| {
            SceneObject::new(position, Vec3::splat(GAZE_OBJECT_SCALE), Quat::IDENTITY)
        });
    }

    /// Mirror the tracked markers as boxes scaled by `volume_multiplier`.
    pub fn set_markers(&mut self, markers: &[MarkerObject], volume_multiplier: f64) {
        self.marker_objects = markers
            .iter()
            .map(|marker| {
                let (_, rotation, translation) =
                    marker.pose.as_mat4().to_scale_rotation_translation();
                let scale = marker.render_scale(volume_multiplier).as_vec3();
                // Boxes stand on the marker plane.
                let lift = rotation * Vec3::new(0.0, scale.y * 0.5, 0.0);
                SceneObject::new(translation + lift, scale, rotation)
            })
            .collect();
    }

    pub fn marker_objects(&self) -> &[SceneObject] {
        &self.marker_objects
    }

    /// Instance data in draw order: helpers first, then the donut field.
    pub fn instance_groups(&self) -> Vec<(GeometryId, Vec<ObjectRenderData>)> {
        let mut groups = Vec::new();
        let helpers: Vec<_> = self
            .gaze_object
            .iter()
            .chain(&self.marker_objects)
            .map(SceneObject::render_data)
            .collect();
        if !helpers.is_empty() {
            groups.push((CUBE_GEOMETRY, helpers));
        }
        if self.render_vr_scene && !self.donuts.is_empty() {
            groups.push((
                TORUS_GEOMETRY,
                self.donuts.iter().map(SceneObject::render_data).collect(),
            ));
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_donut_layout_is_seeded() {
        let a = create_donuts(200, DONUT_SEED);
        let b = create_donuts(200, DONUT_SEED);
        assert_eq!(a, b);
        assert_eq!(a.len(), 200);
        assert_ne!(a, create_donuts(200, 7));
    }

    #[test]
    fn test_donut_layout_is_capped() {
        assert_eq!(create_donuts(100_000, DONUT_SEED).len(), 1400);
        assert!(create_donuts(0, DONUT_SEED).is_empty());
    }

    #[test]
    fn test_first_donut_position() {
        let donuts = create_donuts(1, DONUT_SEED);
        assert!((donuts[0].position - Vec3::new(0.0, -1.0, 0.75)).length() < 1e-5);
        let speed = donuts[0].rotation_speed.to_degrees();
        assert!((30.0..=120.0).contains(&speed));
    }

    #[test]
    fn test_apply_velocity() {
        let mut object = SceneObject::new(Vec3::ZERO, Vec3::ONE, Quat::IDENTITY);
        object.apply_velocity(1.0);
        assert_eq!(object.orientation, Quat::IDENTITY);

        object.rotation_axis = Vec3::Y;
        object.rotation_speed = std::f32::consts::FRAC_PI_2;
        object.apply_velocity(1.0);
        let expected = Quat::from_axis_angle(Vec3::Y, std::f32::consts::FRAC_PI_2);
        assert!(object.orientation.abs_diff_eq(expected, 1e-5));
        assert!((object.orientation.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_next_world_extrapolates() {
        let mut object = SceneObject::new(Vec3::X, Vec3::ONE, Quat::IDENTITY);
        let data = object.render_data();
        assert_eq!(data.world, data.next_world);

        object.rotation_speed = 1.0;
        let data = object.render_data();
        assert_ne!(data.world, data.next_world);
        assert_eq!(data.world.w_axis, data.next_world.w_axis);
    }

    #[test]
    fn test_velocity_scale() {
        assert!((velocity_scale() - 1.875).abs() < 1e-12);
    }

    #[test]
    fn test_gaze_object_position() {
        let head = DMat4::from_translation(DVec3::new(0.0, 1.5, 0.0));
        let position = gaze_object_position(&head, DVec3::NEG_Z, GAZE_OBJECT_DISTANCE);
        assert!((position - Vec3::new(0.0, 1.5, -2.0)).length() < 1e-6);
    }

    #[test]
    fn test_instance_groups() {
        let mut scene = Scene::new(10);
        assert_eq!(scene.instance_groups().len(), 1);
        assert_eq!(scene.instance_groups()[0].0, TORUS_GEOMETRY);

        scene.set_gaze(Some(Vec3::NEG_Z));
        let groups = scene.instance_groups();
        assert_eq!(groups[0].0, CUBE_GEOMETRY);
        assert_eq!(groups[0].1.len(), 1);
        assert_eq!(groups[1].1.len(), 10);

        scene.set_render_vr_scene(false);
        let groups = scene.instance_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].0, CUBE_GEOMETRY);
    }

    #[test]
    fn test_marker_boxes() {
        let mut scene = Scene::new(0);
        let marker = MarkerObject {
            pose: DMat4::from_translation(DVec3::new(1.0, 0.0, -1.0)),
            size: DVec3::new(0.1, 0.1, 0.1),
            id: 101,
            predicted: true,
        };
        scene.set_markers(&[marker], 1.0);
        assert_eq!(scene.marker_objects().len(), 1);
        let object = scene.marker_objects()[0];
        assert!(object.position.y > 0.0);
        assert_eq!(scene.instance_groups()[0].1.len(), 1);
    }
}
