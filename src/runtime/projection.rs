//! Projection helpers matching the runtime's `GetProjectionMatrix` and
//! `UpdateNearFarPlanes`.
//!
//! Matrices are right-handed, column-major, looking down -Z.

use glam::{DMat4, DVec4};

use super::{ClipRange, FovTangents};

/// Near plane used by [`projection_from_tangents`] before the planes are updated.
pub const DEFAULT_NEAR: f64 = 0.01;
/// Far plane used by [`projection_from_tangents`] before the planes are updated.
pub const DEFAULT_FAR: f64 = 300.0;

/// Off-center perspective projection for the given tangents.
pub fn projection_from_tangents(tangents: &FovTangents) -> DMat4 {
    let width = tangents.right - tangents.left;
    let height = tangents.top - tangents.bottom;

    let x_axis = DVec4::new(2.0 / width, 0.0, 0.0, 0.0);
    let y_axis = DVec4::new(0.0, 2.0 / height, 0.0, 0.0);
    let z_axis = DVec4::new(
        (tangents.right + tangents.left) / width,
        (tangents.top + tangents.bottom) / height,
        0.0,
        -1.0,
    );
    let w_axis = DVec4::ZERO;

    let mut projection = DMat4::from_cols(x_axis, y_axis, z_axis, w_axis);
    update_near_far_planes(&mut projection, ClipRange::ZeroToOne, DEFAULT_NEAR, DEFAULT_FAR);
    projection
}

/// Rewrite the depth mapping of `projection` so that `near` maps to the low
/// end of `clip_range` and `far` to the high end.
///
/// Passing `near > far` produces a reversed depth mapping.
pub fn update_near_far_planes(projection: &mut DMat4, clip_range: ClipRange, near: f64, far: f64) {
    let (a, b) = match clip_range {
        ClipRange::ZeroToOne => (far / (near - far), near * far / (near - far)),
        ClipRange::MinusOneToOne => ((far + near) / (near - far), 2.0 * near * far / (near - far)),
    };
    projection.z_axis.z = a;
    projection.w_axis.z = b;
}

/// Recover the near and far distances encoded in a projection.
pub fn near_far_from_projection(projection: &DMat4, clip_range: ClipRange) -> (f64, f64) {
    let a = projection.z_axis.z;
    let b = projection.w_axis.z;
    match clip_range {
        ClipRange::ZeroToOne => {
            let near = b / a;
            (near, a * near / (1.0 + a))
        }
        ClipRange::MinusOneToOne => (b / (a - 1.0), b / (a + 1.0)),
    }
}

/// Symmetric tangents for a horizontal/vertical field of view in radians.
pub fn symmetric_tangents(horizontal_fov: f64, vertical_fov: f64) -> FovTangents {
    let h = (horizontal_fov * 0.5).tan();
    let v = (vertical_fov * 0.5).tan();
    FovTangents {
        top: v,
        bottom: -v,
        left: -h,
        right: h,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn project_depth(projection: &DMat4, z: f64) -> f64 {
        let clip = *projection * DVec4::new(0.0, 0.0, z, 1.0);
        clip.z / clip.w
    }

    #[test]
    fn test_zero_to_one_depth() {
        let mut projection = projection_from_tangents(&symmetric_tangents(1.5, 1.5));
        update_near_far_planes(&mut projection, ClipRange::ZeroToOne, 0.1, 1000.0);

        assert!(project_depth(&projection, -0.1).abs() < 1e-9);
        assert!((project_depth(&projection, -1000.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_minus_one_to_one_depth() {
        let mut projection = projection_from_tangents(&symmetric_tangents(1.5, 1.5));
        update_near_far_planes(&mut projection, ClipRange::MinusOneToOne, 0.1, 1000.0);

        assert!((project_depth(&projection, -0.1) + 1.0).abs() < 1e-9);
        assert!((project_depth(&projection, -1000.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reverse_depth() {
        let mut projection = projection_from_tangents(&symmetric_tangents(1.5, 1.5));
        update_near_far_planes(&mut projection, ClipRange::ZeroToOne, 1000.0, 0.1);

        assert!((project_depth(&projection, -0.1) - 1.0).abs() < 1e-9);
        assert!(project_depth(&projection, -1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_near_far_roundtrip() {
        for range in [ClipRange::ZeroToOne, ClipRange::MinusOneToOne] {
            let mut projection = projection_from_tangents(&symmetric_tangents(1.2, 1.0));
            update_near_far_planes(&mut projection, range, 0.1, 1000.0);
            let (near, far) = near_far_from_projection(&projection, range);
            assert!((near - 0.1).abs() < 1e-9);
            assert!((far - 1000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_off_center_projection() {
        let tangents = FovTangents {
            top: 1.0,
            bottom: -1.0,
            left: -1.5,
            right: 0.5,
        };
        let projection = projection_from_tangents(&tangents);

        // A point on the right frustum edge lands on x = 1.
        let clip = projection * DVec3::new(0.5, 0.0, -1.0).extend(1.0);
        assert!((clip.x / clip.w - 1.0).abs() < 1e-9);
        let clip = projection * DVec3::new(-1.5, 0.0, -1.0).extend(1.0);
        assert!((clip.x / clip.w + 1.0).abs() < 1e-9);
    }
}
