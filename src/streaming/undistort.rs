//! Rectification of omnidirectional camera images.

use glam::{DMat4, IVec2, Mat3, Mat4, Vec2, Vec3, Vec4Swizzles};

use crate::runtime::CameraIntrinsics;

/// Vertical field of view of the default rectified projection.
pub const DEFAULT_FOV_DEGREES: f32 = 80.0;

/// Maps rectified output pixels to sample positions in a distorted input image.
#[derive(Debug, Clone)]
pub struct Undistorter {
    input_size: Vec2,
    output_size: Vec2,
    inverse_projection: Mat4,
    /// Extrinsic rotation with the Y and Z axes flipped into camera space.
    camera_rotation: Mat3,
    principal_point: Vec2,
    focal_length: Vec2,
    /// `[k1, k2, skew, xi, p1, p2]`
    coefficients: [f32; 6],
}

impl Undistorter {
    /// `projection` defaults to an 80 degree perspective centred on the
    /// principal point.
    pub fn new(
        input_size: IVec2,
        output_size: IVec2,
        intrinsics: &CameraIntrinsics,
        extrinsics: &DMat4,
        projection: Option<&DMat4>,
    ) -> Self {
        let input = input_size.as_vec2();
        let principal_point = Vec2::new(
            intrinsics.principal_point_x as f32,
            intrinsics.principal_point_y as f32,
        );

        let projection = match projection {
            Some(p) => p.as_mat4(),
            None => {
                let offset = Vec3::new(
                    (principal_point.x - 0.5) * 2.0,
                    (0.5 - principal_point.y) * 2.0,
                    0.0,
                );
                Mat4::from_translation(offset)
                    * Mat4::perspective_rh_gl(
                        DEFAULT_FOV_DEGREES.to_radians(),
                        input.x / input.y,
                        0.001,
                        10.0,
                    )
            }
        };

        let rotation = Mat3::from_mat4(extrinsics.as_mat4());
        let flip = Mat3::from_diagonal(Vec3::new(1.0, -1.0, -1.0));

        Self {
            input_size: input,
            output_size: output_size.as_vec2(),
            inverse_projection: projection.inverse(),
            camera_rotation: rotation * flip,
            principal_point,
            focal_length: Vec2::new(
                intrinsics.focal_length_x as f32,
                intrinsics.focal_length_y as f32,
            ),
            coefficients: intrinsics.distortion_coefficients.map(|c| c as f32),
        }
    }

    fn unproject(&self, ndc: Vec2, depth: f32) -> Vec3 {
        let p = self.inverse_projection * ndc.extend(depth).extend(1.0);
        p.xyz() / p.w
    }

    /// View ray through the centre of output pixel `(x, y)`.
    pub fn view_direction(&self, x: i32, y: i32) -> Vec3 {
        let pixel = Vec2::new(x as f32, y as f32) + 0.5;
        let ndc = pixel / self.output_size * Vec2::new(2.0, -2.0) + Vec2::new(-1.0, 1.0);
        (self.unproject(ndc, 0.5) - self.unproject(ndc, -0.5)).normalize()
    }

    /// Normalized input coordinate a camera-space direction projects to.
    pub fn distort(&self, direction: Vec3) -> Vec2 {
        let [k1, k2, skew, xi, p1, p2] = self.coefficients;
        let v = direction.truncate() / (direction.z + xi);
        let r2 = v.length_squared();
        let radial = k1 * r2 + k2 * r2 * r2;
        let tangential = Vec2::new(
            p2 * (r2 + 2.0 * v.x * v.x) + 2.0 * p1 * v.x * v.y,
            p1 * (r2 + 2.0 * v.y * v.y) + 2.0 * p2 * v.x * v.y,
        );
        let distorted = v * (1.0 + radial) + tangential;

        let mut uv = distorted * self.focal_length + self.principal_point;
        uv.x += skew * distorted.y;
        let aspect = self.input_size.x / self.input_size.y;
        uv.y = (uv.y - 0.5) / aspect + 0.5;
        uv
    }

    /// Input pixel sampled for output pixel `(x, y)`. May lie outside the input.
    pub fn sample_coord(&self, x: i32, y: i32) -> IVec2 {
        let direction = self.camera_rotation * self.view_direction(x, y);
        (self.distort(direction) * self.input_size).as_ivec2()
    }
}
