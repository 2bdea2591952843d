//! Math utilities and types
//!
//! Provides the vector and matrix types used by the transform hierarchy and the
//! camera. Matrices are nalgebra column-vector matrices: a point `p` is carried
//! by `m * p`, so "apply A then B" is written `B * A`.

pub use nalgebra::{Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;

    /// Radians to degrees conversion factor
    pub const RAD_TO_DEG: f32 = 180.0 / PI;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Convert radians to degrees
    pub fn rad_to_deg(radians: f32) -> f32 {
        radians * constants::RAD_TO_DEG
    }

    /// Round `value` up to the next multiple of `alignment` (a power of two)
    pub fn align_up(value: u64, alignment: u64) -> u64 {
        debug_assert!(alignment.is_power_of_two());
        (value + alignment - 1) & !(alignment - 1)
    }
}

/// Extension trait for Mat4 with the constructors the renderer needs
pub trait Mat4Ext {
    /// Create a rotation matrix around the X axis (radians)
    fn rotation_x(angle: f32) -> Mat4;

    /// Create a rotation matrix around the Y axis (radians)
    fn rotation_y(angle: f32) -> Mat4;

    /// Create a rotation matrix around the Z axis (radians)
    fn rotation_z(angle: f32) -> Mat4;

    /// Create a non-uniform scaling matrix
    fn scaling(scale: &Vec3) -> Mat4;

    /// Create a translation matrix
    fn translation(offset: &Vec3) -> Mat4;

    /// Left-handed perspective projection with depth mapped to [0, 1]
    fn perspective_fov_lh(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Left-handed look-at view matrix
    fn view_look_at_lh(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4;

    /// Column-major array layout expected by shader constant buffers
    fn to_cols_array(&self) -> [[f32; 4]; 4];
}

impl Mat4Ext for Mat4 {
    fn rotation_x(angle: f32) -> Mat4 {
        Mat4::from_axis_angle(&Vec3::x_axis(), angle)
    }

    fn rotation_y(angle: f32) -> Mat4 {
        Mat4::from_axis_angle(&Vec3::y_axis(), angle)
    }

    fn rotation_z(angle: f32) -> Mat4 {
        Mat4::from_axis_angle(&Vec3::z_axis(), angle)
    }

    fn scaling(scale: &Vec3) -> Mat4 {
        Mat4::new_nonuniform_scaling(scale)
    }

    fn translation(offset: &Vec3) -> Mat4 {
        Mat4::new_translation(offset)
    }

    fn perspective_fov_lh(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        // P = [a⁻¹/tan(φ/2)    0              0          0         ]
        //     [0               1/tan(φ/2)     0          0         ]
        //     [0               0              f/(f-n)    -nf/(f-n) ]
        //     [0               0              1          0         ]
        let tan_half_fovy = (fov_y * 0.5).tan();

        let mut result = Mat4::zeros();
        result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
        result[(1, 1)] = 1.0 / tan_half_fovy;
        result[(2, 2)] = far / (far - near);
        result[(2, 3)] = -(near * far) / (far - near);
        result[(3, 2)] = 1.0;

        result
    }

    fn view_look_at_lh(eye: &Vec3, target: &Vec3, up: &Vec3) -> Mat4 {
        Mat4::look_at_lh(&Point3::from(*eye), &Point3::from(*target), up)
    }

    fn to_cols_array(&self) -> [[f32; 4]; 4] {
        (*self).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_align_up_rounds_to_256() {
        assert_eq!(utils::align_up(80, 256), 256);
        assert_eq!(utils::align_up(256, 256), 256);
        assert_eq!(utils::align_up(257, 256), 512);
        assert_eq!(utils::align_up(0, 256), 0);
    }

    #[test]
    fn test_rotation_z_turns_x_into_y() {
        let m = Mat4::rotation_z(utils::deg_to_rad(90.0));
        let p = m.transform_point(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, 1.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_x_turns_y_into_z() {
        let m = Mat4::rotation_x(utils::deg_to_rad(90.0));
        let p = m.transform_point(&Point3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(p, Point3::new(0.0, 0.0, 1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_y_turns_z_into_x() {
        let m = Mat4::rotation_y(utils::deg_to_rad(90.0));
        let p = m.transform_point(&Point3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(p, Point3::new(1.0, 0.0, 0.0), epsilon = 1e-6);
    }

    #[test]
    fn test_perspective_maps_near_and_far_to_unit_depth() {
        let proj = Mat4::perspective_fov_lh(utils::deg_to_rad(60.0), 16.0 / 9.0, 0.1, 1000.0);

        let near = proj * Vec4::new(0.0, 0.0, 0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, 1000.0, 1.0);

        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_look_at_lh_puts_target_in_front() {
        let view = Mat4::view_look_at_lh(
            &Vec3::new(0.0, 0.0, -100.0),
            &Vec3::zeros(),
            &Vec3::new(0.0, 1.0, 0.0),
        );
        let origin = view.transform_point(&Point3::origin());
        assert_relative_eq!(origin, Point3::new(0.0, 0.0, 100.0), epsilon = 1e-4);
    }

    #[test]
    fn test_cols_array_is_column_major() {
        let t = Mat4::translation(&Vec3::new(1.0, 2.0, 3.0));
        let cols = t.to_cols_array();
        assert_eq!(cols[3], [1.0, 2.0, 3.0, 1.0]);
    }
}
