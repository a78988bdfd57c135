//! Math utilities and types
//!
//! Provides the nalgebra aliases used by the renderer plus the projection and
//! conversion helpers needed to talk to Vulkan clip space (depth in [0, 1],
//! Y pointing down).

pub use nalgebra::{
    Vector3, Vector4,
    Matrix4,
    Quaternion,
    Unit,
};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Transform representing position, rotation, and scale
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,

    /// Rotation quaternion
    pub rotation: Quat,

    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Create a transform from translation, rotation and scale
    pub fn new(position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        Self { position, rotation, scale }
    }

    /// Create a transform with only position
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix (translation * rotation * scale)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Right-handed perspective projection with a [0, 1] depth range.
///
/// `near` maps to depth 0 and `far` maps to depth 1. Passing `near > far`
/// yields a reversed-Z projection.
pub fn perspective_rh_zo(fovy: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let focal = 1.0 / (fovy * 0.5).tan();
    let mut m = Mat4::zeros();
    m[(0, 0)] = focal / aspect;
    m[(1, 1)] = focal;
    m[(2, 2)] = far / (near - far);
    m[(2, 3)] = -(far * near) / (far - near);
    m[(3, 2)] = -1.0;
    m
}

/// Reversed-Z projection for Vulkan: near plane at depth 1, far plane at 0,
/// and Y flipped to match Vulkan's downward viewport axis.
pub fn perspective_reverse_z(fovy: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let mut m = perspective_rh_zo(fovy, aspect, far, near);
    m[(1, 1)] *= -1.0;
    m
}

/// Column-major array form of a matrix, as GLSL expects it.
pub fn mat4_to_cols(m: &Mat4) -> [[f32; 4]; 4] {
    let mut cols = [[0.0; 4]; 4];
    for (c, col) in cols.iter_mut().enumerate() {
        for (r, value) in col.iter_mut().enumerate() {
            *value = m[(r, c)];
        }
    }
    cols
}

/// Math constants
pub mod constants {
    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = std::f32::consts::PI / 180.0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_transform_to_matrix_order() {
        let transform = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::identity(),
            Vec3::new(2.0, 2.0, 2.0),
        );
        let m = transform.to_matrix();
        let p = m.transform_point(&nalgebra::Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 3.0);
        assert_relative_eq!(p.y, 2.0);
        assert_relative_eq!(p.z, 3.0);
    }

    #[test]
    fn test_perspective_depth_range() {
        let proj = perspective_rh_zo(70.0 * constants::DEG_TO_RAD, 1.0, 0.1, 100.0);

        let near = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_reverse_z_flips_depth_and_y() {
        let proj = perspective_reverse_z(70.0 * constants::DEG_TO_RAD, 1.0, 0.1, 10000.0);

        let near = proj * Vec4::new(0.0, 1.0, -0.1, 1.0);
        assert_relative_eq!(near.z / near.w, 1.0, epsilon = 1e-4);
        assert!(near.y < 0.0);
    }

    #[test]
    fn test_mat4_to_cols_is_column_major() {
        let m = Mat4::new_translation(&Vec3::new(5.0, 6.0, 7.0));
        let cols = mat4_to_cols(&m);
        assert_eq!(cols[3], [5.0, 6.0, 7.0, 1.0]);
        assert_eq!(cols[0], [1.0, 0.0, 0.0, 0.0]);
    }
}
