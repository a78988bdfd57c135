//! # Fly Camera
//!
//! First-person camera driven by key and mouse-motion events.
//!
//! ## Conventions
//! - Right-handed, Y-up world space; the camera looks down -Z at zero yaw and pitch.
//! - Yaw rotates about -Y so positive mouse X turns right.
//! - Projection is reversed-Z with Vulkan's downward Y, see
//!   [`perspective_reverse_z`].

use crate::foundation::math::{constants::DEG_TO_RAD, perspective_reverse_z, Mat4, Quat, Vec3, Vec4};
use crate::input::{InputEvent, KeyCode};

/// Speed a held movement key contributes along its axis
pub const MOVE_SPEED: f32 = 0.5;

/// Pixels of mouse motion per radian of rotation
pub const MOUSE_SENSITIVITY: f32 = 200.0;

/// First-person camera with velocity integration
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera-space velocity, set by held keys
    pub velocity: Vec3,
    /// World-space position
    pub position: Vec3,
    /// Rotation about +X in radians
    pub pitch: f32,
    /// Rotation about -Y in radians
    pub yaw: f32,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            velocity: Vec3::zeros(),
            position: Vec3::zeros(),
            pitch: 0.0,
            yaw: 0.0,
            fov_y: 70.0 * DEG_TO_RAD,
            near: 0.1,
            far: 10_000.0,
        }
    }
}

impl Camera {
    /// Camera at `position` looking down -Z
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Apply one input event to velocity or orientation
    pub fn process_input(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::KeyDown(key) => match key {
                KeyCode::W => self.velocity.z = -MOVE_SPEED,
                KeyCode::S => self.velocity.z = MOVE_SPEED,
                KeyCode::A => self.velocity.x = -MOVE_SPEED,
                KeyCode::D => self.velocity.x = MOVE_SPEED,
                KeyCode::E => self.velocity.y = MOVE_SPEED,
                KeyCode::Q => self.velocity.y = -MOVE_SPEED,
                _ => {}
            },
            InputEvent::KeyUp(key) => match key {
                KeyCode::W | KeyCode::S => self.velocity.z = 0.0,
                KeyCode::A | KeyCode::D => self.velocity.x = 0.0,
                KeyCode::E | KeyCode::Q => self.velocity.y = 0.0,
                _ => {}
            },
            InputEvent::MouseMotion { dx, dy } => {
                self.yaw += dx / MOUSE_SENSITIVITY;
                self.pitch -= dy / MOUSE_SENSITIVITY;
            }
            _ => {}
        }
    }

    /// Move along the current orientation by half the velocity
    pub fn update(&mut self) {
        let step = self.rotation_matrix() * Vec4::new(self.velocity.x, self.velocity.y, self.velocity.z, 0.0) * 0.5;
        self.position += step.xyz();
    }

    /// yaw(-Y) * pitch(+X)
    pub fn rotation_matrix(&self) -> Mat4 {
        let pitch = Quat::from_axis_angle(&Vec3::x_axis(), self.pitch);
        let yaw = Quat::from_axis_angle(&-Vec3::y_axis(), self.yaw);
        yaw.to_homogeneous() * pitch.to_homogeneous()
    }

    /// World-to-view transform, inverse(T * R)
    pub fn view_matrix(&self) -> Mat4 {
        let camera = Mat4::new_translation(&self.position) * self.rotation_matrix();
        camera.try_inverse().unwrap_or_else(Mat4::identity)
    }

    /// Reversed-Z projection for the given aspect ratio
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        perspective_reverse_z(self.fov_y, aspect, self.near, self.far)
    }
}
