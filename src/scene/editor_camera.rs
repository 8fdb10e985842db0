//! Free-fly editor camera
//!
//! - WASD/QE (via [`EditorCameraInput`]): move with damped acceleration
//! - Mouse: look around while the pointer button is held (cursor locked)

use glam::{Mat4, Vec2, Vec3};

use super::{CameraData, CameraDataProvider};

/// Pitch limit in degrees
pub const MAX_PITCH_DEGREES: f32 = 89.9;

/// Input state for one camera update
#[derive(Debug, Clone, Copy, Default)]
pub struct EditorCameraInput {
    pub forward: bool,
    pub backward: bool,
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    /// Mouse delta since last update (in pixels)
    pub mouse_delta: Vec2,
}

impl EditorCameraInput {
    pub fn is_moving(&self) -> bool {
        self.forward || self.backward || self.left || self.right || self.up || self.down
    }
}

/// First-person editor camera
#[derive(Debug, Clone)]
pub struct EditorCamera {
    pub position: Vec3,
    /// Horizontal angle in radians
    yaw: f32,
    /// Vertical angle in radians
    pitch: f32,
    /// Maximum movement speed in units per second
    pub max_speed: f32,
    /// Fraction of velocity kept after one second without input
    pub damping: f32,
    /// Mouse sensitivity (radians per pixel)
    pub sensitivity: f32,
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
    velocity: f32,
    direction: Vec3,
    cursor_locked: bool,
    aspect: f32,
    view: Mat4,
    projection: Mat4,
}

impl Default for EditorCamera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 2.0, 5.0), -std::f32::consts::FRAC_PI_2, 0.0)
    }
}

impl EditorCamera {
    pub fn new(position: Vec3, yaw: f32, pitch: f32) -> Self {
        let mut camera = Self {
            position,
            yaw,
            pitch: 0.0,
            max_speed: 5.0,
            damping: 0.01,
            sensitivity: 0.003,
            fov_y: 45f32.to_radians(),
            near: 0.1,
            far: 1000.0,
            velocity: 0.0,
            direction: Vec3::ZERO,
            cursor_locked: false,
            aspect: 16.0 / 9.0,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        camera.set_pitch(pitch);
        camera.update_projection();
        camera.update_view();
        camera
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    pub fn is_cursor_locked(&self) -> bool {
        self.cursor_locked
    }

    pub fn set_yaw(&mut self, yaw: f32) {
        self.yaw = yaw;
        self.update_view();
    }

    /// Set pitch in radians, clamped to ±[`MAX_PITCH_DEGREES`].
    pub fn set_pitch(&mut self, pitch: f32) {
        let limit = MAX_PITCH_DEGREES.to_radians();
        self.pitch = if pitch.is_finite() {
            pitch.clamp(-limit, limit)
        } else {
            0.0
        };
        self.update_view();
    }

    pub fn forward(&self) -> Vec3 {
        Vec3::new(
            self.yaw.cos() * self.pitch.cos(),
            self.pitch.sin(),
            self.yaw.sin() * self.pitch.cos(),
        )
        .normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.forward().cross(Vec3::Y).normalize()
    }

    pub fn up(&self) -> Vec3 {
        self.right().cross(self.forward())
    }

    /// Pointer press locks the cursor for mouse look, release unlocks it.
    pub fn on_pointer_button(&mut self, pressed: bool) {
        self.cursor_locked = pressed;
    }

    /// Recompute the projection for a new viewport size. Zero height is ignored.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if height == 0 {
            return;
        }
        self.aspect = width as f32 / height as f32;
        self.update_projection();
    }

    pub fn update(&mut self, input: &EditorCameraInput, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };

        if self.cursor_locked && input.mouse_delta != Vec2::ZERO {
            self.yaw += input.mouse_delta.x * self.sensitivity;
            let pitch = self.pitch - input.mouse_delta.y * self.sensitivity;
            self.set_pitch(pitch);
        }

        let forward = self.forward();
        let right = self.right();
        let mut direction = Vec3::ZERO;
        if input.forward {
            direction += forward;
        }
        if input.backward {
            direction -= forward;
        }
        if input.right {
            direction += right;
        }
        if input.left {
            direction -= right;
        }
        if input.up {
            direction += Vec3::Y;
        }
        if input.down {
            direction -= Vec3::Y;
        }

        let moving = direction.length_squared() > 0.0;
        if moving {
            self.direction = direction.normalize();
            self.velocity += dt;
        } else {
            self.velocity -= dt;
        }
        self.velocity *= self.damping.clamp(0.0, 1.0).powf(dt);
        self.velocity = self.velocity.max(0.0);

        // Keeps coasting along the last direction while decelerating.
        self.position += self.direction * self.velocity * self.max_speed * dt;
        self.update_view();
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    fn update_view(&mut self) {
        self.view = Mat4::look_at_rh(self.position, self.position + self.forward(), self.up());
    }

    fn update_projection(&mut self) {
        self.projection = Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far);
    }
}

impl CameraDataProvider for EditorCamera {
    fn camera_data(&self) -> CameraData {
        CameraData::new(self.view, self.projection, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::down(Vec2::new(0.0, 10_000.0))]
    #[case::up(Vec2::new(0.0, -10_000.0))]
    #[case::diagonal(Vec2::new(500.0, 777.0))]
    fn test_pitch_stays_clamped(#[case] delta: Vec2) {
        let mut camera = EditorCamera::default();
        camera.on_pointer_button(true);
        let limit = MAX_PITCH_DEGREES.to_radians();
        for _ in 0..50 {
            camera.update(
                &EditorCameraInput {
                    mouse_delta: delta,
                    ..Default::default()
                },
                0.016,
            );
            assert!(camera.pitch() >= -limit && camera.pitch() <= limit);
        }
        assert!(camera.forward().is_finite());
    }

    #[test]
    fn test_mouse_look_requires_cursor_lock() {
        let mut camera = EditorCamera::default();
        let yaw = camera.yaw();
        let input = EditorCameraInput {
            mouse_delta: Vec2::new(100.0, 0.0),
            ..Default::default()
        };
        camera.update(&input, 0.016);
        assert_eq!(camera.yaw(), yaw);
        camera.on_pointer_button(true);
        camera.update(&input, 0.016);
        assert!(camera.yaw() > yaw);
        camera.on_pointer_button(false);
        assert!(!camera.is_cursor_locked());
    }

    #[test]
    fn test_velocity_accelerates_then_decays_to_zero() {
        let mut camera = EditorCamera::default();
        let start = camera.position;
        let moving = EditorCameraInput {
            forward: true,
            ..Default::default()
        };
        for _ in 0..10 {
            camera.update(&moving, 0.1);
        }
        assert!(camera.velocity() > 0.0);
        assert!(camera.position.z < start.z, "default camera looks down -Z");

        for _ in 0..100 {
            camera.update(&EditorCameraInput::default(), 0.1);
        }
        assert_eq!(camera.velocity(), 0.0);
    }

    #[test]
    fn test_zero_dt_is_a_no_op() {
        let mut camera = EditorCamera::default();
        let before = camera.position;
        camera.update(
            &EditorCameraInput {
                forward: true,
                ..Default::default()
            },
            0.0,
        );
        assert_eq!(camera.position, before);
        camera.update(&EditorCameraInput::default(), f32::NAN);
        assert!(camera.position.is_finite());
    }

    #[test]
    fn test_basis_is_orthonormal() {
        let camera = EditorCamera::new(Vec3::ZERO, 0.3, 0.4);
        let (f, r, u) = (camera.forward(), camera.right(), camera.up());
        assert!(f.dot(r).abs() < 1e-5);
        assert!(f.dot(u).abs() < 1e-5);
        assert!((u.length() - 1.0).abs() < 1e-5);
        assert!(u.y > 0.0);
    }

    #[test]
    fn test_set_viewport_ignores_zero_height() {
        let mut camera = EditorCamera::default();
        let projection = camera.projection_matrix();
        camera.set_viewport(1024, 0);
        assert_eq!(camera.projection_matrix(), projection);
        camera.set_viewport(1024, 1024);
        assert_ne!(camera.projection_matrix(), projection);
    }
}
