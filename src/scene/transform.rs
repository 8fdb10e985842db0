//! Local transform of a scene node

use glam::{Mat3, Mat4, Quat, Vec3};

use crate::math;

/// Position, rotation and scale of a node relative to its parent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Self::IDENTITY
        }
    }

    /// Recover a transform from a matrix; `None` for projective or collapsed matrices.
    pub fn from_matrix(matrix: &Mat4) -> Option<Self> {
        math::decompose_transform(matrix).map(|(position, rotation, scale)| Self {
            position,
            rotation,
            scale,
        })
    }

    /// Get the model matrix for this transform
    pub fn matrix(&self) -> Mat4 {
        math::compose_transform(self.position, self.rotation, self.scale)
    }

    /// Get forward direction (local -Z in world space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Get right direction (local +X in world space)
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Get up direction (local +Y in world space)
    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Orient -Z towards `target`. Does nothing when the target coincides with
    /// the position or lies along `up`.
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        let right = forward.cross(up).normalize_or_zero();
        if forward == Vec3::ZERO || right == Vec3::ZERO {
            return;
        }
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&Mat3::from_cols(right, up, -forward));
    }
}

/// Inverse transpose of the upper 3x3, used to transform normals.
pub fn normal_matrix(model: &Mat4) -> Mat4 {
    if model.determinant().abs() < math::EPSILON {
        return Mat4::IDENTITY;
    }
    Mat4::from_mat3(Mat3::from_mat4(*model).inverse().transpose())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_look_at_points_forward_at_target() {
        let mut t = Transform::from_position(Vec3::new(0.0, 0.0, -5.0));
        t.look_at(Vec3::ZERO, Vec3::Y);
        assert!((t.forward() - Vec3::Z).length() < 1e-5);
        assert!((t.up() - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_look_at_degenerate_keeps_rotation() {
        let mut t = Transform::default();
        t.look_at(Vec3::Y * 3.0, Vec3::Y);
        assert_eq!(t.rotation, Quat::IDENTITY);
    }

    #[test]
    fn test_matrix_round_trip() {
        let t = Transform {
            position: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(0.7),
            scale: Vec3::new(2.0, 1.0, 0.5),
        };
        let back = Transform::from_matrix(&t.matrix()).unwrap();
        assert!((back.position - t.position).length() < 1e-5);
        assert!((back.scale - t.scale).length() < 1e-5);
        assert!(back.rotation.dot(t.rotation).abs() > 0.9999);
    }

    #[test]
    fn test_normal_matrix_undoes_non_uniform_scale() {
        let model = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        let n = normal_matrix(&model).transform_vector3(Vec3::new(1.0, 1.0, 0.0));
        assert!((n - Vec3::new(0.5, 1.0, 0.0)).length() < 1e-6);
        assert_eq!(normal_matrix(&Mat4::ZERO), Mat4::IDENTITY);
    }
}
