//! Scalar and transform helpers used across the renderer.

use glam::{Mat3, Mat4, Quat, Vec3};

/// Differences smaller than this are treated as zero by the guarded helpers.
pub const EPSILON: f32 = 1e-6;

/// Linear interpolation between `a` and `b`.
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Position of `value` inside `[a, b]`, unclamped.
///
/// Returns 0 when the range is degenerate instead of dividing by zero.
#[inline]
pub fn inverse_lerp(a: f32, b: f32, value: f32) -> f32 {
    let range = b - a;
    if range.abs() < EPSILON {
        return 0.0;
    }
    let t = (value - a) / range;
    if t.is_finite() {
        t
    } else {
        0.0
    }
}

/// [`inverse_lerp`] clamped to `[0, 1]`. NaN inputs map to 0.
#[inline]
pub fn inverse_lerp_clamped(a: f32, b: f32, value: f32) -> f32 {
    let t = inverse_lerp(a, b, value);
    if t.is_nan() {
        0.0
    } else {
        t.clamp(0.0, 1.0)
    }
}

/// Hermite smoothstep over an already normalized parameter.
#[inline]
pub fn smoothstep01(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Build a model matrix from translation, rotation and scale.
pub fn compose_transform(translation: Vec3, rotation: Quat, scale: Vec3) -> Mat4 {
    Mat4::from_scale_rotation_translation(scale, rotation, translation)
}

/// Split an affine matrix back into translation, rotation and scale.
///
/// Returns `None` when the homogeneous `[3][3]` element is ~0 or when a
/// basis axis has collapsed. A mirrored basis is reported as a negative X
/// scale.
pub fn decompose_transform(matrix: &Mat4) -> Option<(Vec3, Quat, Vec3)> {
    let w = matrix.w_axis.w;
    if w.abs() < EPSILON {
        return None;
    }
    let m = *matrix * (1.0 / w);

    let translation = m.w_axis.truncate();

    let mut x_axis = m.x_axis.truncate();
    let y_axis = m.y_axis.truncate();
    let z_axis = m.z_axis.truncate();

    let mut scale = Vec3::new(x_axis.length(), y_axis.length(), z_axis.length());
    if scale.min_element() < EPSILON {
        return None;
    }

    if x_axis.cross(y_axis).dot(z_axis) < 0.0 {
        scale.x = -scale.x;
        x_axis = -x_axis;
    }

    let basis = Mat3::from_cols(
        x_axis / scale.x.abs(),
        y_axis / scale.y,
        z_axis / scale.z,
    );
    let rotation = Quat::from_mat3(&basis).normalize();
    if !rotation.is_finite() {
        return None;
    }

    Some((translation, rotation, scale))
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// A box that contains nothing; `union` with it is the identity.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        points.into_iter().fold(Self::EMPTY, |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// World-space box enclosing this box after `matrix` is applied.
    pub fn transformed(&self, matrix: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb::from_points(self.corners().map(|c| matrix.transform_point3(c)))
    }

    /// Sphere enclosing the box as `(center, radius)`.
    pub fn bounding_sphere(&self) -> (Vec3, f32) {
        if self.is_empty() {
            return (Vec3::ZERO, 0.0);
        }
        (self.center(), (self.max - self.min).length() * 0.5)
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}
