//! Shadow map lookup with 3x3 percentage-closer filtering.

use glam::{Mat4, Vec3, Vec4Swizzles};

/// Depth bias applied before comparing against the shadow map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowBias {
    pub constant: f32,
    pub slope: f32,
    /// Distance the receiver is pushed along its normal, in shadow texels.
    pub normal_offset: f32,
}

impl ShadowBias {
    pub fn for_n_dot_l(&self, n_dot_l: f32) -> f32 {
        (self.slope * (1.0 - n_dot_l.clamp(0.0, 1.0))).max(self.constant)
    }
}

impl Default for ShadowBias {
    fn default() -> Self {
        Self {
            constant: 0.002,
            slope: 0.01,
            normal_offset: 1.5,
        }
    }
}

/// World-space width of one shadow map texel for an orthographic light
/// `view_projection` built from a rigid view matrix.
pub fn texel_world_size(view_projection: &Mat4, map_size: u32) -> f32 {
    let scale = view_projection.row(0).truncate().length();
    if map_size == 0 || scale <= f32::EPSILON {
        return 0.0;
    }
    2.0 / (scale * map_size as f32)
}

/// Fraction of the 3x3 neighbourhood around `world_position`'s shadow map
/// texel that is not occluded.
///
/// `load` returns the stored depth at an integer texel; it is only called
/// with coordinates inside `0..map_size`. Points outside the light frustum
/// are fully lit.
pub fn pcf_visibility(
    world_position: Vec3,
    shadow_view_projection: &Mat4,
    bias: f32,
    map_size: u32,
    load: impl Fn(u32, u32) -> f32,
) -> f32 {
    if map_size == 0 {
        return 1.0;
    }
    let clip = *shadow_view_projection * world_position.extend(1.0);
    if clip.w.abs() < 1e-6 {
        return 1.0;
    }
    let ndc = clip.xyz() / clip.w;
    if ndc.z > 1.0 || ndc.z < 0.0 {
        return 1.0;
    }
    let u = ndc.x * 0.5 + 0.5;
    let v = 0.5 - ndc.y * 0.5;
    if !(0.0..=1.0).contains(&u) || !(0.0..=1.0).contains(&v) {
        return 1.0;
    }

    let size = map_size as i64;
    let cx = ((u * map_size as f32) as i64).min(size - 1);
    let cy = ((v * map_size as f32) as i64).min(size - 1);
    let reference = ndc.z - bias;

    let mut lit = 0.0;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let x = (cx + dx).clamp(0, size - 1) as u32;
            let y = (cy + dy).clamp(0, size - 1) as u32;
            if reference <= load(x, y) {
                lit += 1.0;
            }
        }
    }
    lit / 9.0
}
