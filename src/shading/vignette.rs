//! Radial vignette.

use glam::{Vec2, Vec3};

use crate::math::{inverse_lerp_clamped, smoothstep01};

/// Largest accepted vignette offset; an offset of 1 would leave an empty
/// falloff band.
pub const MAX_OFFSET: f32 = 0.999;

/// Radial falloff at `uv`: 0 inside `offset`, rising smoothly to 1 in the
/// corners, then scaled by the mask value.
pub fn falloff(uv: Vec2, offset: f32, mask: f32) -> f32 {
    let distance = (uv - Vec2::splat(0.5)).length() * std::f32::consts::SQRT_2;
    let offset = offset.clamp(0.0, MAX_OFFSET);
    smoothstep01(inverse_lerp_clamped(offset, 1.0, distance)) * mask
}

/// `color * lerp(1, vignette_color, intensity * falloff)`
pub fn apply(color: Vec3, uv: Vec2, vignette_color: Vec3, offset: f32, intensity: f32, mask: f32) -> Vec3 {
    let amount = (intensity * falloff(uv, offset, mask)).clamp(0.0, 1.0);
    color * Vec3::ONE.lerp(vignette_color, amount)
}
