//! Closed-form shading kernels.
//!
//! These are the reference versions of the math every program performs. The
//! software device calls them directly; the WGSL sources implement the same
//! formulas line for line.

pub mod bloom;
pub mod brdf;
pub mod fxaa;
pub mod shadow;
pub mod tonemap;
pub mod vignette;

use glam::{Vec2, Vec3};

pub use tonemap::TonemapCurve;

/// Rec. 709 relative luminance of a linear color.
#[inline]
pub fn luminance(color: Vec3) -> f32 {
    color.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Largest finite value a half-float HDR target can hold.
pub const HDR_MAX: f32 = 65504.0;

/// Make a radiance value storable: NaN becomes zero, everything else is
/// clamped to `[0, HDR_MAX]` so overbright and infinite channels saturate.
#[inline]
pub fn sanitize(color: Vec3) -> Vec3 {
    let clean = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, HDR_MAX) };
    Vec3::new(clean(color.x), clean(color.y), clean(color.z))
}

/// Pack a unit normal into two `[0, 1]` channels (octahedral mapping).
pub fn encode_octahedral(normal: Vec3) -> Vec2 {
    let l1 = normal.x.abs() + normal.y.abs() + normal.z.abs();
    if l1 < 1e-6 {
        return Vec2::splat(0.5);
    }
    let n = normal / l1;
    let folded = if n.z >= 0.0 {
        Vec2::new(n.x, n.y)
    } else {
        Vec2::new(
            (1.0 - n.y.abs()) * sign_not_zero(n.x),
            (1.0 - n.x.abs()) * sign_not_zero(n.y),
        )
    };
    folded * 0.5 + 0.5
}

/// Inverse of [`encode_octahedral`].
pub fn decode_octahedral(encoded: Vec2) -> Vec3 {
    let f = encoded * 2.0 - 1.0;
    let mut n = Vec3::new(f.x, f.y, 1.0 - f.x.abs() - f.y.abs());
    let t = (-n.z).max(0.0);
    n.x += if n.x >= 0.0 { -t } else { t };
    n.y += if n.y >= 0.0 { -t } else { t };
    n.normalize_or_zero()
}

#[inline]
fn sign_not_zero(v: f32) -> f32 {
    if v >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

#[inline]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}
