//! Fast approximate anti-aliasing (console variant).

use glam::{Vec2, Vec3};

const REDUCE_MUL: f32 = 1.0 / 8.0;
const REDUCE_MIN: f32 = 1.0 / 128.0;
const SPAN_MAX: f32 = 8.0;

#[inline]
pub fn luma(color: Vec3) -> f32 {
    color.dot(Vec3::new(0.299, 0.587, 0.114))
}

/// Edge thresholds. A pixel is left alone when its local luma range is below
/// `max(current, luma_max * relative)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FxaaThresholds {
    pub current: f32,
    pub relative: f32,
}

/// Anti-alias the pixel at `uv` of a source with texel size `texel`.
pub fn fxaa(sample: impl Fn(Vec2) -> Vec3, uv: Vec2, texel: Vec2, thresholds: FxaaThresholds) -> Vec3 {
    let half = texel * 0.5;
    let rgb_m = sample(uv);
    let luma_m = luma(rgb_m);
    let luma_nw = luma(sample(uv + Vec2::new(-half.x, -half.y)));
    let luma_ne = luma(sample(uv + Vec2::new(half.x, -half.y)));
    let luma_sw = luma(sample(uv + Vec2::new(-half.x, half.y)));
    let luma_se = luma(sample(uv + Vec2::new(half.x, half.y)));

    let luma_min = luma_m.min(luma_nw.min(luma_ne).min(luma_sw.min(luma_se)));
    let luma_max = luma_m.max(luma_nw.max(luma_ne).max(luma_sw.max(luma_se)));
    let range = luma_max - luma_min;
    if range < thresholds.current.max(luma_max * thresholds.relative) {
        return rgb_m;
    }

    let dir = Vec2::new(
        -((luma_nw + luma_ne) - (luma_sw + luma_se)),
        (luma_nw + luma_sw) - (luma_ne + luma_se),
    );
    let dir_reduce = ((luma_nw + luma_ne + luma_sw + luma_se) * 0.25 * REDUCE_MUL).max(REDUCE_MIN);
    let rcp_dir_min = 1.0 / (dir.x.abs().min(dir.y.abs()) + dir_reduce);
    let dir = (dir * rcp_dir_min).clamp(Vec2::splat(-SPAN_MAX), Vec2::splat(SPAN_MAX)) * texel;

    let rgb_a = (sample(uv + dir * (1.0 / 3.0 - 0.5)) + sample(uv + dir * (2.0 / 3.0 - 0.5))) * 0.5;
    let rgb_b = rgb_a * 0.5 + (sample(uv - dir * 0.5) + sample(uv + dir * 0.5)) * 0.25;
    let luma_b = luma(rgb_b);
    if luma_b < luma_min || luma_b > luma_max {
        rgb_a
    } else {
        rgb_b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: FxaaThresholds = FxaaThresholds {
        current: 0.0312,
        relative: 0.125,
    };

    #[test]
    fn test_flat_region_is_untouched() {
        let c = Vec3::new(0.3, 0.6, 0.9);
        let out = fxaa(|_| c, Vec2::splat(0.5), Vec2::splat(0.01), THRESHOLDS);
        assert_eq!(out, c);
    }

    #[test]
    fn test_hard_edge_is_smoothed() {
        // Slanted step edge; the center is on the bright side.
        let sample = |uv: Vec2| {
            if uv.y < 0.5 * uv.x + 0.27 {
                Vec3::ONE
            } else {
                Vec3::ZERO
            }
        };
        let out = fxaa(sample, Vec2::splat(0.5), Vec2::splat(0.1), THRESHOLDS);
        assert!(out.x > 0.0 && out.x < 1.0, "{out:?}");
    }
}
