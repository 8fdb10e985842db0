//! Bloom filter kernels.
//!
//! Each kernel takes a `sample` closure returning the bilinearly filtered
//! source color at a uv coordinate, and the source texel size.

use glam::{Vec2, Vec3};

/// Separable Gaussian weights, center tap first.
pub const GAUSSIAN_WEIGHTS: [f32; 5] = [0.227_027, 0.194_594_6, 0.121_621_6, 0.054_054, 0.016_216];

/// Soft-knee brightness threshold.
///
/// Colors below `threshold - knee` are removed, colors above `threshold + knee`
/// pass with `threshold` subtracted, and the band between fades quadratically.
pub fn prefilter(color: Vec3, threshold: f32, knee: f32) -> Vec3 {
    let brightness = color.max_element();
    let knee = knee.max(0.0);
    let soft = (brightness - threshold + knee).clamp(0.0, 2.0 * knee);
    let soft = soft * soft / (4.0 * knee + 1e-4);
    let contribution = soft.max(brightness - threshold) / brightness.max(1e-4);
    color * contribution.max(0.0)
}

/// Dual-filter downsample: the center weighted four times plus four diagonal
/// taps half a texel away.
pub fn downsample(sample: impl Fn(Vec2) -> Vec3, uv: Vec2, texel: Vec2) -> Vec3 {
    let half = texel * 0.5;
    let mut sum = sample(uv) * 4.0;
    sum += sample(uv - half);
    sum += sample(uv + half);
    sum += sample(uv + Vec2::new(half.x, -half.y));
    sum += sample(uv - Vec2::new(half.x, -half.y));
    sum / 8.0
}

/// One direction of the 9-tap separable Gaussian. `direction` is `(1, 0)`
/// for the horizontal pass and `(0, 1)` for the vertical one.
pub fn gaussian_blur(
    sample: impl Fn(Vec2) -> Vec3,
    uv: Vec2,
    texel: Vec2,
    direction: Vec2,
) -> Vec3 {
    let step = texel * direction;
    let mut sum = sample(uv) * GAUSSIAN_WEIGHTS[0];
    for (i, weight) in GAUSSIAN_WEIGHTS.iter().enumerate().skip(1) {
        let offset = step * i as f32;
        sum += sample(uv + offset) * *weight;
        sum += sample(uv - offset) * *weight;
    }
    sum
}

/// 3x3 tent filter used when upsampling a coarser level.
pub fn upsample_tent(sample: impl Fn(Vec2) -> Vec3, uv: Vec2, texel: Vec2) -> Vec3 {
    let mut sum = Vec3::ZERO;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let weight = match (dx, dy) {
                (0, 0) => 4.0,
                (0, _) | (_, 0) => 2.0,
                _ => 1.0,
            };
            sum += sample(uv + texel * Vec2::new(dx as f32, dy as f32)) * weight;
        }
    }
    sum / 16.0
}

/// Bloom added on top of the HDR color in the composite pass.
pub fn contribution(bloom: Vec3, strength: f32, clamp: f32) -> Vec3 {
    bloom.min(Vec3::splat(clamp.max(0.0))) * strength
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_weights_sum_to_one() {
        let total = GAUSSIAN_WEIGHTS[0] + 2.0 * GAUSSIAN_WEIGHTS[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_kernels_preserve_constant_color() {
        let c = Vec3::new(0.5, 1.0, 2.0);
        let texel = Vec2::splat(0.1);
        let flat = |_: Vec2| c;
        assert!((downsample(flat, Vec2::splat(0.5), texel) - c).length() < 1e-5);
        assert!((upsample_tent(flat, Vec2::splat(0.5), texel) - c).length() < 1e-5);
        assert!((gaussian_blur(flat, Vec2::splat(0.5), texel, Vec2::X) - c).length() < 1e-2);
    }

    #[test]
    fn test_prefilter_threshold() {
        assert_eq!(prefilter(Vec3::splat(0.2), 1.0, 0.1), Vec3::ZERO);
        let bright = prefilter(Vec3::splat(3.0), 1.0, 0.1);
        assert!((bright - Vec3::splat(2.0)).length() < 1e-4);
        // Inside the knee the response is soft but non-zero.
        let soft = prefilter(Vec3::splat(1.0), 1.0, 0.5);
        assert!(soft.x > 0.0 && soft.x < 0.5);
    }

    #[test]
    fn test_prefilter_black_is_black() {
        assert_eq!(prefilter(Vec3::ZERO, 0.0, 0.0), Vec3::ZERO);
    }

    #[test]
    fn test_contribution_is_clamped() {
        let c = contribution(Vec3::new(10.0, 0.5, 0.0), 0.5, 2.0);
        assert_eq!(c, Vec3::new(1.0, 0.25, 0.0));
    }
}
