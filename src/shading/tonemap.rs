//! Tonemapping curves applied by the composite pass.

use glam::Vec3;

/// Tonemapping operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TonemapCurve {
    /// Pass HDR values through unchanged
    None,
    /// Narkowicz ACES filmic fit
    #[default]
    Aces,
    /// Hejl-Burgess-Dawson filmic curve
    Filmic,
    /// Hable's Uncharted 2 curve
    Uncharted,
}

const HABLE_A: f32 = 0.15;
const HABLE_B: f32 = 0.50;
const HABLE_C: f32 = 0.10;
const HABLE_D: f32 = 0.20;
const HABLE_E: f32 = 0.02;
const HABLE_F: f32 = 0.30;
const HABLE_WHITE: f32 = 11.2;
const HABLE_EXPOSURE_BIAS: f32 = 2.0;

impl TonemapCurve {
    pub const ALL: [TonemapCurve; 4] = [
        TonemapCurve::None,
        TonemapCurve::Aces,
        TonemapCurve::Filmic,
        TonemapCurve::Uncharted,
    ];

    /// Index carried in the composite uniform block
    pub fn index(self) -> u32 {
        match self {
            TonemapCurve::None => 0,
            TonemapCurve::Aces => 1,
            TonemapCurve::Filmic => 2,
            TonemapCurve::Uncharted => 3,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn apply(self, color: Vec3) -> Vec3 {
        match self {
            TonemapCurve::None => color,
            TonemapCurve::Aces => aces(color),
            TonemapCurve::Filmic => filmic(color),
            TonemapCurve::Uncharted => uncharted(color),
        }
    }
}

fn aces(x: Vec3) -> Vec3 {
    const A: f32 = 2.51;
    const B: f32 = 0.03;
    const C: f32 = 2.43;
    const D: f32 = 0.59;
    const E: f32 = 0.14;
    let mapped = (x * (A * x + B)) / (x * (C * x + D) + E);
    mapped.clamp(Vec3::ZERO, Vec3::ONE)
}

fn filmic(color: Vec3) -> Vec3 {
    let x = (color - 0.004).max(Vec3::ZERO);
    let gamma = (x * (6.2 * x + 0.5)) / (x * (6.2 * x + 1.7) + 0.06);
    // The curve bakes in a 1/2.2 gamma; undo it so the output stays linear.
    gamma.powf(2.2).min(Vec3::ONE)
}

fn hable_partial(x: f32) -> f32 {
    ((x * (HABLE_A * x + HABLE_C * HABLE_B) + HABLE_D * HABLE_E)
        / (x * (HABLE_A * x + HABLE_B) + HABLE_D * HABLE_F))
        - HABLE_E / HABLE_F
}

fn hable(x: f32) -> f32 {
    hable_partial(x) - hable_partial(0.0)
}

fn uncharted(color: Vec3) -> Vec3 {
    let white_scale = 1.0 / hable(HABLE_WHITE);
    let curve = |c: f32| (hable(c.max(0.0) * HABLE_EXPOSURE_BIAS) * white_scale).min(1.0);
    Vec3::new(curve(color.x), curve(color.y), curve(color.z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_none_is_identity() {
        let c = Vec3::new(0.25, 3.5, 0.0);
        assert_eq!(TonemapCurve::None.apply(c), c);
    }

    #[rstest]
    #[case::aces(TonemapCurve::Aces)]
    #[case::filmic(TonemapCurve::Filmic)]
    #[case::uncharted(TonemapCurve::Uncharted)]
    fn test_black_stays_black(#[case] curve: TonemapCurve) {
        let c = curve.apply(Vec3::ZERO);
        assert!(c.max_element().abs() < 1e-4, "{curve:?} -> {c:?}");
    }

    #[rstest]
    #[case::aces(TonemapCurve::Aces)]
    #[case::filmic(TonemapCurve::Filmic)]
    #[case::uncharted(TonemapCurve::Uncharted)]
    fn test_curves_are_monotonic_and_bounded(#[case] curve: TonemapCurve) {
        let mut previous = 0.0;
        for step in 1..64 {
            let v = curve.apply(Vec3::splat(step as f32 * 0.25)).x;
            assert!(v >= previous - 1e-6);
            assert!(v <= 1.0 + 1e-3);
            previous = v;
        }
    }

    #[test]
    fn test_index_round_trip() {
        for curve in TonemapCurve::ALL {
            assert_eq!(TonemapCurve::from_index(curve.index()), Some(curve));
        }
        assert_eq!(TonemapCurve::from_index(7), None);
        assert_eq!(TonemapCurve::default(), TonemapCurve::Aces);
    }
}
