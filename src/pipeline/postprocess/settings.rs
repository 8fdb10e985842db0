//! Editor-facing post-processing parameters

use std::sync::Arc;

use glam::Vec3;
use parking_lot::RwLock;

use crate::backend::TextureHandle;
use crate::shading::fxaa::FxaaThresholds;
use crate::shading::TonemapCurve;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSettings {
    pub enabled: bool,
    /// Multiplier applied to the bloom texture in the composite pass
    pub strength: f32,
    pub threshold: f32,
    /// Width of the soft transition around the threshold
    pub knee: f32,
    /// Per-channel ceiling of the bloom texture before it is added
    pub clamp: f32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 0.1,
            threshold: 1.0,
            knee: 0.1,
            clamp: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FxaaSettings {
    pub enabled: bool,
    /// Absolute contrast below which a pixel is left alone
    pub current_threshold: f32,
    /// Contrast relative to the local maximum luma
    pub relative_threshold: f32,
}

impl Default for FxaaSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            current_threshold: 0.0312,
            relative_threshold: 0.125,
        }
    }
}

impl FxaaSettings {
    pub fn thresholds(&self) -> FxaaThresholds {
        FxaaThresholds {
            current: self.current_threshold.max(0.0),
            relative: self.relative_threshold.max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VignetteSettings {
    pub color: Vec3,
    /// Normalized radius where darkening starts
    pub offset: f32,
    /// 0 disables the effect
    pub intensity: f32,
    /// Optional single-channel mask multiplied into the falloff
    pub mask: Option<TextureHandle>,
}

impl Default for VignetteSettings {
    fn default() -> Self {
        Self {
            color: Vec3::ZERO,
            offset: 0.4,
            intensity: 0.0,
            mask: None,
        }
    }
}

/// Post-processing parameters, read once per frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostProcessSettings {
    pub tonemap: TonemapCurve,
    pub exposure: f32,
    pub bloom: BloomSettings,
    pub fxaa: FxaaSettings,
    pub vignette: VignetteSettings,
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            tonemap: TonemapCurve::Aces,
            exposure: 1.0,
            bloom: BloomSettings::default(),
            fxaa: FxaaSettings::default(),
            vignette: VignetteSettings::default(),
        }
    }
}

impl PostProcessSettings {
    /// Whether the bloom chain has any visible effect this frame
    pub fn bloom_active(&self) -> bool {
        self.bloom.enabled && self.bloom.strength > 0.0
    }

    pub fn with_tonemap(mut self, tonemap: TonemapCurve) -> Self {
        self.tonemap = tonemap;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_bloom(mut self, enabled: bool) -> Self {
        self.bloom.enabled = enabled;
        self
    }

    pub fn with_fxaa(mut self, enabled: bool) -> Self {
        self.fxaa.enabled = enabled;
        self
    }

    /// Replace values a shader cannot use with safe ones
    pub fn sanitized(mut self) -> Self {
        let finite_or = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        self.exposure = finite_or(self.exposure, 1.0).max(0.0);
        self.bloom.strength = finite_or(self.bloom.strength, 0.0).max(0.0);
        self.bloom.threshold = finite_or(self.bloom.threshold, 1.0).max(0.0);
        self.bloom.knee = finite_or(self.bloom.knee, 0.0).max(0.0);
        self.bloom.clamp = finite_or(self.bloom.clamp, 0.0).max(0.0);
        self.vignette.intensity = finite_or(self.vignette.intensity, 0.0).clamp(0.0, 1.0);
        self.vignette.offset = finite_or(self.vignette.offset, 0.0);
        self
    }
}

/// Settings shared between the editor (writer) and the renderer (reader)
pub type SharedPostProcessSettings = Arc<RwLock<PostProcessSettings>>;

pub fn shared(settings: PostProcessSettings) -> SharedPostProcessSettings {
    Arc::new(RwLock::new(settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_is_inactive_at_zero_strength() {
        let mut settings = PostProcessSettings::default();
        assert!(settings.bloom_active());
        settings.bloom.strength = 0.0;
        assert!(!settings.bloom_active());
        settings.bloom.strength = 1.0;
        settings.bloom.enabled = false;
        assert!(!settings.bloom_active());
    }

    #[test]
    fn test_sanitized_removes_non_finite_values() {
        let mut settings = PostProcessSettings::default();
        settings.exposure = f32::NAN;
        settings.bloom.strength = -2.0;
        settings.vignette.intensity = f32::INFINITY;
        let clean = settings.sanitized();
        assert_eq!(clean.exposure, 1.0);
        assert_eq!(clean.bloom.strength, 0.0);
        assert_eq!(clean.vignette.intensity, 0.0);
    }

    #[test]
    fn test_shared_settings_are_visible_to_readers() {
        let settings = shared(PostProcessSettings::default());
        let reader = Arc::clone(&settings);
        settings.write().tonemap = TonemapCurve::Filmic;
        assert_eq!(reader.read().tonemap, TonemapCurve::Filmic);
    }
}
