//! Per-viewport render targets and their resize policy

use super::framebuffer::{Framebuffer, FramebufferSpec};
use super::*;
use crate::backend::{BackendError, BackendResult, GraphicsBackend, TextureHandle};
use crate::error::{RenderError, RenderResult};

/// Default number of bloom downsample levels
pub const DEFAULT_BLOOM_LEVELS: u32 = 5;
/// Upper bound for bloom levels
pub const MAX_BLOOM_LEVELS: u32 = 8;
/// Default shadow map edge length
pub const DEFAULT_SHADOW_MAP_SIZE: u32 = 2048;

/// Size of bloom chain level `level` for a `width` x `height` viewport.
///
/// Level 0 is the viewport itself; each level halves the previous one,
/// rounding down, and never goes below 1x1.
pub fn bloom_level_size(width: u32, height: u32, level: u32) -> (u32, u32) {
    let shift = level.min(31);
    ((width >> shift).max(1), (height >> shift).max(1))
}

/// How a viewport's targets are laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderGraphDesc {
    pub bloom_levels: u32,
    pub shadow_map_size: u32,
}

impl Default for RenderGraphDesc {
    fn default() -> Self {
        Self {
            bloom_levels: DEFAULT_BLOOM_LEVELS,
            shadow_map_size: DEFAULT_SHADOW_MAP_SIZE,
        }
    }
}

const GBUFFER: FramebufferSpec = FramebufferSpec {
    label: "gbuffer",
    color_formats: &GBUFFER_FORMATS,
    depth_format: Some(DEPTH_FORMAT),
};

const LIGHTING: FramebufferSpec = FramebufferSpec {
    label: "lighting",
    color_formats: &[HDR_FORMAT],
    depth_format: None,
};

const BLOOM: FramebufferSpec = FramebufferSpec {
    label: "bloom",
    color_formats: &[HDR_FORMAT],
    depth_format: None,
};

const DISPLAY: FramebufferSpec = FramebufferSpec {
    label: "display",
    color_formats: &[DISPLAY_FORMAT],
    depth_format: None,
};

const SHADOW: FramebufferSpec = FramebufferSpec {
    label: "shadow",
    color_formats: &[],
    depth_format: Some(SHADOW_FORMAT),
};

/// Every target sized from the viewport
#[derive(Debug)]
pub struct ViewportTargets {
    pub gbuffer: Framebuffer,
    pub lighting: Framebuffer,
    /// Half resolution thresholded HDR, the top of the bloom chain
    pub prefilter: Framebuffer,
    /// `downsample[i]` is bloom level `i + 2`
    pub downsample: Vec<Framebuffer>,
    /// Horizontal blur scratch, same size as `downsample[i]`
    pub blur_temp: Vec<Framebuffer>,
    /// `upsample[i]` is bloom level `i + 1`; `upsample[0]` is the final bloom
    pub upsample: Vec<Framebuffer>,
    /// Tonemapped image waiting for FXAA
    pub post: Framebuffer,
    /// The presentable image
    pub composite: Framebuffer,
}

impl ViewportTargets {
    /// Create all targets, or none of them.
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        width: u32,
        height: u32,
        bloom_levels: u32,
    ) -> BackendResult<Self> {
        let levels = bloom_levels as usize;
        let mut layout: Vec<(String, FramebufferSpec, (u32, u32))> = vec![
            ("gbuffer".into(), GBUFFER, (width, height)),
            ("lighting".into(), LIGHTING, (width, height)),
            ("post".into(), DISPLAY, (width, height)),
            ("composite".into(), DISPLAY, (width, height)),
            ("bloom_prefilter".into(), BLOOM, bloom_level_size(width, height, 1)),
        ];
        for i in 0..bloom_levels {
            layout.push((format!("bloom_down{i}"), BLOOM, bloom_level_size(width, height, i + 2)));
        }
        for i in 0..bloom_levels {
            layout.push((format!("bloom_blur{i}"), BLOOM, bloom_level_size(width, height, i + 2)));
        }
        for i in 0..bloom_levels {
            layout.push((format!("bloom_up{i}"), BLOOM, bloom_level_size(width, height, i + 1)));
        }

        let mut created = Vec::with_capacity(layout.len());
        for (label, spec, (w, h)) in layout {
            match Framebuffer::create(backend, label, spec, w, h) {
                Ok(framebuffer) => created.push(framebuffer),
                Err(err) => {
                    for framebuffer in created {
                        framebuffer.destroy(backend);
                    }
                    return Err(err);
                }
            }
        }

        let upsample = created.split_off(5 + 2 * levels);
        let blur_temp = created.split_off(5 + levels);
        let downsample = created.split_off(5);
        let [gbuffer, lighting, post, composite, prefilter]: [Framebuffer; 5] = created
            .try_into()
            .map_err(|_| BackendError::TextureCreationFailed("viewport target layout".into()))?;

        Ok(Self {
            gbuffer,
            lighting,
            prefilter,
            downsample,
            blur_temp,
            upsample,
            post,
            composite,
        })
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        for framebuffer in self.into_framebuffers() {
            framebuffer.destroy(backend);
        }
    }

    pub fn framebuffers(&self) -> impl Iterator<Item = &Framebuffer> {
        [&self.gbuffer, &self.lighting, &self.post, &self.composite, &self.prefilter]
            .into_iter()
            .chain(&self.downsample)
            .chain(&self.blur_temp)
            .chain(&self.upsample)
    }

    fn into_framebuffers(self) -> impl Iterator<Item = Framebuffer> {
        [self.gbuffer, self.lighting, self.post, self.composite, self.prefilter]
            .into_iter()
            .chain(self.downsample)
            .chain(self.blur_temp)
            .chain(self.upsample)
    }
}

/// All intermediate framebuffers of one viewport.
///
/// Viewport-sized targets are resized together: a request recorded with
/// [`resize`](Self::resize) is applied by the renderer at the start of the
/// next pass sequence. The shadow map has a fixed size and is never resized.
#[derive(Debug)]
pub struct RenderGraphData {
    width: u32,
    height: u32,
    bloom_levels: u32,
    targets: ViewportTargets,
    shadow: Framebuffer,
    pending_resize: Option<(u32, u32)>,
}

impl RenderGraphData {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        width: u32,
        height: u32,
        desc: RenderGraphDesc,
    ) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidViewportSize { width, height });
        }
        let bloom_levels = desc.bloom_levels.clamp(1, MAX_BLOOM_LEVELS);
        let shadow_map_size = desc.shadow_map_size.max(1);

        let targets = ViewportTargets::create(backend, width, height, bloom_levels)?;
        let shadow = match Framebuffer::create(backend, "shadow_map", SHADOW, shadow_map_size, shadow_map_size) {
            Ok(shadow) => shadow,
            Err(err) => {
                targets.destroy(backend);
                return Err(err.into());
            }
        };

        log::info!("Created render graph {width}x{height} with {bloom_levels} bloom levels");
        Ok(Self {
            width,
            height,
            bloom_levels,
            targets,
            shadow,
            pending_resize: None,
        })
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        self.targets.destroy(backend);
        self.shadow.destroy(backend);
    }

    /// Request new viewport dimensions. Zero sizes are ignored; the latest
    /// request wins.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::debug!("Ignoring resize to {width}x{height}");
            return;
        }
        if (width, height) == (self.width, self.height) {
            self.pending_resize = None;
        } else {
            self.pending_resize = Some((width, height));
        }
    }

    pub fn pending_resize(&self) -> Option<(u32, u32)> {
        self.pending_resize
    }

    /// Apply a pending resize, returning whether targets were replaced.
    ///
    /// New targets are created before the old ones are released. On failure
    /// the previous targets stay in place and the request stays pending so
    /// the next frame retries it.
    pub fn apply_pending_resize<B: GraphicsBackend>(&mut self, backend: &mut B) -> RenderResult<bool> {
        let Some((width, height)) = self.pending_resize else {
            return Ok(false);
        };

        match ViewportTargets::create(backend, width, height, self.bloom_levels) {
            Ok(targets) => {
                let old = std::mem::replace(&mut self.targets, targets);
                old.destroy(backend);
                log::debug!(
                    "Resized render graph {}x{} -> {width}x{height}",
                    self.width,
                    self.height
                );
                self.width = width;
                self.height = height;
                self.pending_resize = None;
                Ok(true)
            }
            Err(source) => {
                log::warn!("Resize to {width}x{height} failed, keeping {}x{}: {source}", self.width, self.height);
                Err(RenderError::ResizeFailed {
                    width,
                    height,
                    source,
                })
            }
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn bloom_levels(&self) -> u32 {
        self.bloom_levels
    }

    pub fn targets(&self) -> &ViewportTargets {
        &self.targets
    }

    pub fn shadow_map(&self) -> &Framebuffer {
        &self.shadow
    }

    /// The final composite color attachment
    pub fn output(&self) -> TextureHandle {
        self.targets.composite.color[0]
    }

    /// The G-buffer's entity id attachment
    pub fn entity_id_target(&self) -> TextureHandle {
        self.targets.gbuffer.color[gbuffer_target::ENTITY_ID]
    }

    /// The final bloom texture, at prefilter resolution
    pub fn bloom_output(&self) -> TextureHandle {
        self.targets
            .upsample
            .first()
            .unwrap_or(&self.targets.prefilter)
            .color[0]
    }

    /// Every framebuffer including the shadow map
    pub fn framebuffers(&self) -> impl Iterator<Item = &Framebuffer> {
        self.targets.framebuffers().chain(std::iter::once(&self.shadow))
    }

    /// Device textures owned by this graph
    pub fn texture_count(&self) -> usize {
        self.framebuffers().map(Framebuffer::texture_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareBackend, SoftwareLimits};
    use rstest::rstest;

    fn small() -> RenderGraphDesc {
        RenderGraphDesc {
            bloom_levels: 3,
            shadow_map_size: 16,
        }
    }

    #[rstest]
    #[case(1280, 720, 1, (640, 360))]
    #[case(1280, 720, 5, (40, 22))]
    #[case(7, 3, 2, (1, 1))]
    #[case(1, 1, 8, (1, 1))]
    #[case(1000, 2, 40, (1, 1))]
    fn test_bloom_level_size(#[case] w: u32, #[case] h: u32, #[case] level: u32, #[case] expected: (u32, u32)) {
        assert_eq!(bloom_level_size(w, h, level), expected);
    }

    #[test]
    fn test_chain_layout() {
        let mut backend = SoftwareBackend::new();
        let graph = RenderGraphData::new(&mut backend, 100, 60, small()).unwrap();
        let targets = graph.targets();

        assert_eq!(targets.prefilter.size(), (50, 30));
        let down: Vec<_> = targets.downsample.iter().map(Framebuffer::size).collect();
        assert_eq!(down, vec![(25, 15), (12, 7), (6, 3)]);
        let up: Vec<_> = targets.upsample.iter().map(Framebuffer::size).collect();
        assert_eq!(up, vec![(50, 30), (25, 15), (12, 7)]);
        for (blur, down) in targets.blur_temp.iter().zip(&targets.downsample) {
            assert_eq!(blur.size(), down.size());
        }
        assert_eq!(graph.shadow_map().size(), (16, 16));
        assert_eq!(graph.texture_count(), backend.live_texture_count());

        graph.destroy(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn test_zero_size_is_rejected_or_ignored() {
        let mut backend = SoftwareBackend::new();
        assert!(matches!(
            RenderGraphData::new(&mut backend, 0, 10, small()),
            Err(RenderError::InvalidViewportSize { .. })
        ));

        let mut graph = RenderGraphData::new(&mut backend, 10, 10, small()).unwrap();
        graph.resize(0, 20);
        assert_eq!(graph.pending_resize(), None);
        graph.resize(20, 20);
        graph.resize(10, 10);
        assert_eq!(graph.pending_resize(), None);
    }

    #[test]
    fn test_resize_applies_once() {
        let mut backend = SoftwareBackend::new();
        let mut graph = RenderGraphData::new(&mut backend, 64, 32, small()).unwrap();
        let count = backend.live_texture_count();

        graph.resize(32, 16);
        assert_eq!(graph.size(), (64, 32), "resize is deferred");
        assert!(graph.apply_pending_resize(&mut backend).unwrap());
        assert!(!graph.apply_pending_resize(&mut backend).unwrap());
        assert_eq!(graph.size(), (32, 16));
        assert_eq!(backend.live_texture_count(), count);
        for framebuffer in graph.targets().framebuffers() {
            for texture in framebuffer.textures() {
                assert_eq!(backend.texture_size(texture), Some(framebuffer.size()));
            }
        }
    }

    #[test]
    fn test_failed_resize_keeps_old_targets_and_retries() {
        let mut backend = SoftwareBackend::new();
        let mut graph = RenderGraphData::new(&mut backend, 16, 16, small()).unwrap();
        let count = backend.live_texture_count();
        let output = graph.output();

        backend.set_limits(SoftwareLimits {
            max_texture_dimension: 64,
            ..Default::default()
        });
        graph.resize(128, 128);
        assert!(matches!(
            graph.apply_pending_resize(&mut backend),
            Err(RenderError::ResizeFailed { width: 128, height: 128, .. })
        ));
        assert_eq!(graph.size(), (16, 16));
        assert_eq!(graph.output(), output);
        assert_eq!(backend.live_texture_count(), count);
        assert_eq!(graph.pending_resize(), Some((128, 128)));

        backend.set_limits(SoftwareLimits::default());
        assert!(graph.apply_pending_resize(&mut backend).unwrap());
        assert_eq!(graph.size(), (128, 128));
    }
}
