//! Deferred Renderer - the rendering core of a 3D scene editor
//!
//! A deferred, physically based renderer that turns batched mesh draws into
//! a presentable image through a fixed pass sequence:
//! shadow, G-buffer, lighting, bloom and composite (with optional FXAA).
//!
//! Two devices implement the backend interface:
//! - **Software**: a deterministic CPU device, always available and used by the tests
//! - **wgpu**: a headless GPU device behind the `wgpu-backend` feature
//!
//! # Features
//! - Per-viewport render targets that resize together and atomically
//! - Geometry batching by mesh and cull mode
//! - Cook-Torrance PBR lighting with PCF shadows from the sun light
//! - Downsample/upsample bloom, four tonemap curves, vignette and FXAA
//! - Entity picking through an id attachment

pub mod backend;
pub mod error;
pub mod math;
pub mod pipeline;
pub mod render_graph;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shaders;
pub mod shading;
pub mod uniforms;

pub use backend::{GraphicsBackend, SoftwareBackend};
#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuBackend;
pub use error::{RenderError, RenderResult};
pub use pipeline::{PassKind, PostProcessSettings, SharedPostProcessSettings};
pub use render_graph::RenderGraphData;
pub use renderer::{Renderer, RendererContext, RendererStatistics};

use glam::Vec4;

use pipeline::DEFAULT_MAX_DRAW_COMMANDS;
use render_graph::{DEFAULT_BLOOM_LEVELS, DEFAULT_SHADOW_MAP_SIZE, MAX_BLOOM_LEVELS};
use shading::shadow::ShadowBias;

/// Backend selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// CPU reference device
    #[default]
    Software,
    /// wgpu device, requires the `wgpu-backend` feature
    Wgpu,
}

impl BackendType {
    /// Whether this build can create the device
    pub fn is_available(self) -> bool {
        match self {
            BackendType::Software => true,
            BackendType::Wgpu => cfg!(feature = "wgpu-backend"),
        }
    }
}

/// Configuration for creating a [`Renderer`]
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Which device the renderer runs on
    pub backend: BackendType,
    /// Edge length of the square shadow map
    pub shadow_map_size: u32,
    /// Bloom downsample levels, clamped to `1..=8`
    pub bloom_levels: u32,
    /// Draw commands one frame can hold; more are dropped with a warning
    pub max_draw_commands: usize,
    pub shadow_bias: ShadowBias,
    /// Initial post-processing values
    pub post_process: PostProcessSettings,
    /// Color of pixels no geometry covers
    pub clear_color: Vec4,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Software,
            shadow_map_size: DEFAULT_SHADOW_MAP_SIZE,
            bloom_levels: DEFAULT_BLOOM_LEVELS,
            max_draw_commands: DEFAULT_MAX_DRAW_COMMANDS,
            shadow_bias: ShadowBias::default(),
            post_process: PostProcessSettings::default(),
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }
}

impl RendererConfig {
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size.max(1);
        self
    }

    pub fn with_bloom_levels(mut self, levels: u32) -> Self {
        self.bloom_levels = levels.clamp(1, MAX_BLOOM_LEVELS);
        self
    }

    pub fn with_max_draw_commands(mut self, count: usize) -> Self {
        self.max_draw_commands = count;
        self
    }

    pub fn with_shadow_bias(mut self, bias: ShadowBias) -> Self {
        self.shadow_bias = bias;
        self
    }

    pub fn with_post_process(mut self, settings: PostProcessSettings) -> Self {
        self.post_process = settings;
        self
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }
}
