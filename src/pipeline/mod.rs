//! Deferred rendering pipeline
//!
//! One frame runs these passes in a fixed order:
//! 1. Shadow - depth from the sun's point of view (skipped without a sun)
//! 2. G-Buffer - batched meshes into albedo/normal/material/emissive/id + depth
//! 3. Lighting - fullscreen PBR over the G-buffer into an HDR target
//! 4. Bloom - prefilter, downsample/blur chain, upsample (skipped when off)
//! 5. Composite - bloom, exposure, tonemap, vignette, then optional FXAA

mod batch;
pub mod gbuffer_pass;
pub mod lighting_pass;
pub mod postprocess;
pub mod shadow_pass;

pub use batch::*;
pub use gbuffer_pass::GBufferPass;
pub use lighting_pass::LightingPass;
pub use postprocess::{
    BloomPass, CompositePass, PostProcessSettings, SharedPostProcessSettings,
};
pub use shadow_pass::ShadowPass;

use glam::{Mat4, Vec4};

use crate::backend::{
    BackendResult, GraphicsBackend, PipelineDescriptor, PipelineHandle, ShaderProgram, TextureHandle,
};
use crate::error::{RenderError, RenderResult};
use crate::render_graph::{
    RenderGraphData, DEPTH_FORMAT, DISPLAY_FORMAT, GBUFFER_FORMATS, HDR_FORMAT, SHADOW_FORMAT,
};
use crate::renderer::RendererStatistics;
use crate::resources::MeshCache;
use crate::scene::{CameraData, Environment, LightData};

/// Where the renderer is within a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FramePhase {
    #[default]
    Idle,
    /// Between `begin_frame` and `end_frame`, accepting submissions
    Recording,
    Shadow,
    Geometry,
    Lighting,
    Bloom,
    Composite,
}

impl FramePhase {
    /// The phase that must follow this one
    pub fn next(self) -> FramePhase {
        match self {
            FramePhase::Idle => FramePhase::Recording,
            FramePhase::Recording => FramePhase::Shadow,
            FramePhase::Shadow => FramePhase::Geometry,
            FramePhase::Geometry => FramePhase::Lighting,
            FramePhase::Lighting => FramePhase::Bloom,
            FramePhase::Bloom => FramePhase::Composite,
            FramePhase::Composite => FramePhase::Idle,
        }
    }
}

/// Enforces the pass order of a frame
#[derive(Debug, Default)]
pub struct FrameSequencer {
    phase: FramePhase,
}

impl FrameSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Move to `to`, which must be the phase directly after the current one.
    pub fn advance(&mut self, to: FramePhase) -> RenderResult<()> {
        let expected = self.phase.next();
        if to != expected {
            return Err(RenderError::PassOrder {
                expected,
                found: to,
            });
        }
        self.phase = to;
        Ok(())
    }

    /// Drop back to idle after a failed frame
    pub fn reset(&mut self) {
        self.phase = FramePhase::Idle;
    }
}

/// Passes that can show up in [`RendererStatistics::executed_passes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Shadow,
    Geometry,
    Lighting,
    Bloom,
    Composite,
    Fxaa,
}

/// One pipeline per program, compiled once at renderer creation
#[derive(Debug, Clone, Copy)]
pub struct PipelineSet {
    pub shadow: PipelineHandle,
    pub gbuffer: PipelineHandle,
    pub lighting: PipelineHandle,
    pub bloom_prefilter: PipelineHandle,
    pub bloom_downsample: PipelineHandle,
    pub bloom_blur: PipelineHandle,
    pub bloom_upsample: PipelineHandle,
    pub composite: PipelineHandle,
    pub fxaa: PipelineHandle,
}

impl PipelineSet {
    /// Descriptor for `program` against the render graph's target formats
    pub fn descriptor(program: ShaderProgram) -> PipelineDescriptor {
        let (color_targets, depth_format) = match program {
            ShaderProgram::ShadowDepth => (Vec::new(), Some(SHADOW_FORMAT)),
            ShaderProgram::GBuffer => (GBUFFER_FORMATS.to_vec(), Some(DEPTH_FORMAT)),
            ShaderProgram::Lighting
            | ShaderProgram::BloomPrefilter
            | ShaderProgram::BloomDownsample
            | ShaderProgram::BloomBlur
            | ShaderProgram::BloomUpsample => (vec![HDR_FORMAT], None),
            ShaderProgram::Composite | ShaderProgram::Fxaa => (vec![DISPLAY_FORMAT], None),
        };
        PipelineDescriptor {
            label: Some(program.label().to_string()),
            program,
            source: crate::shaders::source(program),
            color_targets,
            depth_format,
        }
    }

    pub fn create<B: GraphicsBackend>(backend: &mut B) -> BackendResult<Self> {
        let mut create = |program| {
            let pipeline = backend.create_pipeline(&Self::descriptor(program))?;
            log::info!("Compiled pipeline '{}'", program.label());
            Ok::<_, crate::backend::BackendError>(pipeline)
        };
        Ok(Self {
            shadow: create(ShaderProgram::ShadowDepth)?,
            gbuffer: create(ShaderProgram::GBuffer)?,
            lighting: create(ShaderProgram::Lighting)?,
            bloom_prefilter: create(ShaderProgram::BloomPrefilter)?,
            bloom_downsample: create(ShaderProgram::BloomDownsample)?,
            bloom_blur: create(ShaderProgram::BloomBlur)?,
            bloom_upsample: create(ShaderProgram::BloomUpsample)?,
            composite: create(ShaderProgram::Composite)?,
            fxaa: create(ShaderProgram::Fxaa)?,
        })
    }
}

/// Everything a pass may read or record during one frame.
///
/// Passes communicate through the `shadow_view_projection` and
/// `bloom_texture` fields; nothing here outlives the frame.
pub struct FrameContext<'a> {
    pub camera: &'a CameraData,
    pub lights: &'a LightData,
    pub environment: &'a Environment,
    /// Snapshot taken once at the start of the pass sequence
    pub settings: &'a PostProcessSettings,
    pub batch: &'a mut GeometryBatch,
    pub meshes: &'a MeshCache,
    pub clear_color: Vec4,
    pub stats: &'a mut RendererStatistics,
    /// Set by the shadow pass when it rendered a shadow map
    pub shadow_view_projection: Option<Mat4>,
    /// Set by the bloom pass when it produced a bloom texture
    pub bloom_texture: Option<TextureHandle>,
}

/// A stage of the frame
pub trait RenderPass<B: GraphicsBackend> {
    fn name(&self) -> &'static str;

    /// The phase this pass runs in
    fn phase(&self) -> FramePhase;

    /// Record the pass. Returns `Ok(false)` when the pass was skipped.
    fn execute(
        &mut self,
        backend: &mut B,
        graph: &RenderGraphData,
        frame: &mut FrameContext<'_>,
    ) -> RenderResult<bool>;
}

/// Bind `texture` if it is still alive, otherwise warn and bind the fallback.
pub(crate) fn bind_texture_checked<B: GraphicsBackend>(
    backend: &mut B,
    slot: u32,
    texture: Option<TextureHandle>,
    what: &str,
) -> bool {
    match texture {
        Some(texture) if backend.texture_size(texture).is_some() => {
            backend.set_texture(slot, Some(texture));
            true
        }
        Some(texture) => {
            log::warn!("{what} texture {texture:?} no longer exists, using the fallback");
            backend.set_texture(slot, None);
            false
        }
        None => {
            backend.set_texture(slot, None);
            false
        }
    }
}
