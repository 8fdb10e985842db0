//! Frame orchestration
//!
//! [`Renderer`] owns the device through a [`RendererContext`], records the
//! frame's draws between `begin_frame` and `end_frame`, and then runs the
//! fixed pass sequence against a viewport's [`RenderGraphData`].

use glam::{Mat4, Vec3, Vec4};

use crate::backend::{BackendError, CullMode, GraphicsBackend, TextureHandle};
use crate::error::{RenderError, RenderResult};
use crate::pipeline::postprocess::{self, PostProcessSettings, SharedPostProcessSettings};
use crate::pipeline::{
    BloomPass, CompositePass, FrameContext, FramePhase, FrameSequencer, GBufferPass,
    GeometryBatch, LightingPass, MeshDrawCommand, PassKind, PipelineSet, RenderPass, ShadowPass,
};
use crate::render_graph::{RenderGraphData, RenderGraphDesc};
use crate::resources::{Material, Mesh, MeshCache, MeshHandle, TextureCache, TextureData};
use crate::scene::{CameraData, Environment, LightData};
use crate::shading::TonemapCurve;
use crate::RendererConfig;

/// Counters for the last frame, reset by `begin_frame`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RendererStatistics {
    /// Indexed draws issued by the G-buffer pass
    pub draw_calls: usize,
    /// Indices drawn by the G-buffer pass
    pub index_count: usize,
    pub shadow_draw_calls: usize,
    /// Draws skipped because their mesh or geometry no longer exists
    pub skipped_draws: usize,
    /// Submissions rejected because the batch was full
    pub dropped_draws: usize,
    /// Lights over the per-type limits
    pub dropped_lights: usize,
    /// Passes that did work, in execution order
    pub executed_passes: Vec<PassKind>,
}

impl RendererStatistics {
    pub fn executed(&self, pass: PassKind) -> bool {
        self.executed_passes.contains(&pass)
    }
}

/// Device-lifetime state: the backend, compiled pipelines and the resource
/// tables. Created once with the renderer and torn down with it.
pub struct RendererContext<B: GraphicsBackend> {
    pub backend: B,
    pub pipelines: PipelineSet,
    pub meshes: MeshCache,
    pub textures: TextureCache,
}

impl<B: GraphicsBackend> RendererContext<B> {
    pub fn new(mut backend: B) -> RenderResult<Self> {
        let pipelines = PipelineSet::create(&mut backend)?;
        Ok(Self {
            backend,
            pipelines,
            meshes: MeshCache::new(),
            textures: TextureCache::new(),
        })
    }

    /// Release every mesh and cached texture
    pub fn shutdown(&mut self) {
        self.meshes.clear(&mut self.backend);
        self.textures.clear(&mut self.backend);
    }
}

struct FrameInputs {
    camera: CameraData,
    lights: LightData,
}

fn pass_kind(phase: FramePhase) -> Option<PassKind> {
    match phase {
        FramePhase::Shadow => Some(PassKind::Shadow),
        FramePhase::Geometry => Some(PassKind::Geometry),
        FramePhase::Lighting => Some(PassKind::Lighting),
        FramePhase::Bloom => Some(PassKind::Bloom),
        FramePhase::Composite => Some(PassKind::Composite),
        FramePhase::Idle | FramePhase::Recording => None,
    }
}

/// The deferred renderer
pub struct Renderer<B: GraphicsBackend + 'static> {
    context: RendererContext<B>,
    config: RendererConfig,
    passes: Vec<Box<dyn RenderPass<B>>>,
    sequencer: FrameSequencer,
    batch: GeometryBatch,
    environment: Environment,
    settings: SharedPostProcessSettings,
    stats: RendererStatistics,
    frame: Option<FrameInputs>,
}

impl<B: GraphicsBackend + 'static> Renderer<B> {
    /// Create the renderer and compile every pipeline.
    ///
    /// Fails when `backend` is not the device `config.backend` selects or
    /// when any program cannot be built.
    pub fn new(backend: B, config: RendererConfig) -> RenderResult<Self> {
        if backend.backend_type() != config.backend {
            return Err(BackendError::InitializationFailed(format!(
                "configured for {:?} but given the {} device",
                config.backend,
                backend.name()
            ))
            .into());
        }

        let context = RendererContext::new(backend)?;
        let pipelines = context.pipelines;
        let passes: Vec<Box<dyn RenderPass<B>>> = vec![
            Box::new(ShadowPass::new(pipelines.shadow)),
            Box::new(GBufferPass::new(pipelines.gbuffer)),
            Box::new(LightingPass::new(pipelines.lighting).with_shadow_bias(config.shadow_bias)),
            Box::new(BloomPass::new(&pipelines)),
            Box::new(CompositePass::new(&pipelines)),
        ];

        log::info!(
            "Renderer ready on the {} device ({} passes)",
            context.backend.name(),
            passes.len()
        );
        Ok(Self {
            batch: GeometryBatch::new(config.max_draw_commands),
            settings: postprocess::shared(config.post_process),
            environment: Environment::default(),
            context,
            config,
            passes,
            sequencer: FrameSequencer::new(),
            stats: RendererStatistics::default(),
            frame: None,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn context(&self) -> &RendererContext<B> {
        &self.context
    }

    pub fn backend(&self) -> &B {
        &self.context.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.context.backend
    }

    pub fn phase(&self) -> FramePhase {
        self.sequencer.phase()
    }

    // Viewports

    /// Create the render targets for a `width` x `height` viewport
    pub fn create_viewport(&mut self, width: u32, height: u32) -> RenderResult<RenderGraphData> {
        let desc = RenderGraphDesc {
            bloom_levels: self.config.bloom_levels,
            shadow_map_size: self.config.shadow_map_size,
        };
        RenderGraphData::new(&mut self.context.backend, width, height, desc)
    }

    pub fn destroy_viewport(&mut self, graph: RenderGraphData) {
        graph.destroy(&mut self.context.backend);
    }

    // Resources

    pub fn upload_mesh(&mut self, mesh: &Mesh) -> RenderResult<MeshHandle> {
        Ok(self.context.meshes.upload(&mut self.context.backend, mesh)?)
    }

    /// Destroy a mesh. Draws still referencing it are skipped.
    pub fn destroy_mesh(&mut self, mesh: MeshHandle) -> bool {
        self.context.meshes.remove(&mut self.context.backend, mesh)
    }

    /// Load a texture through the path-keyed cache, sharing it with earlier
    /// loads of the same normalized path.
    pub fn load_texture<F>(&mut self, path: &str, loader: F) -> RenderResult<TextureHandle>
    where
        F: FnOnce(&str) -> Result<TextureData, String>,
    {
        Ok(self
            .context
            .textures
            .acquire(&mut self.context.backend, path, loader)?)
    }

    pub fn release_texture(&mut self, texture: TextureHandle) -> bool {
        self.context.textures.release(&mut self.context.backend, texture)
    }

    /// Ambient light and irradiance used when the frame's lights carry none
    pub fn set_environment(
        &mut self,
        ambient_color: Vec3,
        ambient_intensity: f32,
        irradiance: Option<TextureHandle>,
    ) {
        self.environment = Environment {
            ambient_color,
            ambient_intensity: ambient_intensity.max(0.0),
            irradiance,
        };
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    // Frame

    /// Start recording a frame
    pub fn begin_frame(&mut self, camera: CameraData, lights: LightData) -> RenderResult<()> {
        if self.sequencer.phase() != FramePhase::Idle {
            return Err(RenderError::FrameAlreadyStarted);
        }
        self.sequencer.advance(FramePhase::Recording)?;
        self.stats = RendererStatistics::default();
        self.batch.clear();
        self.frame = Some(FrameInputs { camera, lights });
        Ok(())
    }

    /// Pre-allocate room for `count` draws, never beyond
    /// [`RendererConfig::max_draw_commands`].
    pub fn reserve(&mut self, count: usize) {
        self.batch.reserve(count);
    }

    /// Draws recorded so far this frame
    pub fn batch(&self) -> &GeometryBatch {
        &self.batch
    }

    /// Queue a mesh draw. Returns false when the draw was not recorded.
    pub fn submit(
        &mut self,
        transform: Mat4,
        mesh: MeshHandle,
        material: &Material,
        cull_mode: CullMode,
    ) -> bool {
        self.submit_with_id(0, transform, mesh, material, cull_mode)
    }

    /// Queue a mesh draw that writes `entity_id` to the picking target
    pub fn submit_with_id(
        &mut self,
        entity_id: u32,
        transform: Mat4,
        mesh: MeshHandle,
        material: &Material,
        cull_mode: CullMode,
    ) -> bool {
        if self.sequencer.phase() != FramePhase::Recording {
            log::warn!("Draw submitted outside of a frame, ignoring it");
            return false;
        }
        let command = MeshDrawCommand::new(transform, mesh, material, cull_mode).with_entity_id(entity_id);
        self.batch.submit(command)
    }

    /// Run the pass sequence and return the presentable image.
    ///
    /// A pending resize of `graph` is applied first. If it fails the frame is
    /// aborted with [`RenderError::ResizeFailed`], the previous targets stay
    /// valid and the resize is retried next frame.
    pub fn end_frame(&mut self, graph: &mut RenderGraphData) -> RenderResult<TextureHandle> {
        if self.sequencer.phase() != FramePhase::Recording {
            return Err(RenderError::FrameNotStarted);
        }
        let Some(inputs) = self.frame.take() else {
            return Err(RenderError::FrameNotStarted);
        };

        let result = self.run_passes(graph, &inputs);
        self.batch.clear();
        match result {
            Ok(()) => {
                log::debug!(
                    "Frame done: {} draws, {} indices, passes {:?}",
                    self.stats.draw_calls,
                    self.stats.index_count,
                    self.stats.executed_passes
                );
                Ok(graph.output())
            }
            Err(err) => {
                self.sequencer.reset();
                Err(err)
            }
        }
    }

    fn run_passes(&mut self, graph: &mut RenderGraphData, inputs: &FrameInputs) -> RenderResult<()> {
        let settings = self.settings.read().sanitized();
        self.stats.dropped_draws = self.batch.dropped();

        // Resize before any pass touches the targets
        graph.apply_pending_resize(&mut self.context.backend)?;

        let mut frame = FrameContext {
            camera: &inputs.camera,
            lights: &inputs.lights,
            environment: &self.environment,
            settings: &settings,
            batch: &mut self.batch,
            meshes: &self.context.meshes,
            clear_color: self.config.clear_color,
            stats: &mut self.stats,
            shadow_view_projection: None,
            bloom_texture: None,
        };

        for pass in self.passes.iter_mut() {
            self.sequencer.advance(pass.phase())?;
            let mark = frame.stats.executed_passes.len();
            if pass.execute(&mut self.context.backend, graph, &mut frame)? {
                if let Some(kind) = pass_kind(pass.phase()) {
                    frame.stats.executed_passes.insert(mark, kind);
                }
            } else {
                log::trace!("{} skipped", pass.name());
            }
        }

        self.context.backend.flush()?;
        self.sequencer.advance(FramePhase::Idle)?;
        Ok(())
    }

    pub fn statistics(&self) -> &RendererStatistics {
        &self.stats
    }

    /// Entity id under pixel (`x`, `y`) of the last frame, `None` for
    /// background. Blocks on a readback.
    pub fn pick(&mut self, graph: &RenderGraphData, x: u32, y: u32) -> RenderResult<Option<u32>> {
        let texel = self
            .context
            .backend
            .read_pixel(graph.entity_id_target(), x, y)?;
        let id = texel.x.max(0.0).round() as u32;
        Ok((id != 0).then_some(id))
    }

    // Post-processing

    /// Settings shared with the editor. Changes apply from the next frame.
    pub fn post_process(&self) -> SharedPostProcessSettings {
        self.settings.clone()
    }

    pub fn post_process_settings(&self) -> PostProcessSettings {
        *self.settings.read()
    }

    pub fn set_post_process(&self, settings: PostProcessSettings) {
        *self.settings.write() = settings;
    }

    pub fn tonemap(&self) -> TonemapCurve {
        self.settings.read().tonemap
    }

    pub fn set_tonemap(&self, tonemap: TonemapCurve) {
        self.settings.write().tonemap = tonemap;
    }

    pub fn exposure(&self) -> f32 {
        self.settings.read().exposure
    }

    pub fn set_exposure(&self, exposure: f32) {
        self.settings.write().exposure = exposure;
    }

    pub fn set_bloom_enabled(&self, enabled: bool) {
        self.settings.write().bloom.enabled = enabled;
    }

    pub fn set_bloom_strength(&self, strength: f32) {
        self.settings.write().bloom.strength = strength;
    }

    pub fn set_bloom_threshold(&self, threshold: f32, knee: f32) {
        let mut settings = self.settings.write();
        settings.bloom.threshold = threshold;
        settings.bloom.knee = knee;
    }

    pub fn set_bloom_clamp(&self, clamp: f32) {
        self.settings.write().bloom.clamp = clamp;
    }

    pub fn set_fxaa_enabled(&self, enabled: bool) {
        self.settings.write().fxaa.enabled = enabled;
    }

    pub fn set_fxaa_thresholds(&self, current: f32, relative: f32) {
        let mut settings = self.settings.write();
        settings.fxaa.current_threshold = current;
        settings.fxaa.relative_threshold = relative;
    }

    pub fn set_vignette(&self, color: Vec3, offset: f32, intensity: f32) {
        let mut settings = self.settings.write();
        settings.vignette.color = color;
        settings.vignette.offset = offset;
        settings.vignette.intensity = intensity;
    }

    pub fn set_vignette_mask(&self, mask: Option<TextureHandle>) {
        self.settings.write().vignette.mask = mask;
    }

    pub fn clear_color(&self) -> Vec4 {
        self.config.clear_color
    }

    pub fn set_clear_color(&mut self, color: Vec4) {
        self.config.clear_color = color;
    }

    /// Release every resource the renderer owns and return the device
    pub fn shutdown(mut self) -> B {
        self.context.shutdown();
        log::info!("Renderer shut down");
        self.context.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SoftwareBackend;
    use crate::scene::Projection;

    fn renderer() -> Renderer<SoftwareBackend> {
        let config = RendererConfig::default()
            .with_bloom_levels(2)
            .with_shadow_map_size(8);
        Renderer::new(SoftwareBackend::new(), config).unwrap()
    }

    fn camera() -> CameraData {
        let projection = Projection::perspective(60.0, 1.0, 0.1, 100.0);
        CameraData::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, &projection)
    }

    #[test]
    fn test_frame_calls_must_pair() {
        let mut renderer = renderer();
        let mut graph = renderer.create_viewport(8, 8).unwrap();

        assert!(matches!(
            renderer.end_frame(&mut graph),
            Err(RenderError::FrameNotStarted)
        ));
        renderer.begin_frame(camera(), LightData::new()).unwrap();
        assert!(matches!(
            renderer.begin_frame(camera(), LightData::new()),
            Err(RenderError::FrameAlreadyStarted)
        ));
        renderer.end_frame(&mut graph).unwrap();
        assert_eq!(renderer.phase(), FramePhase::Idle);
    }

    #[test]
    fn test_submissions_outside_a_frame_are_ignored() {
        let mut renderer = renderer();
        let mesh = renderer.upload_mesh(&Mesh::cube()).unwrap();
        assert!(!renderer.submit(Mat4::IDENTITY, mesh, &Material::default(), CullMode::Back));
    }

    #[test]
    fn test_skipped_passes_are_not_reported() {
        let mut renderer = renderer();
        renderer.set_bloom_enabled(false);
        renderer.set_fxaa_enabled(false);
        let mut graph = renderer.create_viewport(8, 8).unwrap();

        renderer.begin_frame(camera(), LightData::new()).unwrap();
        renderer.end_frame(&mut graph).unwrap();
        assert_eq!(
            renderer.statistics().executed_passes,
            vec![PassKind::Geometry, PassKind::Lighting, PassKind::Composite]
        );
    }

    #[test]
    fn test_fxaa_is_reported_after_composite() {
        let mut renderer = renderer();
        let mut graph = renderer.create_viewport(8, 8).unwrap();

        renderer.begin_frame(camera(), LightData::new()).unwrap();
        renderer.end_frame(&mut graph).unwrap();
        let passes = &renderer.statistics().executed_passes;
        assert_eq!(&passes[passes.len() - 2..], &[PassKind::Composite, PassKind::Fxaa]);
    }

    #[test]
    fn test_mismatched_backend_type_is_rejected() {
        let config = RendererConfig::default().with_backend(crate::BackendType::Wgpu);
        assert!(matches!(
            Renderer::new(SoftwareBackend::new(), config),
            Err(RenderError::Backend(BackendError::InitializationFailed(_)))
        ));
    }

    #[test]
    fn test_shutdown_releases_resources() {
        let mut renderer = renderer();
        renderer.upload_mesh(&Mesh::cube()).unwrap();
        renderer
            .load_texture("a.png", |_| Ok(TextureData::white()))
            .unwrap();
        let backend = renderer.shutdown();
        assert_eq!(backend.live_geometry_count(), 0);
        assert_eq!(backend.live_texture_count(), 0);
    }
}
