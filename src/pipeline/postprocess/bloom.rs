//! Bloom post-processing effect
//!
//! Chain, for `N` levels:
//! 1. prefilter: downsample the HDR image to half size and keep bright parts
//! 2. for each level: downsample to the next half size, then blur it with a
//!    horizontal pass into the scratch target and a vertical pass back
//! 3. walk back up: tent-upsample the coarser result and add the finer level
//!
//! The result is `upsample[0]`, at prefilter resolution.

use glam::{Vec2, Vec4};

use super::{fullscreen_pass, texel_size};
use crate::backend::{GraphicsBackend, PipelineHandle};
use crate::error::RenderResult;
use crate::pipeline::{FrameContext, FramePhase, PipelineSet, RenderPass};
use crate::render_graph::RenderGraphData;
use crate::uniforms::{texture_slot::bloom as slots, BloomUniform};

/// Bloom post-processing pass
pub struct BloomPass {
    prefilter: PipelineHandle,
    downsample: PipelineHandle,
    blur: PipelineHandle,
    upsample: PipelineHandle,
}

impl BloomPass {
    pub fn new(pipelines: &PipelineSet) -> Self {
        Self {
            prefilter: pipelines.bloom_prefilter,
            downsample: pipelines.bloom_downsample,
            blur: pipelines.bloom_blur,
            upsample: pipelines.bloom_upsample,
        }
    }
}

fn params(threshold: f32, knee: f32, texel: Vec2, direction: Vec2) -> BloomUniform {
    BloomUniform {
        params: Vec4::new(threshold, knee, 0.0, 0.0),
        texel: Vec4::new(texel.x, texel.y, direction.x, direction.y),
    }
}

impl<B: GraphicsBackend> RenderPass<B> for BloomPass {
    fn name(&self) -> &'static str {
        "Bloom"
    }

    fn phase(&self) -> FramePhase {
        FramePhase::Bloom
    }

    fn execute(
        &mut self,
        backend: &mut B,
        graph: &RenderGraphData,
        frame: &mut FrameContext<'_>,
    ) -> RenderResult<bool> {
        let settings = &frame.settings.bloom;
        if !frame.settings.bloom_active() {
            return Ok(false);
        }
        let (threshold, knee) = (settings.threshold, settings.knee);
        let targets = graph.targets();
        let levels = targets.downsample.len();

        let hdr = &targets.lighting;
        let block = params(threshold, knee, texel_size(hdr), Vec2::ZERO);
        fullscreen_pass(
            backend,
            &targets.prefilter,
            self.prefilter,
            &[(slots::SOURCE, Some(hdr.color[0]))],
            bytemuck::bytes_of(&block),
        )?;

        for i in 0..levels {
            let source = if i == 0 {
                &targets.prefilter
            } else {
                &targets.downsample[i - 1]
            };
            let level = &targets.downsample[i];
            let temp = &targets.blur_temp[i];

            let block = params(threshold, knee, texel_size(source), Vec2::ZERO);
            fullscreen_pass(
                backend,
                level,
                self.downsample,
                &[(slots::SOURCE, Some(source.color[0]))],
                bytemuck::bytes_of(&block),
            )?;

            let block = params(threshold, knee, texel_size(level), Vec2::X);
            fullscreen_pass(
                backend,
                temp,
                self.blur,
                &[(slots::SOURCE, Some(level.color[0]))],
                bytemuck::bytes_of(&block),
            )?;

            let block = params(threshold, knee, texel_size(temp), Vec2::Y);
            fullscreen_pass(
                backend,
                level,
                self.blur,
                &[(slots::SOURCE, Some(temp.color[0]))],
                bytemuck::bytes_of(&block),
            )?;
        }

        for i in (0..levels).rev() {
            let source = if i + 1 == levels {
                &targets.downsample[i]
            } else {
                &targets.upsample[i + 1]
            };
            let base = if i == 0 {
                &targets.prefilter
            } else {
                &targets.downsample[i - 1]
            };

            let block = params(threshold, knee, texel_size(source), Vec2::ZERO);
            fullscreen_pass(
                backend,
                &targets.upsample[i],
                self.upsample,
                &[
                    (slots::SOURCE, Some(source.color[0])),
                    (slots::BASE, Some(base.color[0])),
                ],
                bytemuck::bytes_of(&block),
            )?;
        }

        frame.bloom_texture = Some(graph.bloom_output());
        log::trace!("Bloom chain ran over {levels} levels");
        Ok(true)
    }
}

/// Downsample with soft-knee threshold, writes the top of the chain
pub const BLOOM_PREFILTER_SHADER: &str = r#"
// Bloom prefilter shader

struct BloomParams {
    // x = threshold, y = knee
    params: vec4<f32>,
    // xy = source texel size, zw = blur direction
    texel: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(4) var<uniform> bloom: BloomParams;
@group(1) @binding(0) var source_texture: texture_2d<f32>;
@group(1) @binding(16) var clamp_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

fn sample_source(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(source_texture, clamp_sampler, uv, 0.0).rgb;
}

fn downsample(uv: vec2<f32>, texel: vec2<f32>) -> vec3<f32> {
    let half_texel = texel * 0.5;
    var sum = sample_source(uv) * 4.0;
    sum = sum + sample_source(uv - half_texel);
    sum = sum + sample_source(uv + half_texel);
    sum = sum + sample_source(uv + vec2<f32>(half_texel.x, -half_texel.y));
    sum = sum + sample_source(uv - vec2<f32>(half_texel.x, -half_texel.y));
    return sum / 8.0;
}

fn prefilter(color: vec3<f32>, threshold: f32, knee_in: f32) -> vec3<f32> {
    let brightness = max(color.r, max(color.g, color.b));
    let knee = max(knee_in, 0.0);
    var soft = clamp(brightness - threshold + knee, 0.0, 2.0 * knee);
    soft = soft * soft / (4.0 * knee + 1e-4);
    let contribution = max(soft, brightness - threshold) / max(brightness, 1e-4);
    return color * max(contribution, 0.0);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let color = downsample(input.uv, bloom.texel.xy);
    return vec4<f32>(min(prefilter(color, bloom.params.x, bloom.params.y), vec3<f32>(65504.0)), 1.0);
}
"#;

/// Dual-filter downsample to the next bloom level
pub const BLOOM_DOWNSAMPLE_SHADER: &str = r#"
// Bloom downsample shader

struct BloomParams {
    params: vec4<f32>,
    texel: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(4) var<uniform> bloom: BloomParams;
@group(1) @binding(0) var source_texture: texture_2d<f32>;
@group(1) @binding(16) var clamp_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

fn sample_source(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(source_texture, clamp_sampler, uv, 0.0).rgb;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.uv;
    let half_texel = bloom.texel.xy * 0.5;
    var sum = sample_source(uv) * 4.0;
    sum = sum + sample_source(uv - half_texel);
    sum = sum + sample_source(uv + half_texel);
    sum = sum + sample_source(uv + vec2<f32>(half_texel.x, -half_texel.y));
    sum = sum + sample_source(uv - vec2<f32>(half_texel.x, -half_texel.y));
    return vec4<f32>(min(sum / 8.0, vec3<f32>(65504.0)), 1.0);
}
"#;

/// One direction of the separable 9-tap Gaussian
pub const BLOOM_BLUR_SHADER: &str = r#"
// Bloom separable blur shader

struct BloomParams {
    params: vec4<f32>,
    texel: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(4) var<uniform> bloom: BloomParams;
@group(1) @binding(0) var source_texture: texture_2d<f32>;
@group(1) @binding(16) var clamp_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

fn sample_source(uv: vec2<f32>) -> vec3<f32> {
    return textureSampleLevel(source_texture, clamp_sampler, uv, 0.0).rgb;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var weights = array<f32, 5>(0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216);
    let step = bloom.texel.xy * bloom.texel.zw;
    var sum = sample_source(input.uv) * weights[0];
    for (var i = 1; i < 5; i = i + 1) {
        let offset = step * f32(i);
        sum = sum + sample_source(input.uv + offset) * weights[i];
        sum = sum + sample_source(input.uv - offset) * weights[i];
    }
    return vec4<f32>(min(sum, vec3<f32>(65504.0)), 1.0);
}
"#;

/// Tent-filtered upsample of the coarser level plus the finer level
pub const BLOOM_UPSAMPLE_SHADER: &str = r#"
// Bloom upsample shader

struct BloomParams {
    params: vec4<f32>,
    texel: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(4) var<uniform> bloom: BloomParams;
@group(1) @binding(0) var source_texture: texture_2d<f32>;
@group(1) @binding(1) var base_texture: texture_2d<f32>;
@group(1) @binding(16) var clamp_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let texel = bloom.texel.xy;
    var sum = vec3<f32>(0.0);
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            var weight = 1.0;
            if (dx == 0 && dy == 0) {
                weight = 4.0;
            } else if (dx == 0 || dy == 0) {
                weight = 2.0;
            }
            let uv = input.uv + texel * vec2<f32>(f32(dx), f32(dy));
            sum = sum + textureSampleLevel(source_texture, clamp_sampler, uv, 0.0).rgb * weight;
        }
    }
    let base = textureSampleLevel(base_texture, clamp_sampler, input.uv, 0.0).rgb;
    return vec4<f32>(min(sum / 16.0 + base, vec3<f32>(65504.0)), 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendResult, SoftwareBackend, TextureHandle};
    use crate::pipeline::{GeometryBatch, PostProcessSettings};
    use crate::render_graph::RenderGraphDesc;
    use crate::renderer::RendererStatistics;
    use crate::resources::MeshCache;
    use crate::scene::{CameraData, Environment, LightData};
    use half::f16;

    fn fill_hdr(backend: &mut SoftwareBackend, texture: TextureHandle, value: f32) -> BackendResult<()> {
        let (w, h) = backend.texture_size(texture).unwrap_or((0, 0));
        let channel = f16::from_f32(value).to_le_bytes();
        let data: Vec<u8> = std::iter::repeat(channel)
            .take((w * h * 4) as usize)
            .flatten()
            .collect();
        backend.write_texture(texture, &data)
    }

    fn run(settings: PostProcessSettings, hdr_value: f32) -> (SoftwareBackend, RenderGraphData, bool, Option<TextureHandle>) {
        let mut backend = SoftwareBackend::new();
        let pipelines = PipelineSet::create(&mut backend).unwrap();
        let desc = RenderGraphDesc {
            bloom_levels: 3,
            shadow_map_size: 4,
        };
        let graph = RenderGraphData::new(&mut backend, 32, 32, desc).unwrap();
        fill_hdr(&mut backend, graph.targets().lighting.color[0], hdr_value).unwrap();

        let camera = CameraData::default();
        let lights = LightData::new();
        let environment = Environment::default();
        let mut batch = GeometryBatch::new(1);
        let meshes = MeshCache::new();
        let mut stats = RendererStatistics::default();
        let mut frame = FrameContext {
            camera: &camera,
            lights: &lights,
            environment: &environment,
            settings: &settings,
            batch: &mut batch,
            meshes: &meshes,
            clear_color: Vec4::ZERO,
            stats: &mut stats,
            shadow_view_projection: None,
            bloom_texture: None,
        };
        let mut pass = BloomPass::new(&pipelines);
        let ran = pass.execute(&mut backend, &graph, &mut frame).unwrap();
        let bloom = frame.bloom_texture;
        (backend, graph, ran, bloom)
    }

    #[test]
    fn test_disabled_or_zero_strength_skips_everything() {
        let mut settings = PostProcessSettings::default();
        settings.bloom.strength = 0.0;
        let (_, _, ran, bloom) = run(settings, 4.0);
        assert!(!ran);
        assert!(bloom.is_none());

        let settings = PostProcessSettings::default().with_bloom(false);
        let (_, _, ran, _) = run(settings, 4.0);
        assert!(!ran);
    }

    #[test]
    fn test_uniform_bright_image_blooms() {
        let mut settings = PostProcessSettings::default();
        settings.bloom.threshold = 1.0;
        settings.bloom.knee = 0.0;
        let (mut backend, graph, ran, bloom) = run(settings, 3.0);
        assert!(ran);
        assert_eq!(bloom, Some(graph.bloom_output()));

        // A flat input stays flat through every filter: prefilter leaves 2.0,
        // and each upsample adds one more level of it.
        let levels = graph.bloom_levels() as f32;
        let center = backend.read_pixel(graph.bloom_output(), 8, 8).unwrap();
        let expected = 2.0 * (levels + 1.0);
        assert!((center.x - expected).abs() < 0.05 * expected, "{center:?}");
    }

    #[test]
    fn test_dark_image_produces_no_bloom() {
        let (mut backend, graph, ran, _) = run(PostProcessSettings::default(), 0.25);
        assert!(ran);
        let center = backend.read_pixel(graph.bloom_output(), 8, 8).unwrap();
        assert!(center.x.abs() < 1e-3, "{center:?}");
    }

    #[test]
    fn test_blur_kernel_validates_and_matches_cpu_weights() {
        if let Err(err) = crate::shaders::validate_program(crate::backend::ShaderProgram::BloomBlur) {
            panic!("{err}");
        }
        let start = BLOOM_BLUR_SHADER.find("array<f32, 5>(").unwrap() + "array<f32, 5>(".len();
        let end = start + BLOOM_BLUR_SHADER[start..].find(')').unwrap();
        let weights: Vec<f32> = BLOOM_BLUR_SHADER[start..end]
            .split(',')
            .map(|w| w.trim().parse().unwrap())
            .collect();
        assert_eq!(weights.len(), crate::shading::bloom::GAUSSIAN_WEIGHTS.len());
        for (gpu, cpu) in weights.iter().zip(crate::shading::bloom::GAUSSIAN_WEIGHTS) {
            assert!((gpu - cpu).abs() < 1e-6);
        }
    }
}
