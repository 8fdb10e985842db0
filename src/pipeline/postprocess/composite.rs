//! Composite pass: bloom, exposure, tonemapping and vignette, then FXAA
//!
//! With FXAA enabled the graded image goes to the intermediate `post`
//! target and FXAA writes the display target; otherwise grading writes the
//! display target directly.

use super::{fullscreen_pass, fxaa};
use crate::backend::{GraphicsBackend, PipelineHandle};
use crate::error::RenderResult;
use crate::pipeline::{FrameContext, FramePhase, PassKind, PipelineSet, RenderPass};
use crate::render_graph::RenderGraphData;
use crate::uniforms::{texture_slot::composite as slots, CompositeUniform};

use super::PostProcessSettings;

/// Composite uniform block for `settings`
pub fn composite_uniform(settings: &PostProcessSettings, bloom: bool, mask: bool) -> CompositeUniform {
    CompositeUniform {
        grading: glam::Vec4::new(
            settings.exposure,
            settings.bloom.strength,
            settings.bloom.clamp,
            settings.vignette.intensity,
        ),
        vignette: settings.vignette.color.extend(settings.vignette.offset),
        flags: [settings.tonemap.index(), bloom as u32, mask as u32, 0],
    }
}

/// Tonemapping and final composite pass
pub struct CompositePass {
    composite: PipelineHandle,
    fxaa: PipelineHandle,
}

impl CompositePass {
    pub fn new(pipelines: &PipelineSet) -> Self {
        Self {
            composite: pipelines.composite,
            fxaa: pipelines.fxaa,
        }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for CompositePass {
    fn name(&self) -> &'static str {
        "Composite"
    }

    fn phase(&self) -> FramePhase {
        FramePhase::Composite
    }

    fn execute(
        &mut self,
        backend: &mut B,
        graph: &RenderGraphData,
        frame: &mut FrameContext<'_>,
    ) -> RenderResult<bool> {
        let settings = frame.settings;
        let targets = graph.targets();
        let use_fxaa = settings.fxaa.enabled;
        let target = if use_fxaa {
            &targets.post
        } else {
            &targets.composite
        };

        // The mask flag has to be known before the uniform block is built.
        let mask = settings.vignette.mask.filter(|_| settings.vignette.intensity > 0.0);
        let mask_bound = match mask {
            Some(texture) if backend.texture_size(texture).is_some() => true,
            Some(texture) => {
                log::warn!("Vignette mask {texture:?} no longer exists, ignoring it");
                false
            }
            None => false,
        };
        let block = composite_uniform(settings, frame.bloom_texture.is_some(), mask_bound);

        fullscreen_pass(
            backend,
            target,
            self.composite,
            &[
                (slots::HDR, Some(targets.lighting.color[0])),
                (slots::BLOOM, frame.bloom_texture),
                (slots::VIGNETTE_MASK, mask.filter(|_| mask_bound)),
            ],
            bytemuck::bytes_of(&block),
        )?;

        if use_fxaa {
            fxaa::apply(backend, self.fxaa, &targets.post, &targets.composite, &settings.fxaa)?;
            frame.stats.executed_passes.push(PassKind::Fxaa);
        }
        Ok(true)
    }
}

/// Bloom, exposure, tonemap curve and vignette
pub const COMPOSITE_SHADER: &str = r#"
// Composite shader: bloom + exposure + tonemapping + vignette

struct CompositeParams {
    // x = exposure, y = bloom strength, z = bloom clamp, w = vignette intensity
    grading: vec4<f32>,
    // xyz = vignette color, w = vignette offset
    vignette: vec4<f32>,
    // x = tonemap curve, y = bloom bound, z = mask bound
    flags: vec4<u32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

const HABLE_A: f32 = 0.15;
const HABLE_B: f32 = 0.50;
const HABLE_C: f32 = 0.10;
const HABLE_D: f32 = 0.20;
const HABLE_E: f32 = 0.02;
const HABLE_F: f32 = 0.30;
const HABLE_WHITE: f32 = 11.2;
const HABLE_EXPOSURE_BIAS: f32 = 2.0;
const MAX_VIGNETTE_OFFSET: f32 = 0.999;

@group(0) @binding(4) var<uniform> params: CompositeParams;
@group(1) @binding(0) var hdr_texture: texture_2d<f32>;
@group(1) @binding(1) var bloom_texture: texture_2d<f32>;
@group(1) @binding(2) var vignette_mask: texture_2d<f32>;
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

const HDR_MAX: f32 = 65504.0;

fn sanitize(c: vec3<f32>) -> vec3<f32> {
    let clean = select(c, vec3<f32>(0.0), c != c);
    return clamp(clean, vec3<f32>(0.0), vec3<f32>(HDR_MAX));
}

fn aces_tonemap(x: vec3<f32>) -> vec3<f32> {
    let a = 2.51;
    let b = 0.03;
    let c = 2.43;
    let d = 0.59;
    let e = 0.14;
    return clamp((x * (a * x + b)) / (x * (c * x + d) + e), vec3<f32>(0.0), vec3<f32>(1.0));
}

fn filmic_tonemap(color: vec3<f32>) -> vec3<f32> {
    let x = max(color - vec3<f32>(0.004), vec3<f32>(0.0));
    let curve = (x * (6.2 * x + 0.5)) / (x * (6.2 * x + 1.7) + 0.06);
    return min(pow(curve, vec3<f32>(2.2)), vec3<f32>(1.0));
}

fn hable_partial(x: f32) -> f32 {
    return ((x * (HABLE_A * x + HABLE_C * HABLE_B) + HABLE_D * HABLE_E)
        / (x * (HABLE_A * x + HABLE_B) + HABLE_D * HABLE_F))
        - HABLE_E / HABLE_F;
}

fn hable(x: f32) -> f32 {
    return hable_partial(x) - hable_partial(0.0);
}

fn uncharted_channel(c: f32) -> f32 {
    let white_scale = 1.0 / hable(HABLE_WHITE);
    return min(hable(max(c, 0.0) * HABLE_EXPOSURE_BIAS) * white_scale, 1.0);
}

fn uncharted_tonemap(color: vec3<f32>) -> vec3<f32> {
    return vec3<f32>(uncharted_channel(color.r), uncharted_channel(color.g), uncharted_channel(color.b));
}

fn vignette_falloff(uv: vec2<f32>, offset_in: f32, mask: f32) -> f32 {
    let distance = length(uv - vec2<f32>(0.5)) * 1.41421356;
    let offset = clamp(offset_in, 0.0, MAX_VIGNETTE_OFFSET);
    let t = clamp((distance - offset) / (1.0 - offset), 0.0, 1.0);
    return t * t * (3.0 - 2.0 * t) * mask;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.uv;
    var color = sanitize(textureSampleLevel(hdr_texture, clamp_sampler, uv, 0.0).rgb);
    let bloom = sanitize(textureSampleLevel(bloom_texture, clamp_sampler, uv, 0.0).rgb);
    let mask_sample = textureSampleLevel(vignette_mask, clamp_sampler, uv, 0.0).r;

    if (params.flags.y != 0u) {
        color = color + min(bloom, vec3<f32>(max(params.grading.z, 0.0))) * params.grading.y;
    }
    color = color * params.grading.x;

    var mapped: vec3<f32>;
    switch params.flags.x {
        case 1u: { mapped = aces_tonemap(color); }
        case 2u: { mapped = filmic_tonemap(color); }
        case 3u: { mapped = uncharted_tonemap(color); }
        default: { mapped = color; }
    }

    var mask = 1.0;
    if (params.flags.z != 0u) {
        mask = mask_sample;
    }
    let amount = clamp(params.grading.w * vignette_falloff(uv, params.vignette.w, mask), 0.0, 1.0);
    mapped = mapped * mix(vec3<f32>(1.0), params.vignette.rgb, amount);

    return vec4<f32>(mapped, 1.0);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shading::TonemapCurve;
    use glam::Vec3;

    #[test]
    fn test_uniform_carries_settings() {
        let mut settings = PostProcessSettings::default().with_tonemap(TonemapCurve::Uncharted);
        settings.exposure = 2.0;
        settings.vignette.color = Vec3::new(0.1, 0.2, 0.3);
        settings.vignette.offset = 0.25;
        let block = composite_uniform(&settings, true, false);
        assert_eq!(block.grading.x, 2.0);
        assert_eq!(block.vignette.w, 0.25);
        assert_eq!(block.flags, [3, 1, 0, 0]);
    }
}
