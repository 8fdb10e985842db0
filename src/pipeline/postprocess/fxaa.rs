//! FXAA step of the composite pass

use glam::Vec4;

use super::{fullscreen_pass, texel_size, FxaaSettings};
use crate::backend::{BackendResult, GraphicsBackend, PipelineHandle};
use crate::render_graph::Framebuffer;
use crate::uniforms::{texture_slot, FxaaUniform};

pub fn uniform(source: &Framebuffer, settings: &FxaaSettings) -> FxaaUniform {
    let texel = texel_size(source);
    let thresholds = settings.thresholds();
    FxaaUniform {
        params: Vec4::new(texel.x, texel.y, thresholds.current, thresholds.relative),
    }
}

/// Anti-alias `source` into `target`
pub fn apply<B: GraphicsBackend>(
    backend: &mut B,
    pipeline: PipelineHandle,
    source: &Framebuffer,
    target: &Framebuffer,
    settings: &FxaaSettings,
) -> BackendResult<()> {
    let block = uniform(source, settings);
    fullscreen_pass(
        backend,
        target,
        pipeline,
        &[(texture_slot::fxaa::SOURCE, Some(source.color[0]))],
        bytemuck::bytes_of(&block),
    )
}

/// Console FXAA with configurable edge thresholds
pub const FXAA_SHADER: &str = r#"
// FXAA shader

const REDUCE_MUL: f32 = 0.125;
const REDUCE_MIN: f32 = 0.0078125;
const SPAN_MAX: f32 = 8.0;

struct FxaaParams {
    // xy = texel size, z = absolute threshold, w = relative threshold
    params: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(4) var<uniform> fxaa: FxaaParams;
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

fn luma(color: vec3<f32>) -> f32 {
    return dot(color, vec3<f32>(0.299, 0.587, 0.114));
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let uv = input.uv;
    let texel = fxaa.params.xy;
    let half_texel = texel * 0.5;

    let rgb_m = sample_source(uv);
    let luma_m = luma(rgb_m);
    let luma_nw = luma(sample_source(uv + vec2<f32>(-half_texel.x, -half_texel.y)));
    let luma_ne = luma(sample_source(uv + vec2<f32>(half_texel.x, -half_texel.y)));
    let luma_sw = luma(sample_source(uv + vec2<f32>(-half_texel.x, half_texel.y)));
    let luma_se = luma(sample_source(uv + vec2<f32>(half_texel.x, half_texel.y)));

    let luma_min = min(luma_m, min(min(luma_nw, luma_ne), min(luma_sw, luma_se)));
    let luma_max = max(luma_m, max(max(luma_nw, luma_ne), max(luma_sw, luma_se)));
    let range = luma_max - luma_min;
    if (range < max(fxaa.params.z, luma_max * fxaa.params.w)) {
        return vec4<f32>(rgb_m, 1.0);
    }

    var dir = vec2<f32>(
        -((luma_nw + luma_ne) - (luma_sw + luma_se)),
        (luma_nw + luma_sw) - (luma_ne + luma_se),
    );
    let dir_reduce = max((luma_nw + luma_ne + luma_sw + luma_se) * 0.25 * REDUCE_MUL, REDUCE_MIN);
    let rcp_dir_min = 1.0 / (min(abs(dir.x), abs(dir.y)) + dir_reduce);
    dir = clamp(dir * rcp_dir_min, vec2<f32>(-SPAN_MAX), vec2<f32>(SPAN_MAX)) * texel;

    let rgb_a = (sample_source(uv + dir * (1.0 / 3.0 - 0.5)) + sample_source(uv + dir * (2.0 / 3.0 - 0.5))) * 0.5;
    let rgb_b = rgb_a * 0.5 + (sample_source(uv - dir * 0.5) + sample_source(uv + dir * 0.5)) * 0.25;
    let luma_b = luma(rgb_b);
    if (luma_b < luma_min || luma_b > luma_max) {
        return vec4<f32>(rgb_a, 1.0);
    }
    return vec4<f32>(rgb_b, 1.0);
}
"#;
