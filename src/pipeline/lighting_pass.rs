//! Deferred lighting pass
//!
//! Performs lighting calculations using G-buffer data.
//! Renders a fullscreen triangle and accumulates every light inside one
//! shader invocation into the HDR target.

use bytemuck::Zeroable;
use glam::{Mat4, Vec4};

use super::{bind_texture_checked, FrameContext, FramePhase, RenderPass};
use crate::backend::{DepthState, GraphicsBackend, PipelineHandle};
use crate::error::RenderResult;
use crate::render_graph::{gbuffer_target, RenderGraphData};
use crate::scene::{Environment, LightData, MAX_NUM_DIR_LIGHTS, MAX_NUM_LIGHTS};
use crate::shading::shadow::{self, ShadowBias};
use crate::uniforms::{
    slot, texture_slot, GpuDirectionalLight, GpuPointLight, LightsUniform,
};

/// Shadow inputs of the light block, present when the shadow pass ran
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowInfo {
    pub view_projection: Mat4,
    pub bias: ShadowBias,
    pub map_size: u32,
}

/// Pack the frame's lights into the uniform block the lighting program reads.
pub fn build_lights_uniform(
    lights: &LightData,
    environment: &Environment,
    shadow: Option<ShadowInfo>,
    clear_color: Vec4,
    irradiance_bound: bool,
) -> LightsUniform {
    let mut block = LightsUniform::zeroed();

    for (gpu, light) in block.directional.iter_mut().zip(&lights.directional) {
        *gpu = GpuDirectionalLight {
            direction: light.direction.extend(0.0),
            color: light.color.extend(light.intensity),
        };
    }
    for (gpu, light) in block.points.iter_mut().zip(&lights.points) {
        *gpu = GpuPointLight {
            position: light.position.extend(1.0),
            color: light.color.extend(light.intensity),
            attenuation: Vec4::new(light.constant, light.linear, light.quadratic, 0.0),
        };
    }

    block.ambient = environment
        .ambient_color
        .extend(environment.ambient_intensity);
    block.clear_color = clear_color;
    if let Some(shadow) = shadow {
        block.shadow_view_projection = shadow.view_projection;
        block.shadow_params = Vec4::new(
            shadow.bias.constant,
            shadow.bias.slope,
            1.0 / shadow.map_size.max(1) as f32,
            shadow.bias.normal_offset
                * shadow::texel_world_size(&shadow.view_projection, shadow.map_size),
        );
    }
    block.counts = [
        lights.directional.len().min(block.directional.len()) as u32,
        lights.points.len().min(block.points.len()) as u32,
        shadow.is_some() as u32,
        irradiance_bound as u32,
    ];
    block
}

/// Deferred lighting pass
pub struct LightingPass {
    pipeline: PipelineHandle,
    shadow_bias: ShadowBias,
}

impl LightingPass {
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self {
            pipeline,
            shadow_bias: ShadowBias::default(),
        }
    }

    pub fn with_shadow_bias(mut self, bias: ShadowBias) -> Self {
        self.shadow_bias = bias;
        self
    }
}

impl<B: GraphicsBackend> RenderPass<B> for LightingPass {
    fn name(&self) -> &'static str {
        "Deferred Lighting Pass"
    }

    fn phase(&self) -> FramePhase {
        FramePhase::Lighting
    }

    fn execute(
        &mut self,
        backend: &mut B,
        graph: &RenderGraphData,
        frame: &mut FrameContext<'_>,
    ) -> RenderResult<bool> {
        let targets = graph.targets();
        let gbuffer = &targets.gbuffer;
        let environment = frame.lights.environment.as_ref().unwrap_or(frame.environment);
        let shadow_map = graph.shadow_map();

        backend.begin_render_pass(&targets.lighting.render_pass(None, None))?;
        backend.set_viewport(targets.lighting.viewport());
        backend.set_pipeline(self.pipeline);
        backend.set_depth_state(DepthState::DISABLED);
        backend.set_blend_state(None);

        use texture_slot::lighting as slots;
        backend.set_texture(slots::ALBEDO, Some(gbuffer.color[gbuffer_target::ALBEDO]));
        backend.set_texture(slots::NORMAL, Some(gbuffer.color[gbuffer_target::NORMAL]));
        backend.set_texture(slots::MATERIAL, Some(gbuffer.color[gbuffer_target::MATERIAL]));
        backend.set_texture(slots::EMISSIVE, Some(gbuffer.color[gbuffer_target::EMISSIVE]));
        backend.set_texture(slots::DEPTH, gbuffer.depth);

        let shadow = frame.shadow_view_projection.map(|view_projection| ShadowInfo {
            view_projection,
            bias: self.shadow_bias,
            map_size: shadow_map.width(),
        });
        backend.set_texture(slots::SHADOW, shadow.and(shadow_map.depth));
        let irradiance_bound =
            bind_texture_checked(backend, slots::IRRADIANCE, environment.irradiance, "irradiance");

        let camera = frame.camera.to_uniform();
        let lights = build_lights_uniform(
            frame.lights,
            environment,
            shadow,
            frame.clear_color,
            irradiance_bound,
        );
        backend.set_uniforms(slot::CAMERA, bytemuck::bytes_of(&camera));
        backend.set_uniforms(slot::LIGHTS, bytemuck::bytes_of(&lights));

        if let Err(err) = backend.draw_fullscreen() {
            let _ = backend.end_render_pass();
            return Err(err.into());
        }
        backend.end_render_pass()?;

        let overflow = frame.lights.overflow();
        if overflow > 0 {
            log::warn!(
                "{} lights past the limit of {} directional and {} point lights ignored",
                overflow,
                MAX_NUM_DIR_LIGHTS,
                MAX_NUM_LIGHTS
            );
        }
        frame.stats.dropped_lights = frame.lights.dropped();
        Ok(true)
    }
}

/// Fullscreen PBR lighting over the G-buffer
pub const LIGHTING_SHADER: &str = r#"
// Deferred lighting shader

const PI: f32 = 3.14159265359;
const TAU: f32 = 6.28318530718;
const MIN_ROUGHNESS: f32 = 0.045;
const MIN_ATTENUATION_DENOMINATOR: f32 = 1e-4;

struct Camera {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    inverse_view_projection: mat4x4<f32>,
    position: vec4<f32>,
}

struct DirectionalLight {
    direction: vec4<f32>,
    color: vec4<f32>,
}

struct PointLight {
    position: vec4<f32>,
    color: vec4<f32>,
    attenuation: vec4<f32>,
}

struct Lights {
    directional: array<DirectionalLight, 4>,
    points: array<PointLight, 16>,
    ambient: vec4<f32>,
    shadow_view_projection: mat4x4<f32>,
    // x = constant bias, y = slope bias, z = texel size
    shadow_params: vec4<f32>,
    clear_color: vec4<f32>,
    // x = directional count, y = point count, z = shadow enabled, w = irradiance bound
    counts: vec4<u32>,
}

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(3) var<uniform> lights: Lights;

@group(1) @binding(0) var gbuffer_albedo: texture_2d<f32>;
@group(1) @binding(1) var gbuffer_normal: texture_2d<f32>;
@group(1) @binding(2) var gbuffer_material: texture_2d<f32>;
@group(1) @binding(3) var gbuffer_emissive: texture_2d<f32>;
@group(1) @binding(4) var gbuffer_depth: texture_depth_2d;
@group(1) @binding(5) var shadow_map: texture_depth_2d;
@group(1) @binding(6) var irradiance_map: texture_2d<f32>;
@group(1) @binding(17) var repeat_sampler: sampler;

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var output: VertexOutput;

    // Generate fullscreen triangle (3 vertices)
    let x = f32((vertex_index << 1u) & 2u);
    let y = f32(vertex_index & 2u);
    output.position = vec4<f32>(x * 2.0 - 1.0, y * 2.0 - 1.0, 0.0, 1.0);
    output.uv = vec2<f32>(x, 1.0 - y);

    return output;
}

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {
    let len2 = dot(v, v);
    if (len2 > 0.0) {
        return v * inverseSqrt(len2);
    }
    return vec3<f32>(0.0);
}

const HDR_MAX: f32 = 65504.0;

fn sanitize(c: vec3<f32>) -> vec3<f32> {
    let clean = select(c, vec3<f32>(0.0), c != c);
    return clamp(clean, vec3<f32>(0.0), vec3<f32>(HDR_MAX));
}

fn decode_octahedral(encoded: vec2<f32>) -> vec3<f32> {
    let f = encoded * 2.0 - 1.0;
    var n = vec3<f32>(f.x, f.y, 1.0 - abs(f.x) - abs(f.y));
    let t = max(-n.z, 0.0);
    n.x = n.x + select(t, -t, n.x >= 0.0);
    n.y = n.y + select(t, -t, n.y >= 0.0);
    return safe_normalize(n);
}

fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let d = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    return a2 / max(PI * d * d, 1e-7);
}

fn geometry_schlick_ggx(n_dot_x: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    return n_dot_x / (n_dot_x * (1.0 - k) + k);
}

fn fresnel_schlick(cos_theta: f32, f0: vec3<f32>) -> vec3<f32> {
    return f0 + (vec3<f32>(1.0) - f0) * pow(clamp(1.0 - cos_theta, 0.0, 1.0), 5.0);
}

fn point_attenuation(attenuation: vec3<f32>, distance: f32) -> f32 {
    let denominator = attenuation.x + attenuation.y * distance + attenuation.z * distance * distance;
    return 1.0 / max(denominator, MIN_ATTENUATION_DENOMINATOR);
}

fn evaluate(
    normal: vec3<f32>,
    albedo: vec3<f32>,
    metallic: f32,
    roughness_in: f32,
    view_dir: vec3<f32>,
    light_dir: vec3<f32>,
    radiance: vec3<f32>,
) -> vec3<f32> {
    let n_dot_l = max(dot(normal, light_dir), 0.0);
    if (n_dot_l <= 0.0) {
        return vec3<f32>(0.0);
    }
    let n_dot_v = max(dot(normal, view_dir), 1e-4);
    let half_dir = safe_normalize(view_dir + light_dir);
    let n_dot_h = max(dot(normal, half_dir), 0.0);
    let h_dot_v = max(dot(half_dir, view_dir), 0.0);

    let roughness = clamp(roughness_in, MIN_ROUGHNESS, 1.0);
    let f0 = mix(vec3<f32>(0.04), albedo, metallic);

    let d = distribution_ggx(n_dot_h, roughness);
    let g = geometry_schlick_ggx(n_dot_v, roughness) * geometry_schlick_ggx(n_dot_l, roughness);
    let f = fresnel_schlick(h_dot_v, f0);

    let specular = d * g * f / max(4.0 * n_dot_v * n_dot_l, 1e-4);
    let kd = (vec3<f32>(1.0) - f) * (1.0 - metallic);
    let diffuse = kd * albedo / PI;

    return (diffuse + specular) * radiance * n_dot_l;
}

fn shadow_visibility(world_position: vec3<f32>, n_dot_l: f32) -> f32 {
    let size = i32(textureDimensions(shadow_map).x);
    if (size == 0) {
        return 1.0;
    }
    let clip = lights.shadow_view_projection * vec4<f32>(world_position, 1.0);
    if (abs(clip.w) < 1e-6) {
        return 1.0;
    }
    let ndc = clip.xyz / clip.w;
    if (ndc.z > 1.0 || ndc.z < 0.0) {
        return 1.0;
    }
    let u = ndc.x * 0.5 + 0.5;
    let v = 0.5 - ndc.y * 0.5;
    if (u < 0.0 || u > 1.0 || v < 0.0 || v > 1.0) {
        return 1.0;
    }

    let cx = min(i32(u * f32(size)), size - 1);
    let cy = min(i32(v * f32(size)), size - 1);
    let bias = max(lights.shadow_params.y * (1.0 - clamp(n_dot_l, 0.0, 1.0)), lights.shadow_params.x);
    let reference = ndc.z - bias;

    var lit = 0.0;
    for (var dy = -1; dy <= 1; dy = dy + 1) {
        for (var dx = -1; dx <= 1; dx = dx + 1) {
            let x = clamp(cx + dx, 0, size - 1);
            let y = clamp(cy + dy, 0, size - 1);
            if (reference <= textureLoad(shadow_map, vec2<i32>(x, y), 0)) {
                lit = lit + 1.0;
            }
        }
    }
    return lit / 9.0;
}

fn equirect_uv(direction: vec3<f32>) -> vec2<f32> {
    let d = safe_normalize(direction);
    return vec2<f32>(atan2(d.z, d.x) / TAU + 0.5, acos(clamp(d.y, -1.0, 1.0)) / PI);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let pixel = vec2<i32>(input.position.xy);
    let depth = textureLoad(gbuffer_depth, pixel, 0);

    let normal = decode_octahedral(textureLoad(gbuffer_normal, pixel, 0).xy);
    let irradiance = textureSampleLevel(irradiance_map, repeat_sampler, equirect_uv(normal), 0.0).rgb;

    if (depth >= 1.0) {
        return vec4<f32>(lights.clear_color.rgb, 1.0);
    }

    let ndc = vec4<f32>(input.uv.x * 2.0 - 1.0, 1.0 - input.uv.y * 2.0, depth, 1.0);
    let world = camera.inverse_view_projection * ndc;
    let position = world.xyz / world.w;

    let albedo = textureLoad(gbuffer_albedo, pixel, 0).rgb;
    let material = textureLoad(gbuffer_material, pixel, 0);
    let metallic = material.x;
    let roughness = material.y;
    let ao = material.z;

    let view_dir = safe_normalize(camera.position.xyz - position);
    var color = vec3<f32>(0.0);

    let directional_count = min(lights.counts.x, 4u);
    for (var i = 0u; i < directional_count; i = i + 1u) {
        let light = lights.directional[i];
        let light_dir = safe_normalize(-light.direction.xyz);
        let radiance = light.color.rgb * light.color.w;
        var contribution = evaluate(normal, albedo, metallic, roughness, view_dir, light_dir, radiance);
        if (i == 0u && lights.counts.z != 0u && any(contribution != vec3<f32>(0.0))) {
            let n_dot_l = max(dot(normal, light_dir), 0.0);
            let receiver = position + normal * lights.shadow_params.w;
            contribution = contribution * shadow_visibility(receiver, n_dot_l);
        }
        color = color + contribution;
    }

    let point_count = min(lights.counts.y, 16u);
    for (var i = 0u; i < point_count; i = i + 1u) {
        let light = lights.points[i];
        let to_light = light.position.xyz - position;
        let distance = length(to_light);
        let light_dir = safe_normalize(to_light);
        let radiance = light.color.rgb * light.color.w * point_attenuation(light.attenuation.xyz, distance);
        color = color + evaluate(normal, albedo, metallic, roughness, view_dir, light_dir, radiance);
    }

    var ambient = lights.ambient.rgb * lights.ambient.w;
    if (lights.counts.w != 0u) {
        ambient = ambient * irradiance;
    }
    color = color + ambient * albedo * ao;

    let emissive = textureLoad(gbuffer_emissive, pixel, 0);
    return vec4<f32>(sanitize(color + emissive.rgb * emissive.w), 1.0);
}
"#;
