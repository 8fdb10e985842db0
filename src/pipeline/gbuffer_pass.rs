//! G-Buffer generation pass for deferred rendering
//!
//! Renders the batched meshes to multiple render targets (MRT):
//! - Albedo (base color)
//! - Octahedral-encoded world-space normal
//! - Material properties (metallic, roughness, ao)
//! - Emissive color and intensity
//! - Entity id for picking
//! - Depth buffer
//!
//! Draws are replayed grouped by geometry and cull mode. A draw whose mesh or
//! geometry no longer exists is skipped with a warning; the frame goes on.

use super::{bind_texture_checked, FrameContext, FramePhase, RenderPass};
use crate::backend::{BackendError, DepthState, GraphicsBackend, PipelineHandle};
use crate::error::RenderResult;
use crate::render_graph::RenderGraphData;
use crate::resources::MaterialTextureFlags;
use crate::uniforms::{slot, texture_slot, ObjectUniform};

const TEXTURE_NAMES: [&str; 6] = ["albedo", "normal", "metallic", "roughness", "ao", "emissive"];

/// G-Buffer generation pass
pub struct GBufferPass {
    pipeline: PipelineHandle,
}

impl GBufferPass {
    pub fn new(pipeline: PipelineHandle) -> Self {
        Self { pipeline }
    }
}

impl<B: GraphicsBackend> RenderPass<B> for GBufferPass {
    fn name(&self) -> &'static str {
        "G-Buffer Pass"
    }

    fn phase(&self) -> FramePhase {
        FramePhase::Geometry
    }

    fn execute(
        &mut self,
        backend: &mut B,
        graph: &RenderGraphData,
        frame: &mut FrameContext<'_>,
    ) -> RenderResult<bool> {
        let gbuffer = &graph.targets().gbuffer;
        backend.begin_render_pass(&gbuffer.render_pass(Some([0.0; 4]), Some(1.0)))?;
        backend.set_viewport(gbuffer.viewport());
        backend.set_pipeline(self.pipeline);
        backend.set_depth_state(DepthState::READ_WRITE);
        backend.set_blend_state(None);

        let camera = frame.camera.to_uniform();
        backend.set_uniforms(slot::CAMERA, bytemuck::bytes_of(&camera));

        for ((mesh_handle, cull_mode), commands) in frame.batch.grouped() {
            let Some(mesh) = frame.meshes.get(mesh_handle) else {
                let skipped = commands.count();
                log::warn!("Skipping {skipped} draw(s) of destroyed mesh {mesh_handle:?}");
                frame.stats.skipped_draws += skipped;
                continue;
            };
            backend.set_cull_mode(cull_mode);

            for command in commands {
                let object = ObjectUniform::new(command.transform, command.entity_id);
                backend.set_uniforms(slot::OBJECT, bytemuck::bytes_of(&object));

                // A dangling texture falls back to the scalar parameter alone.
                let mut material = command.material;
                let mut flags = MaterialTextureFlags::from_bits_truncate(material.texture_flags);
                for (index, texture) in command.textures.iter().enumerate() {
                    let slot = texture_slot::gbuffer::ALBEDO + index as u32;
                    if !bind_texture_checked(backend, slot, *texture, TEXTURE_NAMES[index]) {
                        flags.remove(MaterialTextureFlags::from_bits_truncate(1 << index));
                    }
                }
                material.texture_flags = flags.bits();
                backend.set_uniforms(slot::MATERIAL, bytemuck::bytes_of(&material));

                match backend.draw_indexed(mesh.geometry) {
                    Ok(index_count) => {
                        frame.stats.draw_calls += 1;
                        frame.stats.index_count += index_count as usize;
                    }
                    Err(BackendError::InvalidHandle(what)) => {
                        log::warn!("Skipping draw of mesh {mesh_handle:?}: invalid {what} handle");
                        frame.stats.skipped_draws += 1;
                    }
                    Err(err) => {
                        let _ = backend.end_render_pass();
                        return Err(err.into());
                    }
                }
            }
        }

        backend.end_render_pass()?;
        frame.batch.clear();
        Ok(true)
    }
}

/// G-Buffer generation program
pub const GBUFFER_SHADER: &str = r#"
// G-Buffer generation shader for deferred rendering

struct Camera {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    inverse_view_projection: mat4x4<f32>,
    position: vec4<f32>,
}

struct Object {
    model: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    entity_id: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct Material {
    albedo: vec4<f32>,
    emissive: vec4<f32>,
    // x = metallic, y = roughness, z = ao, w = normal strength
    params: vec4<f32>,
    texture_flags: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

const FLAG_ALBEDO: u32 = 1u;
const FLAG_NORMAL: u32 = 2u;
const FLAG_METALLIC: u32 = 4u;
const FLAG_ROUGHNESS: u32 = 8u;
const FLAG_AO: u32 = 16u;
const FLAG_EMISSIVE: u32 = 32u;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_position: vec3<f32>,
    @location(1) world_normal: vec3<f32>,
    @location(2) uv: vec2<f32>,
    @location(3) tangent: vec4<f32>,
}

struct GBufferOutput {
    @location(0) albedo: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) material: vec4<f32>,
    @location(3) emissive: vec4<f32>,
    @location(4) entity_id: u32,
}

@group(0) @binding(0) var<uniform> camera: Camera;
@group(0) @binding(1) var<uniform> object: Object;
@group(0) @binding(2) var<uniform> material: Material;

@group(1) @binding(0) var albedo_texture: texture_2d<f32>;
@group(1) @binding(1) var normal_texture: texture_2d<f32>;
@group(1) @binding(2) var metallic_texture: texture_2d<f32>;
@group(1) @binding(3) var roughness_texture: texture_2d<f32>;
@group(1) @binding(4) var ao_texture: texture_2d<f32>;
@group(1) @binding(5) var emissive_texture: texture_2d<f32>;
@group(1) @binding(17) var repeat_sampler: sampler;

fn sample_enabled(flag: u32, value: vec4<f32>) -> vec4<f32> {
    if ((material.texture_flags & flag) != 0u) {
        return value;
    }
    return vec4<f32>(1.0);
}

fn sign_not_zero(v: vec2<f32>) -> vec2<f32> {
    return select(vec2<f32>(-1.0), vec2<f32>(1.0), v >= vec2<f32>(0.0));
}

fn encode_octahedral(n: vec3<f32>) -> vec2<f32> {
    let l1 = abs(n.x) + abs(n.y) + abs(n.z);
    if (l1 < 1e-6) {
        return vec2<f32>(0.5);
    }
    let p = n / l1;
    var folded = p.xy;
    if (p.z < 0.0) {
        folded = (vec2<f32>(1.0) - abs(p.yx)) * sign_not_zero(p.xy);
    }
    return folded * 0.5 + 0.5;
}

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var output: VertexOutput;
    let world_pos = object.model * vec4<f32>(input.position, 1.0);
    output.world_position = world_pos.xyz;
    output.clip_position = camera.view_projection * world_pos;
    output.world_normal = (object.normal_matrix * vec4<f32>(input.normal, 0.0)).xyz;
    output.uv = input.uv;
    output.tangent = vec4<f32>((object.model * vec4<f32>(input.tangent.xyz, 0.0)).xyz, input.tangent.w);
    return output;
}

@fragment
fn fs_main(input: VertexOutput, @builtin(front_facing) front_facing: bool) -> GBufferOutput {
    var output: GBufferOutput;
    let uv = input.uv;

    // Sample unconditionally to keep derivatives in uniform control flow
    let albedo_sample = textureSample(albedo_texture, repeat_sampler, uv);
    let normal_sample = textureSample(normal_texture, repeat_sampler, uv);
    let metallic_sample = textureSample(metallic_texture, repeat_sampler, uv);
    let roughness_sample = textureSample(roughness_texture, repeat_sampler, uv);
    let ao_sample = textureSample(ao_texture, repeat_sampler, uv);
    let emissive_sample = textureSample(emissive_texture, repeat_sampler, uv);

    output.albedo = material.albedo * sample_enabled(FLAG_ALBEDO, albedo_sample);

    var normal = input.world_normal;
    if (dot(normal, normal) > 0.0) {
        normal = normalize(normal);
    }
    if (!front_facing) {
        normal = -normal;
    }
    if ((material.texture_flags & FLAG_NORMAL) != 0u) {
        var tangent = input.tangent.xyz;
        if (dot(tangent, tangent) > 0.0) {
            tangent = normalize(tangent);
        }
        let bitangent = cross(normal, tangent) * input.tangent.w;
        var mapped = normal_sample.xyz * 2.0 - 1.0;
        mapped = vec3<f32>(mapped.xy * material.params.w, mapped.z);
        let perturbed = tangent * mapped.x + bitangent * mapped.y + normal * mapped.z;
        if (dot(perturbed, perturbed) > 1e-12) {
            normal = normalize(perturbed);
        }
    }
    output.normal = vec4<f32>(encode_octahedral(normal), 0.0, 1.0);

    let metallic = material.params.x * sample_enabled(FLAG_METALLIC, metallic_sample).x;
    let roughness = material.params.y * sample_enabled(FLAG_ROUGHNESS, roughness_sample).x;
    let ao = material.params.z * sample_enabled(FLAG_AO, ao_sample).x;
    output.material = vec4<f32>(metallic, roughness, ao, 1.0);

    let emissive = material.emissive.rgb * sample_enabled(FLAG_EMISSIVE, emissive_sample).rgb;
    output.emissive = vec4<f32>(emissive, material.emissive.w);

    output.entity_id = object.entity_id;
    return output;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CullMode, SoftwareBackend};
    use crate::pipeline::{GeometryBatch, MeshDrawCommand, PipelineSet, PostProcessSettings};
    use crate::render_graph::{gbuffer_target, RenderGraphDesc};
    use crate::renderer::RendererStatistics;
    use crate::resources::{
        Material, MaterialTexture, MaterialTextures, Mesh, MeshCache, TextureData,
    };
    use crate::scene::{CameraData, Environment, LightData, Projection};
    use glam::{Mat4, Vec3, Vec4};

    struct Fixture {
        backend: SoftwareBackend,
        graph: RenderGraphData,
        pass: GBufferPass,
        meshes: MeshCache,
        batch: GeometryBatch,
        stats: RendererStatistics,
    }

    fn fixture() -> Fixture {
        let mut backend = SoftwareBackend::new();
        let pipelines = PipelineSet::create(&mut backend).unwrap();
        let desc = RenderGraphDesc {
            bloom_levels: 1,
            shadow_map_size: 4,
        };
        let graph = RenderGraphData::new(&mut backend, 16, 16, desc).unwrap();
        Fixture {
            backend,
            graph,
            pass: GBufferPass::new(pipelines.gbuffer),
            meshes: MeshCache::new(),
            batch: GeometryBatch::new(64),
            stats: RendererStatistics::default(),
        }
    }

    fn run(f: &mut Fixture) -> RenderResult<bool> {
        let projection = Projection::perspective(60.0, 1.0, 0.1, 100.0);
        let camera = CameraData::look_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO, &projection);
        let lights = LightData::new();
        let environment = Environment::default();
        let settings = PostProcessSettings::default();
        let mut frame = FrameContext {
            camera: &camera,
            lights: &lights,
            environment: &environment,
            settings: &settings,
            batch: &mut f.batch,
            meshes: &f.meshes,
            clear_color: Vec4::ZERO,
            stats: &mut f.stats,
            shadow_view_projection: None,
            bloom_texture: None,
        };
        f.pass.execute(&mut f.backend, &f.graph, &mut frame)
    }

    #[test]
    fn test_draws_are_counted_and_batch_is_flushed() {
        let mut f = fixture();
        let cube = f.meshes.upload(&mut f.backend, &Mesh::cube()).unwrap();
        let material = Material::default();
        f.batch.submit(MeshDrawCommand::new(Mat4::IDENTITY, cube, &material, CullMode::Back).with_entity_id(7));
        f.batch.submit(MeshDrawCommand::new(Mat4::from_translation(Vec3::X * 5.0), cube, &material, CullMode::Back));

        assert!(run(&mut f).unwrap());
        assert_eq!(f.stats.draw_calls, 2);
        assert_eq!(f.stats.index_count, 72);
        assert!(f.batch.is_empty());

        let id_target = f.graph.targets().gbuffer.color[gbuffer_target::ENTITY_ID];
        assert_eq!(f.backend.read_pixel(id_target, 8, 8).unwrap().x, 7.0);
        assert_eq!(f.backend.read_pixel(id_target, 0, 0).unwrap().x, 0.0);
    }

    #[test]
    fn test_destroyed_mesh_is_skipped() {
        let mut f = fixture();
        let cube = f.meshes.upload(&mut f.backend, &Mesh::cube()).unwrap();
        let gone = f.meshes.upload(&mut f.backend, &Mesh::plane(1.0, 1.0, 1)).unwrap();
        assert!(f.meshes.remove(&mut f.backend, gone));

        let material = Material::default();
        f.batch.submit(MeshDrawCommand::new(Mat4::IDENTITY, gone, &material, CullMode::Back));
        f.batch.submit(MeshDrawCommand::new(Mat4::IDENTITY, cube, &material, CullMode::Back));

        assert!(run(&mut f).unwrap());
        assert_eq!(f.stats.draw_calls, 1);
        assert_eq!(f.stats.skipped_draws, 1);
    }

    #[test]
    fn test_dangling_texture_falls_back_to_scalar_color() {
        let mut f = fixture();
        let cube = f.meshes.upload(&mut f.backend, &Mesh::cube()).unwrap();
        let texture = TextureData::solid_color([0, 0, 0, 255], "black")
            .upload(&mut f.backend)
            .unwrap();
        f.backend.destroy_texture(texture);

        let material = Material::default()
            .with_albedo(Vec4::new(0.0, 1.0, 0.0, 1.0))
            .with_textures(MaterialTextures {
                albedo: MaterialTexture::new(texture),
                ..Default::default()
            });
        f.batch.submit(MeshDrawCommand::new(Mat4::IDENTITY, cube, &material, CullMode::Back));
        assert!(run(&mut f).unwrap());

        let albedo = f.graph.targets().gbuffer.color[gbuffer_target::ALBEDO];
        let texel = f.backend.read_pixel(albedo, 8, 8).unwrap();
        assert!((texel.y - 1.0).abs() < 1e-2, "{texel:?}");
    }
}
