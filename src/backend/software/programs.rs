//! CPU versions of the fixed program set.

use std::collections::HashMap;

use bytemuck::Pod;
use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

use super::raster::{ClipVertex, Fragment, Varyings};
use super::texture::{TexelView, Wrap};
use crate::backend::traits::{BackendError, BackendResult};
use crate::backend::types::{ShaderProgram, Vertex};
use crate::resources::MaterialTextureFlags;
use crate::shading::{self, bloom, brdf, fxaa, shadow, vignette, TonemapCurve};
use crate::uniforms::*;

/// Highest texture slot any program reads, plus one.
pub const MAX_TEXTURE_SLOTS: usize = 8;

/// Textures visible to one draw, indexed by slot.
#[derive(Default)]
pub struct Bindings<'a> {
    slots: [Option<TexelView<'a>>; MAX_TEXTURE_SLOTS],
}

impl<'a> Bindings<'a> {
    pub fn bind(&mut self, slot: u32, view: TexelView<'a>) {
        if let Some(entry) = self.slots.get_mut(slot as usize) {
            *entry = Some(view);
        }
    }

    fn view(&self, slot: u32) -> Option<&TexelView<'a>> {
        self.slots.get(slot as usize).and_then(Option::as_ref)
    }

    /// Unbound slots read as opaque white (depth 1).
    fn load(&self, slot: u32, x: u32, y: u32) -> Vec4 {
        self.view(slot)
            .map_or(Vec4::ONE, |view| view.load(x as i64, y as i64))
    }

    fn sample(&self, slot: u32, uv: Vec2, wrap: Wrap) -> Vec4 {
        self.view(slot).map_or(Vec4::ONE, |view| view.sample(uv, wrap))
    }

    fn sample_rgb(&self, slot: u32, uv: Vec2) -> Vec3 {
        shading::sanitize(self.sample(slot, uv, Wrap::Clamp).xyz())
    }
}

/// A program with its uniform blocks decoded for one draw.
pub enum BoundProgram {
    ShadowDepth {
        camera: CameraUniform,
        object: ObjectUniform,
    },
    GBuffer {
        camera: CameraUniform,
        object: ObjectUniform,
        material: MaterialUniform,
    },
    Lighting {
        camera: CameraUniform,
        lights: LightsUniform,
    },
    BloomPrefilter(BloomUniform),
    BloomDownsample(BloomUniform),
    BloomBlur(BloomUniform),
    BloomUpsample(BloomUniform),
    Composite(CompositeUniform),
    Fxaa(FxaaUniform),
}

fn read<T: Pod>(uniforms: &HashMap<u32, Vec<u8>>, slot: u32) -> BackendResult<T> {
    uniforms
        .get(&slot)
        .and_then(|bytes| read_uniform::<T>(bytes))
        .ok_or(BackendError::MissingUniform(slot))
}

impl BoundProgram {
    pub fn bind(program: ShaderProgram, uniforms: &HashMap<u32, Vec<u8>>) -> BackendResult<Self> {
        Ok(match program {
            ShaderProgram::ShadowDepth => BoundProgram::ShadowDepth {
                camera: read(uniforms, slot::CAMERA)?,
                object: read(uniforms, slot::OBJECT)?,
            },
            ShaderProgram::GBuffer => BoundProgram::GBuffer {
                camera: read(uniforms, slot::CAMERA)?,
                object: read(uniforms, slot::OBJECT)?,
                material: read(uniforms, slot::MATERIAL)?,
            },
            ShaderProgram::Lighting => BoundProgram::Lighting {
                camera: read(uniforms, slot::CAMERA)?,
                lights: read(uniforms, slot::LIGHTS)?,
            },
            ShaderProgram::BloomPrefilter => BoundProgram::BloomPrefilter(read(uniforms, slot::PARAMS)?),
            ShaderProgram::BloomDownsample => {
                BoundProgram::BloomDownsample(read(uniforms, slot::PARAMS)?)
            }
            ShaderProgram::BloomBlur => BoundProgram::BloomBlur(read(uniforms, slot::PARAMS)?),
            ShaderProgram::BloomUpsample => BoundProgram::BloomUpsample(read(uniforms, slot::PARAMS)?),
            ShaderProgram::Composite => BoundProgram::Composite(read(uniforms, slot::PARAMS)?),
            ShaderProgram::Fxaa => BoundProgram::Fxaa(read(uniforms, slot::PARAMS)?),
        })
    }

    /// Vertex stage of the mesh programs.
    pub fn vertex(&self, vertex: &Vertex) -> ClipVertex {
        let (camera, object) = match self {
            BoundProgram::ShadowDepth { camera, object } => (camera, object),
            BoundProgram::GBuffer { camera, object, .. } => (camera, object),
            _ => return ClipVertex::default(),
        };
        let world = object.model * vertex.position.extend(1.0);
        let normal = (object.normal_matrix * vertex.normal.extend(0.0)).xyz();
        let tangent = (object.model * vertex.tangent.xyz().extend(0.0)).xyz();
        ClipVertex {
            clip: camera.view_projection * world,
            varyings: Varyings {
                world_position: world.xyz(),
                normal,
                uv: vertex.uv,
                tangent: tangent.extend(vertex.tangent.w),
            },
        }
    }

    /// Fragment stage of the mesh programs; one value per color target.
    pub fn shade_fragment(&self, fragment: &Fragment, bindings: &Bindings<'_>) -> [Vec4; 5] {
        let BoundProgram::GBuffer {
            object, material, ..
        } = self
        else {
            return [Vec4::ZERO; 5];
        };
        use crate::uniforms::texture_slot::gbuffer;

        let flags = MaterialTextureFlags::from_bits_truncate(material.texture_flags);
        let uv = fragment.varyings.uv;
        let texture = |flag: MaterialTextureFlags, slot: u32| {
            if flags.contains(flag) {
                bindings.sample(slot, uv, Wrap::Repeat)
            } else {
                Vec4::ONE
            }
        };

        let albedo = material.albedo * texture(MaterialTextureFlags::ALBEDO, gbuffer::ALBEDO);

        let mut normal = fragment.varyings.normal.normalize_or_zero();
        if !fragment.front_facing {
            normal = -normal;
        }
        if flags.contains(MaterialTextureFlags::NORMAL) {
            let tangent = fragment.varyings.tangent.xyz().normalize_or_zero();
            let bitangent = normal.cross(tangent) * fragment.varyings.tangent.w;
            let mut sampled = bindings.sample(gbuffer::NORMAL, uv, Wrap::Repeat).xyz() * 2.0 - 1.0;
            sampled.x *= material.params.w;
            sampled.y *= material.params.w;
            let perturbed = tangent * sampled.x + bitangent * sampled.y + normal * sampled.z;
            if perturbed.length_squared() > 1e-12 {
                normal = perturbed.normalize();
            }
        }
        let encoded = shading::encode_octahedral(normal);

        let metallic = material.params.x * texture(MaterialTextureFlags::METALLIC, gbuffer::METALLIC).x;
        let roughness =
            material.params.y * texture(MaterialTextureFlags::ROUGHNESS, gbuffer::ROUGHNESS).x;
        let ao = material.params.z * texture(MaterialTextureFlags::AO, gbuffer::AO).x;
        let emissive =
            material.emissive.xyz() * texture(MaterialTextureFlags::EMISSIVE, gbuffer::EMISSIVE).xyz();

        [
            albedo,
            Vec4::new(encoded.x, encoded.y, 0.0, 1.0),
            Vec4::new(metallic, roughness, ao, 1.0),
            emissive.extend(material.emissive.w),
            Vec4::new(object.entity_id as f32, 0.0, 0.0, 0.0),
        ]
    }

    /// Fullscreen programs: color at pixel `(x, y)` whose center maps to `uv`.
    pub fn shade_pixel(&self, x: u32, y: u32, uv: Vec2, bindings: &Bindings<'_>) -> Vec4 {
        match self {
            BoundProgram::Lighting { camera, lights } => {
                lighting(camera, lights, x, y, uv, bindings).extend(1.0)
            }
            BoundProgram::BloomPrefilter(params) => {
                let color = bloom::downsample(
                    |uv| bindings.sample_rgb(texture_slot::bloom::SOURCE, uv),
                    uv,
                    params.texel.xy(),
                );
                bloom::prefilter(color, params.params.x, params.params.y).extend(1.0)
            }
            BoundProgram::BloomDownsample(params) => bloom::downsample(
                |uv| bindings.sample_rgb(texture_slot::bloom::SOURCE, uv),
                uv,
                params.texel.xy(),
            )
            .extend(1.0),
            BoundProgram::BloomBlur(params) => bloom::gaussian_blur(
                |uv| bindings.sample_rgb(texture_slot::bloom::SOURCE, uv),
                uv,
                params.texel.xy(),
                params.texel.zw(),
            )
            .extend(1.0),
            BoundProgram::BloomUpsample(params) => {
                let coarse = bloom::upsample_tent(
                    |uv| bindings.sample_rgb(texture_slot::bloom::SOURCE, uv),
                    uv,
                    params.texel.xy(),
                );
                (coarse + bindings.sample_rgb(texture_slot::bloom::BASE, uv)).extend(1.0)
            }
            BoundProgram::Composite(params) => composite(params, uv, bindings).extend(1.0),
            BoundProgram::Fxaa(params) => fxaa::fxaa(
                |uv| bindings.sample_rgb(texture_slot::fxaa::SOURCE, uv),
                uv,
                params.params.xy(),
                fxaa::FxaaThresholds {
                    current: params.params.z,
                    relative: params.params.w,
                },
            )
            .extend(1.0),
            BoundProgram::ShadowDepth { .. } | BoundProgram::GBuffer { .. } => Vec4::ZERO,
        }
    }
}

/// Equirectangular lookup coordinate for a world-space direction.
pub fn equirect_uv(direction: Vec3) -> Vec2 {
    let d = direction.normalize_or_zero();
    Vec2::new(
        d.z.atan2(d.x) / std::f32::consts::TAU + 0.5,
        d.y.clamp(-1.0, 1.0).acos() / std::f32::consts::PI,
    )
}

fn lighting(
    camera: &CameraUniform,
    lights: &LightsUniform,
    x: u32,
    y: u32,
    uv: Vec2,
    bindings: &Bindings<'_>,
) -> Vec3 {
    use crate::uniforms::texture_slot::lighting as slots;

    let depth = bindings.load(slots::DEPTH, x, y).x;
    if depth >= 1.0 {
        return lights.clear_color.xyz();
    }

    let ndc = Vec3::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, depth);
    let world_position = camera.inverse_view_projection.project_point3(ndc);
    let material = bindings.load(slots::MATERIAL, x, y);
    let surface = brdf::Surface {
        position: world_position,
        normal: shading::decode_octahedral(bindings.load(slots::NORMAL, x, y).xy()),
        albedo: bindings.load(slots::ALBEDO, x, y).xyz(),
        metallic: material.x,
        roughness: material.y,
        ao: material.z,
    };

    let bias = shadow::ShadowBias {
        constant: lights.shadow_params.x,
        slope: lights.shadow_params.y,
        normal_offset: 0.0,
    };
    let receiver_offset = surface.normal * lights.shadow_params.w;
    let shadow_map = bindings.view(slots::SHADOW);
    let visibility = |position: Vec3, n_dot_l: f32| match shadow_map {
        Some(map) => shadow::pcf_visibility(
            position + receiver_offset,
            &lights.shadow_view_projection,
            bias.for_n_dot_l(n_dot_l),
            map.width,
            |sx, sy| map.load(sx as i64, sy as i64).x,
        ),
        None => 1.0,
    };

    let irradiance = if lights.irradiance_enabled() {
        bindings
            .view(slots::IRRADIANCE)
            .map(|map| map.sample(equirect_uv(surface.normal), Wrap::Repeat).xyz())
    } else {
        None
    };

    let emissive = bindings.load(slots::EMISSIVE, x, y);
    let color = brdf::shade(
        &surface,
        camera.position.xyz(),
        lights,
        visibility,
        irradiance,
    );
    shading::sanitize(color + emissive.xyz() * emissive.w)
}

fn composite(params: &CompositeUniform, uv: Vec2, bindings: &Bindings<'_>) -> Vec3 {
    use crate::uniforms::texture_slot::composite as slots;

    let mut color = bindings.sample_rgb(slots::HDR, uv);
    if params.flags[1] != 0 {
        color += bloom::contribution(
            bindings.sample_rgb(slots::BLOOM, uv),
            params.grading.y,
            params.grading.z,
        );
    }
    color *= params.grading.x;

    let curve = TonemapCurve::from_index(params.flags[0]).unwrap_or_default();
    let color = curve.apply(color);

    let mask = if params.flags[2] != 0 {
        bindings.sample(slots::VIGNETTE_MASK, uv, Wrap::Clamp).x
    } else {
        1.0
    };
    vignette::apply(
        color,
        uv,
        params.vignette.xyz(),
        params.vignette.w,
        params.grading.w,
        mask,
    )
}
