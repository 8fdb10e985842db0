//! GPU uniform blocks and binding slots.
//!
//! Every block is `#[repr(C)]`, built only from 16-byte aligned members, and
//! mirrors a struct of the same name in the WGSL sources.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};
use static_assertions::const_assert_eq;

use crate::scene::{MAX_NUM_DIR_LIGHTS, MAX_NUM_LIGHTS};

/// Uniform block slots. On GPU devices these are bindings in group 0.
pub mod slot {
    pub const CAMERA: u32 = 0;
    pub const OBJECT: u32 = 1;
    pub const MATERIAL: u32 = 2;
    pub const LIGHTS: u32 = 3;
    pub const PARAMS: u32 = 4;
}

/// Texture slots per program. On GPU devices these are bindings in group 1.
pub mod texture_slot {
    pub mod gbuffer {
        pub const ALBEDO: u32 = 0;
        pub const NORMAL: u32 = 1;
        pub const METALLIC: u32 = 2;
        pub const ROUGHNESS: u32 = 3;
        pub const AO: u32 = 4;
        pub const EMISSIVE: u32 = 5;
    }

    pub mod lighting {
        pub const ALBEDO: u32 = 0;
        pub const NORMAL: u32 = 1;
        pub const MATERIAL: u32 = 2;
        pub const EMISSIVE: u32 = 3;
        pub const DEPTH: u32 = 4;
        pub const SHADOW: u32 = 5;
        pub const IRRADIANCE: u32 = 6;
    }

    pub mod bloom {
        pub const SOURCE: u32 = 0;
        /// Finer level added on top of the upsampled result
        pub const BASE: u32 = 1;
    }

    pub mod composite {
        pub const HDR: u32 = 0;
        pub const BLOOM: u32 = 1;
        pub const VIGNETTE_MASK: u32 = 2;
    }

    pub mod fxaa {
        pub const SOURCE: u32 = 0;
    }
}

/// Camera uniform data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_view_projection: Mat4,
    /// xyz = world position, w unused
    pub position: Vec4,
}

/// Per-object uniform data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: Mat4,
    pub normal_matrix: Mat4,
    /// Written to the picking target, 0 means "no entity"
    pub entity_id: u32,
    pub _padding: [u32; 3],
}

impl ObjectUniform {
    pub fn new(model: Mat4, entity_id: u32) -> Self {
        Self {
            model,
            normal_matrix: crate::scene::normal_matrix(&model),
            entity_id,
            _padding: [0; 3],
        }
    }
}

/// Material uniform data
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MaterialUniform {
    pub albedo: Vec4,
    /// xyz = emissive color, w = intensity
    pub emissive: Vec4,
    /// x = metallic, y = roughness, z = ao, w = normal strength
    pub params: Vec4,
    /// [`MaterialTextureFlags`](crate::resources::MaterialTextureFlags) bits
    pub texture_flags: u32,
    pub _padding: [u32; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuDirectionalLight {
    /// xyz = direction the light travels in, w unused
    pub direction: Vec4,
    /// xyz = color, w = intensity
    pub color: Vec4,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuPointLight {
    /// xyz = world position, w unused
    pub position: Vec4,
    /// xyz = color, w = intensity
    pub color: Vec4,
    /// x = constant, y = linear, z = quadratic, w unused
    pub attenuation: Vec4,
}

/// Light block consumed by the lighting pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LightsUniform {
    pub directional: [GpuDirectionalLight; MAX_NUM_DIR_LIGHTS],
    pub points: [GpuPointLight; MAX_NUM_LIGHTS],
    /// xyz = ambient color, w = intensity
    pub ambient: Vec4,
    pub shadow_view_projection: Mat4,
    /// x = constant bias, y = slope bias, z = shadow texel size,
    /// w = world-space normal offset
    pub shadow_params: Vec4,
    /// Color written where no geometry was rasterized
    pub clear_color: Vec4,
    /// x = directional count, y = point count, z = shadow enabled, w = irradiance bound
    pub counts: [u32; 4],
}

impl LightsUniform {
    pub fn directional_count(&self) -> usize {
        (self.counts[0] as usize).min(MAX_NUM_DIR_LIGHTS)
    }

    pub fn point_count(&self) -> usize {
        (self.counts[1] as usize).min(MAX_NUM_LIGHTS)
    }

    pub fn shadow_enabled(&self) -> bool {
        self.counts[2] != 0
    }

    pub fn irradiance_enabled(&self) -> bool {
        self.counts[3] != 0
    }
}

/// Parameters shared by the bloom sub-passes
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BloomUniform {
    /// x = threshold, y = knee, zw unused
    pub params: Vec4,
    /// xy = source texel size, zw = blur direction
    pub texel: Vec4,
}

/// Composite pass parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CompositeUniform {
    /// x = exposure, y = bloom strength, z = bloom clamp, w = vignette intensity
    pub grading: Vec4,
    /// xyz = vignette color, w = vignette offset
    pub vignette: Vec4,
    /// x = tonemap curve, y = bloom enabled, z = vignette mask bound, w unused
    pub flags: [u32; 4],
}

/// FXAA parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FxaaUniform {
    /// xy = texel size, z = absolute ("current") threshold, w = relative threshold
    pub params: Vec4,
}

const_assert_eq!(std::mem::size_of::<CameraUniform>(), 272);
const_assert_eq!(std::mem::size_of::<ObjectUniform>(), 144);
const_assert_eq!(std::mem::size_of::<MaterialUniform>(), 64);
const_assert_eq!(std::mem::size_of::<LightsUniform>(), 1024);
const_assert_eq!(std::mem::size_of::<BloomUniform>(), 32);
const_assert_eq!(std::mem::size_of::<CompositeUniform>(), 48);
const_assert_eq!(std::mem::size_of::<FxaaUniform>(), 16);

/// Read a uniform block back out of raw bytes.
///
/// Returns `None` when the blob is shorter than `T`.
pub fn read_uniform<T: Pod>(bytes: &[u8]) -> Option<T> {
    let size = std::mem::size_of::<T>();
    bytes.get(..size).map(bytemuck::pod_read_unaligned::<T>)
}
