//! Material definitions for PBR rendering

use bitflags::bitflags;
use glam::{Vec3, Vec4};

use crate::backend::TextureHandle;
use crate::uniforms::MaterialUniform;

bitflags! {
    /// Which material textures the G-buffer program samples
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialTextureFlags: u32 {
        const ALBEDO = 1 << 0;
        const NORMAL = 1 << 1;
        const METALLIC = 1 << 2;
        const ROUGHNESS = 1 << 3;
        const AO = 1 << 4;
        const EMISSIVE = 1 << 5;
    }
}

/// A material texture slot: the texture plus its enable flag
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaterialTexture {
    pub texture: Option<TextureHandle>,
    pub enabled: bool,
}

impl MaterialTexture {
    pub fn new(texture: TextureHandle) -> Self {
        Self {
            texture: Some(texture),
            enabled: true,
        }
    }

    /// The texture to sample, if it is both set and enabled
    pub fn active(&self) -> Option<TextureHandle> {
        self.texture.filter(|_| self.enabled)
    }
}

/// Textures of a [`Material`], one per G-buffer input
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaterialTextures {
    pub albedo: MaterialTexture,
    pub normal: MaterialTexture,
    pub metallic: MaterialTexture,
    pub roughness: MaterialTexture,
    pub ao: MaterialTexture,
    pub emissive: MaterialTexture,
}

impl MaterialTextures {
    /// `(flag, texture)` pairs in G-buffer slot order
    pub fn slots(&self) -> [(MaterialTextureFlags, &MaterialTexture); 6] {
        [
            (MaterialTextureFlags::ALBEDO, &self.albedo),
            (MaterialTextureFlags::NORMAL, &self.normal),
            (MaterialTextureFlags::METALLIC, &self.metallic),
            (MaterialTextureFlags::ROUGHNESS, &self.roughness),
            (MaterialTextureFlags::AO, &self.ao),
            (MaterialTextureFlags::EMISSIVE, &self.emissive),
        ]
    }

    /// Flags of every texture that is set and enabled
    pub fn flags(&self) -> MaterialTextureFlags {
        self.slots()
            .into_iter()
            .filter(|(_, slot)| slot.active().is_some())
            .fold(MaterialTextureFlags::empty(), |acc, (flag, _)| acc | flag)
    }
}

/// PBR material properties
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub albedo: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    /// Scales the tangent-space xy of the normal map
    pub normal_strength: f32,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub textures: MaterialTextures,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            albedo: Vec4::ONE,
            metallic: 0.0,
            roughness: 0.5,
            ao: 1.0,
            normal_strength: 1.0,
            emissive: Vec3::ZERO,
            emissive_intensity: 0.0,
            textures: MaterialTextures::default(),
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_albedo(mut self, albedo: Vec4) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = metallic.clamp(0.0, 1.0);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn with_ao(mut self, ao: f32) -> Self {
        self.ao = ao.clamp(0.0, 1.0);
        self
    }

    pub fn with_emissive(mut self, color: Vec3, intensity: f32) -> Self {
        self.emissive = color;
        self.emissive_intensity = intensity.max(0.0);
        self
    }

    pub fn with_textures(mut self, textures: MaterialTextures) -> Self {
        self.textures = textures;
        self
    }

    /// Uniform block for this material. `flags` are the textures that are
    /// actually bound, which may be fewer than the material enables.
    pub fn to_uniform(&self, flags: MaterialTextureFlags) -> MaterialUniform {
        MaterialUniform {
            albedo: self.albedo,
            emissive: self.emissive.extend(self.emissive_intensity),
            params: Vec4::new(self.metallic, self.roughness, self.ao, self.normal_strength),
            texture_flags: flags.bits(),
            _padding: [0; 3],
        }
    }
}
