//! Common types shared between backends

use super::traits::TextureHandle;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Uint,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    /// Floating point formats that keep values above 1.
    pub fn is_hdr(&self) -> bool {
        matches!(self, TextureFormat::Rgba16Float | TextureFormat::Rgba32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::R32Uint
            | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }
}

bitflags! {
    /// Texture usage flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const TEXTURE_BINDING = 1 << 2;
        const RENDER_ATTACHMENT = 1 << 3;
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Render target that later passes sample from and that can be read
    /// back or seeded from the CPU.
    pub fn render_target(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::TEXTURE_BINDING
                | TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST,
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.format.bytes_per_pixel() as u64
    }
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

/// Standard vertex with position, normal, UV, and tangent
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    /// xyz = tangent, w = bitangent sign
    pub tangent: Vec4,
}

static_assertions::const_assert_eq!(std::mem::size_of::<Vertex>(), 48);

/// Face culling. Front faces wind counter-clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Compare function for depth testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Equal,
    Greater,
    Always,
}

impl CompareFunction {
    #[inline]
    pub fn passes(self, incoming: f32, stored: f32) -> bool {
        match self {
            CompareFunction::Never => false,
            CompareFunction::Less => incoming < stored,
            CompareFunction::LessEqual => incoming <= stored,
            CompareFunction::Equal => incoming == stored,
            CompareFunction::Greater => incoming > stored,
            CompareFunction::Always => true,
        }
    }
}

/// Depth test/write state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub test_enabled: bool,
    pub write_enabled: bool,
    pub compare: CompareFunction,
}

impl DepthState {
    pub const DISABLED: Self = Self {
        test_enabled: false,
        write_enabled: false,
        compare: CompareFunction::Always,
    };

    pub const READ_WRITE: Self = Self {
        test_enabled: true,
        write_enabled: true,
        compare: CompareFunction::Less,
    };
}

impl Default for DepthState {
    fn default() -> Self {
        Self::DISABLED
    }
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Blend component state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
        }
    }
}

/// Blend state. `None` at the call site means blending is off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::SrcAlpha,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
            alpha: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::OneMinusSrcAlpha,
            },
        }
    }

    pub fn additive() -> Self {
        Self {
            color: BlendComponent {
                src_factor: BlendFactor::One,
                dst_factor: BlendFactor::One,
            },
            alpha: BlendComponent::default(),
        }
    }
}

/// How a texture slot is read by a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureSampleType {
    Float { filterable: bool },
    Depth,
}

/// Texture binding declared by a program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub slot: u32,
    pub sample_type: TextureSampleType,
}

const fn color(slot: u32) -> TextureBinding {
    TextureBinding {
        slot,
        sample_type: TextureSampleType::Float { filterable: true },
    }
}

const fn depth(slot: u32) -> TextureBinding {
    TextureBinding {
        slot,
        sample_type: TextureSampleType::Depth,
    }
}

const GBUFFER_BINDINGS: &[TextureBinding] =
    &[color(0), color(1), color(2), color(3), color(4), color(5)];
const LIGHTING_BINDINGS: &[TextureBinding] = &[
    color(0),
    color(1),
    color(2),
    color(3),
    depth(4),
    depth(5),
    color(6),
];
const BLOOM_UPSAMPLE_BINDINGS: &[TextureBinding] = &[color(0), color(1)];
const COMPOSITE_BINDINGS: &[TextureBinding] = &[color(0), color(1), color(2)];
const SINGLE_SOURCE_BINDINGS: &[TextureBinding] = &[color(0)];

/// The closed set of programs a backend must be able to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderProgram {
    ShadowDepth,
    GBuffer,
    Lighting,
    BloomPrefilter,
    BloomDownsample,
    BloomBlur,
    BloomUpsample,
    Composite,
    Fxaa,
}

impl ShaderProgram {
    pub const ALL: [ShaderProgram; 9] = [
        ShaderProgram::ShadowDepth,
        ShaderProgram::GBuffer,
        ShaderProgram::Lighting,
        ShaderProgram::BloomPrefilter,
        ShaderProgram::BloomDownsample,
        ShaderProgram::BloomBlur,
        ShaderProgram::BloomUpsample,
        ShaderProgram::Composite,
        ShaderProgram::Fxaa,
    ];

    pub fn label(self) -> &'static str {
        match self {
            ShaderProgram::ShadowDepth => "shadow_depth",
            ShaderProgram::GBuffer => "gbuffer",
            ShaderProgram::Lighting => "deferred_lighting",
            ShaderProgram::BloomPrefilter => "bloom_prefilter",
            ShaderProgram::BloomDownsample => "bloom_downsample",
            ShaderProgram::BloomBlur => "bloom_blur",
            ShaderProgram::BloomUpsample => "bloom_upsample",
            ShaderProgram::Composite => "composite",
            ShaderProgram::Fxaa => "fxaa",
        }
    }

    /// Mesh programs consume [`Vertex`] streams, the rest draw a fullscreen triangle.
    pub fn uses_vertex_input(self) -> bool {
        matches!(self, ShaderProgram::ShadowDepth | ShaderProgram::GBuffer)
    }

    /// Number of color attachments the program writes.
    pub fn color_target_count(self) -> usize {
        match self {
            ShaderProgram::ShadowDepth => 0,
            ShaderProgram::GBuffer => 5,
            _ => 1,
        }
    }

    pub fn writes_depth(self) -> bool {
        self.uses_vertex_input()
    }

    /// Uniform slots read by the program.
    pub fn uniform_slots(self) -> &'static [u32] {
        use crate::uniforms::slot;
        match self {
            ShaderProgram::ShadowDepth => &[slot::CAMERA, slot::OBJECT],
            ShaderProgram::GBuffer => &[slot::CAMERA, slot::OBJECT, slot::MATERIAL],
            ShaderProgram::Lighting => &[slot::CAMERA, slot::LIGHTS],
            _ => &[slot::PARAMS],
        }
    }

    /// Texture slots read by the program.
    pub fn texture_bindings(self) -> &'static [TextureBinding] {
        match self {
            ShaderProgram::ShadowDepth => &[],
            ShaderProgram::GBuffer => GBUFFER_BINDINGS,
            ShaderProgram::Lighting => LIGHTING_BINDINGS,
            ShaderProgram::BloomUpsample => BLOOM_UPSAMPLE_BINDINGS,
            ShaderProgram::Composite => COMPOSITE_BINDINGS,
            ShaderProgram::BloomPrefilter
            | ShaderProgram::BloomDownsample
            | ShaderProgram::BloomBlur
            | ShaderProgram::Fxaa => SINGLE_SOURCE_BINDINGS,
        }
    }
}

/// Render pipeline descriptor
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub label: Option<String>,
    pub program: ShaderProgram,
    /// WGSL module with `vs_main`/`fs_main` entry points
    pub source: &'static str,
    pub color_targets: Vec<TextureFormat>,
    pub depth_format: Option<TextureFormat>,
}

/// Load operation for a color attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

/// Color attachment for render pass
#[derive(Debug, Clone, Copy)]
pub struct ColorAttachment {
    pub texture: TextureHandle,
    pub load_op: LoadOp,
}

/// Depth attachment for render pass
#[derive(Debug, Clone, Copy)]
pub struct DepthAttachment {
    pub texture: TextureHandle,
    /// `Some(value)` clears to `value`, `None` loads
    pub clear: Option<f32>,
}

/// Render pass descriptor
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
}

/// Viewport rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_layouts_are_consistent() {
        for program in ShaderProgram::ALL {
            let slots: Vec<u32> = program.texture_bindings().iter().map(|b| b.slot).collect();
            let mut sorted = slots.clone();
            sorted.dedup();
            assert_eq!(slots, sorted, "{} texture slots must be unique", program.label());
            assert!(!program.uniform_slots().is_empty());
        }
    }

    #[test]
    fn test_texture_bindings_are_static_tables() {
        fn bindings(program: ShaderProgram) -> &'static [TextureBinding] {
            program.texture_bindings()
        }
        assert!(bindings(ShaderProgram::ShadowDepth).is_empty());
        assert_eq!(bindings(ShaderProgram::GBuffer).len(), 6);
        let lighting = bindings(ShaderProgram::Lighting);
        assert_eq!(lighting.len(), 7);
        assert_eq!(lighting[4].sample_type, TextureSampleType::Depth);
        assert_eq!(lighting[5].sample_type, TextureSampleType::Depth);
        assert_eq!(bindings(ShaderProgram::Composite).len(), 3);
        assert_eq!(bindings(ShaderProgram::BloomUpsample).len(), 2);
        assert_eq!(bindings(ShaderProgram::Fxaa), &[color(0)]);
    }

    #[test]
    fn test_compare_function() {
        assert!(CompareFunction::Less.passes(0.2, 0.5));
        assert!(!CompareFunction::Less.passes(0.5, 0.5));
        assert!(CompareFunction::LessEqual.passes(0.5, 0.5));
        assert!(!CompareFunction::Never.passes(0.0, 1.0));
    }
}
