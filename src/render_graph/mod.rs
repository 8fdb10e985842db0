//! Render graph data
//!
//! The framebuffers every pass reads and writes, owned per viewport and
//! handed to the passes by reference for the duration of one frame.

mod framebuffer;
mod graph_data;

pub use framebuffer::*;
pub use graph_data::*;

use crate::backend::TextureFormat;

/// Lighting and bloom targets
pub const HDR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
/// Composite output, ready for presentation
pub const DISPLAY_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;
pub const SHADOW_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// G-buffer color attachments, indexed by [`gbuffer_target`]
pub const GBUFFER_FORMATS: [TextureFormat; 5] = [
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
    TextureFormat::Rgba16Float,
    TextureFormat::R32Uint,
];

/// Attachment indices of the G-buffer
pub mod gbuffer_target {
    /// rgb = albedo
    pub const ALBEDO: usize = 0;
    /// rg = octahedral normal
    pub const NORMAL: usize = 1;
    /// r = metallic, g = roughness, b = ao
    pub const MATERIAL: usize = 2;
    /// rgb = emissive color, a = intensity
    pub const EMISSIVE: usize = 3;
    /// Picking id, 0 for none
    pub const ENTITY_ID: usize = 4;
}
