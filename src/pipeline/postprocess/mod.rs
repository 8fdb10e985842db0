//! Post-processing effects
//!
//! Bloom runs first and leaves its result in the frame context; the
//! composite pass then grades the HDR image and optionally runs FXAA.

mod bloom;
mod composite;
pub mod fxaa;
mod settings;

pub use bloom::*;
pub use composite::*;
pub use settings::*;

use crate::backend::{
    BackendResult, DepthState, GraphicsBackend, PipelineHandle, TextureHandle,
};
use crate::render_graph::Framebuffer;
use crate::uniforms::slot;

/// Run one fullscreen program into `target`.
///
/// `textures` are bound by slot; `params` goes to the parameter uniform slot.
pub(crate) fn fullscreen_pass<B: GraphicsBackend>(
    backend: &mut B,
    target: &Framebuffer,
    pipeline: PipelineHandle,
    textures: &[(u32, Option<TextureHandle>)],
    params: &[u8],
) -> BackendResult<()> {
    backend.begin_render_pass(&target.render_pass(Some([0.0, 0.0, 0.0, 1.0]), None))?;
    backend.set_viewport(target.viewport());
    backend.set_pipeline(pipeline);
    backend.set_depth_state(DepthState::DISABLED);
    backend.set_blend_state(None);
    for &(slot, texture) in textures {
        backend.set_texture(slot, texture);
    }
    backend.set_uniforms(slot::PARAMS, params);

    if let Err(err) = backend.draw_fullscreen() {
        let _ = backend.end_render_pass();
        return Err(err);
    }
    backend.end_render_pass()
}

/// `1 / size` of a framebuffer, as shaders expect texel offsets
pub(crate) fn texel_size(framebuffer: &Framebuffer) -> glam::Vec2 {
    let (width, height) = framebuffer.size();
    glam::Vec2::new(1.0 / width.max(1) as f32, 1.0 / height.max(1) as f32)
}
