//! Framebuffers: a fixed set of attachments created and destroyed together

use crate::backend::{
    BackendResult, ColorAttachment, DepthAttachment, GraphicsBackend, LoadOp, RenderPassDescriptor,
    TextureDescriptor, TextureFormat, TextureHandle, Viewport,
};

/// Attachment layout of a framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferSpec {
    pub label: &'static str,
    pub color_formats: &'static [TextureFormat],
    pub depth_format: Option<TextureFormat>,
}

/// Render targets of one framebuffer, all the same size
#[derive(Debug)]
pub struct Framebuffer {
    label: String,
    spec: FramebufferSpec,
    width: u32,
    height: u32,
    /// One texture per entry of `spec.color_formats`, in order
    pub color: Vec<TextureHandle>,
    pub depth: Option<TextureHandle>,
}

impl Framebuffer {
    /// Create every attachment. When one fails, the ones already created are
    /// destroyed before the error is returned.
    pub fn create<B: GraphicsBackend>(
        backend: &mut B,
        label: impl Into<String>,
        spec: FramebufferSpec,
        width: u32,
        height: u32,
    ) -> BackendResult<Self> {
        let label = label.into();
        let mut framebuffer = Self {
            label,
            spec,
            width,
            height,
            color: Vec::with_capacity(spec.color_formats.len()),
            depth: None,
        };

        for (index, format) in spec.color_formats.iter().enumerate() {
            let desc = TextureDescriptor::render_target(
                &format!("{}_color{index}", framebuffer.label),
                width,
                height,
                *format,
            );
            match backend.create_texture(&desc) {
                Ok(texture) => framebuffer.color.push(texture),
                Err(err) => {
                    framebuffer.destroy(backend);
                    return Err(err);
                }
            }
        }

        if let Some(format) = spec.depth_format {
            let desc = TextureDescriptor::render_target(
                &format!("{}_depth", framebuffer.label),
                width,
                height,
                format,
            );
            match backend.create_texture(&desc) {
                Ok(texture) => framebuffer.depth = Some(texture),
                Err(err) => {
                    framebuffer.destroy(backend);
                    return Err(err);
                }
            }
        }

        Ok(framebuffer)
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        for texture in self.color {
            backend.destroy_texture(texture);
        }
        if let Some(depth) = self.depth {
            backend.destroy_texture(depth);
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn spec(&self) -> &FramebufferSpec {
        &self.spec
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.width, self.height)
    }

    /// Number of device textures this framebuffer owns
    pub fn texture_count(&self) -> usize {
        self.color.len() + usize::from(self.depth.is_some())
    }

    /// Every texture, color attachments first
    pub fn textures(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.color.iter().copied().chain(self.depth)
    }

    /// Pass descriptor writing every attachment. `clear` applies to all color
    /// attachments, `clear_depth` to the depth attachment.
    pub fn render_pass(&self, clear: Option<[f32; 4]>, clear_depth: Option<f32>) -> RenderPassDescriptor {
        let load_op = clear.map_or(LoadOp::Load, LoadOp::Clear);
        RenderPassDescriptor {
            label: Some(self.label.clone()),
            color_attachments: self
                .color
                .iter()
                .map(|&texture| ColorAttachment { texture, load_op })
                .collect(),
            depth_attachment: self.depth.map(|texture| DepthAttachment {
                texture,
                clear: clear_depth,
            }),
        }
    }
}
