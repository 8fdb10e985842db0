//! Core backend abstraction traits
//!
//! The renderer drives every device through [`GraphicsBackend`], a fixed
//! operation set chosen so that the whole pass sequence can be expressed
//! without touching a specific graphics API.

use crate::backend::types::*;
use crate::BackendType;
use glam::Vec4;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Invalid {0} handle")]
    InvalidHandle(&'static str),
    #[error("No render pass is active")]
    NoActiveRenderPass,
    #[error("No pipeline is bound")]
    NoPipelineBound,
    #[error("Uniform slot {0} is not bound")]
    MissingUniform(u32),
    #[error("Render pass attachments differ in size")]
    AttachmentSizeMismatch,
    #[error("Pipeline '{0}' does not match the bound attachments")]
    IncompatiblePipeline(String),
    #[error("Texture is both sampled and written in the same pass")]
    FeedbackLoop,
    #[error("Texture was not created with {0:?} usage")]
    MissingUsage(TextureUsage),
    #[error("Readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

slotmap::new_key_type! {
    /// Handle to a GPU texture
    pub struct TextureHandle;
    /// Handle to uploaded vertex and index buffers
    pub struct GeometryHandle;
    /// Handle to a render pipeline
    pub struct PipelineHandle;
}

/// Main graphics backend trait
///
/// State set through the `set_*` calls persists until the next
/// `begin_render_pass`, which resets it to defaults.
pub trait GraphicsBackend {
    /// Human readable backend name
    fn name(&self) -> &'static str;

    /// Which device family this is
    fn backend_type(&self) -> BackendType;

    // Resource creation

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload tightly packed texel data in the texture's own format
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()>;

    /// Size of a live texture
    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)>;

    /// Upload vertex and index data for indexed drawing
    fn upload_geometry(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> BackendResult<GeometryHandle>;

    /// Create a render pipeline. Fails when the program cannot be built.
    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle>;

    // Command recording

    /// Begin a render pass, applying the attachments' load operations
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> BackendResult<()>;

    /// End the current render pass
    fn end_render_pass(&mut self) -> BackendResult<()>;

    /// Set viewport
    fn set_viewport(&mut self, viewport: Viewport);

    /// Set the render pipeline
    fn set_pipeline(&mut self, pipeline: PipelineHandle);

    /// Set face culling for subsequent draws
    fn set_cull_mode(&mut self, cull_mode: CullMode);

    /// Set depth test/write state for subsequent draws
    fn set_depth_state(&mut self, state: DepthState);

    /// Set blending for subsequent draws, `None` disables it
    fn set_blend_state(&mut self, state: Option<BlendState>);

    /// Bind a uniform block to `slot`
    fn set_uniforms(&mut self, slot: u32, data: &[u8]);

    /// Bind a texture to `slot`, `None` binds the program's fallback
    fn set_texture(&mut self, slot: u32, texture: Option<TextureHandle>);

    /// Draw indexed geometry, returning the number of indices drawn.
    ///
    /// A destroyed geometry handle yields [`BackendError::InvalidHandle`]
    /// and leaves every attachment untouched.
    fn draw_indexed(&mut self, geometry: GeometryHandle) -> BackendResult<u32>;

    /// Draw a single triangle covering the viewport
    fn draw_fullscreen(&mut self) -> BackendResult<()>;

    /// Submit recorded work to the device
    fn flush(&mut self) -> BackendResult<()>;

    // Readback (blocking)

    /// Read back a whole texture as linear RGBA values, row-major
    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<Vec4>>;

    /// Read back a single texel
    fn read_pixel(&mut self, texture: TextureHandle, x: u32, y: u32) -> BackendResult<Vec4> {
        let (width, height) = self
            .texture_size(texture)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        if x >= width || y >= height {
            return Err(BackendError::ReadbackFailed(format!(
                "texel ({x}, {y}) outside {width}x{height}"
            )));
        }
        let texels = self.read_texture(texture)?;
        texels
            .get((y * width + x) as usize)
            .copied()
            .ok_or_else(|| BackendError::ReadbackFailed("short readback".into()))
    }

    // Resource cleanup

    /// Destroy a texture. Unknown handles are ignored.
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Destroy geometry. Unknown handles are ignored.
    fn destroy_geometry(&mut self, geometry: GeometryHandle);

    // Diagnostics

    /// Number of textures currently allocated
    fn live_texture_count(&self) -> usize;

    /// Number of geometry uploads currently allocated
    fn live_geometry_count(&self) -> usize;
}
