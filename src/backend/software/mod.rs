//! CPU reference device
//!
//! Executes every program on the CPU with the same formulas the WGSL sources
//! use. It needs no GPU, which makes it the device the test suite renders
//! with, and it can emulate allocation limits to exercise failure paths.

mod programs;
mod raster;
mod texture;

use std::collections::HashMap;

use glam::{Vec2, Vec4};
use slotmap::SlotMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::BackendType;

use programs::{Bindings, BoundProgram};
use raster::{clip_near, rasterize_triangle, ClipVertex};
use texture::{RenderTarget, SoftTexture};

pub use programs::equirect_uv;
pub use texture::{decode_texel, TexelView, Wrap};

/// Allocation limits the software device enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareLimits {
    /// Largest accepted width or height
    pub max_texture_dimension: u32,
    /// Total texture memory, `None` for unlimited
    pub memory_budget_bytes: Option<u64>,
}

impl Default for SoftwareLimits {
    fn default() -> Self {
        Self {
            max_texture_dimension: 16384,
            memory_budget_bytes: None,
        }
    }
}

struct SoftGeometry {
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
}

struct SoftPipeline {
    label: String,
    program: ShaderProgram,
    color_targets: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
}

#[derive(Default)]
struct DrawState {
    viewport: Option<Viewport>,
    pipeline: Option<PipelineHandle>,
    cull_mode: CullMode,
    depth: DepthState,
    blend: Option<BlendState>,
    uniforms: HashMap<u32, Vec<u8>>,
    textures: HashMap<u32, Option<TextureHandle>>,
}

struct ActivePass {
    descriptor: RenderPassDescriptor,
    state: DrawState,
}

enum DrawKind {
    Indexed(GeometryHandle),
    Fullscreen,
}

/// Software backend implementation
pub struct SoftwareBackend {
    textures: SlotMap<TextureHandle, SoftTexture>,
    geometries: SlotMap<GeometryHandle, SoftGeometry>,
    pipelines: SlotMap<PipelineHandle, SoftPipeline>,
    limits: SoftwareLimits,
    allocated_bytes: u64,
    pass: Option<ActivePass>,
}

impl SoftwareBackend {
    pub fn new() -> Self {
        Self::with_limits(SoftwareLimits::default())
    }

    pub fn with_limits(limits: SoftwareLimits) -> Self {
        log::info!("Software backend created ({limits:?})");
        Self {
            textures: SlotMap::with_key(),
            geometries: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            limits,
            allocated_bytes: 0,
            pass: None,
        }
    }

    pub fn limits(&self) -> SoftwareLimits {
        self.limits
    }

    /// Change the limits for subsequent allocations.
    pub fn set_limits(&mut self, limits: SoftwareLimits) {
        self.limits = limits;
    }

    /// Bytes of texture memory currently allocated
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Borrow a texture's texels without copying
    pub fn texture_view(&self, texture: TextureHandle) -> Option<TexelView<'_>> {
        self.textures.get(texture).map(SoftTexture::view)
    }

    fn state_mut(&mut self) -> Option<&mut DrawState> {
        match self.pass.as_mut() {
            Some(pass) => Some(&mut pass.state),
            None => {
                log::trace!("Software: state change outside of a render pass ignored");
                None
            }
        }
    }

    fn draw(&mut self, kind: DrawKind) -> BackendResult<u32> {
        let Self {
            textures,
            geometries,
            pipelines,
            pass,
            ..
        } = self;
        let pass = pass.as_ref().ok_or(BackendError::NoActiveRenderPass)?;
        let state = &pass.state;
        let pipeline_handle = state.pipeline.ok_or(BackendError::NoPipelineBound)?;
        let pipeline = pipelines
            .get(pipeline_handle)
            .ok_or(BackendError::InvalidHandle("pipeline"))?;
        let program = BoundProgram::bind(pipeline.program, &state.uniforms)?;

        let geometry = match kind {
            DrawKind::Indexed(handle) => {
                if !pipeline.program.uses_vertex_input() {
                    return Err(BackendError::IncompatiblePipeline(pipeline.label.clone()));
                }
                Some(
                    geometries
                        .get(handle)
                        .ok_or(BackendError::InvalidHandle("geometry"))?,
                )
            }
            DrawKind::Fullscreen => None,
        };

        let color_handles: Vec<TextureHandle> = pass
            .descriptor
            .color_attachments
            .iter()
            .map(|attachment| attachment.texture)
            .collect();
        let depth_handle = pass.descriptor.depth_attachment.map(|d| d.texture);

        let mut formats = Vec::with_capacity(color_handles.len());
        for handle in &color_handles {
            let texture = textures
                .get(*handle)
                .ok_or(BackendError::InvalidHandle("texture"))?;
            formats.push(texture.format);
        }
        let depth_format = match depth_handle {
            Some(handle) => Some(
                textures
                    .get(handle)
                    .ok_or(BackendError::InvalidHandle("texture"))?
                    .format,
            ),
            None => None,
        };
        let depth_matches = match pipeline.depth_format {
            Some(format) => depth_format == Some(format),
            None => true,
        };
        if formats != pipeline.color_targets || !depth_matches {
            return Err(BackendError::IncompatiblePipeline(pipeline.label.clone()));
        }

        let bound: Vec<(u32, TextureHandle)> = state
            .textures
            .iter()
            .filter_map(|(slot, handle)| handle.map(|h| (*slot, h)))
            .collect();
        if bound
            .iter()
            .any(|(_, h)| color_handles.contains(h) || depth_handle == Some(*h))
        {
            return Err(BackendError::FeedbackLoop);
        }
        for (_, handle) in &bound {
            if let Some(texture) = textures.get(*handle) {
                texture.require(TextureUsage::TEXTURE_BINDING)?;
            }
        }

        // Move attachment storage out so the sampled textures can stay borrowed.
        let mut targets: Vec<RenderTarget> = Vec::with_capacity(color_handles.len());
        for handle in &color_handles {
            if let Some(texture) = textures.get_mut(*handle) {
                targets.push(RenderTarget {
                    width: texture.width,
                    height: texture.height,
                    format: texture.format,
                    texels: std::mem::take(&mut texture.texels),
                });
            }
        }
        let mut depth_target = depth_handle.and_then(|handle| {
            textures.get_mut(handle).map(|texture| RenderTarget {
                width: texture.width,
                height: texture.height,
                format: texture.format,
                texels: std::mem::take(&mut texture.texels),
            })
        });

        let bounds = targets
            .first()
            .or(depth_target.as_ref())
            .map_or((0, 0), |t| (t.width, t.height));
        let viewport = state
            .viewport
            .unwrap_or_else(|| Viewport::full(bounds.0, bounds.1));

        let mut bindings = Bindings::default();
        for (slot, handle) in &bound {
            match textures.get(*handle) {
                Some(texture) => bindings.bind(*slot, texture.view()),
                None => log::warn!("Software: texture bound to slot {slot} no longer exists"),
            }
        }

        let blend = state.blend;
        let write = |target: &mut RenderTarget, x: u32, y: u32, value: Vec4| {
            let value = match &blend {
                Some(blend) => apply_blend(blend, value, target.get(x, y)),
                None => value,
            };
            target.set(x, y, value);
        };

        let index_count = match geometry {
            Some(geometry) => {
                let clip: Vec<ClipVertex> = geometry
                    .vertices
                    .iter()
                    .map(|vertex| program.vertex(vertex))
                    .collect();
                for triangle in geometry.indices.chunks_exact(3) {
                    let polygon = clip_near([
                        clip[triangle[0] as usize],
                        clip[triangle[1] as usize],
                        clip[triangle[2] as usize],
                    ]);
                    for k in 1..polygon.len().saturating_sub(1) {
                        rasterize_triangle(
                            [&polygon[0], &polygon[k], &polygon[k + 1]],
                            &viewport,
                            bounds,
                            state.cull_mode,
                            |fragment| {
                                if let Some(depth) = depth_target.as_mut() {
                                    if state.depth.test_enabled {
                                        let stored = depth.get(fragment.x, fragment.y).x;
                                        if !state.depth.compare.passes(fragment.depth, stored) {
                                            return;
                                        }
                                    }
                                    if state.depth.write_enabled {
                                        depth.set(
                                            fragment.x,
                                            fragment.y,
                                            Vec4::new(fragment.depth, 0.0, 0.0, 0.0),
                                        );
                                    }
                                }
                                if targets.is_empty() {
                                    return;
                                }
                                let outputs = program.shade_fragment(&fragment, &bindings);
                                for (target, value) in targets.iter_mut().zip(outputs) {
                                    write(target, fragment.x, fragment.y, value);
                                }
                            },
                        );
                    }
                }
                geometry.indices.len() as u32
            }
            None => {
                let x0 = viewport.x.max(0.0) as u32;
                let y0 = viewport.y.max(0.0) as u32;
                let x1 = ((viewport.x + viewport.width).ceil().max(0.0) as u32).min(bounds.0);
                let y1 = ((viewport.y + viewport.height).ceil().max(0.0) as u32).min(bounds.1);
                let size = Vec2::new(viewport.width.max(1.0), viewport.height.max(1.0));
                for y in y0..y1 {
                    for x in x0..x1 {
                        let uv = (Vec2::new(x as f32 + 0.5, y as f32 + 0.5)
                            - Vec2::new(viewport.x, viewport.y))
                            / size;
                        let value = program.shade_pixel(x, y, uv, &bindings);
                        for target in targets.iter_mut() {
                            write(target, x, y, value);
                        }
                    }
                }
                3
            }
        };

        drop(bindings);
        for (handle, target) in color_handles.iter().zip(targets) {
            if let Some(texture) = textures.get_mut(*handle) {
                texture.texels = target.texels;
            }
        }
        if let (Some(handle), Some(target)) = (depth_handle, depth_target) {
            if let Some(texture) = textures.get_mut(handle) {
                texture.texels = target.texels;
            }
        }

        Ok(index_count)
    }
}

impl Default for SoftwareBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_blend(state: &BlendState, src: Vec4, dst: Vec4) -> Vec4 {
    let factor = |f: BlendFactor| match f {
        BlendFactor::Zero => 0.0,
        BlendFactor::One => 1.0,
        BlendFactor::SrcAlpha => src.w,
        BlendFactor::OneMinusSrcAlpha => 1.0 - src.w,
    };
    let rgb = src.truncate() * factor(state.color.src_factor)
        + dst.truncate() * factor(state.color.dst_factor);
    let alpha = src.w * factor(state.alpha.src_factor) + dst.w * factor(state.alpha.dst_factor);
    rgb.extend(alpha)
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "zero-sized texture {}x{}",
                desc.width, desc.height
            )));
        }
        let max = self.limits.max_texture_dimension;
        if desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} exceeds the maximum dimension {max}",
                desc.width, desc.height
            )));
        }
        let size = desc.byte_size();
        if let Some(budget) = self.limits.memory_budget_bytes {
            if self.allocated_bytes + size > budget {
                log::warn!(
                    "Software: texture {:?} ({size} bytes) exceeds the memory budget",
                    desc.label
                );
                return Err(BackendError::OutOfMemory);
            }
        }

        let texture = SoftTexture::new(desc);
        self.allocated_bytes += size;
        let handle = self.textures.insert(texture);
        log::trace!(
            "Software: created texture {:?} {:?} {}x{} {:?}",
            handle,
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let texture = self
            .textures
            .get_mut(texture)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        texture.require(TextureUsage::COPY_DST)?;
        texture.write_bytes(data)
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<(u32, u32)> {
        self.textures.get(texture).map(|t| (t.width, t.height))
    }

    fn upload_geometry(
        &mut self,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> BackendResult<GeometryHandle> {
        if let Some(index) = indices.iter().find(|i| **i as usize >= vertices.len()) {
            return Err(BackendError::BufferCreationFailed(format!(
                "index {index} out of range for {} vertices",
                vertices.len()
            )));
        }
        let handle = self.geometries.insert(SoftGeometry {
            vertices: vertices.to_vec(),
            indices: indices.to_vec(),
        });
        log::trace!(
            "Software: uploaded geometry {:?} ({} vertices, {} indices)",
            handle,
            vertices.len(),
            indices.len()
        );
        Ok(handle)
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        let program = desc.program;
        let label = desc
            .label
            .clone()
            .unwrap_or_else(|| program.label().to_string());
        if desc.color_targets.len() != program.color_target_count() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "'{label}' declares {} color targets, program writes {}",
                desc.color_targets.len(),
                program.color_target_count()
            )));
        }
        if desc.color_targets.iter().any(TextureFormat::is_depth) {
            return Err(BackendError::PipelineCreationFailed(format!(
                "'{label}' uses a depth format as a color target"
            )));
        }
        match desc.depth_format {
            Some(format) if !format.is_depth() => {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "'{label}' depth target {format:?} is not a depth format"
                )));
            }
            None if program.writes_depth() => {
                return Err(BackendError::PipelineCreationFailed(format!(
                    "'{label}' needs a depth target"
                )));
            }
            _ => {}
        }
        let handle = self.pipelines.insert(SoftPipeline {
            label,
            program,
            color_targets: desc.color_targets.clone(),
            depth_format: desc.depth_format,
        });
        log::trace!("Software: created pipeline {:?} for {:?}", handle, program);
        Ok(handle)
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> BackendResult<()> {
        if self.pass.is_some() {
            log::warn!("Software: begin_render_pass while a pass is active, ending it");
            self.pass = None;
        }

        let mut size = None;
        let attachments = desc
            .color_attachments
            .iter()
            .map(|a| a.texture)
            .chain(desc.depth_attachment.map(|d| d.texture));
        for handle in attachments {
            let texture = self
                .textures
                .get(handle)
                .ok_or(BackendError::InvalidHandle("texture"))?;
            texture.require(TextureUsage::RENDER_ATTACHMENT)?;
            let dims = (texture.width, texture.height);
            if *size.get_or_insert(dims) != dims {
                return Err(BackendError::AttachmentSizeMismatch);
            }
        }

        for attachment in &desc.color_attachments {
            if let LoadOp::Clear(color) = attachment.load_op {
                if let Some(texture) = self.textures.get_mut(attachment.texture) {
                    texture.clear(Vec4::from_array(color));
                }
            }
        }
        if let Some(depth) = &desc.depth_attachment {
            if let Some(value) = depth.clear {
                if let Some(texture) = self.textures.get_mut(depth.texture) {
                    texture.clear(Vec4::new(value, 0.0, 0.0, 0.0));
                }
            }
        }

        log::trace!("Software: begin render pass {:?}", desc.label);
        self.pass = Some(ActivePass {
            descriptor: desc.clone(),
            state: DrawState::default(),
        });
        Ok(())
    }

    fn end_render_pass(&mut self) -> BackendResult<()> {
        let pass = self.pass.take().ok_or(BackendError::NoActiveRenderPass)?;
        log::trace!("Software: end render pass {:?}", pass.descriptor.label);
        Ok(())
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        if let Some(state) = self.state_mut() {
            state.viewport = Some(viewport);
        }
    }

    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        if let Some(state) = self.state_mut() {
            state.pipeline = Some(pipeline);
        }
    }

    fn set_cull_mode(&mut self, cull_mode: CullMode) {
        if let Some(state) = self.state_mut() {
            state.cull_mode = cull_mode;
        }
    }

    fn set_depth_state(&mut self, depth: DepthState) {
        if let Some(state) = self.state_mut() {
            state.depth = depth;
        }
    }

    fn set_blend_state(&mut self, blend: Option<BlendState>) {
        if let Some(state) = self.state_mut() {
            state.blend = blend;
        }
    }

    fn set_uniforms(&mut self, slot: u32, data: &[u8]) {
        if let Some(state) = self.state_mut() {
            state.uniforms.insert(slot, data.to_vec());
        }
    }

    fn set_texture(&mut self, slot: u32, texture: Option<TextureHandle>) {
        if let Some(state) = self.state_mut() {
            state.textures.insert(slot, texture);
        }
    }

    fn draw_indexed(&mut self, geometry: GeometryHandle) -> BackendResult<u32> {
        self.draw(DrawKind::Indexed(geometry))
    }

    fn draw_fullscreen(&mut self) -> BackendResult<()> {
        self.draw(DrawKind::Fullscreen).map(|_| ())
    }

    fn flush(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<Vec4>> {
        let texture = self
            .textures
            .get(texture)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        texture.require(TextureUsage::COPY_SRC)?;
        Ok(texture.texels.clone())
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(removed) = self.textures.remove(texture) {
            self.allocated_bytes = self.allocated_bytes.saturating_sub(removed.byte_size());
            log::trace!("Software: destroyed texture {:?}", texture);
        }
    }

    fn destroy_geometry(&mut self, geometry: GeometryHandle) {
        if self.geometries.remove(geometry).is_some() {
            log::trace!("Software: destroyed geometry {:?}", geometry);
        }
    }

    fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn live_geometry_count(&self) -> usize {
        self.geometries.len()
    }
}
