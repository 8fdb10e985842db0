//! wgpu backend implementation
//!
//! A headless device: render targets are plain textures and the final image
//! is read back instead of presented. Draw state is recorded per draw and the
//! whole pass is replayed into a wgpu render pass at `end_render_pass`, which
//! is where pipeline variants and bind groups are resolved.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::mpsc;

use glam::Vec4;
use slotmap::SlotMap;
use wgpu::util::DeviceExt;

use crate::backend::software::decode_texel;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shaders::{self, CLAMP_SAMPLER_BINDING, REPEAT_SAMPLER_BINDING};
use crate::BackendType;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x3,
    2 => Float32x2,
    3 => Float32x4,
];

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: TextureFormat,
    usage: TextureUsage,
    width: u32,
    height: u32,
}

struct GpuGeometry {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

struct GpuPipeline {
    label: String,
    program: ShaderProgram,
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    color_targets: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
}

/// Fixed-function state baked into a wgpu render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct VariantKey {
    pipeline: PipelineHandle,
    cull_mode: CullMode,
    depth: DepthState,
    blend: Option<BlendState>,
}

#[derive(Clone, Copy)]
enum DrawKind {
    Indexed(GeometryHandle),
    Fullscreen,
}

/// Everything one recorded draw needs at replay time
struct DrawCall {
    key: VariantKey,
    viewport: Option<Viewport>,
    uniforms: Vec<(u32, Vec<u8>)>,
    textures: Vec<(u32, Option<TextureHandle>)>,
    kind: DrawKind,
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

/// Pending render pass with buffered draws
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    state: DrawState,
    draws: Vec<DrawCall>,
}

struct PreparedDraw {
    uniforms: wgpu::BindGroup,
    textures: wgpu::BindGroup,
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Resource storage
    textures: SlotMap<TextureHandle, GpuTexture>,
    geometries: SlotMap<GeometryHandle, GpuGeometry>,
    pipelines: SlotMap<PipelineHandle, GpuPipeline>,
    variants: HashMap<VariantKey, wgpu::RenderPipeline>,

    // Bound for texture slots that have nothing bound
    fallback_color: GpuTexture,
    fallback_depth: GpuTexture,
    clamp_sampler: wgpu::Sampler,
    repeat_sampler: wgpu::Sampler,

    pending_render_pass: Option<PendingRenderPass>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        }
    }

    fn convert_blend_component(component: BlendComponent) -> wgpu::BlendComponent {
        wgpu::BlendComponent {
            src_factor: Self::convert_blend_factor(component.src_factor),
            dst_factor: Self::convert_blend_factor(component.dst_factor),
            operation: wgpu::BlendOperation::Add,
        }
    }

    fn convert_cull_mode(mode: CullMode) -> Option<wgpu::Face> {
        match mode {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }

    /// Whether a texture of `format` may be bound where `binding` expects it
    fn binding_accepts(binding: &TextureBinding, format: TextureFormat) -> bool {
        match binding.sample_type {
            TextureSampleType::Depth => format.is_depth(),
            TextureSampleType::Float { filterable } => match format {
                TextureFormat::Rgba8Unorm
                | TextureFormat::Rgba8UnormSrgb
                | TextureFormat::Rgba16Float => true,
                TextureFormat::Rgba32Float => !filterable,
                TextureFormat::R32Uint | TextureFormat::Depth32Float => false,
            },
        }
    }
}

impl WgpuBackend {
    /// Create a headless device, blocking on adapter selection
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|err| {
            log::error!("wgpu: uncaptured error: {err}");
        }));

        let fallback_color = Self::allocate_texture(
            &device,
            &TextureDescriptor {
                label: Some("fallback_color".into()),
                width: 1,
                height: 1,
                format: TextureFormat::Rgba8Unorm,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            },
        );
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &fallback_color.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );

        // Depth formats cannot be written from the queue, clear with a pass instead
        let fallback_depth = Self::allocate_texture(
            &device,
            &TextureDescriptor {
                label: Some("fallback_depth".into()),
                width: 1,
                height: 1,
                format: TextureFormat::Depth32Float,
                usage: TextureUsage::TEXTURE_BINDING | TextureUsage::RENDER_ATTACHMENT,
            },
        );
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Fallback Clear"),
        });
        {
            let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("fallback_depth_clear"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &fallback_depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
        queue.submit(std::iter::once(encoder.finish()));

        let sampler = |label: &str, address_mode: wgpu::AddressMode| {
            device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some(label),
                address_mode_u: address_mode,
                address_mode_v: address_mode,
                address_mode_w: address_mode,
                mag_filter: wgpu::FilterMode::Linear,
                min_filter: wgpu::FilterMode::Linear,
                mipmap_filter: wgpu::FilterMode::Nearest,
                ..Default::default()
            })
        };
        let clamp_sampler = sampler("clamp_sampler", wgpu::AddressMode::ClampToEdge);
        let repeat_sampler = sampler("repeat_sampler", wgpu::AddressMode::Repeat);

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            textures: SlotMap::with_key(),
            geometries: SlotMap::with_key(),
            pipelines: SlotMap::with_key(),
            variants: HashMap::new(),
            fallback_color,
            fallback_depth,
            clamp_sampler,
            repeat_sampler,
            pending_render_pass: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    fn allocate_texture(device: &wgpu::Device, desc: &TextureDescriptor) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            format: desc.format,
            usage: desc.usage,
            width: desc.width,
            height: desc.height,
        }
    }

    fn pop_error(&self) -> Option<wgpu::Error> {
        pollster::block_on(self.device.pop_error_scope())
    }

    fn state_mut(&mut self) -> Option<&mut DrawState> {
        match self.pending_render_pass.as_mut() {
            Some(pass) => Some(&mut pass.state),
            None => {
                log::trace!("wgpu: state change outside of a render pass ignored");
                None
            }
        }
    }

    /// Validate the current state and record a draw
    fn record_draw(&mut self, kind: DrawKind) -> BackendResult<u32> {
        let pass = self
            .pending_render_pass
            .as_ref()
            .ok_or(BackendError::NoActiveRenderPass)?;
        let state = &pass.state;
        let pipeline_handle = state.pipeline.ok_or(BackendError::NoPipelineBound)?;
        let pipeline = self
            .pipelines
            .get(pipeline_handle)
            .ok_or(BackendError::InvalidHandle("pipeline"))?;

        let index_count = match kind {
            DrawKind::Indexed(handle) => {
                if !pipeline.program.uses_vertex_input() {
                    return Err(BackendError::IncompatiblePipeline(pipeline.label.clone()));
                }
                self.geometries
                    .get(handle)
                    .ok_or(BackendError::InvalidHandle("geometry"))?
                    .index_count
            }
            DrawKind::Fullscreen => 3,
        };

        let mut uniforms = Vec::with_capacity(pipeline.program.uniform_slots().len());
        for &slot in pipeline.program.uniform_slots() {
            let data = state
                .uniforms
                .get(&slot)
                .ok_or(BackendError::MissingUniform(slot))?;
            uniforms.push((slot, data.clone()));
        }

        let color_formats: Vec<TextureFormat> = pass
            .descriptor
            .color_attachments
            .iter()
            .map(|a| {
                self.textures
                    .get(a.texture)
                    .map(|t| t.format)
                    .ok_or(BackendError::InvalidHandle("texture"))
            })
            .collect::<BackendResult<_>>()?;
        let depth_handle = pass.descriptor.depth_attachment.map(|d| d.texture);
        let depth_format = match depth_handle {
            Some(handle) => Some(
                self.textures
                    .get(handle)
                    .ok_or(BackendError::InvalidHandle("texture"))?
                    .format,
            ),
            None => None,
        };
        if color_formats != pipeline.color_targets || depth_format != pipeline.depth_format {
            return Err(BackendError::IncompatiblePipeline(pipeline.label.clone()));
        }

        let attachments: Vec<TextureHandle> = pass
            .descriptor
            .color_attachments
            .iter()
            .map(|a| a.texture)
            .chain(depth_handle)
            .collect();
        if state
            .textures
            .values()
            .flatten()
            .any(|handle| attachments.contains(handle))
        {
            return Err(BackendError::FeedbackLoop);
        }
        let unsampleable = state
            .textures
            .values()
            .flatten()
            .filter_map(|handle| self.textures.get(*handle))
            .any(|texture| !texture.usage.contains(TextureUsage::TEXTURE_BINDING));
        if unsampleable {
            return Err(BackendError::MissingUsage(TextureUsage::TEXTURE_BINDING));
        }

        let textures = pipeline
            .program
            .texture_bindings()
            .iter()
            .map(|binding| (binding.slot, state.textures.get(&binding.slot).copied().flatten()))
            .collect();
        let draw = DrawCall {
            key: VariantKey {
                pipeline: pipeline_handle,
                cull_mode: state.cull_mode,
                depth: state.depth,
                blend: state.blend,
            },
            viewport: state.viewport,
            uniforms,
            textures,
            kind,
        };

        if let Some(pass) = self.pending_render_pass.as_mut() {
            pass.draws.push(draw);
        }
        Ok(index_count)
    }

    /// Build the wgpu pipeline for a state combination if it does not exist yet
    fn ensure_variant(&mut self, key: VariantKey) -> BackendResult<()> {
        if self.variants.contains_key(&key) {
            return Ok(());
        }
        let pipeline = self
            .pipelines
            .get(key.pipeline)
            .ok_or(BackendError::InvalidHandle("pipeline"))?;

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = pipeline
            .color_targets
            .iter()
            .map(|&format| {
                // Integer targets cannot blend
                let blend = key.blend.filter(|_| format != TextureFormat::R32Uint);
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(format),
                    blend: blend.map(|b| wgpu::BlendState {
                        color: Self::convert_blend_component(b.color),
                        alpha: Self::convert_blend_component(b.alpha),
                    }),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let depth_stencil = pipeline.depth_format.map(|format| wgpu::DepthStencilState {
            format: Self::convert_texture_format(format),
            depth_write_enabled: key.depth.write_enabled,
            depth_compare: if key.depth.test_enabled {
                Self::convert_compare_function(key.depth.compare)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &VERTEX_ATTRIBUTES,
        }];
        let buffers: &[wgpu::VertexBufferLayout] = if pipeline.program.uses_vertex_input() {
            &vertex_buffers
        } else {
            &[]
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let render_pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(pipeline.label.as_str()),
                layout: Some(&pipeline.layout),
                vertex: wgpu::VertexState {
                    module: &pipeline.module,
                    entry_point: "vs_main",
                    buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: (!color_targets.is_empty()).then(|| wgpu::FragmentState {
                    module: &pipeline.module,
                    entry_point: "fs_main",
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: Self::convert_cull_mode(key.cull_mode),
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            });
        if let Some(err) = self.pop_error() {
            return Err(BackendError::PipelineCreationFailed(format!(
                "'{}': {err}",
                pipeline.label
            )));
        }

        log::trace!("wgpu: built variant {:?}", key);
        self.variants.insert(key, render_pipeline);
        Ok(())
    }

    fn prepare_draw(&self, draw: &DrawCall) -> BackendResult<PreparedDraw> {
        let pipeline = self
            .pipelines
            .get(draw.key.pipeline)
            .ok_or(BackendError::InvalidHandle("pipeline"))?;

        let buffers: Vec<(u32, wgpu::Buffer)> = draw
            .uniforms
            .iter()
            .map(|(slot, data)| {
                let mut contents = data.clone();
                contents.resize(data.len().next_multiple_of(16).max(16), 0);
                let buffer = self
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("uniforms"),
                        contents: &contents,
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                (*slot, buffer)
            })
            .collect();
        let uniform_entries: Vec<wgpu::BindGroupEntry> = buffers
            .iter()
            .map(|(slot, buffer)| wgpu::BindGroupEntry {
                binding: *slot,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let uniforms = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("uniform_bind_group"),
            layout: &pipeline.uniform_layout,
            entries: &uniform_entries,
        });

        let mut texture_entries: Vec<wgpu::BindGroupEntry> = Vec::new();
        for binding in pipeline.program.texture_bindings() {
            let bound = draw
                .textures
                .iter()
                .find(|(slot, _)| *slot == binding.slot)
                .and_then(|(_, handle)| *handle);
            let fallback = match binding.sample_type {
                TextureSampleType::Depth => &self.fallback_depth,
                TextureSampleType::Float { .. } => &self.fallback_color,
            };
            let texture = match bound.map(|handle| (handle, self.textures.get(handle))) {
                Some((_, Some(texture))) if Self::binding_accepts(binding, texture.format) => texture,
                Some((handle, Some(texture))) => {
                    log::warn!(
                        "wgpu: {:?} texture {handle:?} cannot be sampled at slot {}, using the fallback",
                        texture.format,
                        binding.slot
                    );
                    fallback
                }
                Some((handle, None)) => {
                    log::warn!("wgpu: texture {handle:?} at slot {} no longer exists", binding.slot);
                    fallback
                }
                None => fallback,
            };
            texture_entries.push(wgpu::BindGroupEntry {
                binding: binding.slot,
                resource: wgpu::BindingResource::TextureView(&texture.view),
            });
        }
        texture_entries.push(wgpu::BindGroupEntry {
            binding: CLAMP_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&self.clamp_sampler),
        });
        texture_entries.push(wgpu::BindGroupEntry {
            binding: REPEAT_SAMPLER_BINDING,
            resource: wgpu::BindingResource::Sampler(&self.repeat_sampler),
        });
        let textures = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texture_bind_group"),
            layout: &pipeline.texture_layout,
            entries: &texture_entries,
        });

        Ok(PreparedDraw { uniforms, textures })
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Wgpu
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max || desc.height > max {
            return Err(BackendError::TextureCreationFailed(format!(
                "{}x{} is outside 1..={max}",
                desc.width, desc.height
            )));
        }

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let texture = Self::allocate_texture(&self.device, desc);
        if self.pop_error().is_some() {
            return Err(BackendError::OutOfMemory);
        }

        let handle = self.textures.insert(texture);
        log::trace!(
            "wgpu: created texture {:?} {:?} {}x{} {:?}",
            handle,
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(handle)
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8]) -> BackendResult<()> {
        let tex = self
            .textures
            .get(texture)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        let bytes_per_row = tex.width * tex.format.bytes_per_pixel();
        let expected = bytes_per_row as usize * tex.height as usize;
        if data.len() != expected {
            return Err(BackendError::TextureCreationFailed(format!(
                "expected {expected} bytes of texel data, got {}",
                data.len()
            )));
        }
        if !tex.usage.contains(TextureUsage::COPY_DST) {
            return Err(BackendError::MissingUsage(TextureUsage::COPY_DST));
        }
        if tex.format.is_depth() {
            return Err(BackendError::TextureCreationFailed(
                "depth textures do not accept uploads".into(),
            ));
        }

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(tex.height),
            },
            wgpu::Extent3d {
                width: tex.width,
                height: tex.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
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

        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("vertices"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("indices"),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let handle = self.geometries.insert(GpuGeometry {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        });
        Ok(handle)
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> BackendResult<PipelineHandle> {
        let program = desc.program;
        let label = desc
            .label
            .clone()
            .unwrap_or_else(|| program.label().to_string());
        if desc.color_targets.len() != program.color_target_count()
            || desc.color_targets.iter().any(TextureFormat::is_depth)
            || desc.depth_format.is_some_and(|f| !f.is_depth())
            || (program.writes_depth() && desc.depth_format.is_none())
        {
            return Err(BackendError::PipelineCreationFailed(format!(
                "'{label}' targets do not match the {} program",
                program.label()
            )));
        }

        // naga first, so a bad shader is an error instead of a device panic
        shaders::validate_wgsl(&label, desc.source)?;

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = program
            .uniform_slots()
            .iter()
            .map(|&slot| wgpu::BindGroupLayoutEntry {
                binding: slot,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();

        let mut texture_entries: Vec<wgpu::BindGroupLayoutEntry> = program
            .texture_bindings()
            .iter()
            .map(|binding| wgpu::BindGroupLayoutEntry {
                binding: binding.slot,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: match binding.sample_type {
                        TextureSampleType::Float { filterable } => {
                            wgpu::TextureSampleType::Float { filterable }
                        }
                        TextureSampleType::Depth => wgpu::TextureSampleType::Depth,
                    },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            })
            .collect();
        for binding in [CLAMP_SAMPLER_BINDING, REPEAT_SAMPLER_BINDING] {
            texture_entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            });
        }

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label.as_str()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(desc.source)),
            });
        let uniform_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform_layout"),
                entries: &uniform_entries,
            });
        let texture_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texture_layout"),
                entries: &texture_entries,
            });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label.as_str()),
                bind_group_layouts: &[&uniform_layout, &texture_layout],
                push_constant_ranges: &[],
            });
        if let Some(err) = self.pop_error() {
            return Err(BackendError::ShaderCreationFailed(format!("'{label}': {err}")));
        }

        let handle = self.pipelines.insert(GpuPipeline {
            label,
            program,
            module,
            layout,
            uniform_layout,
            texture_layout,
            color_targets: desc.color_targets.clone(),
            depth_format: desc.depth_format,
        });

        // Build the default state now so pipeline errors surface at creation
        let depth = if desc.depth_format.is_some() {
            DepthState::READ_WRITE
        } else {
            DepthState::DISABLED
        };
        let key = VariantKey {
            pipeline: handle,
            cull_mode: CullMode::default(),
            depth,
            blend: None,
        };
        if let Err(err) = self.ensure_variant(key) {
            self.pipelines.remove(handle);
            return Err(err);
        }
        Ok(handle)
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) -> BackendResult<()> {
        if self.pending_render_pass.is_some() {
            log::warn!("wgpu: begin_render_pass while a pass is active, dropping it");
            self.pending_render_pass = None;
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
            if !texture.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
                return Err(BackendError::MissingUsage(TextureUsage::RENDER_ATTACHMENT));
            }
            let dims = (texture.width, texture.height);
            if *size.get_or_insert(dims) != dims {
                return Err(BackendError::AttachmentSizeMismatch);
            }
        }

        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            state: DrawState::default(),
            draws: Vec::new(),
        });
        Ok(())
    }

    fn end_render_pass(&mut self) -> BackendResult<()> {
        let pending = self
            .pending_render_pass
            .take()
            .ok_or(BackendError::NoActiveRenderPass)?;

        for draw in &pending.draws {
            self.ensure_variant(draw.key)?;
        }
        let prepared: Vec<PreparedDraw> = pending
            .draws
            .iter()
            .map(|draw| self.prepare_draw(draw))
            .collect::<BackendResult<_>>()?;

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pending
            .descriptor
            .color_attachments
            .iter()
            .map(|att| {
                let texture = self
                    .textures
                    .get(att.texture)
                    .ok_or(BackendError::InvalidHandle("texture"))?;
                Ok::<_, BackendError>(Some(wgpu::RenderPassColorAttachment {
                    view: &texture.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match att.load_op {
                            LoadOp::Clear(color) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: color[0] as f64,
                                g: color[1] as f64,
                                b: color[2] as f64,
                                a: color[3] as f64,
                            }),
                            LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                }))
            })
            .collect::<BackendResult<_>>()?;

        let depth_attachment = match &pending.descriptor.depth_attachment {
            Some(att) => {
                let texture = self
                    .textures
                    .get(att.texture)
                    .ok_or(BackendError::InvalidHandle("texture"))?;
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &texture.view,
                    depth_ops: Some(wgpu::Operations {
                        load: match att.clear {
                            Some(value) => wgpu::LoadOp::Clear(value),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            }
            None => None,
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: pending.descriptor.label.as_deref(),
            });
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (draw, bind_groups) in pending.draws.iter().zip(&prepared) {
                let Some(pipeline) = self.variants.get(&draw.key) else {
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                if let Some(viewport) = draw.viewport {
                    render_pass.set_viewport(
                        viewport.x,
                        viewport.y,
                        viewport.width,
                        viewport.height,
                        0.0,
                        1.0,
                    );
                }
                render_pass.set_bind_group(0, &bind_groups.uniforms, &[]);
                render_pass.set_bind_group(1, &bind_groups.textures, &[]);
                match draw.kind {
                    DrawKind::Indexed(handle) => {
                        // Destroyed after recording: nothing to draw
                        let Some(geometry) = self.geometries.get(handle) else {
                            continue;
                        };
                        render_pass.set_vertex_buffer(0, geometry.vertex_buffer.slice(..));
                        render_pass
                            .set_index_buffer(geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(0..geometry.index_count, 0, 0..1);
                    }
                    DrawKind::Fullscreen => render_pass.draw(0..3, 0..1),
                }
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        log::trace!(
            "wgpu: submitted pass {:?} with {} draws",
            pending.descriptor.label,
            pending.draws.len()
        );
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
        self.record_draw(DrawKind::Indexed(geometry))
    }

    fn draw_fullscreen(&mut self) -> BackendResult<()> {
        self.record_draw(DrawKind::Fullscreen).map(|_| ())
    }

    fn flush(&mut self) -> BackendResult<()> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<Vec4>> {
        let tex = self
            .textures
            .get(texture)
            .ok_or(BackendError::InvalidHandle("texture"))?;
        if !tex.usage.contains(TextureUsage::COPY_SRC) {
            return Err(BackendError::MissingUsage(TextureUsage::COPY_SRC));
        }

        let bpp = tex.format.bytes_per_pixel();
        let unpadded = tex.width * bpp;
        let padded = unpadded.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: padded as u64 * tex.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &tex.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: if tex.format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(tex.height),
                },
            },
            wgpu::Extent3d {
                width: tex.width,
                height: tex.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let texels = {
            let data = slice.get_mapped_range();
            let mut texels = Vec::with_capacity((tex.width * tex.height) as usize);
            for row in data.chunks_exact(padded as usize) {
                texels.extend(
                    row[..unpadded as usize]
                        .chunks_exact(bpp as usize)
                        .map(|bytes| decode_texel(tex.format, bytes)),
                );
            }
            texels
        };
        buffer.unmap();
        Ok(texels)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(removed) = self.textures.remove(texture) {
            removed.texture.destroy();
            log::trace!("wgpu: destroyed texture {:?}", texture);
        }
    }

    fn destroy_geometry(&mut self, geometry: GeometryHandle) {
        if let Some(removed) = self.geometries.remove(geometry) {
            removed.vertex_buffer.destroy();
            removed.index_buffer.destroy();
        }
    }

    fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn live_geometry_count(&self) -> usize {
        self.geometries.len()
    }
}
