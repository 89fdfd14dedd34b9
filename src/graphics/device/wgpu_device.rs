use std::num::NonZeroU64;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use slotmap::SlotMap;
use smallvec::SmallVec;
use tracing::instrument;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    AddressMode, BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BlendState, Buffer, BufferBinding, BufferBindingType,
    BufferDescriptor, BufferUsages, Color as WgpuColor, ColorTargetState, ColorWrites, CommandEncoderDescriptor,
    CompareFunction, DepthBiasState, DepthStencilState, Device, Extent3d, Face, FragmentState, FrontFace,
    ImageCopyTexture, ImageDataLayout, IndexFormat, LoadOp, Operations, Origin3d, PipelineLayout,
    PipelineLayoutDescriptor, PolygonMode, PrimitiveState, PrimitiveTopology, Queue, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, Sampler,
    SamplerBindingType, SamplerDescriptor, ShaderModule, ShaderModuleDescriptor, ShaderSource, ShaderStages,
    StencilState, StoreOp, TextureAspect, TextureDescriptor, TextureDimension, TextureSampleType, TextureUsages,
    TextureView, TextureViewDimension, VertexBufferLayout, VertexState, VertexStepMode,
};
use crate::{
    BlendMode, BlendStateId, BufferId, BufferKind, CullMode, DepthStencilId, DeviceError, FilterMode,
    GraphicsDevice, HashMap, ProgramDesc, ProgramId, RasterizerId, Released, ReleaseQueue, RenderTargetId,
    SamplerDesc, SamplerId, ShaderDefs, ShaderResource, TextureDesc, TextureFormat, TextureId, VertexFormat,
    Viewport, WrapMode, MAX_CONSTANT_SLOTS, MAX_TEXTURE_SLOTS,
};

const CONSTANT_SLOTS: usize = MAX_CONSTANT_SLOTS as usize;
const TEXTURE_SLOTS: usize = MAX_TEXTURE_SLOTS as usize;
const CONSTANTS_GROUP: u32 = 0;
const TEXTURES_GROUP: u32 = 1;
const UNIFORM_ALIGNMENT: u64 = 256;

/// Zeroed region at the start of the uniform arena, bound to constant slots nothing was bound to.
const FALLBACK_UNIFORM_SIZE: u64 = 64 * 1024;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/**
 * [`GraphicsDevice`] backed by wgpu.
 * Calls are recorded as they arrive and encoded into render passes when [`WgpuDevice::submit`] is called.
 * Each run of draws sharing the same targets becomes one render pass.
 * Constant buffer contents are versioned into a per-frame uniform arena so that every draw
 * sees the contents current at the time it was issued.
 *
 * Binding model expected from programs:
 * * group 0: constant slots 0..4 as uniform buffers at bindings 0..4.
 * * group 1: texture slot `i` at binding `2i`, its sampler at binding `2i + 1`.
 */
pub struct WgpuDevice {
    device: Arc<Device>,
    queue: Arc<Queue>,
    target_format: wgpu::TextureFormat,
    buffers: SlotMap<BufferId, GpuBuffer>,
    textures: SlotMap<TextureId, GpuTexture>,
    render_targets: SlotMap<RenderTargetId, GpuTarget>,
    depth_stencils: SlotMap<DepthStencilId, GpuTarget>,
    samplers: SlotMap<SamplerId, Sampler>,
    rasterizers: SlotMap<RasterizerId, CullMode>,
    blend_states: SlotMap<BlendStateId, BlendMode>,
    programs: SlotMap<ProgramId, GpuProgram>,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
    constants_layout: BindGroupLayout,
    textures_layout: BindGroupLayout,
    pipeline_layout: PipelineLayout,
    fallback_view: TextureView,
    fallback_sampler: Sampler,
    arena: Vec<u8>,
    arena_buffer: Buffer,
    state: BoundState,
    commands: Vec<Command>,
    released: ReleaseQueue,
    retired: Vec<Released>,             // Destroyed after the next submit, since recorded commands may use them
}

impl WgpuDevice {

    pub fn new(device: Arc<Device>, queue: Arc<Queue>, target_format: wgpu::TextureFormat) -> Self {
        let constants_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("constants_layout"),
            entries: &(0..MAX_CONSTANT_SLOTS)
                .map(|binding| BindGroupLayoutEntry {
                    binding,
                    visibility: ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect::<Vec<_>>(),
        });
        let mut texture_entries = Vec::with_capacity(TEXTURE_SLOTS * 2);
        for slot in 0..MAX_TEXTURE_SLOTS {
            texture_entries.push(BindGroupLayoutEntry {
                binding: slot * 2,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: true },
                    view_dimension: TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
            texture_entries.push(BindGroupLayoutEntry {
                binding: slot * 2 + 1,
                visibility: ShaderStages::FRAGMENT,
                ty: BindingType::Sampler(SamplerBindingType::Filtering),
                count: None,
            });
        }
        let textures_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("textures_layout"),
            entries: &texture_entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("scene_layout"),
            bind_group_layouts: &[&constants_layout, &textures_layout],
            push_constant_ranges: &[],
        });

        // 1x1 white texture bound to empty texture slots.
        let fallback_texture = device.create_texture_with_data(
            &queue,
            &TextureDescriptor {
                label: Some("fallback_texture"),
                size: Extent3d { width: 1, height: 1, depth_or_array_layers: 1 },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                view_formats: &[],
            },
            &[255, 255, 255, 255],
        );
        let fallback_view = fallback_texture.create_view(&Default::default());
        let fallback_sampler = device.create_sampler(&SamplerDescriptor::default());
        let arena_buffer = device.create_buffer(&BufferDescriptor {
            label: Some("uniform_arena"),
            size: FALLBACK_UNIFORM_SIZE,
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            device,
            queue,
            target_format,
            buffers: SlotMap::default(),
            textures: SlotMap::default(),
            render_targets: SlotMap::default(),
            depth_stencils: SlotMap::default(),
            samplers: SlotMap::default(),
            rasterizers: SlotMap::default(),
            blend_states: SlotMap::default(),
            programs: SlotMap::default(),
            pipelines: HashMap::default(),
            constants_layout,
            textures_layout,
            pipeline_layout,
            fallback_view,
            fallback_sampler,
            arena: vec![0; FALLBACK_UNIFORM_SIZE as usize],
            arena_buffer,
            state: BoundState::default(),
            commands: Vec::new(),
            released: ReleaseQueue::new(),
            retired: Vec::new(),
        }
    }

    /// Creates a device without a surface. Useful for offscreen rendering.
    pub fn headless(target_format: wgpu::TextureFormat) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        });
        let adapter = pollster::block_on(adapter)
            .ok_or_else(|| DeviceError::ResourceCreation(String::from("no compatible adapter")))?;
        let device_queue = adapter.request_device(&wgpu::DeviceDescriptor::default(), None);
        let (device, queue) = pollster::block_on(device_queue)
            .map_err(|err| DeviceError::ResourceCreation(err.to_string()))?;
        Ok(Self::new(Arc::new(device), Arc::new(queue), target_format))
    }

    /// Registers an externally owned view (IE: a surface texture) as a render target.
    pub fn import_render_target(&mut self, view: TextureView, format: wgpu::TextureFormat) -> RenderTargetId {
        self.render_targets.insert(GpuTarget { texture: None, view, format })
    }

    /// Encodes and submits everything recorded since the last submit.
    /// Validation errors raised by wgpu while doing so are reported as [`DeviceError::Backend`].
    /// Buffers and textures destroyed since the last submit are freed once encoding is done.
    #[instrument(skip_all)]
    pub fn submit(&mut self) -> Result<(), DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let result = self.encode_frame();

        // Resets frame state.
        self.commands.clear();
        self.arena.truncate(FALLBACK_UNIFORM_SIZE as usize);
        for buffer in self.buffers.values_mut() {
            buffer.snapshot = None;
        }
        for retired in self.retired.drain(..) {
            match retired {
                Released::Buffer(buffer) => {
                    if let Some(GpuBuffer { gpu: Some(gpu), .. }) = self.buffers.remove(buffer) {
                        gpu.destroy();
                    }
                },
                Released::Texture(texture) => {
                    if let Some(texture) = self.textures.remove(texture) {
                        texture.texture.destroy();
                    }
                },
            }
        }

        let error = pollster::block_on(self.device.pop_error_scope());
        result?;
        match error {
            Some(error) => Err(DeviceError::Backend(error.to_string())),
            None => Ok(()),
        }
    }

    fn encode_frame(&mut self) -> Result<(), DeviceError> {

        // Uploads every constant snapshot taken this frame.
        reserve_buffer(&mut self.arena_buffer, self.arena.len() as u64, &self.device);
        self.queue.write_buffer(&self.arena_buffer, 0, &self.arena);

        // Bind groups must outlive the passes that use them.
        let mut bind_groups = Vec::new();
        for command in &self.commands {
            let Command::Draw(draw) = command else { continue };
            bind_groups.push(self.create_bind_groups(draw)?);
        }

        let mut encoder = self.device.create_command_encoder(&CommandEncoderDescriptor::default());
        let mut draw_index = 0;
        let mut index = 0;
        while index < self.commands.len() {
            match &self.commands[index] {
                Command::Clear { target, color } => {
                    let target = self.render_targets.get(*target).ok_or(DeviceError::InvalidHandle)?;
                    let [r, g, b, a] = color.map(f64::from);
                    encoder.begin_render_pass(&RenderPassDescriptor {
                        label: Some("clear"),
                        color_attachments: &[Some(RenderPassColorAttachment {
                            view: &target.view,
                            resolve_target: None,
                            ops: Operations {
                                load: LoadOp::Clear(WgpuColor { r, g, b, a }),
                                store: StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    index += 1;
                },
                Command::ClearDepth { depth, value } => {
                    let depth = self.depth_stencils.get(*depth).ok_or(DeviceError::InvalidHandle)?;
                    encoder.begin_render_pass(&RenderPassDescriptor {
                        label: Some("clear_depth"),
                        color_attachments: &[],
                        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                            view: &depth.view,
                            depth_ops: Some(Operations {
                                load: LoadOp::Clear(*value),
                                store: StoreOp::Store,
                            }),
                            stencil_ops: None,
                        }),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    index += 1;
                },
                Command::Draw(first) => {

                    // Collects the run of draws that share this draw's targets.
                    let run_start = index;
                    while index < self.commands.len() {
                        match &self.commands[index] {
                            Command::Draw(draw) if draw.targets == first.targets && draw.depth == first.depth => index += 1,
                            _ => break,
                        }
                    }

                    let mut color_attachments = Vec::with_capacity(first.targets.len());
                    for target in &first.targets {
                        let target = self.render_targets.get(*target).ok_or(DeviceError::InvalidHandle)?;
                        color_attachments.push(Some(RenderPassColorAttachment {
                            view: &target.view,
                            resolve_target: None,
                            ops: Operations { load: LoadOp::Load, store: StoreOp::Store },
                        }));
                    }
                    let depth_stencil_attachment = match first.depth {
                        Some(depth) => {
                            let depth = self.depth_stencils.get(depth).ok_or(DeviceError::InvalidHandle)?;
                            Some(RenderPassDepthStencilAttachment {
                                view: &depth.view,
                                depth_ops: Some(Operations { load: LoadOp::Load, store: StoreOp::Store }),
                                stencil_ops: None,
                            })
                        },
                        None => None,
                    };
                    let mut pass = encoder.begin_render_pass(&RenderPassDescriptor {
                        label: Some("scene_pass"),
                        color_attachments: &color_attachments,
                        depth_stencil_attachment,
                        timestamp_writes: None,
                        occlusion_query_set: None,
                    });
                    for command in &self.commands[run_start..index] {
                        let Command::Draw(draw) = command else { continue };
                        let pipeline = self.pipelines.get(&draw.pipeline_key).ok_or(DeviceError::InvalidHandle)?;
                        let vertices = self.buffers.get(draw.vertex_buffer).and_then(GpuBuffer::gpu).ok_or(DeviceError::InvalidHandle)?;
                        let indices = self.buffers.get(draw.index_buffer).and_then(GpuBuffer::gpu).ok_or(DeviceError::InvalidHandle)?;
                        let (constants, textures) = &bind_groups[draw_index];
                        if let Some(vp) = draw.viewport {
                            pass.set_viewport(vp.x, vp.y, vp.width, vp.height, 0.0, 1.0);
                        }
                        pass.set_pipeline(pipeline);
                        pass.set_bind_group(CONSTANTS_GROUP, constants, &[]);
                        pass.set_bind_group(TEXTURES_GROUP, textures, &[]);
                        pass.set_vertex_buffer(0, vertices.slice(..));
                        pass.set_index_buffer(indices.slice(..), IndexFormat::Uint32);
                        pass.draw_indexed(0..draw.index_count, 0, 0..1);
                        draw_index += 1;
                    }
                },
            }
        }
        self.queue.submit([encoder.finish()]);
        Ok(())
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> Result<(), DeviceError> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let program = self.programs.get(key.program).ok_or(DeviceError::InvalidHandle)?;
        let pipeline = create_pipeline(program, key, &self.pipeline_layout, &self.device);
        self.pipelines.insert(key.clone(), pipeline);
        Ok(())
    }

    fn create_bind_groups(&self, draw: &DrawCall) -> Result<(BindGroup, BindGroup), DeviceError> {
        let mut constant_entries = Vec::with_capacity(CONSTANT_SLOTS);
        for (binding, snapshot) in draw.constants.iter().copied().enumerate() {
            let (offset, size) = snapshot.unwrap_or((0, FALLBACK_UNIFORM_SIZE));
            constant_entries.push(BindGroupEntry {
                binding: binding as u32,
                resource: BindingResource::Buffer(BufferBinding {
                    buffer: &self.arena_buffer,
                    offset,
                    size: NonZeroU64::new(size),
                }),
            });
        }
        let constants = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("constants"),
            layout: &self.constants_layout,
            entries: &constant_entries,
        });

        let mut texture_entries = Vec::with_capacity(TEXTURE_SLOTS * 2);
        for slot in 0..TEXTURE_SLOTS {
            let view = match draw.resources[slot] {
                Some(ShaderResource::Texture(texture)) => &self.textures.get(texture).ok_or(DeviceError::InvalidHandle)?.view,
                Some(ShaderResource::RenderTarget(target)) => &self.render_targets.get(target).ok_or(DeviceError::InvalidHandle)?.view,
                // Depth textures are not filterable, so they can not be bound to the shared layout.
                Some(ShaderResource::DepthStencil(_)) | None => &self.fallback_view,
            };
            let sampler = match draw.samplers[slot] {
                Some(sampler) => self.samplers.get(sampler).ok_or(DeviceError::InvalidHandle)?,
                None => &self.fallback_sampler,
            };
            texture_entries.push(BindGroupEntry {
                binding: slot as u32 * 2,
                resource: BindingResource::TextureView(view),
            });
            texture_entries.push(BindGroupEntry {
                binding: slot as u32 * 2 + 1,
                resource: BindingResource::Sampler(sampler),
            });
        }
        let textures = self.device.create_bind_group(&BindGroupDescriptor {
            label: Some("textures"),
            layout: &self.textures_layout,
            entries: &texture_entries,
        });
        Ok((constants, textures))
    }

    /// Copies the current contents of a constant buffer into the arena, unless already copied since its last update.
    fn snapshot_constants(&mut self, buffer_id: BufferId) -> Result<(u64, u64), DeviceError> {
        let buffer = self.buffers.get_mut(buffer_id).ok_or(DeviceError::InvalidHandle)?;
        if let Some(snapshot) = buffer.snapshot {
            return Ok(snapshot);
        }
        let offset = (self.arena.len() as u64).next_multiple_of(UNIFORM_ALIGNMENT);
        let size = (buffer.contents.len() as u64).max(16).next_multiple_of(16);
        self.arena.resize(offset as usize, 0);
        self.arena.extend_from_slice(&buffer.contents);
        self.arena.resize((offset + size) as usize, 0);
        buffer.snapshot = Some((offset, size));
        Ok((offset, size))
    }

    fn gpu_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::R8 => wgpu::TextureFormat::R8Unorm,
        }
    }

    fn create_target(&self, width: u32, height: u32, format: wgpu::TextureFormat, label: &str) -> GpuTarget {
        let texture = self.device.create_texture(&TextureDescriptor {
            label: Some(label),
            size: Extent3d { width, height, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&Default::default());
        GpuTarget { texture: Some(texture), view, format }
    }
}

impl GraphicsDevice for WgpuDevice {

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> Result<BufferId, DeviceError> {
        let gpu = match kind {
            BufferKind::Vertex | BufferKind::Index => {
                let usage = if kind == BufferKind::Vertex { BufferUsages::VERTEX } else { BufferUsages::INDEX };
                Some(self.device.create_buffer_init(&BufferInitDescriptor {
                    label: None,
                    contents,
                    usage: usage | BufferUsages::COPY_DST,
                }))
            },
            BufferKind::Constant => None,
        };
        Ok(self.buffers.insert(GpuBuffer { gpu, contents: contents.to_vec(), snapshot: None }))
    }

    fn update_buffer(&mut self, buffer: BufferId, contents: &[u8]) -> Result<(), DeviceError> {
        let buffer = self.buffers.get_mut(buffer).ok_or(DeviceError::InvalidHandle)?;
        if let Some(gpu) = &buffer.gpu {
            if contents.len() as u64 > gpu.size() {
                return Err(DeviceError::ResourceCreation(String::from("buffer update exceeds buffer size")));
            }
            self.queue.write_buffer(gpu, 0, contents);
        }
        buffer.contents.clear();
        buffer.contents.extend_from_slice(contents);
        buffer.snapshot = None;
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        self.retired.push(Released::Buffer(buffer));
    }

    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> Result<TextureId, DeviceError> {
        let bytes_per_row = desc.width * desc.format.bytes_per_pixel();
        if pixels.len() != (bytes_per_row * desc.height) as usize {
            return Err(DeviceError::ResourceCreation(String::from("pixel data does not match texture size")));
        }
        let size = Extent3d { width: desc.width.max(1), height: desc.height.max(1), depth_or_array_layers: 1 };
        let texture = self.device.create_texture(&TextureDescriptor {
            label: None,
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: Self::gpu_format(desc.format),
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        if !pixels.is_empty() {
            self.queue.write_texture(
                ImageCopyTexture {
                    texture: &texture,
                    mip_level: 0,
                    origin: Origin3d::ZERO,
                    aspect: TextureAspect::All,
                },
                pixels,
                ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(desc.height),
                },
                size,
            );
        }
        let view = texture.create_view(&Default::default());
        Ok(self.textures.insert(GpuTexture { texture, view }))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        self.retired.push(Released::Texture(texture));
    }

    fn create_render_target(&mut self, width: u32, height: u32) -> Result<RenderTargetId, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ResourceCreation(format!("render target of size {width}x{height}")));
        }
        let target = self.create_target(width, height, self.target_format, "render_target");
        Ok(self.render_targets.insert(target))
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        if let Some(GpuTarget { texture: Some(texture), .. }) = self.render_targets.remove(target) {
            texture.destroy();
        }
    }

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> Result<DepthStencilId, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ResourceCreation(format!("depth stencil of size {width}x{height}")));
        }
        let target = self.create_target(width, height, DEPTH_FORMAT, "depth_stencil");
        Ok(self.depth_stencils.insert(target))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        let address_mode = match desc.wrap {
            WrapMode::Wrap => AddressMode::Repeat,
            WrapMode::Clamp => AddressMode::ClampToEdge,
            WrapMode::Mirror => AddressMode::MirrorRepeat,
        };
        let (filter, anisotropy_clamp) = match desc.filter {
            FilterMode::Point => (wgpu::FilterMode::Nearest, 1),
            FilterMode::Linear => (wgpu::FilterMode::Linear, 1),
            FilterMode::Anisotropic => (wgpu::FilterMode::Linear, 16),
        };
        let sampler = self.device.create_sampler(&SamplerDescriptor {
            label: None,
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: filter,
            anisotropy_clamp,
            ..Default::default()
        });
        Ok(self.samplers.insert(sampler))
    }

    fn create_rasterizer_state(&mut self, cull_mode: CullMode) -> Result<RasterizerId, DeviceError> {
        Ok(self.rasterizers.insert(cull_mode))
    }

    fn create_blend_state(&mut self, blend_mode: BlendMode) -> Result<BlendStateId, DeviceError> {
        Ok(self.blend_states.insert(blend_mode))
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, DeviceError> {
        let defs: ShaderDefs = desc.defs.iter().cloned().collect();
        let source = defs
            .preprocess(&desc.source)
            .map_err(|err| DeviceError::ResourceCreation(format!("{}: {err}", desc.label)))?;
        let module = self.device.create_shader_module(ShaderModuleDescriptor {
            label: Some(desc.label.as_str()),
            source: ShaderSource::Wgsl(source.into()),
        });
        let attributes = desc.vertex_layout.attributes
            .iter()
            .map(|attribute| wgpu::VertexAttribute {
                format: match attribute.format {
                    VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
                    VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
                    VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
                },
                offset: attribute.offset as u64,
                shader_location: attribute.location,
            })
            .collect();
        Ok(self.programs.insert(GpuProgram {
            module,
            vertex_entry: desc.vertex_entry.clone(),
            fragment_entry: desc.fragment_entry.clone(),
            stride: desc.vertex_layout.stride as u64,
            attributes,
        }))
    }

    fn set_render_targets(&mut self, targets: &[RenderTargetId], depth: Option<DepthStencilId>) {
        self.state.targets = SmallVec::from_slice(targets);
        self.state.depth = depth;
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        // wgpu only supports a single viewport per pass.
        self.state.viewport = viewports.first().copied();
    }

    fn set_program(&mut self, program: ProgramId) {
        self.state.program = Some(program);
    }

    fn set_rasterizer_state(&mut self, state: RasterizerId) {
        self.state.rasterizer = Some(state);
    }

    fn set_blend_state(&mut self, state: BlendStateId) {
        self.state.blend = Some(state);
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: BufferId) {
        if let Some(bound) = self.state.constants.get_mut(slot as usize) {
            *bound = Some(buffer);
        }
    }

    fn set_shader_resource(&mut self, slot: u32, resource: Option<ShaderResource>) {
        if let Some(bound) = self.state.resources.get_mut(slot as usize) {
            *bound = resource;
        }
    }

    fn set_sampler(&mut self, slot: u32, sampler: SamplerId) {
        if let Some(bound) = self.state.samplers.get_mut(slot as usize) {
            *bound = Some(sampler);
        }
    }

    fn set_vertex_buffer(&mut self, buffer: BufferId, _stride: u32) {
        self.state.vertex_buffer = Some(buffer);
    }

    fn set_index_buffer(&mut self, buffer: BufferId) {
        self.state.index_buffer = Some(buffer);
    }

    fn draw_indexed(&mut self, index_count: u32) -> Result<(), DeviceError> {
        let program = self.state.program.ok_or(DeviceError::MissingBinding("program"))?;
        let vertex_buffer = self.state.vertex_buffer.ok_or(DeviceError::MissingBinding("vertex buffer"))?;
        let index_buffer = self.state.index_buffer.ok_or(DeviceError::MissingBinding("index buffer"))?;
        if self.state.targets.is_empty() {
            return Err(DeviceError::MissingBinding("render target"));
        }
        let cull = match self.state.rasterizer {
            Some(state) => *self.rasterizers.get(state).ok_or(DeviceError::InvalidHandle)?,
            None => CullMode::default(),
        };
        let blend = match self.state.blend {
            Some(state) => *self.blend_states.get(state).ok_or(DeviceError::InvalidHandle)?,
            None => BlendMode::default(),
        };
        let mut color_formats = SmallVec::new();
        for target in &self.state.targets {
            let target = self.render_targets.get(*target).ok_or(DeviceError::InvalidHandle)?;
            color_formats.push(target.format);
        }
        let mut constants = [None; CONSTANT_SLOTS];
        for slot in 0..CONSTANT_SLOTS {
            if let Some(buffer) = self.state.constants[slot] {
                constants[slot] = Some(self.snapshot_constants(buffer)?);
            }
        }
        let pipeline_key = PipelineKey {
            program,
            cull,
            blend,
            color_formats,
            depth_format: self.state.depth.map(|_| DEPTH_FORMAT),
        };
        self.ensure_pipeline(&pipeline_key)?;
        self.commands.push(Command::Draw(DrawCall {
            pipeline_key,
            targets: self.state.targets.clone(),
            depth: self.state.depth,
            viewport: self.state.viewport,
            constants,
            resources: self.state.resources,
            samplers: self.state.samplers,
            vertex_buffer,
            index_buffer,
            index_count,
        }));
        Ok(())
    }

    fn clear_render_target(&mut self, target: RenderTargetId, color: [f32; 4]) -> Result<(), DeviceError> {
        if !self.render_targets.contains_key(target) {
            return Err(DeviceError::InvalidHandle);
        }
        self.commands.push(Command::Clear { target, color });
        Ok(())
    }

    fn clear_depth_stencil(&mut self, depth: DepthStencilId, value: f32) -> Result<(), DeviceError> {
        if !self.depth_stencils.contains_key(depth) {
            return Err(DeviceError::InvalidHandle);
        }
        self.commands.push(Command::ClearDepth { depth, value });
        Ok(())
    }

    fn release_sender(&self) -> Sender<Released> {
        self.released.sender()
    }

    fn take_released(&mut self) -> Vec<Released> {
        self.released.drain()
    }
}

/**
 * Ensures that buffer has at least enough space to fit the number of bytes specified.
 * Does NOT copy contents of old buffer in the case of a resize.
 */
pub fn reserve_buffer(buffer: &mut Buffer, size: u64, device: &Device) {
    if size > buffer.size() {
        log::debug!("Growing buffer to {size} bytes");
        *buffer = device.create_buffer(&BufferDescriptor {
            label: None,
            size,
            usage: buffer.usage(),
            mapped_at_creation: false,
        });
    }
}

/// Creates a pipeline compatible with the program and fixed-function state supplied.
fn create_pipeline(
    program: &GpuProgram,
    key: &PipelineKey,
    layout: &PipelineLayout,
    device: &Device,
) -> RenderPipeline {
    let blend = match key.blend {
        BlendMode::Opaque => BlendState::REPLACE,
        BlendMode::Alpha => BlendState::ALPHA_BLENDING,
    };
    let targets: SmallVec<[Option<ColorTargetState>; 4]> = key.color_formats
        .iter()
        .map(|format| Some(ColorTargetState {
            format: *format,
            blend: Some(blend),
            write_mask: ColorWrites::ALL,
        }))
        .collect();
    let cull_mode = match key.cull {
        CullMode::None => None,
        CullMode::Front => Some(Face::Front),
        CullMode::Back => Some(Face::Back),
    };
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some("scene_pipeline"),
        layout: Some(layout),
        vertex: VertexState {
            module: &program.module,
            entry_point: &program.vertex_entry,
            buffers: &[VertexBufferLayout {
                array_stride: program.stride,
                step_mode: VertexStepMode::Vertex,
                attributes: &program.attributes,
            }],
        },
        fragment: Some(FragmentState {
            module: &program.module,
            entry_point: &program.fragment_entry,
            targets: &targets,
        }),
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: FrontFace::Cw,
            cull_mode,
            unclipped_depth: false,
            polygon_mode: PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: key.depth_format.map(|format| DepthStencilState {
            format,
            depth_write_enabled: key.blend == BlendMode::Opaque,
            depth_compare: CompareFunction::LessEqual,
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: Default::default(),
        multiview: None,
    })
}

/// Used to select a pipeline from a cache.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
struct PipelineKey {
    program: ProgramId,
    cull: CullMode,
    blend: BlendMode,
    color_formats: SmallVec<[wgpu::TextureFormat; 4]>,
    depth_format: Option<wgpu::TextureFormat>,
}

struct GpuBuffer {
    gpu: Option<Buffer>,                // Absent for constant buffers, which live in the uniform arena
    contents: Vec<u8>,
    snapshot: Option<(u64, u64)>,       // Offset and size of the latest copy in the arena
}

impl GpuBuffer {
    fn gpu(&self) -> Option<&Buffer> {
        self.gpu.as_ref()
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: TextureView,
}

struct GpuTarget {
    texture: Option<wgpu::Texture>,     // Absent for imported views
    view: TextureView,
    format: wgpu::TextureFormat,
}

struct GpuProgram {
    module: ShaderModule,
    vertex_entry: String,
    fragment_entry: String,
    stride: u64,
    attributes: Vec<wgpu::VertexAttribute>,
}

#[derive(Default)]
struct BoundState {
    targets: SmallVec<[RenderTargetId; 4]>,
    depth: Option<DepthStencilId>,
    viewport: Option<Viewport>,
    program: Option<ProgramId>,
    rasterizer: Option<RasterizerId>,
    blend: Option<BlendStateId>,
    constants: [Option<BufferId>; CONSTANT_SLOTS],
    resources: [Option<ShaderResource>; TEXTURE_SLOTS],
    samplers: [Option<SamplerId>; TEXTURE_SLOTS],
    vertex_buffer: Option<BufferId>,
    index_buffer: Option<BufferId>,
}

enum Command {
    Clear { target: RenderTargetId, color: [f32; 4] },
    ClearDepth { depth: DepthStencilId, value: f32 },
    Draw(DrawCall),
}

struct DrawCall {
    pipeline_key: PipelineKey,
    targets: SmallVec<[RenderTargetId; 4]>,
    depth: Option<DepthStencilId>,
    viewport: Option<Viewport>,
    constants: [Option<(u64, u64)>; CONSTANT_SLOTS],
    resources: [Option<ShaderResource>; TEXTURE_SLOTS],
    samplers: [Option<SamplerId>; TEXTURE_SLOTS],
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    index_count: u32,
}
