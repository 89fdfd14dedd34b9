use std::mem::size_of;
use std::sync::mpsc::Sender;
use bytemuck::Pod;
use slotmap::SlotMap;
use smallvec::SmallVec;
use crate::{
    BlendMode, BlendStateId, BufferId, BufferKind, CullMode, DepthStencilId, DeviceError, GraphicsDevice,
    ProgramDesc, ProgramId, RasterizerId, Released, ReleaseQueue, RenderTargetId, SamplerDesc, SamplerId,
    ShaderResource, TextureDesc, TextureId, Viewport, MAX_CONSTANT_SLOTS, MAX_TEXTURE_SLOTS,
};

const CONSTANT_SLOTS: usize = MAX_CONSTANT_SLOTS as usize;
const TEXTURE_SLOTS: usize = MAX_TEXTURE_SLOTS as usize;

/**
 * Headless [`GraphicsDevice`] that validates and records every call it receives.
 * Draws capture a snapshot of all bound state, including constant buffer contents,
 * so the exact inputs of each draw can be inspected after a frame.
 */
#[derive(Default)]
pub struct RecordingDevice {
    buffers: SlotMap<BufferId, RecordedBuffer>,
    textures: SlotMap<TextureId, TextureDesc>,
    render_targets: SlotMap<RenderTargetId, (u32, u32)>,
    depth_stencils: SlotMap<DepthStencilId, (u32, u32)>,
    samplers: SlotMap<SamplerId, SamplerDesc>,
    rasterizers: SlotMap<RasterizerId, CullMode>,
    blend_states: SlotMap<BlendStateId, BlendMode>,
    programs: SlotMap<ProgramId, String>,
    state: BoundState,
    released: ReleaseQueue,
    calls: Vec<DeviceCall>,
}

impl RecordingDevice {

    pub fn new() -> Self {
        Self::default()
    }

    /// Every call recorded since creation, or since the last [`Self::clear_calls`].
    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Draws in submission order.
    pub fn draws(&self) -> impl Iterator<Item = &DrawRecord> + '_ {
        self.calls.iter().filter_map(|call| match call {
            DeviceCall::Draw(draw) => Some(draw),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.draws().count()
    }

    /// Targets cleared in submission order.
    pub fn cleared_targets(&self) -> impl Iterator<Item = RenderTargetId> + '_ {
        self.calls.iter().filter_map(|call| match call {
            DeviceCall::ClearRenderTarget { target, .. } => Some(*target),
            _ => None,
        })
    }

    pub fn buffer_contents(&self, buffer: BufferId) -> Option<&[u8]> {
        self.buffers.get(buffer).map(|buffer| buffer.contents.as_slice())
    }

    /// Buffers currently alive.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn render_target_size(&self, target: RenderTargetId) -> Option<(u32, u32)> {
        self.render_targets.get(target).copied()
    }

    pub fn render_target_count(&self) -> usize {
        self.render_targets.len()
    }

    pub fn texture_desc(&self, texture: TextureId) -> Option<TextureDesc> {
        self.textures.get(texture).copied()
    }

    pub fn sampler_count(&self) -> usize {
        self.samplers.len()
    }

    pub fn program_label(&self, program: ProgramId) -> Option<&str> {
        self.programs.get(program).map(String::as_str)
    }

    fn record(&mut self, call: DeviceCall) {
        log::trace!("{call:?}");
        self.calls.push(call);
    }

    fn snapshot_draw(&self, index_count: u32) -> Result<DrawRecord, DeviceError> {
        let state = &self.state;
        let program = state.program.ok_or(DeviceError::MissingBinding("program"))?;
        let (vertex_buffer, _) = state.vertex_buffer.ok_or(DeviceError::MissingBinding("vertex buffer"))?;
        let index_buffer = state.index_buffer.ok_or(DeviceError::MissingBinding("index buffer"))?;
        if state.targets.is_empty() {
            return Err(DeviceError::MissingBinding("render target"));
        }
        if !self.programs.contains_key(program)
            || !self.buffers.contains_key(vertex_buffer)
            || !self.buffers.contains_key(index_buffer)
            || state.targets.iter().any(|target| !self.render_targets.contains_key(*target))
        {
            return Err(DeviceError::InvalidHandle);
        }
        let cull = match state.rasterizer {
            Some(rasterizer) => *self.rasterizers.get(rasterizer).ok_or(DeviceError::InvalidHandle)?,
            None => CullMode::default(),
        };
        let blend = match state.blend {
            Some(blend) => *self.blend_states.get(blend).ok_or(DeviceError::InvalidHandle)?,
            None => BlendMode::default(),
        };
        let constants = std::array::from_fn(|slot| {
            state.constants[slot]
                .and_then(|buffer| self.buffers.get(buffer))
                .map(|buffer| buffer.contents.clone())
        });
        let samplers = std::array::from_fn(|slot| {
            state.samplers[slot].and_then(|sampler| self.samplers.get(sampler).copied())
        });
        Ok(DrawRecord {
            index_count,
            targets: state.targets.clone(),
            depth: state.depth,
            viewports: state.viewports.clone(),
            program,
            cull,
            blend,
            constants,
            resources: state.resources,
            samplers,
            vertex_buffer,
        })
    }
}

impl GraphicsDevice for RecordingDevice {

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> Result<BufferId, DeviceError> {
        Ok(self.buffers.insert(RecordedBuffer { kind, contents: contents.to_vec() }))
    }

    fn update_buffer(&mut self, buffer: BufferId, contents: &[u8]) -> Result<(), DeviceError> {
        let recorded = self.buffers.get_mut(buffer).ok_or(DeviceError::InvalidHandle)?;
        recorded.contents.clear();
        recorded.contents.extend_from_slice(contents);
        if recorded.kind == BufferKind::Constant {
            self.record(DeviceCall::UpdateBuffer(buffer));
        }
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(buffer).is_some() {
            self.record(DeviceCall::DestroyBuffer(buffer));
        }
    }

    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> Result<TextureId, DeviceError> {
        let expected = (desc.width * desc.height * desc.format.bytes_per_pixel()) as usize;
        if pixels.len() != expected {
            return Err(DeviceError::ResourceCreation(format!(
                "texture expected {expected} bytes of pixel data, got {}",
                pixels.len()
            )));
        }
        Ok(self.textures.insert(*desc))
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.textures.remove(texture).is_some() {
            self.record(DeviceCall::DestroyTexture(texture));
        }
    }

    fn create_render_target(&mut self, width: u32, height: u32) -> Result<RenderTargetId, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ResourceCreation(format!("render target of size {width}x{height}")));
        }
        let target = self.render_targets.insert((width, height));
        self.record(DeviceCall::CreateRenderTarget(target));
        Ok(target)
    }

    fn destroy_render_target(&mut self, target: RenderTargetId) {
        if self.render_targets.remove(target).is_some() {
            self.record(DeviceCall::DestroyRenderTarget(target));
        }
    }

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> Result<DepthStencilId, DeviceError> {
        Ok(self.depth_stencils.insert((width, height)))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        Ok(self.samplers.insert(*desc))
    }

    fn create_rasterizer_state(&mut self, cull_mode: CullMode) -> Result<RasterizerId, DeviceError> {
        Ok(self.rasterizers.insert(cull_mode))
    }

    fn create_blend_state(&mut self, blend_mode: BlendMode) -> Result<BlendStateId, DeviceError> {
        Ok(self.blend_states.insert(blend_mode))
    }

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, DeviceError> {
        Ok(self.programs.insert(desc.label.clone()))
    }

    fn set_render_targets(&mut self, targets: &[RenderTargetId], depth: Option<DepthStencilId>) {
        self.state.targets = SmallVec::from_slice(targets);
        self.state.depth = depth;
        self.record(DeviceCall::SetRenderTargets { targets: SmallVec::from_slice(targets), depth });
    }

    fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.state.viewports = SmallVec::from_slice(viewports);
        self.record(DeviceCall::SetViewports(SmallVec::from_slice(viewports)));
    }

    fn set_program(&mut self, program: ProgramId) {
        self.state.program = Some(program);
        self.record(DeviceCall::SetProgram(program));
    }

    fn set_rasterizer_state(&mut self, state: RasterizerId) {
        self.state.rasterizer = Some(state);
        self.record(DeviceCall::SetRasterizerState(state));
    }

    fn set_blend_state(&mut self, state: BlendStateId) {
        self.state.blend = Some(state);
        self.record(DeviceCall::SetBlendState(state));
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: BufferId) {
        if let Some(bound) = self.state.constants.get_mut(slot as usize) {
            *bound = Some(buffer);
        }
        self.record(DeviceCall::SetConstantBuffer { slot, buffer });
    }

    fn set_shader_resource(&mut self, slot: u32, resource: Option<ShaderResource>) {
        if let Some(bound) = self.state.resources.get_mut(slot as usize) {
            *bound = resource;
        }
        self.record(DeviceCall::SetShaderResource { slot, resource });
    }

    fn set_sampler(&mut self, slot: u32, sampler: SamplerId) {
        if let Some(bound) = self.state.samplers.get_mut(slot as usize) {
            *bound = Some(sampler);
        }
        self.record(DeviceCall::SetSampler { slot, sampler });
    }

    fn set_vertex_buffer(&mut self, buffer: BufferId, stride: u32) {
        self.state.vertex_buffer = Some((buffer, stride));
        self.record(DeviceCall::SetVertexBuffer(buffer));
    }

    fn set_index_buffer(&mut self, buffer: BufferId) {
        self.state.index_buffer = Some(buffer);
        self.record(DeviceCall::SetIndexBuffer(buffer));
    }

    fn draw_indexed(&mut self, index_count: u32) -> Result<(), DeviceError> {
        let draw = self.snapshot_draw(index_count)?;
        self.record(DeviceCall::Draw(draw));
        Ok(())
    }

    fn clear_render_target(&mut self, target: RenderTargetId, color: [f32; 4]) -> Result<(), DeviceError> {
        if !self.render_targets.contains_key(target) {
            return Err(DeviceError::InvalidHandle);
        }
        self.record(DeviceCall::ClearRenderTarget { target, color });
        Ok(())
    }

    fn clear_depth_stencil(&mut self, depth: DepthStencilId, value: f32) -> Result<(), DeviceError> {
        if !self.depth_stencils.contains_key(depth) {
            return Err(DeviceError::InvalidHandle);
        }
        self.record(DeviceCall::ClearDepthStencil { depth, value });
        Ok(())
    }

    fn release_sender(&self) -> Sender<Released> {
        self.released.sender()
    }

    fn take_released(&mut self) -> Vec<Released> {
        self.released.drain()
    }
}

struct RecordedBuffer {
    kind: BufferKind,
    contents: Vec<u8>,
}

#[derive(Default)]
struct BoundState {
    targets: SmallVec<[RenderTargetId; 4]>,
    depth: Option<DepthStencilId>,
    viewports: SmallVec<[Viewport; 4]>,
    program: Option<ProgramId>,
    rasterizer: Option<RasterizerId>,
    blend: Option<BlendStateId>,
    constants: [Option<BufferId>; CONSTANT_SLOTS],
    resources: [Option<ShaderResource>; TEXTURE_SLOTS],
    samplers: [Option<SamplerId>; TEXTURE_SLOTS],
    vertex_buffer: Option<(BufferId, u32)>,
    index_buffer: Option<BufferId>,
}

/// A single call made against a [`RecordingDevice`].
#[derive(Clone, Debug)]
pub enum DeviceCall {
    DestroyBuffer(BufferId),
    DestroyTexture(TextureId),
    CreateRenderTarget(RenderTargetId),
    DestroyRenderTarget(RenderTargetId),
    SetRenderTargets {
        targets: SmallVec<[RenderTargetId; 4]>,
        depth: Option<DepthStencilId>,
    },
    SetViewports(SmallVec<[Viewport; 4]>),
    SetProgram(ProgramId),
    SetRasterizerState(RasterizerId),
    SetBlendState(BlendStateId),
    SetConstantBuffer { slot: u32, buffer: BufferId },
    SetShaderResource { slot: u32, resource: Option<ShaderResource> },
    SetSampler { slot: u32, sampler: SamplerId },
    SetVertexBuffer(BufferId),
    SetIndexBuffer(BufferId),
    UpdateBuffer(BufferId),
    Draw(DrawRecord),
    ClearRenderTarget { target: RenderTargetId, color: [f32; 4] },
    ClearDepthStencil { depth: DepthStencilId, value: f32 },
}

/// Everything bound at the time of a draw.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub index_count: u32,
    pub targets: SmallVec<[RenderTargetId; 4]>,
    pub depth: Option<DepthStencilId>,
    pub viewports: SmallVec<[Viewport; 4]>,
    pub program: ProgramId,
    pub cull: CullMode,
    pub blend: BlendMode,
    pub constants: [Option<Vec<u8>>; CONSTANT_SLOTS],
    pub resources: [Option<ShaderResource>; TEXTURE_SLOTS],
    pub samplers: [Option<SamplerDesc>; TEXTURE_SLOTS],
    pub vertex_buffer: BufferId,
}

impl DrawRecord {

    /// Reads back the constant block bound at a slot when the draw was issued.
    pub fn constants<T: Pod>(&self, slot: u32) -> Option<T> {
        let bytes = self.constants.get(slot as usize)?.as_ref()?;
        if bytes.len() < size_of::<T>() {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&bytes[..size_of::<T>()]))
    }

    pub fn resource(&self, slot: u32) -> Option<ShaderResource> {
        self.resources.get(slot as usize).copied().flatten()
    }
}
