//! Narrow immediate-mode contract between the scene renderer and a graphics backend.
//! The renderer only ever talks to a [`GraphicsDevice`]; backends live in submodules.

mod preprocess;
mod recording;
mod release;
mod wgpu_device;

pub use preprocess::*;
pub use recording::*;
pub use release::*;
pub use wgpu_device::*;

use std::sync::mpsc::Sender;
use derive_more::*;
use serde::Deserialize;
use slotmap::new_key_type;

new_key_type! {
    /// Vertex, index or constant buffer.
    pub struct BufferId;
    /// Sampled texture.
    pub struct TextureId;
    /// Color target that can also be sampled (texture + target view + resource view).
    pub struct RenderTargetId;
    /// Depth-stencil target.
    pub struct DepthStencilId;
    /// Sampler state object.
    pub struct SamplerId;
    /// Rasterizer state object.
    pub struct RasterizerId;
    /// Blend state object.
    pub struct BlendStateId;
    /// Compiled shader program for a single pass.
    pub struct ProgramId;
}

/// Max number of texture/sampler slots a backend has to support.
pub const MAX_TEXTURE_SLOTS: u32 = 8;

/// Max number of constant buffer slots a backend has to support.
pub const MAX_CONSTANT_SLOTS: u32 = 4;

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum BufferKind {
    Vertex,
    Index,
    Constant,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug, Deserialize)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

impl CullMode {
    pub const ALL: [CullMode; 3] = [CullMode::None, CullMode::Front, CullMode::Back];
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug)]
pub enum BlendMode {
    /// Source replaces destination.
    #[default]
    Opaque,
    /// Source is blended over destination using source alpha.
    Alpha,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug, Deserialize)]
pub enum FilterMode {
    Point,
    #[default]
    Linear,
    Anisotropic,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug, Deserialize)]
pub enum WrapMode {
    #[default]
    Wrap,
    Clamp,
    Mirror,
}

/// Describes a sampler. Used as a cache key, so two equal descriptors share one sampler.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug, Deserialize)]
pub struct SamplerDesc {
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl SamplerDesc {
    pub const fn new(filter: FilterMode, wrap: WrapMode) -> Self {
        Self { filter, wrap }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug)]
pub enum TextureFormat {
    #[default]
    Rgba8,
    Rgba16Float,
    R8,
}

impl TextureFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::R8 => 1,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Default, Debug)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Anything that can be bound to a shader resource slot.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, From)]
pub enum ShaderResource {
    Texture(TextureId),
    RenderTarget(RenderTargetId),
    DepthStencil(DepthStencilId),
}

#[derive(Copy, Clone, PartialEq, Default, Debug)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum VertexFormat {
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(self) -> u32 {
        match self {
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u32,
    pub location: u32,
}

/// Layout of a single interleaved vertex buffer.
#[derive(Clone, Eq, PartialEq, Hash, Default, Debug)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

/// Source of a single shader program.
#[derive(Clone, Debug)]
pub struct ProgramDesc {
    pub label: String,
    /// WGSL source, optionally containing `#ifdef` blocks.
    pub source: String,
    pub defs: Vec<String>,
    pub vertex_entry: String,
    pub fragment_entry: String,
    pub vertex_layout: VertexLayout,
}

impl ProgramDesc {
    pub fn new(label: impl Into<String>, source: impl Into<String>, vertex_layout: VertexLayout) -> Self {
        Self {
            label: label.into(),
            source: source.into(),
            defs: Vec::new(),
            vertex_entry: String::from("vertex_main"),
            fragment_entry: String::from("fragment_main"),
            vertex_layout,
        }
    }

    pub fn with_def(mut self, def: impl Into<String>) -> Self {
        self.defs.push(def.into());
        self
    }
}

/**
 * Immediate-mode graphics context.
 * State set through the `set_*` methods stays bound until replaced, and every draw
 * observes the state (including constant buffer contents) current at the time it is issued.
 */
pub trait GraphicsDevice {

    fn create_buffer(&mut self, kind: BufferKind, contents: &[u8]) -> Result<BufferId, DeviceError>;

    /// Replaces the contents of a buffer. Equivalent to a map / write / unmap.
    fn update_buffer(&mut self, buffer: BufferId, contents: &[u8]) -> Result<(), DeviceError>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    fn create_texture(&mut self, desc: &TextureDesc, pixels: &[u8]) -> Result<TextureId, DeviceError>;

    fn destroy_texture(&mut self, texture: TextureId);

    fn create_render_target(&mut self, width: u32, height: u32) -> Result<RenderTargetId, DeviceError>;

    fn destroy_render_target(&mut self, target: RenderTargetId);

    fn create_depth_stencil(&mut self, width: u32, height: u32) -> Result<DepthStencilId, DeviceError>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError>;

    fn create_rasterizer_state(&mut self, cull_mode: CullMode) -> Result<RasterizerId, DeviceError>;

    fn create_blend_state(&mut self, blend_mode: BlendMode) -> Result<BlendStateId, DeviceError>;

    fn create_program(&mut self, desc: &ProgramDesc) -> Result<ProgramId, DeviceError>;

    /// Binds all color targets at once, plus an optional depth-stencil target.
    fn set_render_targets(&mut self, targets: &[RenderTargetId], depth: Option<DepthStencilId>);

    /// One viewport per bound color target.
    fn set_viewports(&mut self, viewports: &[Viewport]);

    fn set_program(&mut self, program: ProgramId);

    fn set_rasterizer_state(&mut self, state: RasterizerId);

    fn set_blend_state(&mut self, state: BlendStateId);

    fn set_constant_buffer(&mut self, slot: u32, buffer: BufferId);

    fn set_shader_resource(&mut self, slot: u32, resource: Option<ShaderResource>);

    fn set_sampler(&mut self, slot: u32, sampler: SamplerId);

    fn set_vertex_buffer(&mut self, buffer: BufferId, stride: u32);

    fn set_index_buffer(&mut self, buffer: BufferId);

    fn draw_indexed(&mut self, index_count: u32) -> Result<(), DeviceError>;

    fn clear_render_target(&mut self, target: RenderTargetId, color: [f32; 4]) -> Result<(), DeviceError>;

    fn clear_depth_stencil(&mut self, depth: DepthStencilId, value: f32) -> Result<(), DeviceError>;

    /// Sender given to [`OwnedBuffer`]s and [`OwnedTexture`]s so they can report being dropped.
    fn release_sender(&self) -> Sender<Released>;

    /// Resources dropped since the last call.
    fn take_released(&mut self) -> Vec<Released>;

    /**
     * Destroys every owned resource dropped since the last call.
     * Returns how many were destroyed.
     */
    fn destroy_released(&mut self) -> usize {
        let released = self.take_released();
        for resource in &released {
            match *resource {
                Released::Buffer(buffer) => self.destroy_buffer(buffer),
                Released::Texture(texture) => self.destroy_texture(texture),
            }
        }
        if !released.is_empty() {
            log::debug!("Destroyed {} released resources", released.len());
        }
        released.len()
    }
}

#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum DeviceError {
    #[display(fmt="Invalid handle passed to device")]
    InvalidHandle,
    #[display(fmt="Draw issued without {} bound", _0)]
    MissingBinding(#[error(not(source))] &'static str),
    #[display(fmt="Failed to create resource: {}", _0)]
    ResourceCreation(#[error(not(source))] String),
    #[display(fmt="Device reported an error: {}", _0)]
    Backend(#[error(not(source))] String),
}
