use derive_more::*;
use glam::Mat4;
use smallvec::SmallVec;
use crate::{
    BlendMode, BlendStateId, BufferKind, ConstantBlock, CullMode, DeviceError, Font, Glyph, GlyphCache,
    GraphicsDevice, Handle, HashMap, Material, Mesh, MeshData, MeshError, ModelProperties, OwnedBuffer,
    RasterizerId, ResourceRegistry, SamplerDesc, SamplerId, SceneProperties, ScreenQuad, ShaderResource,
    TextureConfig, BUILTIN_CUBE, BUILTIN_QUAD, MATERIAL_SLOT, MAX_TEXTURE_SLOTS, MODEL_SLOT, SCENE_SLOT,
    TEXTURE_CONFIG_SLOT,
};

/**
 * Device-facing state shared by every draw of the scene renderer:
 * constant blocks, cached state objects, builtin meshes and glyphs.
 */
pub struct SceneRendererContext {
    scene: ConstantBlock<SceneProperties>,
    model: ConstantBlock<ModelProperties>,
    texture_config: ConstantBlock<TextureConfig>,
    rasterizers: [RasterizerId; 3],
    opaque_blend: BlendStateId,
    alpha_blend: BlendStateId,
    samplers: HashMap<SamplerDesc, SamplerId>,
    quad: Handle<Mesh>,
    cube: Handle<Mesh>,
    screen_quad: Mesh,
    glyphs: GlyphCache,
    pass_resources: SmallVec<[ShaderResource; 4]>,
}

impl SceneRendererContext {

    /// Fails if the builtin quad or cube are missing from the registry.
    pub fn new(registry: &ResourceRegistry, device: &mut dyn GraphicsDevice) -> Result<Self, RenderError> {
        let quad = registry
            .get::<Mesh>(BUILTIN_QUAD)
            .ok_or_else(|| RenderError::MissingBuiltinMesh(String::from(BUILTIN_QUAD)))?;
        let cube = registry
            .get::<Mesh>(BUILTIN_CUBE)
            .ok_or_else(|| RenderError::MissingBuiltinMesh(String::from(BUILTIN_CUBE)))?;
        let screen_quad = Mesh::from_data(&MeshData::from(ScreenQuad), device)?;
        let rasterizers = [
            device.create_rasterizer_state(CullMode::None)?,
            device.create_rasterizer_state(CullMode::Front)?,
            device.create_rasterizer_state(CullMode::Back)?,
        ];
        Ok(Self {
            scene: ConstantBlock::new(device)?,
            model: ConstantBlock::new(device)?,
            texture_config: ConstantBlock::new(device)?,
            rasterizers,
            opaque_blend: device.create_blend_state(BlendMode::Opaque)?,
            alpha_blend: device.create_blend_state(BlendMode::Alpha)?,
            samplers: HashMap::default(),
            quad,
            cube,
            screen_quad,
            glyphs: GlyphCache::new(),
            pass_resources: SmallVec::new(),
        })
    }

    pub fn scene(&self) -> &SceneProperties {
        self.scene.get()
    }

    pub fn scene_mut(&mut self) -> &mut SceneProperties {
        self.scene.get_mut()
    }

    pub fn upload_scene(&self, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        self.scene.upload(device)
    }

    /// Binds the scene, model and texture config blocks to their slots.
    pub fn bind_constant_blocks(&self, device: &mut dyn GraphicsDevice) {
        device.set_constant_buffer(SCENE_SLOT, self.scene.buffer());
        device.set_constant_buffer(MODEL_SLOT, self.model.buffer());
        device.set_constant_buffer(TEXTURE_CONFIG_SLOT, self.texture_config.buffer());
    }

    pub fn update_model(
        &mut self,
        model: Mat4,
        view: Mat4,
        projection: Mat4,
        device: &mut dyn GraphicsDevice,
    ) -> Result<(), DeviceError> {
        self.model.set(ModelProperties::new(model, view, projection), device)
    }

    pub fn bind_blend(&self, blend_mode: BlendMode, device: &mut dyn GraphicsDevice) {
        let state = match blend_mode {
            BlendMode::Opaque => self.opaque_blend,
            BlendMode::Alpha => self.alpha_blend,
        };
        device.set_blend_state(state);
    }

    pub fn bind_cull(&self, cull_mode: CullMode, device: &mut dyn GraphicsDevice) {
        let index = match cull_mode {
            CullMode::None => 0,
            CullMode::Front => 1,
            CullMode::Back => 2,
        };
        device.set_rasterizer_state(self.rasterizers[index]);
    }

    /// Sampler for a descriptor, created on first use.
    pub fn sampler_state(&mut self, desc: SamplerDesc, device: &mut dyn GraphicsDevice) -> Result<SamplerId, DeviceError> {
        if let Some(sampler) = self.samplers.get(&desc) {
            return Ok(*sampler);
        }
        let sampler = device.create_sampler(&desc)?;
        self.samplers.insert(desc, sampler);
        Ok(sampler)
    }

    /**
     * Uploads and binds a material's constants, cull mode and textures.
     * Textures go to consecutive slots starting at 0. Every slot gets a sampler,
     * including slots whose texture is missing.
     * Pass resources set through [`Self::set_pass_resources`] are bound right after them.
     * Post effects and text are never culled.
     * Returns the first texture slot left unused.
     */
    pub fn bind_material(
        &mut self,
        material: &mut Material,
        is_post_effect_or_text: bool,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        let bytes = material.constant_bytes();
        let buffer = match material.constant_buffer.as_ref().map(OwnedBuffer::id) {
            Some(buffer) => {
                device.update_buffer(buffer, &bytes)?;
                buffer
            },
            None => {
                let buffer = OwnedBuffer::create(BufferKind::Constant, &bytes, device)?;
                material.constant_buffer.insert(buffer).id()
            },
        };
        device.set_constant_buffer(MATERIAL_SLOT, buffer);

        let cull_mode = if is_post_effect_or_text { CullMode::None } else { material.cull_mode };
        self.bind_cull(cull_mode, device);

        let mut texture_mask = 0;
        let mut slot = 0;
        for (name, entry) in material.textures() {
            if slot >= MAX_TEXTURE_SLOTS {
                log::warn!("Material texture '{name}' exceeds the {MAX_TEXTURE_SLOTS} available slots");
                break;
            }
            match &entry.texture {
                Some(texture) => {
                    let sampler = self.sampler_state(entry.sampler, device)?;
                    device.set_shader_resource(slot, Some(ShaderResource::Texture(texture.read().id())));
                    device.set_sampler(slot, sampler);
                    texture_mask |= 1 << slot;
                },
                None => {
                    let sampler = self.sampler_state(SamplerDesc::default(), device)?;
                    device.set_shader_resource(slot, None);
                    device.set_sampler(slot, sampler);
                },
            }
            slot += 1;
        }
        self.texture_config.set(TextureConfig { texture_mask, ..Default::default() }, device)?;
        let pass_resources = std::mem::take(&mut self.pass_resources);
        let slot = self.bind_resources(&pass_resources, slot, device);
        self.pass_resources = pass_resources;
        slot
    }

    /// Resources of the pass currently drawing, bound by every [`Self::bind_material`] until replaced.
    pub fn set_pass_resources(&mut self, resources: SmallVec<[ShaderResource; 4]>) {
        self.pass_resources = resources;
    }

    /// Binds resources to consecutive slots with the default sampler. Returns the next free slot.
    pub fn bind_resources(
        &mut self,
        resources: &[ShaderResource],
        first_slot: u32,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        if resources.is_empty() {
            return Ok(first_slot);
        }
        let sampler = self.sampler_state(SamplerDesc::default(), device)?;
        let mut slot = first_slot;
        for resource in resources {
            if slot >= MAX_TEXTURE_SLOTS {
                log::warn!("Pass resource {resource:?} exceeds the {MAX_TEXTURE_SLOTS} available slots");
                break;
            }
            device.set_shader_resource(slot, Some(*resource));
            device.set_sampler(slot, sampler);
            slot += 1;
        }
        Ok(slot)
    }

    pub fn quad(&self) -> &Handle<Mesh> {
        &self.quad
    }

    pub fn cube(&self) -> &Handle<Mesh> {
        &self.cube
    }

    pub fn screen_quad(&self) -> &Mesh {
        &self.screen_quad
    }

    /// Binds a mesh's buffers and draws all of its indices.
    pub fn draw_mesh(&self, mesh: &Mesh, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        device.set_vertex_buffer(mesh.vertices.id(), mesh.stride);
        device.set_index_buffer(mesh.indices.id());
        device.draw_indexed(mesh.num_indices)
    }

    pub fn draw_quad(&self, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        self.draw_mesh(&self.quad.read(), device)
    }

    pub fn draw_cube(&self, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        self.draw_mesh(&self.cube.read(), device)
    }

    pub fn draw_screen_quad(&self, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        self.draw_mesh(&self.screen_quad, device)
    }

    pub fn glyph(
        &mut self,
        font: &Handle<Font>,
        pixel_size: f32,
        character: char,
        device: &mut dyn GraphicsDevice,
    ) -> Result<Glyph, DeviceError> {
        self.glyphs.glyph(font, pixel_size, character, device).cloned()
    }

    pub fn glyph_cache(&self) -> &GlyphCache {
        &self.glyphs
    }

    /// Evicts glyphs of dropped fonts. Returns how many were evicted.
    pub fn purge_glyphs(&mut self) -> usize {
        self.glyphs.purge()
    }
}

#[derive(Error, Display, From, Debug)]
pub enum RenderError {
    #[display(fmt="Builtin mesh '{}' is missing from the resource registry", _0)]
    #[from(ignore)]
    MissingBuiltinMesh(#[error(not(source))] String),
    #[display(fmt="{_0}")]
    Device(DeviceError),
    #[display(fmt="{_0}")]
    Mesh(MeshError),
}
