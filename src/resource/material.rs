use std::ops::{Deref, DerefMut};
use glam::Vec4;
use smallvec::SmallVec;
use vecmap::VecMap;
use crate::{CullMode, Handle, OwnedBuffer, SamplerDesc, Shader, Texture};

/// Texture bound by a material, along with the sampler used to read it.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct TextureEntry {
    pub texture: Option<Handle<Texture>>,
    pub sampler: SamplerDesc,
}

impl TextureEntry {
    pub fn new(texture: Handle<Texture>, sampler: SamplerDesc) -> Self {
        Self { texture: Some(texture), sampler }
    }
}

/**
 * Shader plus the property values fed to it.
 * Shared between any number of renderers through a [`Handle`].
 *
 * Textures are bound in insertion order starting at slot 0.
 * Floats and vector4s are packed into the material's constant block,
 * see [`Material::constant_bytes`].
 */
#[derive(Default)]
pub struct Material {
    pub shader: Option<Handle<Shader>>,
    pub cull_mode: CullMode,
    pub transparent: bool,
    floats: VecMap<String, f32>,
    vector4s: VecMap<String, Vec4>,
    textures: VecMap<String, TextureEntry>,
    pub(crate) constant_buffer: Option<OwnedBuffer>,
}

impl Material {

    pub fn new(shader: Handle<Shader>) -> Self {
        Self {
            shader: Some(shader),
            ..Default::default()
        }
    }

    pub fn with_transparent(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn with_float(mut self, name: impl Into<String>, value: f32) -> Self {
        self.set_float(name, value);
        self
    }

    pub fn with_vector4(mut self, name: impl Into<String>, value: Vec4) -> Self {
        self.set_vector4(name, value);
        self
    }

    pub fn with_texture(mut self, name: impl Into<String>, entry: TextureEntry) -> Self {
        self.set_texture(name, entry);
        self
    }

    pub fn set_float(&mut self, name: impl Into<String>, value: f32) -> Option<f32> {
        self.floats.insert(name.into(), value)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.floats.get(name).copied()
    }

    pub fn set_vector4(&mut self, name: impl Into<String>, value: Vec4) -> Option<Vec4> {
        self.vector4s.insert(name.into(), value)
    }

    pub fn vector4(&self, name: &str) -> Option<Vec4> {
        self.vector4s.get(name).copied()
    }

    pub fn remove_vector4(&mut self, name: &str) -> Option<Vec4> {
        self.vector4s.remove(name)
    }

    pub fn set_texture(&mut self, name: impl Into<String>, entry: TextureEntry) -> Option<TextureEntry> {
        self.textures.insert(name.into(), entry)
    }

    pub fn texture(&self, name: &str) -> Option<&TextureEntry> {
        self.textures.get(name)
    }

    pub fn remove_texture(&mut self, name: &str) -> Option<TextureEntry> {
        self.textures.remove(name)
    }

    /// Texture entries in binding order.
    pub fn textures(&self) -> impl Iterator<Item = (&str, &TextureEntry)> + '_ {
        self.textures.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    /**
     * Contents of the material's constant block.
     * Floats come first in insertion order, padded to 16 bytes, followed by vector4s.
     * Never empty, since zero-sized constant buffers are not allowed.
     */
    pub fn constant_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + self.floats.len() * 4 + self.vector4s.len() * 16);
        for value in self.floats.values() {
            bytes.extend_from_slice(bytemuck::bytes_of(value));
        }
        let padded = (bytes.len() + 15) / 16 * 16;
        bytes.resize(padded, 0);
        for value in self.vector4s.values() {
            bytes.extend_from_slice(bytemuck::bytes_of(value));
        }
        if bytes.is_empty() {
            bytes.resize(16, 0);
        }
        bytes
    }
}

/**
 * Temporarily overrides properties of a [`Material`].
 * Every property touched through the override is put back the way it was
 * (including being absent) when the override is dropped.
 */
pub struct MaterialOverride<'a> {
    material: &'a mut Material,
    textures: SmallVec<[(String, Option<TextureEntry>); 2]>,
    vector4s: SmallVec<[(String, Option<Vec4>); 2]>,
}

impl<'a> MaterialOverride<'a> {

    pub fn new(material: &'a mut Material) -> Self {
        Self {
            material,
            textures: SmallVec::new(),
            vector4s: SmallVec::new(),
        }
    }

    pub fn set_texture(&mut self, name: &str, entry: TextureEntry) {
        let previous = self.material.set_texture(name, entry);
        if !self.textures.iter().any(|(saved, _)| saved == name) {
            self.textures.push((String::from(name), previous));
        }
    }

    pub fn set_vector4(&mut self, name: &str, value: Vec4) {
        let previous = self.material.set_vector4(name, value);
        if !self.vector4s.iter().any(|(saved, _)| saved == name) {
            self.vector4s.push((String::from(name), previous));
        }
    }
}

impl Deref for MaterialOverride<'_> {
    type Target = Material;
    fn deref(&self) -> &Material {
        self.material
    }
}

impl DerefMut for MaterialOverride<'_> {
    fn deref_mut(&mut self) -> &mut Material {
        self.material
    }
}

impl Drop for MaterialOverride<'_> {
    fn drop(&mut self) {
        for (name, previous) in self.textures.drain(..).rev() {
            match previous {
                Some(entry) => { self.material.set_texture(name, entry); }
                None => { self.material.remove_texture(&name); }
            }
        }
        for (name, previous) in self.vector4s.drain(..).rev() {
            match previous {
                Some(value) => { self.material.set_vector4(name, value); }
                None => { self.material.remove_vector4(&name); }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use glam::Vec4;
    use crate::{Handle, Material, MaterialOverride, RecordingDevice, SamplerDesc, Texture, TextureEntry, TextureFormat};

    fn texture(device: &mut RecordingDevice) -> Handle<Texture> {
        Handle::new(Texture::from_pixels(1, 1, TextureFormat::Rgba8, &[0; 4], device).unwrap())
    }

    #[test]
    fn packs_constants() {
        let material = Material::default()
            .with_float("roughness", 0.5)
            .with_vector4("tint", Vec4::ONE);
        let bytes = material.constant_bytes();
        assert_eq!(32, bytes.len());
        let roughness: f32 = bytemuck::pod_read_unaligned(&bytes[0..4]);
        let tint: Vec4 = bytemuck::pod_read_unaligned(&bytes[16..32]);
        assert_eq!(0.5, roughness);
        assert_eq!(Vec4::ONE, tint);
        assert_eq!(16, Material::default().constant_bytes().len());
    }

    #[test]
    fn override_restores_previous_values() {
        let mut device = RecordingDevice::new();
        let original = TextureEntry::new(texture(&mut device), SamplerDesc::default());
        let mut material = Material::default()
            .with_texture("image", original.clone())
            .with_vector4("color", Vec4::ONE);
        {
            let mut scope = MaterialOverride::new(&mut material);
            scope.set_texture("image", TextureEntry::new(texture(&mut device), SamplerDesc::default()));
            scope.set_vector4("color", Vec4::ZERO);
            scope.set_vector4("color", Vec4::X);
            assert_eq!(Some(Vec4::X), scope.vector4("color"));
            assert_ne!(Some(&original), scope.texture("image"));
        }
        assert_eq!(Some(&original), material.texture("image"));
        assert_eq!(Some(Vec4::ONE), material.vector4("color"));
    }

    #[test]
    fn override_removes_absent_values() {
        let mut device = RecordingDevice::new();
        let mut material = Material::default();
        {
            let mut scope = MaterialOverride::new(&mut material);
            scope.set_texture("mask", TextureEntry::new(texture(&mut device), SamplerDesc::default()));
            scope.set_vector4("color", Vec4::ONE);
            assert_eq!(1, scope.texture_count());
        }
        assert_eq!(None, material.texture("mask"));
        assert_eq!(None, material.vector4("color"));
    }
}
