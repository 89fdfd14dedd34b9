use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use crate::{BufferId, BufferKind, DeviceError, GraphicsDevice, OwnedBuffer};

/// Hard limit on the number of point lights the scene block can hold.
pub const MAX_POINT_LIGHTS: usize = 1024;

/// Constant buffer slot of [`SceneProperties`].
pub const SCENE_SLOT: u32           = 0;
/// Constant buffer slot of [`ModelProperties`].
pub const MODEL_SLOT: u32           = 1;
/// Constant buffer slot of [`TextureConfig`].
pub const TEXTURE_CONFIG_SLOT: u32  = 2;
/// Constant buffer slot of the bound material's own properties.
pub const MATERIAL_SLOT: u32        = 3;

#[repr(C)]
#[derive(Copy, Clone, PartialEq, Default, Debug, Pod, Zeroable)]
pub struct PointLightData {
    pub position: Vec3,
    pub range: f32,
    pub color: Vec3,
    pub intensity: f32,
}

/// Per-camera state: matrices, camera position and lighting.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct SceneProperties {
    pub projection: Mat4,
    pub inv_projection: Mat4,
    pub view: Mat4,
    pub inv_view: Mat4,
    pub camera_position: Vec4,
    /// Ambient color, premultiplied by its intensity.
    pub ambient: Vec4,
    pub light_color: Vec4,
    pub light_direction: Vec4,
    /// Non-zero if the directional light fields are meaningful.
    pub light_enabled: u32,
    pub point_light_count: u32,
    pub _padding: [u32; 2],
    pub point_lights: [PointLightData; MAX_POINT_LIGHTS],
}

impl SceneProperties {
    pub fn point_lights(&self) -> &[PointLightData] {
        let count = (self.point_light_count as usize).min(MAX_POINT_LIGHTS);
        &self.point_lights[..count]
    }
}

/// Per-draw model matrices.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Default, Debug, Pod, Zeroable)]
pub struct ModelProperties {
    pub model: Mat4,
    pub model_inverse: Mat4,
    pub model_view_projection: Mat4,
}

impl ModelProperties {
    pub fn new(model: Mat4, view: Mat4, projection: Mat4) -> Self {
        Self {
            model,
            model_inverse: model.inverse(),
            model_view_projection: projection * view * model,
        }
    }
}

/// Which texture slots of the bound material hold a texture. Bit `i` is slot `i`.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug, Pod, Zeroable)]
pub struct TextureConfig {
    pub texture_mask: u32,
    pub _padding: [u32; 3],
}

impl TextureConfig {
    pub fn has_texture(&self, slot: u32) -> bool {
        slot < 32 && self.texture_mask & (1 << slot) != 0
    }
}

/**
 * CPU copy of a constant block plus the device buffer mirroring it.
 * Writes only reach the device on [`ConstantBlock::upload`].
 */
pub struct ConstantBlock<T: Pod> {
    value: Box<T>,
    buffer: OwnedBuffer,
}

impl<T: Pod> ConstantBlock<T> {

    pub fn new(device: &mut dyn GraphicsDevice) -> Result<Self, DeviceError> {
        let value = Box::new(T::zeroed());
        let buffer = OwnedBuffer::create(BufferKind::Constant, bytemuck::bytes_of(value.as_ref()), device)?;
        Ok(Self { value, buffer })
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.value
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer.id()
    }

    pub fn upload(&self, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        device.update_buffer(self.buffer.id(), bytemuck::bytes_of(self.value.as_ref()))
    }

    /// Replaces the value and uploads it.
    pub fn set(&mut self, value: T, device: &mut dyn GraphicsDevice) -> Result<(), DeviceError> {
        *self.value = value;
        self.upload(device)
    }
}

#[cfg(test)]
mod test {
    use std::mem::size_of;
    use glam::Mat4;
    use crate::{ConstantBlock, ModelProperties, RecordingDevice, SceneProperties, TextureConfig};

    #[test]
    fn block_sizes_are_16_byte_multiples() {
        assert_eq!(0, size_of::<SceneProperties>() % 16);
        assert_eq!(0, size_of::<ModelProperties>() % 16);
        assert_eq!(16, size_of::<TextureConfig>());
    }

    #[test]
    fn upload_writes_buffer() {
        let mut device = RecordingDevice::new();
        let mut block = ConstantBlock::<ModelProperties>::new(&mut device).unwrap();
        let translation = Mat4::from_translation(glam::Vec3::X);
        block.set(ModelProperties::new(translation, Mat4::IDENTITY, Mat4::IDENTITY), &mut device).unwrap();
        let bytes = device.buffer_contents(block.buffer()).unwrap();
        let uploaded: ModelProperties = bytemuck::pod_read_unaligned(bytes);
        assert_eq!(translation, uploaded.model);
        assert_eq!(translation.inverse(), uploaded.model_inverse);
    }
}
