use glam::{Mat4, Vec2, Vec3};
use crate::{
    BlendMode, Color, DeviceError, Font, GraphicsDevice, Handle, Material, MaterialOverride, Mesh,
    SceneRendererContext, Texture, TextureEntry,
};

/// Texture entry images are injected into.
pub const IMAGE_TEXTURE: &str = "image";
/// Texture entry glyph coverage masks are injected into.
pub const MASK_TEXTURE: &str = "mask";
/// Vector4 property colors are injected into.
pub const COLOR_PROPERTY: &str = "color";

#[derive(Clone, Debug)]
pub struct MeshDrawCommand {
    pub model: Mat4,
    pub mesh: Handle<Mesh>,
    pub material: Handle<Material>,
}

#[derive(Clone, Debug)]
pub struct ImageDrawCommand {
    pub model: Mat4,
    pub image: Handle<Texture>,
    pub material: Handle<Material>,
    pub color: Color,
    pub pixels_per_unit: f32,
}

#[derive(Clone, Debug)]
pub struct TextDrawCommand {
    pub model: Mat4,
    pub text: String,
    pub font: Handle<Font>,
    pub material: Handle<Material>,
    pub color: Color,
    pub pixel_size: f32,
    pub pixels_per_unit: f32,
}

/**
 * Everything needed to draw a single renderable for one frame.
 * Built fresh every frame while walking the scene and discarded once drawn.
 */
#[derive(Clone, Debug)]
pub enum DrawCommand {
    Mesh(MeshDrawCommand),
    Image(ImageDrawCommand),
    Text(TextDrawCommand),
}

impl DrawCommand {

    pub fn material(&self) -> &Handle<Material> {
        match self {
            Self::Mesh(command) => &command.material,
            Self::Image(command) => &command.material,
            Self::Text(command) => &command.material,
        }
    }

    pub fn model(&self) -> Mat4 {
        match self {
            Self::Mesh(command) => command.model,
            Self::Image(command) => command.model,
            Self::Text(command) => command.model,
        }
    }

    /// Issues the command's draws. Returns the number of draw calls made.
    pub fn execute(
        &self,
        view: Mat4,
        projection: Mat4,
        context: &mut SceneRendererContext,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        match self {
            Self::Mesh(command) => command.execute(view, projection, context, device),
            Self::Image(command) => command.execute(view, projection, context, device),
            Self::Text(command) => command.execute(view, projection, context, device),
        }
    }
}

impl MeshDrawCommand {
    fn execute(
        &self,
        view: Mat4,
        projection: Mat4,
        context: &mut SceneRendererContext,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        context.bind_blend(BlendMode::Opaque, device);
        context.update_model(self.model, view, projection, device)?;
        context.bind_material(&mut self.material.write(), false, device)?;
        context.draw_mesh(&self.mesh.read(), device)?;
        Ok(1)
    }
}

impl ImageDrawCommand {
    fn execute(
        &self,
        view: Mat4,
        projection: Mat4,
        context: &mut SceneRendererContext,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        let size = {
            let image = self.image.read();
            Vec2::new(image.width() as f32, image.height() as f32) / self.pixels_per_unit
        };
        let model = self.model * Mat4::from_scale(size.extend(1.0));
        context.bind_blend(BlendMode::Alpha, device);
        context.update_model(model, view, projection, device)?;

        let mut material = self.material.write();
        let sampler = material.texture(IMAGE_TEXTURE).map(|entry| entry.sampler).unwrap_or_default();
        let mut material = MaterialOverride::new(&mut material);
        material.set_texture(IMAGE_TEXTURE, TextureEntry::new(self.image.clone(), sampler));
        material.set_vector4(COLOR_PROPERTY, self.color.into());
        context.bind_material(&mut material, false, device)?;
        context.draw_quad(device)?;
        Ok(1)
    }
}

impl TextDrawCommand {
    fn execute(
        &self,
        view: Mat4,
        projection: Mat4,
        context: &mut SceneRendererContext,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        context.bind_blend(BlendMode::Alpha, device);

        let mut material = self.material.write();
        let sampler = material.texture(MASK_TEXTURE).map(|entry| entry.sampler).unwrap_or_default();
        let mut material = MaterialOverride::new(&mut material);
        material.set_vector4(COLOR_PROPERTY, self.color.into());

        let ppu = self.pixels_per_unit;
        let line_height = self.pixel_size / ppu;
        let mut pen = Vec2::ZERO;
        let mut draws = 0;
        for character in self.text.chars() {
            if character == '\n' {
                pen.x = 0.0;
                pen.y -= line_height;
                continue;
            }
            let glyph = context.glyph(&self.font, self.pixel_size, character, device)?;
            if let Some(texture) = glyph.texture {
                let metrics = glyph.metrics;
                let width = metrics.width as f32;
                let height = metrics.height as f32;
                let offset = Vec3::new(
                    pen.x + (metrics.xmin as f32 + width / 2.0) / ppu,
                    pen.y + (metrics.ymin as f32 + height / 2.0) / ppu,
                    0.0,
                );
                let model = self.model
                    * Mat4::from_translation(offset)
                    * Mat4::from_scale(Vec3::new(width / ppu, height / ppu, 1.0));
                context.update_model(model, view, projection, device)?;
                material.set_texture(MASK_TEXTURE, TextureEntry::new(texture, sampler));
                context.bind_material(&mut material, true, device)?;
                context.draw_quad(device)?;
                draws += 1;
            }
            pen.x += glyph.metrics.advance / ppu;
        }
        Ok(draws)
    }
}
