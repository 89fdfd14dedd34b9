use crate::{DeviceError, GraphicsDevice, OwnedTexture, TextureDesc, TextureFormat, TextureId};

/// A texture uploaded to the device. Released from the device when dropped.
#[derive(Debug)]
pub struct Texture {
    pub(crate) texture: OwnedTexture,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: TextureFormat,
}

impl Texture {

    pub fn from_pixels(
        width: u32,
        height: u32,
        format: TextureFormat,
        pixels: &[u8],
        device: &mut dyn GraphicsDevice,
    ) -> Result<Self, DeviceError> {
        let desc = TextureDesc { width, height, format };
        let texture = OwnedTexture::create(&desc, pixels, device)?;
        Ok(Self { texture, width, height, format })
    }

    /// Decodes an encoded image (png, jpeg etc) and uploads it as RGBA8.
    pub fn decode(bytes: &[u8], device: &mut dyn GraphicsDevice) -> Result<Self, TextureError> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = image.dimensions();
        Ok(Self::from_pixels(width, height, TextureFormat::Rgba8, image.as_raw(), device)?)
    }

    pub fn id(&self) -> TextureId {
        self.texture.id()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }
}

#[derive(derive_more::Error, derive_more::Display, derive_more::From, Debug)]
pub enum TextureError {
    #[display(fmt="{_0}")]
    Decode(image::ImageError),
    #[display(fmt="{_0}")]
    Device(DeviceError),
}

#[cfg(test)]
mod test {
    use std::io::Cursor;
    use crate::{RecordingDevice, Texture, TextureFormat};

    #[test]
    fn decodes_png() {
        let mut png = Vec::new();
        let image = image::RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        image.write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png).unwrap();

        let mut device = RecordingDevice::new();
        let texture = Texture::decode(&png, &mut device).unwrap();
        assert_eq!((3, 2), (texture.width(), texture.height()));
        assert_eq!(TextureFormat::Rgba8, device.texture_desc(texture.id()).unwrap().format);
    }

    #[test]
    fn rejects_garbage() {
        let mut device = RecordingDevice::new();
        assert!(Texture::decode(&[1, 2, 3], &mut device).is_err());
    }
}
