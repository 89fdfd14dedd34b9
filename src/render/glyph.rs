use crate::{
    DeviceError, Font, GlyphMetrics, GraphicsDevice, Handle, HandleId, HashMap, IntMap, Texture, TextureFormat,
    WeakHandle,
};

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
struct GlyphKey {
    font: HandleId,
    pixel_size: u32,
    character: char,
}

/// A rasterized glyph. Glyphs with nothing to draw have no texture.
#[derive(Clone, Debug)]
pub struct Glyph {
    pub texture: Option<Handle<Texture>>,
    pub metrics: GlyphMetrics,
}

/**
 * Glyph textures keyed by font, pixel size and character.
 * Fonts are held weakly. Glyphs of a dropped font stay cached until [`GlyphCache::purge`],
 * and are never returned for a font that took over its id.
 */
#[derive(Default)]
pub struct GlyphCache {
    fonts: IntMap<HandleId, WeakHandle<Font>>,
    glyphs: HashMap<GlyphKey, Glyph>,
}

impl GlyphCache {

    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a glyph, rasterizing and uploading it on first use.
    pub fn glyph(
        &mut self,
        font: &Handle<Font>,
        pixel_size: f32,
        character: char,
        device: &mut dyn GraphicsDevice,
    ) -> Result<&Glyph, DeviceError> {
        let id = font.id();
        let tracked = self.fonts
            .get(&id)
            .and_then(WeakHandle::upgrade)
            .is_some_and(|tracked| tracked == *font);
        if !tracked {
            self.evict(id);
            self.fonts.insert(id, font.downgrade());
        }
        let key = GlyphKey {
            font: id,
            pixel_size: pixel_size.to_bits(),
            character,
        };
        if !self.glyphs.contains_key(&key) {
            let bitmap = font.read().rasterize(character, pixel_size);
            let texture = if bitmap.is_empty() {
                None
            }
            else {
                let metrics = &bitmap.metrics;
                let texture = Texture::from_pixels(metrics.width, metrics.height, TextureFormat::R8, &bitmap.coverage, device)?;
                Some(Handle::new(texture))
            };
            log::trace!("Rasterized glyph {character:?} at {pixel_size}px");
            self.glyphs.insert(key, Glyph { texture, metrics: bitmap.metrics });
        }
        self.glyphs.get(&key).ok_or(DeviceError::InvalidHandle)
    }

    /// Evicts the glyphs of every dropped font. Returns how many glyphs were evicted.
    pub fn purge(&mut self) -> usize {
        let before = self.glyphs.len();
        self.fonts.retain(|_, font| font.is_alive());
        let fonts = &self.fonts;
        self.glyphs.retain(|key, _| fonts.contains_key(&key.font));
        let purged = before - self.glyphs.len();
        if purged > 0 {
            log::debug!("Purged {purged} glyphs of dropped fonts");
        }
        purged
    }

    fn evict(&mut self, font: HandleId) {
        self.glyphs.retain(|key, _| key.font != font);
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}
