use derive_more::*;

/// Placement of a rasterized glyph relative to the pen position, in pixels.
#[derive(Copy, Clone, PartialEq, Default, Debug)]
pub struct GlyphMetrics {
    pub xmin: i32,
    pub ymin: i32,
    pub width: u32,
    pub height: u32,
    /// Horizontal pen movement after this glyph.
    pub advance: f32,
}

/// Coverage bitmap of a single glyph, one byte per pixel, row-major.
#[derive(Clone, PartialEq, Default, Debug)]
pub struct GlyphBitmap {
    pub metrics: GlyphMetrics,
    pub coverage: Vec<u8>,
}

impl GlyphBitmap {
    /// True if the glyph has nothing to draw (whitespace, control characters).
    pub fn is_empty(&self) -> bool {
        self.metrics.width == 0 || self.metrics.height == 0
    }
}

/// Anything that can turn characters into coverage bitmaps.
pub trait GlyphSource: Send + Sync + 'static {
    fn rasterize(&self, character: char, pixel_size: f32) -> GlyphBitmap;
}

impl GlyphSource for fontdue::Font {
    fn rasterize(&self, character: char, pixel_size: f32) -> GlyphBitmap {
        let (metrics, coverage) = fontdue::Font::rasterize(self, character, pixel_size);
        GlyphBitmap {
            metrics: GlyphMetrics {
                xmin: metrics.xmin,
                ymin: metrics.ymin,
                width: metrics.width as u32,
                height: metrics.height as u32,
                advance: metrics.advance_width,
            },
            coverage,
        }
    }
}

/// Font face used by text renderers.
pub struct Font {
    source: Box<dyn GlyphSource>,
}

impl Font {

    /// Parses a TrueType or OpenType font.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FontError> {
        let font = fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default())
            .map_err(FontError::Parse)?;
        Ok(Self::from_source(font))
    }

    pub fn from_source(source: impl GlyphSource) -> Self {
        Self { source: Box::new(source) }
    }

    pub fn rasterize(&self, character: char, pixel_size: f32) -> GlyphBitmap {
        self.source.rasterize(character, pixel_size)
    }
}

#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
pub enum FontError {
    #[display(fmt="Failed to parse font: {}", _0)]
    Parse(#[error(not(source))] &'static str),
}

#[cfg(test)]
mod test {
    use crate::Font;

    #[test]
    fn rejects_invalid_font() {
        assert!(Font::from_bytes(&[0, 1, 2, 3]).is_err());
    }
}
