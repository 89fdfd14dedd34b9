use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use serde::Deserialize;

#[repr(C)]
#[derive(Copy, Clone, PartialEq, Debug, Pod, Zeroable, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {

    pub const WHITE: Color          = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color          = Color::new(0.0, 0.0, 0.0, 1.0);
    pub const RED: Color            = Color::new(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Color          = Color::new(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Color           = Color::new(0.0, 0.0, 1.0, 1.0);
    pub const GRAY: Color           = Color::new(0.5, 0.5, 0.5, 1.0);
    pub const TRANSPARENT: Color    = Color::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<Color> for Vec4 {
    fn from(color: Color) -> Self {
        Vec4::new(color.r, color.g, color.b, color.a)
    }
}

impl From<Vec4> for Color {
    fn from(v: Vec4) -> Self {
        Color::new(v.x, v.y, v.z, v.w)
    }
}
