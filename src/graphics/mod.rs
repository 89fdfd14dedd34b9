//! Graphics primitives shared by resources and the renderer.

mod color;
mod device;

pub use color::*;
pub use device::*;
