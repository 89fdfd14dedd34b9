mod handle;
mod mesh;
mod shape;
mod texture;
mod shader;
mod material;
mod font;
mod registry;

pub use handle::*;
pub use mesh::*;
pub use shape::*;
pub use texture::*;
pub use shader::*;
pub use material::*;
pub use font::*;
pub use registry::*;
