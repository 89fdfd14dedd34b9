//! Turns a [`hecs::World`] into draw calls against a [`crate::GraphicsDevice`].
//! [`SceneRenderer`] is the entry point.

mod constants;
mod geometry_buffer;
mod rendering_context;
mod glyph;
mod context;
mod command;
mod group;
mod renderer;

pub use constants::*;
pub use geometry_buffer::*;
pub use rendering_context::*;
pub use glyph::*;
pub use context::*;
pub use command::*;
pub use group::*;
pub use renderer::*;
