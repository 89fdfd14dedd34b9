//! Components the scene renderer reads from a [`hecs::World`].

mod components;

pub use components::*;
