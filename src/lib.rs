mod framework;
mod math;
mod graphics;
mod resource;
mod scene;
mod render;
mod config;

pub use framework::*;
pub use math::*;
pub use graphics::*;
pub use resource::*;
pub use scene::*;
pub use render::*;
pub use config::*;
