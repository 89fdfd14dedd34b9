use derive_more::*;
use serde::Deserialize;
use crate::{Color, MAX_POINT_LIGHTS};

/// Tunables of the scene renderer. Missing fields fall back to their defaults.
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Point lights uploaded per camera. Clamped to [`MAX_POINT_LIGHTS`].
    pub max_point_lights: usize,
    /// Geometry buffer a camera renders into when it has post-processing.
    pub screen_buffer: String,
    /// Geometry buffer intermediate post effects write to.
    pub screen_back_buffer: String,
    /// Pass target name that stands for the camera's own target.
    pub camera_target_name: String,
    /// Pass texture resource name that stands for the depth buffer.
    pub depth_target_name: String,
    pub clear_color: Color,
    pub depth_clear: f32,
}

impl RendererConfig {

    pub fn from_yaml(source: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn point_light_limit(&self) -> usize {
        self.max_point_lights.min(MAX_POINT_LIGHTS)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            max_point_lights: MAX_POINT_LIGHTS,
            screen_buffer: String::from("screen"),
            screen_back_buffer: String::from("screen_back"),
            camera_target_name: String::from("camera"),
            depth_target_name: String::from("depth"),
            clear_color: Color::TRANSPARENT,
            depth_clear: 1.0,
        }
    }
}

#[derive(Error, Display, From, Debug)]
pub enum ConfigError {
    #[display(fmt="Invalid renderer config: {_0}")]
    Yaml(serde_yaml::Error),
}

#[cfg(test)]
mod test {
    use crate::{Color, RendererConfig};

    #[test]
    fn partial_yaml_uses_defaults() {
        let config = RendererConfig::from_yaml(concat!(
            "max_point_lights: 5000\n",
            "clear_color: { r: 0.0, g: 0.0, b: 1.0, a: 1.0 }\n",
        )).unwrap();
        assert_eq!(5000, config.max_point_lights);
        assert_eq!(1024, config.point_light_limit());
        assert_eq!(Color::BLUE, config.clear_color);
        assert_eq!("screen", config.screen_buffer);
        assert_eq!(1.0, config.depth_clear);
    }

    #[test]
    fn rejects_invalid_yaml() {
        assert!(RendererConfig::from_yaml("max_point_lights: lots").is_err());
    }
}
