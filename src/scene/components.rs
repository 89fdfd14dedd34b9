use glam::{Mat4, Vec3};
use crate::{Color, Font, Handle, Material, Mesh, Texture};

/// World-space transform of an entity, computed before rendering.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct LocalToWorld(pub Mat4);

impl LocalToWorld {

    pub const IDENTITY: Self = Self(Mat4::IDENTITY);

    pub fn from_translation(translation: Vec3) -> Self {
        Self(Mat4::from_translation(translation))
    }

    pub fn position(&self) -> Vec3 {
        self.0.w_axis.truncate()
    }

    /// World-space direction of the local +Z axis.
    pub fn forward(&self) -> Vec3 {
        self.0.transform_vector3(Vec3::Z).normalize_or_zero()
    }
}

impl Default for LocalToWorld {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/**
 * Either an orthographic or perspective camera projection.
 * Angles are in radians.
 */
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Projection {
    Perspective {
        fov: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        width: f32,
        near: f32,
        far: f32,
    },
}

impl Projection {
    pub fn matrix(&self, aspect_ratio: f32) -> Mat4 {
        match *self {
            Self::Perspective { fov, near, far } => Mat4::perspective_lh(fov, aspect_ratio, near, far),
            Self::Orthographic { width, near, far } => {
                let half_width = width * 0.5;
                let half_height = half_width / aspect_ratio;
                Mat4::orthographic_lh(-half_width, half_width, -half_height, half_height, near, far)
            },
        }
    }
}

/// Renders the scene from the point of view of its entity.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Camera {
    pub projection: Projection,
}

impl Camera {

    pub fn perspective(fov: f32, near: f32, far: f32) -> Self {
        Self { projection: Projection::Perspective { fov, near, far } }
    }

    pub fn orthographic(width: f32, near: f32, far: f32) -> Self {
        Self { projection: Projection::Orthographic { width, near, far } }
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(45_f32.to_radians(), 0.01, 10000.0)
    }
}

/// Draws meshes[i] with materials[i]. Both lists must be the same length.
#[derive(Clone, Default, Debug)]
pub struct MeshRenderer {
    pub meshes: Vec<Option<Handle<Mesh>>>,
    pub materials: Vec<Option<Handle<Material>>>,
}

impl MeshRenderer {
    pub fn new(mesh: Handle<Mesh>, material: Handle<Material>) -> Self {
        Self {
            meshes: vec![Some(mesh)],
            materials: vec![Some(material)],
        }
    }
}

/// Draws a textured quad, sized by the image's dimensions.
#[derive(Clone, Debug)]
pub struct ImageRenderer {
    pub image: Option<Handle<Texture>>,
    pub material: Option<Handle<Material>>,
    pub color: Color,
    pub pixels_per_unit: f32,
}

impl ImageRenderer {
    pub fn new(image: Handle<Texture>, material: Handle<Material>) -> Self {
        Self {
            image: Some(image),
            material: Some(material),
            ..Default::default()
        }
    }
}

impl Default for ImageRenderer {
    fn default() -> Self {
        Self {
            image: None,
            material: None,
            color: Color::WHITE,
            pixels_per_unit: 100.0,
        }
    }
}

/// Draws a line-broken string, one quad per glyph.
#[derive(Clone, Debug)]
pub struct TextRenderer {
    pub text: String,
    pub font: Option<Handle<Font>>,
    pub material: Option<Handle<Material>>,
    pub color: Color,
    pub pixel_size: f32,
    pub pixels_per_unit: f32,
}

impl TextRenderer {
    pub fn new(text: impl Into<String>, font: Handle<Font>, material: Handle<Material>) -> Self {
        Self {
            text: text.into(),
            font: Some(font),
            material: Some(material),
            ..Default::default()
        }
    }
}

impl Default for TextRenderer {
    fn default() -> Self {
        Self {
            text: String::new(),
            font: None,
            material: None,
            color: Color::WHITE,
            pixel_size: 32.0,
            pixels_per_unit: 100.0,
        }
    }
}

/// Light shining along the entity's forward axis.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct DirectionalLight {
    pub color: Color,
    pub intensity: f32,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self { color: Color::WHITE, intensity: 1.0 }
    }
}

#[derive(Copy, Clone, PartialEq, Debug)]
pub struct PointLight {
    pub color: Color,
    pub intensity: f32,
    pub range: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self { color: Color::WHITE, intensity: 1.0, range: 10.0 }
    }
}

/// Scene-wide lighting settings. Only one is expected per scene.
#[derive(Clone, Debug)]
pub struct SceneLighting {
    pub ambient: Color,
    pub ambient_intensity: f32,
    pub skybox: Option<Handle<Material>>,
}

impl Default for SceneLighting {
    fn default() -> Self {
        Self {
            ambient: Color::WHITE,
            ambient_intensity: 0.1,
            skybox: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PostProcessEffect {
    pub enabled: bool,
    pub material: Option<Handle<Material>>,
}

impl PostProcessEffect {
    pub fn new(material: Handle<Material>) -> Self {
        Self { enabled: true, material: Some(material) }
    }
}

/// Full-screen effects applied, in order, to the output of the camera on the same entity.
#[derive(Clone, Default, Debug)]
pub struct PostProcessing {
    pub effects: Vec<PostProcessEffect>,
}

/// Marker that hides an entity from rendering.
#[derive(Copy, Clone, Eq, PartialEq, Default, Debug)]
pub struct NonVisible;

#[cfg(test)]
mod test {
    use glam::{Vec3, Vec4};
    use crate::{Camera, LocalToWorld, Projection};

    #[test]
    fn position_and_forward() {
        let l2w = LocalToWorld::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(Vec3::new(1.0, 2.0, 3.0), l2w.position());
        assert_eq!(Vec3::Z, l2w.forward());
    }

    #[test]
    fn perspective_maps_near_plane_to_zero() {
        let camera = Camera::default();
        let projection = camera.projection.matrix(1.0);
        let clip = projection * Vec4::new(0.0, 0.0, 0.01, 1.0);
        assert!((clip.z / clip.w).abs() < 1e-4);
    }

    #[test]
    fn orthographic_uses_width_and_aspect() {
        let projection = Projection::Orthographic { width: 4.0, near: 0.0, far: 1.0 }.matrix(2.0);
        let corner = projection * Vec4::new(2.0, 1.0, 0.5, 1.0);
        assert!((corner.x - 1.0).abs() < 1e-5);
        assert!((corner.y - 1.0).abs() < 1e-5);
    }
}
