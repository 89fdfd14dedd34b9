use glam::{Vec3, Quat, Mat4, EulerRot};
use crate::LocalToWorld;


/**
 * The 3D transformation of an object, which includes its translation (position) rotation and scale.
 * Convenience for building [`LocalToWorld`] matrices for root entities.
 */
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Transform {
    
    pub const IDENTITY: Self = Self {
        translation: Vec3::new(0.0, 0.0, 0.0),
        rotation: Quat::IDENTITY,
        scale: Vec3::new(1.0, 1.0, 1.0),
    };

    pub fn with_translation(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    pub fn with_xyz(mut self, x: f32, y: f32, z: f32) -> Self {
        self.translation = Vec3::new(x, y, z);
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_euler(mut self, rot: EulerRot, a: f32, b: f32, c: f32) -> Self {
        self.rotation = Quat::from_euler(rot, a, b, c);
        self
    }

    /// Rotates the transform so that its forward axis (+Z) points at the target.
    pub fn looking_at(mut self, target: Vec3, up: Vec3) -> Self {
        let forward = (target - self.translation).normalize_or_zero();
        if forward == Vec3::ZERO {
            return self;
        }
        let right = up.cross(forward).normalize_or_zero();
        let up = forward.cross(right);
        self.rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, forward));
        self
    }

    /// Composes this transform with a child transform.
    pub fn mul_transform(self, child: Transform) -> Transform {
        let matrix = Mat4::from(self) * Mat4::from(child);
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Transform { translation, rotation, scale }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Transform> for Mat4 {
    fn from(transform: Transform) -> Self {
        Self::from_scale_rotation_translation(
            transform.scale,
            transform.rotation,
            transform.translation
        )
    }
}

impl From<Transform> for LocalToWorld {
    fn from(transform: Transform) -> Self {
        LocalToWorld(transform.into())
    }
}
