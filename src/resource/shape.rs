use glam::{Vec2, Vec3};
use crate::MeshData;

/**
 * Unit quad centered on the origin, facing -Z.
 * Used for images and glyphs, which scale it to their size in world units.
 */
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Quad {
    pub half_extents: Vec2,
}

impl Default for Quad {
    fn default() -> Self {
        Self { half_extents: Vec2::splat(0.5) }
    }
}

impl From<Quad> for MeshData {
    fn from(quad: Quad) -> Self {
        let mut mesh = empty_mesh();
        let half = quad.half_extents;
        push_face(&mut mesh, Vec3::ZERO, Vec3::X * half.x, Vec3::Y * half.y, -Vec3::Z);
        mesh
    }
}

/**
 * Quad covering the whole viewport in normalized device coordinates.
 * Used by composite passes and post-processing.
 */
#[derive(Copy, Clone, PartialEq, Default, Debug)]
pub struct ScreenQuad;

impl From<ScreenQuad> for MeshData {
    fn from(_: ScreenQuad) -> Self {
        let mut mesh = empty_mesh();
        push_face(&mut mesh, Vec3::ZERO, Vec3::X, Vec3::Y, -Vec3::Z);
        mesh
    }
}

/**
 * Axis aligned box with outward normals.
 * [`Cuboid::UNIT`] is the cube skyboxes are drawn with.
 */
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Cuboid {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl Cuboid {
    pub const UNIT: Cuboid = Cuboid {
        center: Vec3::ZERO,
        half_extents: Vec3::splat(0.5),
    };
}

impl Default for Cuboid {
    fn default() -> Self {
        Self::UNIT
    }
}

impl From<Cuboid> for MeshData {
    fn from(cuboid: Cuboid) -> Self {
        let mut mesh = empty_mesh();
        let c = cuboid.center;
        let h = cuboid.half_extents;
        for normal in [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z] {
            let forward = -normal;
            let up = if normal.y == 0.0 { Vec3::Y } else { Vec3::Z };
            let right = up.cross(forward);
            push_face(&mut mesh, c + normal * h, right * h, up * h, normal);
        }
        mesh
    }
}

fn empty_mesh() -> MeshData {
    MeshData {
        normals: Some(Vec::new()),
        uvs: Some(Vec::new()),
        ..Default::default()
    }
}

// Adds a face wound clockwise when seen from the side its normal points to.
fn push_face(mesh: &mut MeshData, center: Vec3, right: Vec3, up: Vec3, normal: Vec3) {
    let first = mesh.positions.len() as u32;
    mesh.positions.extend([
        center - right - up,
        center - right + up,
        center + right + up,
        center + right - up,
    ]);
    if let Some(normals) = &mut mesh.normals {
        normals.extend([normal; 4]);
    }
    if let Some(uvs) = &mut mesh.uvs {
        uvs.extend([Vec2::new(0.0, 1.0), Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)]);
    }
    mesh.indices.extend([first, first + 1, first + 2, first + 2, first + 3, first]);
}

#[cfg(test)]
mod test {
    use glam::Vec3;
    use crate::{Cuboid, MeshData, Quad, ScreenQuad};

    #[test]
    fn cube_has_outward_faces() {
        let mesh = MeshData::from(Cuboid::UNIT);
        assert_eq!(24, mesh.positions.len());
        assert_eq!(36, mesh.indices.len());
        let normals = mesh.normals.as_ref().unwrap();
        for (position, normal) in mesh.positions.iter().zip(normals) {
            assert_eq!(0.5, position.dot(*normal));
        }
        assert!(mesh.vertex_bytes().is_ok());
    }

    #[test]
    fn quads() {
        let quad = MeshData::from(Quad::default());
        assert_eq!(6, quad.indices.len());
        assert!(quad.positions.iter().all(|p| p.x.abs() == 0.5 && p.y.abs() == 0.5 && p.z == 0.0));
        let screen = MeshData::from(ScreenQuad);
        assert!(screen.positions.iter().all(|p| p.x.abs() == 1.0 && p.y.abs() == 1.0));
        assert_eq!(Some(&vec![-Vec3::Z; 4]), screen.normals.as_ref());
    }
}
