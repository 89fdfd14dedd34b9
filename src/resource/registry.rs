use std::any::{Any, TypeId};
use crate::{Cuboid, GraphicsDevice, Handle, HashMap, Mesh, MeshData, MeshError, Quad};

/// Name the builtin unit quad is registered under.
pub const BUILTIN_QUAD: &str = "mesh/quad";

/// Name the builtin unit cube is registered under.
pub const BUILTIN_CUBE: &str = "mesh/cube";

/**
 * Named resources, stored per resource type.
 * The registry holds one strong reference to each resource.
 * Removing a resource drops that reference, which expires weak handles once no renderer holds it either.
 */
#[derive(Default)]
pub struct ResourceRegistry {
    resources: HashMap<(TypeId, String), Box<dyn Any + Send + Sync>>,
}

impl ResourceRegistry {

    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a resource and returns a handle to it.
    pub fn insert<A: Send + Sync + 'static>(&mut self, name: impl Into<String>, resource: A) -> Handle<A> {
        let handle = Handle::new(resource);
        self.insert_handle(name, handle.clone());
        handle
    }

    /// Registers an existing handle, replacing whatever was stored under the same name.
    pub fn insert_handle<A: Send + Sync + 'static>(&mut self, name: impl Into<String>, handle: Handle<A>) {
        self.resources.insert((TypeId::of::<A>(), name.into()), Box::new(handle));
    }

    pub fn get<A: Send + Sync + 'static>(&self, name: &str) -> Option<Handle<A>> {
        let key = (TypeId::of::<A>(), String::from(name));
        self.resources
            .get(&key)
            .and_then(|resource| resource.downcast_ref::<Handle<A>>())
            .cloned()
    }

    pub fn remove<A: Send + Sync + 'static>(&mut self, name: &str) -> Option<Handle<A>> {
        let key = (TypeId::of::<A>(), String::from(name));
        let resource = self.resources.remove(&key)?;
        resource.downcast::<Handle<A>>().ok().map(|handle| *handle)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Uploads the unit quad and unit cube the scene renderer depends on.
    pub fn install_builtin_meshes(&mut self, device: &mut dyn GraphicsDevice) -> Result<(), MeshError> {
        let quad = Mesh::from_data(&MeshData::from(Quad::default()), device)?;
        let cube = Mesh::from_data(&MeshData::from(Cuboid::UNIT), device)?;
        self.insert(BUILTIN_QUAD, quad);
        self.insert(BUILTIN_CUBE, cube);
        log::debug!("Installed builtin meshes");
        Ok(())
    }
}
