use std::cmp::Ordering;
use std::collections::BTreeMap;
use glam::Mat4;
use crate::{
    DeviceError, DrawCommand, GraphicsDevice, Handle, HandleId, HashMap, IntMap, Material,
    SceneRendererContext, Shader, WeakHandle,
};

/// Draw commands bucketed by material, so consecutive draws share material state.
#[derive(Default)]
pub struct OpaqueDrawGroup {
    buckets: IntMap<HandleId, Vec<DrawCommand>>,
}

impl OpaqueDrawGroup {

    pub fn append(&mut self, material: &Handle<Material>, command: DrawCommand) {
        self.buckets.entry(material.id()).or_default().push(command);
    }

    /// Commands in draw order. Commands of one material are contiguous.
    pub fn commands(&self) -> impl Iterator<Item = &DrawCommand> + '_ {
        self.buckets.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

/// Depth along the camera's forward axis, totally ordered.
#[derive(Copy, Clone, Debug)]
pub struct Depth(pub f32);

impl PartialEq for Depth {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Depth {}

impl PartialOrd for Depth {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Depth {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Draw commands ordered back to front. Commands at equal depth are kept in insertion order.
#[derive(Default)]
pub struct TransparentDrawGroup {
    commands: BTreeMap<Depth, Vec<DrawCommand>>,
}

impl TransparentDrawGroup {

    pub fn append(&mut self, depth: f32, command: DrawCommand) {
        self.commands.entry(Depth(depth)).or_default().push(command);
    }

    /// Commands in draw order, farthest first.
    pub fn commands(&self) -> impl Iterator<Item = &DrawCommand> + '_ {
        self.commands.values().rev().flatten()
    }

    pub fn len(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }
}

pub enum DrawGroupKind {
    Opaque(OpaqueDrawGroup),
    Transparent(TransparentDrawGroup),
}

/// Identifies a [`DrawGroup`]: a shader and whether its draws are transparent.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct DrawGroupKey {
    pub shader: HandleId,
    pub transparent: bool,
}

/**
 * Draw commands sharing a shader and transparency.
 * Holds the shader weakly. Once the shader is gone, the group is garbage.
 */
pub struct DrawGroup {
    shader: WeakHandle<Shader>,
    kind: DrawGroupKind,
}

impl DrawGroup {

    pub fn new(shader: &Handle<Shader>, transparent: bool) -> Self {
        let kind = match transparent {
            false => DrawGroupKind::Opaque(OpaqueDrawGroup::default()),
            true => DrawGroupKind::Transparent(TransparentDrawGroup::default()),
        };
        Self { shader: shader.downgrade(), kind }
    }

    pub fn shader(&self) -> Option<Handle<Shader>> {
        self.shader.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.shader.is_alive()
    }

    pub fn is_transparent(&self) -> bool {
        matches!(self.kind, DrawGroupKind::Transparent(_))
    }

    pub fn kind(&self) -> &DrawGroupKind {
        &self.kind
    }

    /// Adds a command. Depth only matters to transparent groups.
    pub fn append(&mut self, depth: f32, command: DrawCommand) {
        match &mut self.kind {
            DrawGroupKind::Opaque(group) => {
                let material = command.material().clone();
                group.append(&material, command);
            },
            DrawGroupKind::Transparent(group) => group.append(depth, command),
        }
    }

    pub fn commands(&self) -> Box<dyn Iterator<Item = &DrawCommand> + '_> {
        match &self.kind {
            DrawGroupKind::Opaque(group) => Box::new(group.commands()),
            DrawGroupKind::Transparent(group) => Box::new(group.commands()),
        }
    }

    pub fn len(&self) -> usize {
        match &self.kind {
            DrawGroupKind::Opaque(group) => group.len(),
            DrawGroupKind::Transparent(group) => group.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Executes every command in order. Returns the number of draw calls made.
    pub fn draw_all(
        &self,
        view: Mat4,
        projection: Mat4,
        context: &mut SceneRendererContext,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        let mut draws = 0;
        for command in self.commands() {
            draws += command.execute(view, projection, context, device)?;
        }
        Ok(draws)
    }

    pub fn clear(&mut self) {
        match &mut self.kind {
            DrawGroupKind::Opaque(group) => group.clear(),
            DrawGroupKind::Transparent(group) => group.clear(),
        }
    }
}

/// Every draw group of a renderer, reused from frame to frame.
#[derive(Default)]
pub struct DrawGroups {
    groups: HashMap<DrawGroupKey, DrawGroup>,
}

impl DrawGroups {

    /// Adds a command to the group of its shader and transparency, creating the group if needed.
    pub fn append(&mut self, shader: &Handle<Shader>, transparent: bool, depth: f32, command: DrawCommand) {
        let key = DrawGroupKey { shader: shader.id(), transparent };
        self.groups
            .entry(key)
            .or_insert_with(|| DrawGroup::new(shader, transparent))
            .append(depth, command);
    }

    /// Removes groups whose shader no longer exists. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.groups.len();
        self.groups.retain(|key, group| {
            let alive = group.is_alive();
            if !alive {
                log::debug!("Pruned draw group of expired shader {:#x}", key.shader);
            }
            alive
        });
        before - self.groups.len()
    }

    /**
     * Keys of groups with pending commands and a live shader, in execution order:
     * opaque before transparent, then ascending shader priority.
     * Shader id breaks ties so the order is stable between frames.
     */
    pub fn execution_order(&self) -> Vec<DrawGroupKey> {
        let mut keys: Vec<(bool, i32, HandleId)> = self.groups
            .iter()
            .filter(|(_, group)| !group.is_empty())
            .filter_map(|(key, group)| {
                let priority = group.shader()?.read().priority;
                Some((key.transparent, priority, key.shader))
            })
            .collect();
        keys.sort_unstable();
        keys.into_iter()
            .map(|(transparent, _, shader)| DrawGroupKey { shader, transparent })
            .collect()
    }

    pub fn get(&self, key: &DrawGroupKey) -> Option<&DrawGroup> {
        self.groups.get(key)
    }

    pub fn get_mut(&mut self, key: &DrawGroupKey) -> Option<&mut DrawGroup> {
        self.groups.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DrawGroupKey, &DrawGroup)> + '_ {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of pending commands across all groups.
    pub fn command_count(&self) -> usize {
        self.groups.values().map(DrawGroup::len).sum()
    }
}

#[cfg(test)]
mod test {
    use glam::Mat4;
    use crate::{
        DrawCommand, DrawGroupKey, DrawGroups, Handle, Material, Mesh, MeshDrawCommand, ProgramId, Shader,
    };

    fn command(material: &Handle<Material>, mesh: &Handle<Mesh>, z: f32) -> DrawCommand {
        DrawCommand::Mesh(MeshDrawCommand {
            model: Mat4::from_translation(glam::Vec3::new(0.0, 0.0, z)),
            mesh: mesh.clone(),
            material: material.clone(),
        })
    }

    fn mesh() -> Handle<Mesh> {
        let mut device = crate::RecordingDevice::new();
        let data = crate::MeshData::from(crate::Quad::default());
        Handle::new(Mesh::from_data(&data, &mut device).unwrap())
    }

    #[test]
    fn opaque_commands_are_contiguous_per_material() {
        let shader = Handle::new(Shader::single_pass("lit", ProgramId::default()));
        let a = Handle::new(Material::new(shader.clone()));
        let b = Handle::new(Material::new(shader.clone()));
        let mesh = mesh();
        let mut groups = DrawGroups::default();
        for (i, material) in [&a, &b, &a, &b, &a].into_iter().enumerate() {
            groups.append(&shader, false, 0.0, command(material, &mesh, i as f32));
        }
        let group = groups.get(&DrawGroupKey { shader: shader.id(), transparent: false }).unwrap();
        let materials: Vec<_> = group.commands().map(|command| command.material().id()).collect();
        assert_eq!(5, materials.len());
        let switches = materials.windows(2).filter(|pair| pair[0] != pair[1]).count();
        assert_eq!(1, switches);
    }

    #[test]
    fn transparent_commands_draw_back_to_front() {
        let shader = Handle::new(Shader::single_pass("sprite", ProgramId::default()));
        let material = Handle::new(Material::new(shader.clone()).with_transparent(true));
        let mesh = mesh();
        let mut groups = DrawGroups::default();
        for depth in [5.0, 10.0, 5.0, -1.0, 7.5] {
            groups.append(&shader, true, depth, command(&material, &mesh, depth));
        }
        let group = groups.get(&DrawGroupKey { shader: shader.id(), transparent: true }).unwrap();
        let depths: Vec<f32> = group.commands().map(|command| command.model().w_axis.z).collect();
        assert_eq!(vec![10.0, 7.5, 5.0, 5.0, -1.0], depths);
    }

    #[test]
    fn execution_order_puts_opaque_first_then_priority() {
        let low = Handle::new(Shader::single_pass("low", ProgramId::default()).with_priority(-5));
        let high = Handle::new(Shader::single_pass("high", ProgramId::default()).with_priority(10));
        let material = Handle::new(Material::new(low.clone()));
        let mesh = mesh();
        let mut groups = DrawGroups::default();
        groups.append(&high, true, 0.0, command(&material, &mesh, 0.0));
        groups.append(&low, true, 0.0, command(&material, &mesh, 0.0));
        groups.append(&high, false, 0.0, command(&material, &mesh, 0.0));
        groups.append(&low, false, 0.0, command(&material, &mesh, 0.0));

        let order = groups.execution_order();
        let expected = vec![
            DrawGroupKey { shader: low.id(), transparent: false },
            DrawGroupKey { shader: high.id(), transparent: false },
            DrawGroupKey { shader: low.id(), transparent: true },
            DrawGroupKey { shader: high.id(), transparent: true },
        ];
        assert_eq!(expected, order);
    }

    #[test]
    fn prunes_groups_of_dropped_shaders() {
        let kept = Handle::new(Shader::single_pass("kept", ProgramId::default()));
        let dropped = Handle::new(Shader::single_pass("dropped", ProgramId::default()));
        let material = Handle::new(Material::new(kept.clone()));
        let mesh = mesh();
        let mut groups = DrawGroups::default();
        groups.append(&kept, false, 0.0, command(&material, &mesh, 0.0));
        groups.append(&dropped, false, 0.0, command(&material, &mesh, 0.0));
        drop(dropped);
        assert_eq!(1, groups.prune());
        assert_eq!(1, groups.len());
        assert_eq!(0, groups.prune());
    }
}
