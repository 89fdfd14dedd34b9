use glam::{Mat4, Vec3, Vec4};
use hecs::World;
use smallvec::SmallVec;
use tracing::instrument;
use crate::{
    BlendMode, Camera, CullMode, DepthStencilId, DeviceError, DirectionalLight, DrawCommand, DrawGroups, GeometryBuffer,
    GraphicsDevice, Handle, ImageDrawCommand, ImageRenderer, LocalToWorld, Material, MeshDrawCommand,
    MeshRenderer, NonVisible, PointLight, PointLightData, PostProcessing, RenderError, RenderTargetId,
    RendererConfig, ResourceRegistry, SceneLighting, SceneRendererContext, SceneRenderingContext, Shader,
    ShaderPass, ShaderResource, TextDrawCommand, TextRenderer, Viewport,
};

/// Counters describing a single call to [`SceneRenderer::render`].
#[derive(Copy, Clone, Eq, PartialEq, Default, Debug)]
pub struct FrameStats {
    pub cameras: u32,
    pub draw_calls: u32,
    pub groups_executed: u32,
    pub groups_pruned: u32,
    /// Renderables not drawn because they were malformed or their resources were not ready.
    pub skipped_renderables: u32,
    /// Glyphs evicted because their font was dropped.
    pub glyphs_purged: u32,
    /// Buffers and textures destroyed because their owners were dropped.
    pub resources_released: u32,
}

struct CameraView {
    camera: Camera,
    local_to_world: LocalToWorld,
    effects: Vec<Handle<Material>>,
}

/**
 * Renders a [`World`] into a render target.
 *
 * Every frame, renderables are turned into [`DrawCommand`]s grouped by shader and transparency.
 * Groups are drawn opaque first, then by ascending shader priority, one pass at a time.
 * Cameras with post-processing render into an off-screen buffer which
 * is then run through each effect before reaching the final target.
 */
pub struct SceneRenderer {
    config: RendererConfig,
    context: SceneRendererContext,
    groups: DrawGroups,
}

impl SceneRenderer {

    /// Fails if the builtin meshes were not installed in the registry.
    pub fn new(registry: &ResourceRegistry, device: &mut dyn GraphicsDevice) -> Result<Self, RenderError> {
        Self::with_config(RendererConfig::default(), registry, device)
    }

    pub fn with_config(
        config: RendererConfig,
        registry: &ResourceRegistry,
        device: &mut dyn GraphicsDevice,
    ) -> Result<Self, RenderError> {
        Ok(Self {
            config,
            context: SceneRendererContext::new(registry, device)?,
            groups: DrawGroups::default(),
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn context(&self) -> &SceneRendererContext {
        &self.context
    }

    pub fn groups(&self) -> &DrawGroups {
        &self.groups
    }

    /**
     * Renders every camera of the world.
     * Renderables whose resources are missing are skipped. Only device failures are errors.
     * Device resources of meshes, textures and materials dropped since the last frame are destroyed first.
     */
    #[instrument(skip_all)]
    pub fn render(
        &mut self,
        world: &World,
        target: RenderTargetId,
        rendering: &mut SceneRenderingContext,
        device: &mut dyn GraphicsDevice,
    ) -> Result<FrameStats, RenderError> {
        let groups_pruned = self.groups.prune() as u32;
        let glyphs_purged = self.context.purge_glyphs() as u32;
        let mut stats = FrameStats {
            groups_pruned,
            glyphs_purged,
            resources_released: device.destroy_released() as u32,
            ..Default::default()
        };
        let skybox = self.setup_scene_lighting(world);
        self.context.bind_constant_blocks(device);

        let cameras: Vec<CameraView> = world
            .query::<(&Camera, &LocalToWorld, Option<&PostProcessing>)>()
            .iter()
            .map(|(_, (camera, local_to_world, post_processing))| CameraView {
                camera: *camera,
                local_to_world: *local_to_world,
                effects: post_processing.map(active_effects).unwrap_or_default(),
            })
            .collect();
        for camera in &cameras {
            self.render_camera(world, camera, target, skybox.as_ref(), rendering, device, &mut stats)?;
            stats.cameras += 1;
        }
        log::trace!("{stats:?}");
        Ok(stats)
    }

    /**
     * Writes the directional light and ambient light to the scene block.
     * Returns the skybox material, if any.
     */
    fn setup_scene_lighting(&mut self, world: &World) -> Option<Handle<Material>> {
        let light = world
            .query::<(&DirectionalLight, &LocalToWorld)>()
            .without::<&NonVisible>()
            .iter()
            .next()
            .map(|(_, (light, local_to_world))| (*light, local_to_world.forward()));
        let lighting = world
            .query::<&SceneLighting>()
            .iter()
            .next()
            .map(|(_, lighting)| lighting.clone());

        let scene = self.context.scene_mut();
        match light {
            Some((light, direction)) => {
                scene.light_color = Vec4::from(light.color) * light.intensity;
                scene.light_direction = direction.extend(0.0);
                scene.light_enabled = 1;
            },
            None => scene.light_enabled = 0,
        }
        scene.ambient = match &lighting {
            Some(lighting) => Vec4::from(lighting.ambient) * lighting.ambient_intensity,
            None => Vec4::ZERO,
        };
        lighting.and_then(|lighting| lighting.skybox)
    }

    #[instrument(skip_all)]
    #[allow(clippy::too_many_arguments)]
    fn render_camera(
        &mut self,
        world: &World,
        camera: &CameraView,
        final_target: RenderTargetId,
        skybox: Option<&Handle<Material>>,
        rendering: &mut SceneRenderingContext,
        device: &mut dyn GraphicsDevice,
        stats: &mut FrameStats,
    ) -> Result<(), RenderError> {
        let local_to_world = camera.local_to_world;
        let projection = camera.camera.projection.matrix(rendering.aspect_ratio());
        let view = local_to_world.0.inverse();
        let camera_target = match camera.effects.is_empty() {
            true => final_target,
            false => geometry_buffer(&self.config, &self.config.screen_buffer, rendering, device)?.target(),
        };

        stats.skipped_renderables += self.collect_draw_commands(world, &local_to_world);

        let clear_color = self.config.clear_color.to_array();
        device.clear_render_target(camera_target, clear_color)?;
        let buffers: SmallVec<[RenderTargetId; 8]> = rendering
            .geometry_buffers()
            .map(|(_, buffer)| buffer.target())
            .filter(|target| *target != camera_target)
            .collect();
        for buffer in buffers {
            device.clear_render_target(buffer, clear_color)?;
        }
        device.clear_depth_stencil(rendering.depth(), self.config.depth_clear)?;

        self.upload_camera(world, projection, view, local_to_world.position(), device)?;
        if let Some(skybox) = skybox {
            stats.draw_calls += self.draw_skybox(skybox, camera_target, local_to_world.position(), view, projection, rendering, device)?;
        }
        self.execute_groups(camera_target, view, projection, rendering, device, stats)?;
        if !camera.effects.is_empty() {
            self.post_process(&camera.effects, final_target, view, projection, rendering, device, stats)?;
        }
        Ok(())
    }

    /**
     * Turns every visible renderable into draw commands, appended to the group of their shader.
     * Transparent commands are keyed by their depth along the camera's forward axis.
     * Returns the number of renderables skipped.
     */
    #[instrument(skip_all)]
    pub fn collect_draw_commands(&mut self, world: &World, camera: &LocalToWorld) -> u32 {
        let camera_position = camera.position();
        let camera_forward = camera.forward();
        let depth_of = |local_to_world: &LocalToWorld| (local_to_world.position() - camera_position).dot(camera_forward);
        let mut skipped = 0;

        for (entity, (renderer, local_to_world)) in world.query::<(&MeshRenderer, &LocalToWorld)>().without::<&NonVisible>().iter() {
            if renderer.meshes.len() != renderer.materials.len() {
                log::debug!(
                    "Skipped mesh renderer of {entity:?}: {} meshes but {} materials",
                    renderer.meshes.len(),
                    renderer.materials.len(),
                );
                skipped += 1;
                continue;
            }
            for (mesh, material) in renderer.meshes.iter().zip(&renderer.materials) {
                let (Some(mesh), Some(material)) = (mesh, material) else {
                    skipped += 1;
                    continue;
                };
                let Some((shader, transparent)) = shader_of(material) else {
                    skipped += 1;
                    continue;
                };
                let command = DrawCommand::Mesh(MeshDrawCommand {
                    model: local_to_world.0,
                    mesh: mesh.clone(),
                    material: material.clone(),
                });
                self.groups.append(&shader, transparent, depth_of(local_to_world), command);
            }
        }

        for (_, (renderer, local_to_world)) in world.query::<(&ImageRenderer, &LocalToWorld)>().without::<&NonVisible>().iter() {
            let (Some(image), Some(material)) = (&renderer.image, &renderer.material) else {
                skipped += 1;
                continue;
            };
            let Some((shader, transparent)) = shader_of(material) else {
                skipped += 1;
                continue;
            };
            let command = DrawCommand::Image(ImageDrawCommand {
                model: local_to_world.0,
                image: image.clone(),
                material: material.clone(),
                color: renderer.color,
                pixels_per_unit: renderer.pixels_per_unit,
            });
            self.groups.append(&shader, transparent, depth_of(local_to_world), command);
        }

        for (_, (renderer, local_to_world)) in world.query::<(&TextRenderer, &LocalToWorld)>().without::<&NonVisible>().iter() {
            let (Some(font), Some(material)) = (&renderer.font, &renderer.material) else {
                skipped += 1;
                continue;
            };
            let Some((shader, transparent)) = shader_of(material) else {
                skipped += 1;
                continue;
            };
            let command = DrawCommand::Text(TextDrawCommand {
                model: local_to_world.0,
                text: renderer.text.clone(),
                font: font.clone(),
                material: material.clone(),
                color: renderer.color,
                pixel_size: renderer.pixel_size,
                pixels_per_unit: renderer.pixels_per_unit,
            });
            self.groups.append(&shader, transparent, depth_of(local_to_world), command);
        }
        skipped
    }

    /// Writes camera matrices and the first point lights found to the scene block, then uploads it.
    fn upload_camera(
        &mut self,
        world: &World,
        projection: Mat4,
        view: Mat4,
        camera_position: Vec3,
        device: &mut dyn GraphicsDevice,
    ) -> Result<(), DeviceError> {
        let limit = self.config.point_light_limit();
        let scene = self.context.scene_mut();
        scene.projection = projection;
        scene.inv_projection = projection.inverse();
        scene.view = view;
        scene.inv_view = view.inverse();
        scene.camera_position = camera_position.extend(1.0);

        let mut count = 0;
        for (_, (light, local_to_world)) in world.query::<(&PointLight, &LocalToWorld)>().without::<&NonVisible>().iter().take(limit) {
            scene.point_lights[count] = PointLightData {
                position: local_to_world.position(),
                range: light.range,
                color: Vec4::from(light.color).truncate(),
                intensity: light.intensity,
            };
            count += 1;
        }
        scene.point_light_count = count as u32;
        self.context.upload_scene(device)
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_skybox(
        &mut self,
        skybox: &Handle<Material>,
        camera_target: RenderTargetId,
        camera_position: Vec3,
        view: Mat4,
        projection: Mat4,
        rendering: &SceneRenderingContext,
        device: &mut dyn GraphicsDevice,
    ) -> Result<u32, DeviceError> {
        let mut material = skybox.write();
        let Some(shader) = material.shader.clone() else { return Ok(0) };
        let shader = shader.read();
        let Some(pass) = shader.pass(0) else { return Ok(0) };
        device.set_render_targets(&[camera_target], None);
        device.set_viewports(&[rendering.viewport()]);
        device.set_program(pass.program);
        self.context.bind_blend(BlendMode::Opaque, device);
        self.context.update_model(Mat4::from_translation(camera_position), view, projection, device)?;
        self.context.bind_material(&mut material, false, device)?;
        self.context.draw_cube(device)?;
        Ok(1)
    }

    /// Runs every pass of every group with pending commands, then empties the groups.
    #[instrument(skip_all)]
    fn execute_groups(
        &mut self,
        camera_target: RenderTargetId,
        view: Mat4,
        projection: Mat4,
        rendering: &mut SceneRenderingContext,
        device: &mut dyn GraphicsDevice,
        stats: &mut FrameStats,
    ) -> Result<(), RenderError> {
        for key in self.groups.execution_order() {
            let Some(group) = self.groups.get_mut(&key) else { continue };
            let Some(shader) = group.shader() else { continue };
            let shader = shader.read();
            for (index, pass) in shader.passes().iter().enumerate() {
                let depth = (index == 0).then(|| rendering.depth());
                bind_pass_targets(&self.config, pass, camera_target, depth, rendering, device)?;
                let resources = pass_resources(&self.config, pass, rendering, device)?;
                device.set_program(pass.program);
                if index == 0 {
                    // Bound by each command after its material's textures.
                    self.context.set_pass_resources(resources);
                    let drawn = group.draw_all(view, projection, &mut self.context, device);
                    self.context.set_pass_resources(SmallVec::new());
                    stats.draw_calls += drawn?;
                }
                else {
                    self.context.bind_resources(&resources, 0, device)?;
                    let blend = if key.transparent { BlendMode::Alpha } else { BlendMode::Opaque };
                    self.context.bind_blend(blend, device);
                    self.context.bind_cull(CullMode::None, device);
                    self.context.update_model(Mat4::IDENTITY, view, projection, device)?;
                    self.context.draw_screen_quad(device)?;
                    stats.draw_calls += 1;
                }
            }
            group.clear();
            stats.groups_executed += 1;
        }
        Ok(())
    }

    /**
     * Runs the camera's output through each effect in order.
     * Intermediate effects write to the back buffer, which is then swapped with the screen buffer.
     * The last effect writes to the final target.
     */
    #[instrument(skip_all)]
    #[allow(clippy::too_many_arguments)]
    fn post_process(
        &mut self,
        effects: &[Handle<Material>],
        final_target: RenderTargetId,
        view: Mat4,
        projection: Mat4,
        rendering: &mut SceneRenderingContext,
        device: &mut dyn GraphicsDevice,
        stats: &mut FrameStats,
    ) -> Result<(), RenderError> {
        let last = effects.len().saturating_sub(1);
        for (index, effect) in effects.iter().enumerate() {
            let output = match index == last {
                true => final_target,
                false => geometry_buffer(&self.config, &self.config.screen_back_buffer, rendering, device)?.target(),
            };
            let mut material = effect.write();
            let Some(shader) = material.shader.clone() else { continue };
            let shader = shader.read();
            for pass in shader.passes() {
                bind_pass_targets(&self.config, pass, output, None, rendering, device)?;
                self.context.bind_blend(BlendMode::Opaque, device);
                self.context.update_model(Mat4::IDENTITY, view, projection, device)?;
                let next_slot = self.context.bind_material(&mut material, true, device)?;
                let resources = pass_resources(&self.config, pass, rendering, device)?;
                self.context.bind_resources(&resources, next_slot, device)?;
                device.set_program(pass.program);
                self.context.draw_screen_quad(device)?;
                stats.draw_calls += 1;
            }
            if index != last {
                rendering.swap_geometry_buffers(&self.config.screen_buffer, &self.config.screen_back_buffer);
            }
        }
        Ok(())
    }
}

/// Effects that are enabled and have a material with a shader.
fn active_effects(post_processing: &PostProcessing) -> Vec<Handle<Material>> {
    post_processing.effects
        .iter()
        .filter(|effect| effect.enabled)
        .filter_map(|effect| effect.material.clone())
        .filter(|material| material.read().shader.is_some())
        .collect()
}

fn shader_of(material: &Handle<Material>) -> Option<(Handle<Shader>, bool)> {
    let material = material.read();
    Some((material.shader.clone()?, material.transparent))
}

/// Gets a geometry buffer, clearing it if it was just created.
fn geometry_buffer(
    config: &RendererConfig,
    name: &str,
    rendering: &mut SceneRenderingContext,
    device: &mut dyn GraphicsDevice,
) -> Result<GeometryBuffer, DeviceError> {
    let created = rendering.existing_geometry_buffer(name).is_none();
    let buffer = rendering.geometry_buffer(name, device)?;
    if created {
        device.clear_render_target(buffer.target(), config.clear_color.to_array())?;
    }
    Ok(buffer)
}

/**
 * Binds the color targets a pass declares, all at once.
 * No declared target, or the camera target name, means `default_target`.
 */
fn bind_pass_targets(
    config: &RendererConfig,
    pass: &ShaderPass,
    default_target: RenderTargetId,
    depth: Option<DepthStencilId>,
    rendering: &mut SceneRenderingContext,
    device: &mut dyn GraphicsDevice,
) -> Result<(), DeviceError> {
    let mut targets: SmallVec<[RenderTargetId; 4]> = SmallVec::new();
    let mut viewports: SmallVec<[Viewport; 4]> = SmallVec::new();
    if pass.render_targets.is_empty() {
        targets.push(default_target);
        viewports.push(rendering.viewport());
    }
    for name in &pass.render_targets {
        if *name == config.camera_target_name {
            targets.push(default_target);
            viewports.push(rendering.viewport());
        }
        else {
            let buffer = geometry_buffer(config, name, rendering, device)?;
            targets.push(buffer.target());
            viewports.push(buffer.viewport());
        }
    }
    device.set_render_targets(&targets, depth);
    device.set_viewports(&viewports);
    Ok(())
}

/// Geometry buffers and depth textures a pass reads from, in declaration order.
fn pass_resources(
    config: &RendererConfig,
    pass: &ShaderPass,
    rendering: &mut SceneRenderingContext,
    device: &mut dyn GraphicsDevice,
) -> Result<SmallVec<[ShaderResource; 4]>, DeviceError> {
    pass.texture_resources
        .iter()
        .map(|name| match *name == config.depth_target_name {
            true => Ok(ShaderResource::DepthStencil(rendering.depth())),
            false => Ok(geometry_buffer(config, name, rendering, device)?.shader_resource()),
        })
        .collect()
}

#[cfg(test)]
mod test {
    use glam::{Mat4, Vec3, Vec4};
    use hecs::{Entity, World};
    use crate::render::glyph::test::BlockFont;
    use crate::{
        BlendMode, Camera, Color, CullMode, DeviceCall, DirectionalLight, DrawCommand, DrawGroupKey, DrawRecord,
        Font, FrameStats, GraphicsDevice, Handle, ImageRenderer, LocalToWorld, Material, Mesh, MeshRenderer,
        ModelProperties, NonVisible, PointLight, PostProcessEffect, PostProcessing, ProgramDesc, ProgramId,
        RecordingDevice, RenderTargetId, RendererConfig, ResourceRegistry, SamplerDesc, SceneLighting,
        SceneProperties, SceneRenderer, SceneRenderingContext, Shader, ShaderPass, ShaderResource, TextRenderer,
        Texture, TextureEntry, TextureFormat, VertexLayout, BUILTIN_CUBE, MATERIAL_SLOT, MODEL_SLOT, SCENE_SLOT,
    };

    struct Fixture {
        device: RecordingDevice,
        registry: ResourceRegistry,
        renderer: SceneRenderer,
        rendering: SceneRenderingContext,
        target: RenderTargetId,
        camera: Entity,
        world: World,
    }

    impl Fixture {

        fn new() -> Self {
            Self::with_config(RendererConfig::default())
        }

        fn with_config(config: RendererConfig) -> Self {
            let mut device = RecordingDevice::new();
            let mut registry = ResourceRegistry::new();
            registry.install_builtin_meshes(&mut device).unwrap();
            let renderer = SceneRenderer::with_config(config, &registry, &mut device).unwrap();
            let rendering = SceneRenderingContext::new(800, 600, &mut device).unwrap();
            let target = device.create_render_target(800, 600).unwrap();
            let mut world = World::new();
            let camera = world.spawn((Camera::perspective(45_f32.to_radians(), 0.01, 10000.0), LocalToWorld::IDENTITY));
            Self { device, registry, renderer, rendering, target, camera, world }
        }

        fn program(&mut self, label: &str) -> ProgramId {
            self.device.create_program(&ProgramDesc::new(label, "", VertexLayout::default())).unwrap()
        }

        fn shader(&mut self, label: &str) -> Handle<Shader> {
            let program = self.program(label);
            Handle::new(Shader::single_pass(label, program))
        }

        fn cube(&self) -> Handle<Mesh> {
            self.registry.get::<Mesh>(BUILTIN_CUBE).unwrap()
        }

        fn texture(&mut self, width: u32, height: u32) -> Handle<Texture> {
            let pixels = vec![255; (width * height * 4) as usize];
            Handle::new(Texture::from_pixels(width, height, TextureFormat::Rgba8, &pixels, &mut self.device).unwrap())
        }

        fn spawn_mesh(&mut self, material: &Handle<Material>, position: Vec3) -> Entity {
            let cube = self.cube();
            self.world.spawn((MeshRenderer::new(cube, material.clone()), LocalToWorld::from_translation(position)))
        }

        fn render(&mut self) -> FrameStats {
            self.device.clear_calls();
            self.renderer.render(&self.world, self.target, &mut self.rendering, &mut self.device).unwrap()
        }

        fn draws(&self) -> Vec<DrawRecord> {
            self.device.draws().cloned().collect()
        }
    }

    fn translation(draw: &DrawRecord) -> Vec3 {
        let model: ModelProperties = draw.constants(MODEL_SLOT).unwrap();
        model.model.w_axis.truncate()
    }

    #[test]
    fn single_opaque_mesh_collects_one_command() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("default");
        let material = Handle::new(Material::new(shader.clone()));
        fixture.spawn_mesh(&material, Vec3::ZERO);

        let skipped = fixture.renderer.collect_draw_commands(&fixture.world, &LocalToWorld::IDENTITY);
        assert_eq!(0, skipped);
        let groups = fixture.renderer.groups();
        assert_eq!(1, groups.len());
        let group = groups.get(&DrawGroupKey { shader: shader.id(), transparent: false }).unwrap();
        assert_eq!(1, group.len());
        assert!(matches!(group.commands().next(), Some(DrawCommand::Mesh(_))));
    }

    #[test]
    fn single_opaque_mesh_draws_once_with_depth() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("default");
        let material = Handle::new(Material::new(shader));
        fixture.spawn_mesh(&material, Vec3::ZERO);

        let stats = fixture.render();
        assert_eq!(1, stats.cameras);
        assert_eq!(1, stats.draw_calls);
        assert_eq!(1, stats.groups_executed);
        let draws = fixture.draws();
        assert_eq!(1, draws.len());
        assert_eq!(&[fixture.target], draws[0].targets.as_slice());
        assert_eq!(Some(fixture.rendering.depth()), draws[0].depth);
        assert_eq!(36, draws[0].index_count);
        assert_eq!(BlendMode::Opaque, draws[0].blend);

        let scene: SceneProperties = draws[0].constants(SCENE_SLOT).unwrap();
        let projection = Mat4::perspective_lh(45_f32.to_radians(), 800.0 / 600.0, 0.01, 10000.0);
        assert_eq!(projection, scene.projection);
        assert_eq!(Mat4::IDENTITY, scene.view);
    }

    #[test]
    fn clears_target_and_depth_before_drawing() {
        let mut fixture = Fixture::new();
        fixture.render();
        let target = fixture.target;
        let calls = fixture.device.calls();
        assert!(calls.iter().any(|call| matches!(
            call,
            DeviceCall::ClearRenderTarget { target: cleared, color } if *cleared == target && *color == [0.0; 4]
        )));
        assert!(calls.iter().any(|call| matches!(call, DeviceCall::ClearDepthStencil { value, .. } if *value == 1.0)));
    }

    #[test]
    fn transparent_images_draw_back_to_front() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("sprite");
        let material = Handle::new(Material::new(shader.clone()).with_transparent(true));
        let image = fixture.texture(100, 100);
        for z in [5.0, 10.0] {
            fixture.world.spawn((
                ImageRenderer::new(image.clone(), material.clone()),
                LocalToWorld::from_translation(Vec3::new(0.0, 0.0, z)),
            ));
        }

        let stats = fixture.render();
        assert_eq!(2, stats.draw_calls);
        let groups = fixture.renderer.groups();
        assert!(groups.get(&DrawGroupKey { shader: shader.id(), transparent: true }).is_some());
        assert!(groups.get(&DrawGroupKey { shader: shader.id(), transparent: false }).is_none());
        let draws = fixture.draws();
        let depths: Vec<f32> = draws.iter().map(|draw| translation(draw).z).collect();
        assert_eq!(vec![10.0, 5.0], depths);
        assert!(draws.iter().all(|draw| draw.blend == BlendMode::Alpha));
    }

    #[test]
    fn image_quad_is_sized_by_pixels_per_unit() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("sprite");
        let material = Handle::new(Material::new(shader));
        let image = fixture.texture(200, 50);
        fixture.world.spawn((ImageRenderer::new(image.clone(), material), LocalToWorld::IDENTITY));

        fixture.render();
        let draws = fixture.draws();
        let model: ModelProperties = draws[0].constants(MODEL_SLOT).unwrap();
        assert_eq!(2.0, model.model.x_axis.x);
        assert_eq!(0.5, model.model.y_axis.y);
        assert_eq!(Some(ShaderResource::Texture(image.read().id())), draws[0].resource(0));
    }

    #[test]
    fn post_processing_redirects_camera_to_screen_buffer() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("lit");
        let material = Handle::new(Material::new(shader));
        fixture.spawn_mesh(&material, Vec3::ZERO);
        let blur = fixture.program("blur");
        let blur_shader = Handle::new(Shader::new("blur").with_pass(ShaderPass::new(blur).with_texture_resource("screen")));
        let effect = Handle::new(Material::new(blur_shader));
        let camera = fixture.camera;
        let post_processing = PostProcessing { effects: vec![PostProcessEffect::new(effect)] };
        fixture.world.insert_one(camera, post_processing).unwrap();

        let stats = fixture.render();
        assert_eq!(2, stats.draw_calls);
        let screen = fixture.rendering.existing_geometry_buffer("screen").unwrap();
        let draws = fixture.draws();
        assert_eq!(2, draws.len());
        assert_eq!(&[screen.target()], draws[0].targets.as_slice());
        assert_eq!(Some(fixture.rendering.depth()), draws[0].depth);

        assert_eq!(&[fixture.target], draws[1].targets.as_slice());
        assert_eq!(None, draws[1].depth);
        assert_eq!(Some(screen.shader_resource()), draws[1].resource(0));
        assert_eq!(6, draws[1].index_count);
        assert_eq!(CullMode::None, draws[1].cull);
        assert_eq!(Some("blur"), fixture.device.program_label(draws[1].program));
        assert!(fixture.rendering.existing_geometry_buffer("screen_back").is_none());
    }

    #[test]
    fn disabled_effects_do_not_redirect() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("lit");
        let material = Handle::new(Material::new(shader.clone()));
        fixture.spawn_mesh(&material, Vec3::ZERO);
        let effect = PostProcessEffect {
            enabled: false,
            material: Some(Handle::new(Material::new(shader))),
        };
        let no_shader = PostProcessEffect::new(Handle::new(Material::default()));
        let camera = fixture.camera;
        fixture.world.insert_one(camera, PostProcessing { effects: vec![effect, no_shader] }).unwrap();

        fixture.render();
        let draws = fixture.draws();
        assert_eq!(1, draws.len());
        assert_eq!(&[fixture.target], draws[0].targets.as_slice());
        assert!(fixture.rendering.existing_geometry_buffer("screen").is_none());
    }

    #[test]
    fn chained_effects_ping_pong_between_screen_buffers() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("lit");
        let material = Handle::new(Material::new(shader));
        fixture.spawn_mesh(&material, Vec3::ZERO);
        let mut effects = Vec::new();
        for label in ["first", "second"] {
            let program = fixture.program(label);
            let shader = Handle::new(Shader::new(label).with_pass(ShaderPass::new(program).with_texture_resource("screen")));
            effects.push(PostProcessEffect::new(Handle::new(Material::new(shader))));
        }
        let camera = fixture.camera;
        fixture.world.insert_one(camera, PostProcessing { effects }).unwrap();

        fixture.render();
        let draws = fixture.draws();
        assert_eq!(3, draws.len());
        let scene_output = draws[0].targets[0];
        let first_output = draws[1].targets[0];
        assert_ne!(scene_output, first_output);
        assert_ne!(fixture.target, first_output);
        assert_eq!(Some(ShaderResource::RenderTarget(scene_output)), draws[1].resource(0));
        assert_eq!(&[fixture.target], draws[2].targets.as_slice());
        assert_eq!(Some(ShaderResource::RenderTarget(first_output)), draws[2].resource(0));

        // Buffers stay swapped for the next frame.
        assert_eq!(Some(first_output), fixture.rendering.existing_geometry_buffer("screen").map(|buffer| buffer.target()));
        assert_eq!(Some(scene_output), fixture.rendering.existing_geometry_buffer("screen_back").map(|buffer| buffer.target()));
    }

    #[test]
    fn text_lines_advance_and_break() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("text");
        let material = Handle::new(Material::new(shader).with_transparent(true));
        let font = Handle::new(Font::from_source(BlockFont));
        let text = TextRenderer {
            pixel_size: 16.0,
            pixels_per_unit: 16.0,
            ..TextRenderer::new("Hi\nYo", font, material)
        };
        fixture.world.spawn((text, LocalToWorld::IDENTITY));

        let stats = fixture.render();
        assert_eq!(4, stats.draw_calls);
        let draws = fixture.draws();
        let positions: Vec<Vec3> = draws.iter().map(translation).collect();
        let (h, i, y, o) = (positions[0], positions[1], positions[2], positions[3]);
        assert_eq!(h.y, i.y);
        assert_eq!(0.5, i.x - h.x);
        assert_eq!(-1.0, y.y - h.y);
        assert_eq!(h.x, y.x);
        assert_eq!(i.x, o.x);
        assert!(draws.iter().all(|draw| draw.cull == CullMode::None && draw.blend == BlendMode::Alpha));
    }

    #[test]
    fn whitespace_advances_without_drawing() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("text");
        let material = Handle::new(Material::new(shader));
        let font = Handle::new(Font::from_source(BlockFont));
        let text = TextRenderer {
            pixel_size: 16.0,
            pixels_per_unit: 16.0,
            ..TextRenderer::new("a b", font, material)
        };
        fixture.world.spawn((text, LocalToWorld::IDENTITY));

        fixture.render();
        let positions: Vec<Vec3> = fixture.draws().iter().map(translation).collect();
        assert_eq!(2, positions.len());
        assert_eq!(1.0, positions[1].x - positions[0].x);
    }

    #[test]
    fn groups_draw_opaque_first_then_by_priority() {
        let mut fixture = Fixture::new();
        let low_program = fixture.program("low");
        let high_program = fixture.program("high");
        let low = Handle::new(Shader::single_pass("low", low_program));
        let high = Handle::new(Shader::single_pass("high", high_program).with_priority(5));
        let low_opaque = Handle::new(Material::new(low.clone()));
        let low_transparent = Handle::new(Material::new(low.clone()).with_transparent(true));
        let high_opaque = Handle::new(Material::new(high.clone()));
        let high_transparent = Handle::new(Material::new(high.clone()).with_transparent(true));
        fixture.spawn_mesh(&high_transparent, Vec3::new(0.0, 0.0, 3.0));
        fixture.spawn_mesh(&low_transparent, Vec3::new(0.0, 0.0, 2.0));
        fixture.spawn_mesh(&low_transparent, Vec3::new(0.0, 0.0, 8.0));
        fixture.spawn_mesh(&high_opaque, Vec3::new(0.0, 0.0, 1.0));
        fixture.spawn_mesh(&low_opaque, Vec3::new(0.0, 0.0, 4.0));

        fixture.render();
        let draws = fixture.draws();
        let programs: Vec<ProgramId> = draws.iter().map(|draw| draw.program).collect();
        assert_eq!(vec![low_program, high_program, low_program, low_program, high_program], programs);
        assert_eq!(8.0, translation(&draws[2]).z);
        assert_eq!(2.0, translation(&draws[3]).z);
    }

    #[test]
    fn image_and_text_restore_material_properties() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("sprite");
        let original_image = fixture.texture(1, 1);
        let original = TextureEntry::new(original_image, SamplerDesc::default());
        let original_color = Vec4::new(0.1, 0.2, 0.3, 0.4);
        let material = Handle::new(Material::new(shader)
            .with_transparent(true)
            .with_texture("image", original.clone())
            .with_vector4("color", original_color));
        let image = fixture.texture(4, 4);
        let image_renderer = ImageRenderer {
            color: Color::RED,
            ..ImageRenderer::new(image.clone(), material.clone())
        };
        fixture.world.spawn((image_renderer, LocalToWorld::IDENTITY));
        let font = Handle::new(Font::from_source(BlockFont));
        fixture.world.spawn((TextRenderer::new("ab", font, material.clone()), LocalToWorld::IDENTITY));

        fixture.render();
        let draws = fixture.draws();
        assert_eq!(3, draws.len());
        assert_eq!(Some(ShaderResource::Texture(image.read().id())), draws[0].resource(0));
        assert_eq!(Some(Vec4::from(Color::RED)), draws[0].constants::<Vec4>(MATERIAL_SLOT));
        assert!(matches!(draws[1].resource(1), Some(ShaderResource::Texture(_))));
        assert_eq!(Some(Vec4::from(Color::WHITE)), draws[1].constants::<Vec4>(MATERIAL_SLOT));

        let material = material.read();
        assert_eq!(Some(&original), material.texture("image"));
        assert_eq!(None, material.texture("mask"));
        assert_eq!(Some(original_color), material.vector4("color"));
        assert_eq!(1, material.texture_count());
    }

    #[test]
    fn malformed_and_unready_renderables_are_skipped() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("lit");
        let material = Handle::new(Material::new(shader));
        let no_shader = Handle::new(Material::default());
        let cube = fixture.cube();
        let world = &mut fixture.world;
        world.spawn((
            MeshRenderer {
                meshes: vec![Some(cube.clone()), Some(cube.clone())],
                materials: vec![Some(material.clone())],
            },
            LocalToWorld::IDENTITY,
        ));
        world.spawn((
            MeshRenderer { meshes: vec![None], materials: vec![Some(material.clone())] },
            LocalToWorld::IDENTITY,
        ));
        world.spawn((MeshRenderer::new(cube.clone(), no_shader), LocalToWorld::IDENTITY));
        world.spawn((
            ImageRenderer { material: Some(material.clone()), ..Default::default() },
            LocalToWorld::IDENTITY,
        ));
        world.spawn((
            TextRenderer { text: String::from("x"), material: Some(material.clone()), ..Default::default() },
            LocalToWorld::IDENTITY,
        ));
        world.spawn((MeshRenderer::new(cube, material), LocalToWorld::IDENTITY, NonVisible));

        let stats = fixture.render();
        assert_eq!(0, stats.draw_calls);
        assert_eq!(0, fixture.device.draw_count());
        assert_eq!(5, stats.skipped_renderables);
    }

    #[test]
    fn multi_pass_shader_routes_through_geometry_buffers() {
        let mut fixture = Fixture::new();
        let geometry = fixture.program("geometry");
        let lighting = fixture.program("lighting");
        let shader = Handle::new(Shader::new("deferred")
            .with_pass(ShaderPass::new(geometry)
                .with_render_target("albedo")
                .with_render_target("normals"))
            .with_pass(ShaderPass::new(lighting)
                .with_render_target("camera")
                .with_texture_resource("albedo")
                .with_texture_resource("normals")
                .with_texture_resource("depth")));
        let material = Handle::new(Material::new(shader));
        fixture.spawn_mesh(&material, Vec3::ZERO);

        fixture.render();
        let albedo = fixture.rendering.existing_geometry_buffer("albedo").unwrap();
        let normals = fixture.rendering.existing_geometry_buffer("normals").unwrap();
        assert_eq!((800, 600), (albedo.width(), albedo.height()));
        let draws = fixture.draws();
        assert_eq!(2, draws.len());
        assert_eq!(&[albedo.target(), normals.target()], draws[0].targets.as_slice());
        assert_eq!(2, draws[0].viewports.len());
        assert_eq!(Some(fixture.rendering.depth()), draws[0].depth);

        assert_eq!(&[fixture.target], draws[1].targets.as_slice());
        assert_eq!(None, draws[1].depth);
        assert_eq!(6, draws[1].index_count);
        assert_eq!(Some(albedo.shader_resource()), draws[1].resource(0));
        assert_eq!(Some(normals.shader_resource()), draws[1].resource(1));
        assert_eq!(Some(ShaderResource::DepthStencil(fixture.rendering.depth())), draws[1].resource(2));

        let target_count = fixture.device.render_target_count();
        fixture.render();
        assert_eq!(target_count, fixture.device.render_target_count());
        assert_eq!(Some(albedo), fixture.rendering.existing_geometry_buffer("albedo"));
        assert!(fixture.device.cleared_targets().any(|target| target == albedo.target()));
    }

    #[test]
    fn first_pass_resources_bind_after_material_textures() {
        let mut fixture = Fixture::new();
        let program = fixture.program("decal");
        let shader = Handle::new(Shader::new("decal").with_pass(ShaderPass::new(program).with_texture_resource("albedo")));
        let image = fixture.texture(2, 2);
        let material = Handle::new(Material::new(shader)
            .with_texture("image", TextureEntry::new(image.clone(), SamplerDesc::default())));
        fixture.spawn_mesh(&material, Vec3::ZERO);

        fixture.render();
        let albedo = fixture.rendering.existing_geometry_buffer("albedo").unwrap();
        let draws = fixture.draws();
        assert_eq!(1, draws.len());
        assert_eq!(Some(ShaderResource::Texture(image.read().id())), draws[0].resource(0));
        assert_eq!(Some(albedo.shader_resource()), draws[0].resource(1));
        assert!(draws[0].samplers[1].is_some());
    }

    #[test]
    fn dropped_resources_are_released_next_frame() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("default");
        let image = fixture.texture(2, 2);
        let material = Handle::new(Material::new(shader)
            .with_texture("image", TextureEntry::new(image, SamplerDesc::default())));
        let entity = fixture.spawn_mesh(&material, Vec3::ZERO);
        drop(material);
        fixture.render();
        let buffers = fixture.device.buffer_count();

        fixture.world.despawn(entity).unwrap();
        let stats = fixture.render();
        assert_eq!(2, stats.resources_released);
        assert_eq!(buffers - 1, fixture.device.buffer_count());
        assert_eq!(0, fixture.device.texture_count());
        assert_eq!(0, fixture.render().resources_released);
    }

    #[test]
    fn glyphs_of_dropped_fonts_are_purged() {
        let mut fixture = Fixture::new();
        let shader = fixture.shader("text");
        let material = Handle::new(Material::new(shader));
        let font = Handle::new(Font::from_source(BlockFont));
        let entity = fixture.world.spawn((
            TextRenderer::new("ab", font, material.clone()),
            LocalToWorld::IDENTITY,
        ));
        fixture.render();
        assert_eq!(2, fixture.renderer.context().glyph_cache().len());

        fixture.world.despawn(entity).unwrap();
        let stats = fixture.render();
        assert_eq!(2, stats.glyphs_purged);
        assert_eq!(2, stats.resources_released);
        assert!(fixture.renderer.context().glyph_cache().is_empty());
    }

    #[test]
    fn point_lights_are_capped() {
        let mut fixture = Fixture::new();
        for i in 0..2000 {
            fixture.world.spawn((PointLight::default(), LocalToWorld::from_translation(Vec3::new(i as f32, 0.0, 0.0))));
        }
        fixture.render();
        let scene = fixture.renderer.context().scene();
        assert_eq!(1024, scene.point_light_count);
        assert_eq!(1024, scene.point_lights().len());
    }

    #[test]
    fn point_light_limit_is_configurable() {
        let config = RendererConfig { max_point_lights: 3, ..Default::default() };
        let mut fixture = Fixture::with_config(config);
        for _ in 0..10 {
            fixture.world.spawn((PointLight::default(), LocalToWorld::IDENTITY));
        }
        fixture.render();
        assert_eq!(3, fixture.renderer.context().scene().point_light_count);
    }

    #[test]
    fn groups_are_emptied_and_expired_groups_pruned() {
        let mut fixture = Fixture::new();
        let kept = fixture.shader("kept");
        let doomed = fixture.shader("doomed");
        let kept_material = Handle::new(Material::new(kept.clone()));
        let doomed_material = Handle::new(Material::new(doomed.clone()));
        fixture.spawn_mesh(&kept_material, Vec3::ZERO);
        let doomed_entity = fixture.spawn_mesh(&doomed_material, Vec3::ZERO);

        fixture.render();
        assert_eq!(2, fixture.renderer.groups().len());
        assert_eq!(0, fixture.renderer.groups().command_count());

        fixture.world.despawn(doomed_entity).unwrap();
        doomed_material.write().shader = None;
        drop(doomed);
        let stats = fixture.render();
        assert_eq!(1, stats.groups_pruned);
        let groups = fixture.renderer.groups();
        assert_eq!(1, groups.len());
        assert!(groups.get(&DrawGroupKey { shader: kept.id(), transparent: false }).is_some());
        assert_eq!(0, groups.command_count());
    }

    #[test]
    fn skybox_draws_first_around_camera() {
        let mut fixture = Fixture::new();
        let sky_shader = fixture.shader("sky");
        let sky = Handle::new(Material::new(sky_shader).with_cull_mode(CullMode::Front));
        fixture.world.spawn((SceneLighting { skybox: Some(sky), ..Default::default() },));
        let camera_position = Vec3::new(1.0, 2.0, 3.0);
        *fixture.world.get::<&mut LocalToWorld>(fixture.camera).unwrap() = LocalToWorld::from_translation(camera_position);
        let shader = fixture.shader("lit");
        let material = Handle::new(Material::new(shader));
        fixture.spawn_mesh(&material, Vec3::ZERO);

        fixture.render();
        let draws = fixture.draws();
        assert_eq!(2, draws.len());
        assert_eq!(Some("sky"), fixture.device.program_label(draws[0].program));
        assert_eq!(36, draws[0].index_count);
        assert_eq!(None, draws[0].depth);
        assert_eq!(CullMode::Front, draws[0].cull);
        assert_eq!(camera_position, translation(&draws[0]));
        assert_eq!(Some("lit"), fixture.device.program_label(draws[1].program));
    }

    #[test]
    fn lighting_reaches_scene_block() {
        let mut fixture = Fixture::new();
        fixture.render();
        assert_eq!(0, fixture.renderer.context().scene().light_enabled);
        assert_eq!(Vec4::ZERO, fixture.renderer.context().scene().ambient);

        fixture.world.spawn((DirectionalLight { color: Color::RED, intensity: 2.0 }, LocalToWorld::IDENTITY));
        fixture.world.spawn((SceneLighting::default(),));
        fixture.render();
        let scene = fixture.renderer.context().scene();
        assert_eq!(1, scene.light_enabled);
        assert_eq!(Vec4::new(2.0, 0.0, 0.0, 2.0), scene.light_color);
        assert_eq!(Vec4::new(0.0, 0.0, 1.0, 0.0), scene.light_direction);
        assert_eq!(Vec4::splat(0.1), scene.ambient);
    }

    #[test]
    fn every_camera_renders_independently() {
        let mut fixture = Fixture::new();
        fixture.world.spawn((Camera::orthographic(10.0, 0.0, 100.0), LocalToWorld::IDENTITY));
        let shader = fixture.shader("lit");
        let material = Handle::new(Material::new(shader));
        fixture.spawn_mesh(&material, Vec3::ZERO);

        let stats = fixture.render();
        assert_eq!(2, stats.cameras);
        assert_eq!(2, stats.draw_calls);
        assert_eq!(0, fixture.renderer.groups().command_count());
    }
}
