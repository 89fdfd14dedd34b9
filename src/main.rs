use anyhow::{Context, Result};
use glam::{Vec3, Vec4};
use hecs::World;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use scene_render::{
    Camera, Color, DirectionalLight, GraphicsDevice, Handle, LocalToWorld, Material, Mesh, MeshRenderer,
    PointLight, ProgramDesc, RendererConfig, ResourceRegistry, SceneLighting, SceneRenderer, SceneRenderingContext,
    Shader, Transform, WgpuDevice, BUILTIN_CUBE,
};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const CUBES: usize = 200;

const LIT_SOURCE: &str = r#"
struct Scene {
    projection: mat4x4<f32>,
    inv_projection: mat4x4<f32>,
    view: mat4x4<f32>,
    inv_view: mat4x4<f32>,
    camera_position: vec4<f32>,
    ambient: vec4<f32>,
    light_color: vec4<f32>,
    light_direction: vec4<f32>,
    light_enabled: u32,
}

struct Model {
    model: mat4x4<f32>,
    model_inverse: mat4x4<f32>,
    model_view_projection: mat4x4<f32>,
}

struct Properties {
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> scene: Scene;
@group(0) @binding(1) var<uniform> model: Model;
@group(0) @binding(3) var<uniform> properties: Properties;

struct VertexIn {
    @location(0) position: vec3<f32>,
#ifdef NORMAL
    @location(2) normal: vec3<f32>,
#endif
}

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) normal: vec3<f32>,
}

@vertex
fn vertex_main(in: VertexIn) -> VertexOut {
    var out: VertexOut;
    out.position = model.model_view_projection * vec4<f32>(in.position, 1.0);
#ifdef NORMAL
    out.normal = normalize((model.model * vec4<f32>(in.normal, 0.0)).xyz);
#else
    out.normal = vec3<f32>(0.0, 0.0, -1.0);
#endif
    return out;
}

@fragment
fn fragment_main(in: VertexOut) -> @location(0) vec4<f32> {
    var light = scene.ambient.rgb;
    if scene.light_enabled != 0u {
        light += scene.light_color.rgb * max(dot(in.normal, -scene.light_direction.xyz), 0.0);
    }
    return vec4<f32>(properties.color.rgb * light, properties.color.a);
}
"#;

/// Renders a field of randomly placed cubes into an offscreen target.
/// Pass a YAML renderer config as the first argument to override the defaults.
fn main() -> Result<()> {
    #[cfg(feature = "profile")]
    let _guard = {
        use tracing_subscriber::prelude::*;
        let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new().build();
        tracing_subscriber::registry().with(chrome_layer).init();
        guard
    };
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let source = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {path}"))?;
            RendererConfig::from_yaml(&source)?
        },
        None => RendererConfig::default(),
    };

    let mut device = WgpuDevice::headless(wgpu::TextureFormat::Rgba8UnormSrgb)?;
    let mut registry = ResourceRegistry::new();
    registry.install_builtin_meshes(&mut device)?;
    let cube = registry.get::<Mesh>(BUILTIN_CUBE).context("Builtin cube missing")?;

    let mut defs = Vec::new();
    let layout = cube.read().key().layout(&mut defs);
    let mut program = ProgramDesc::new("lit", LIT_SOURCE, layout);
    program.defs = defs;
    let program = device.create_program(&program)?;
    let shader = Handle::new(Shader::single_pass("lit", program));

    let mut renderer = SceneRenderer::with_config(config, &registry, &mut device)?;
    let mut rendering = SceneRenderingContext::new(WIDTH, HEIGHT, &mut device)?;
    let target = device.create_render_target(WIDTH, HEIGHT)?;

    let world = populate(&shader, &cube);
    let stats = renderer.render(&world, target, &mut rendering, &mut device)?;
    device.submit()?;
    log::info!("Rendered {} draw calls from {} cameras", stats.draw_calls, stats.cameras);
    Ok(())
}

fn populate(shader: &Handle<Shader>, cube: &Handle<Mesh>) -> World {
    let mut rng = SmallRng::seed_from_u64(7);
    let mut world = World::new();

    let eye = Transform::IDENTITY
        .with_xyz(0.0, 15.0, -40.0)
        .looking_at(Vec3::ZERO, Vec3::Y);
    world.spawn((Camera::default(), LocalToWorld::from(eye)));
    let sun = Transform::IDENTITY
        .with_xyz(0.0, 10.0, 0.0)
        .looking_at(Vec3::new(1.0, 0.0, 2.0), Vec3::Y);
    world.spawn((DirectionalLight { color: Color::WHITE, intensity: 0.8 }, LocalToWorld::from(sun)));
    world.spawn((SceneLighting::default(),));

    for _ in 0..CUBES {
        let transparent = rng.gen_bool(0.25);
        let alpha = if transparent { 0.5 } else { 1.0 };
        let material = Material::new(shader.clone())
            .with_transparent(transparent)
            .with_vector4("color", Vec4::new(rng.gen(), rng.gen(), rng.gen(), alpha));
        let position = Vec3::new(
            rng.gen_range(-20.0..20.0),
            rng.gen_range(-5.0..5.0),
            rng.gen_range(-20.0..20.0),
        );
        let transform = Transform::IDENTITY.with_translation(position);
        world.spawn((MeshRenderer::new(cube.clone(), Handle::new(material)), LocalToWorld::from(transform)));
    }
    for _ in 0..16 {
        let position = Vec3::new(rng.gen_range(-20.0..20.0), 2.0, rng.gen_range(-20.0..20.0));
        let light = PointLight { color: Color::new(rng.gen(), rng.gen(), rng.gen(), 1.0), ..Default::default() };
        world.spawn((light, LocalToWorld::from(Transform::IDENTITY.with_translation(position))));
    }
    world
}
