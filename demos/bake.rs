// bake a few generated shapes into imposter archives with the cpu backend

use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use bevy::{log::LogPlugin, prelude::*};
use imposter_bake::{
    asset_loader::write_asset,
    batch::BakeProgress,
    bake_batch,
    capture::{BakeRequest, CapturePass},
    AtlasResolution, GridMode, ImposterConfig, SoftwareBackend,
};

fn main() {
    let mut app = App::new();
    app.add_plugins(LogPlugin::default());

    let mut args = pico_args::Arguments::from_env();
    let mut config = match args.opt_value_from_str::<_, PathBuf>("--config") {
        Ok(Some(path)) => match ImposterConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                std::process::exit(1);
            }
        },
        _ => ImposterConfig {
            atlas_resolution: AtlasResolution::R1024,
            frames: 16,
            supersample: 2,
            ..Default::default()
        },
    };
    if let Ok(frames) = args.value_from_str("--frames") {
        config.frames = frames;
    }
    if let Ok(resolution) = args.value_from_str::<_, u32>("--image") {
        match AtlasResolution::try_from(resolution) {
            Ok(resolution) => config.atlas_resolution = resolution,
            Err(e) => warn!("{e}, using {}", config.atlas_resolution.pixels()),
        }
    }
    if let Ok(mode) = args.value_from_str::<_, String>("--mode") {
        config.mode = match mode.chars().next() {
            Some('h') => GridMode::Hemispherical,
            Some('s') => GridMode::Spherical,
            _ => {
                warn!("unrecognized mode, use [h]emispherical or [s]pherical. defaulting to Hemispherical");
                GridMode::Hemispherical
            }
        };
    }
    let lit = args.contains("--lit");
    let shape = args
        .value_from_str("--shape")
        .unwrap_or_else(|_| "all".to_owned());
    let out: PathBuf = args
        .value_from_str("--out")
        .unwrap_or_else(|_| PathBuf::from("imposters"));

    let unused = args.finish();
    if !unused.is_empty() {
        println!("unrecognized arguments: {unused:?}");
        println!("args: \n--config path (ron bake settings)\n--mode [h]emispherical or [s]pherical\n--frames n (frames per axis, default 16)\n--image n (atlas size, default 1024)\n--shape sphere|cube|tree|all\n--lit (render with a key light instead of unlit albedo)\n--out dir (default `imposters`)");
        std::process::exit(1);
    }

    let world = app.world_mut();
    world.init_resource::<Assets<Mesh>>();
    world.init_resource::<Assets<StandardMaterial>>();

    let targets: Vec<Entity> = match shape.as_str() {
        "sphere" => vec![spawn_sphere(world)],
        "cube" => vec![spawn_cube(world)],
        "tree" => vec![spawn_tree(world)],
        "all" => vec![spawn_sphere(world), spawn_cube(world), spawn_tree(world)],
        other => {
            error!("unknown shape `{other}`");
            std::process::exit(1);
        }
    };

    let rig = lit.then(|| {
        let rig = world.spawn(SpatialBundle::default()).id();
        // nothing propagates transforms here, so set the global one directly
        let transform = Transform::default().looking_to(Vec3::new(-1.0, -2.0, -1.0), Vec3::Y);
        let key = world
            .spawn(DirectionalLightBundle {
                transform,
                global_transform: transform.into(),
                ..Default::default()
            })
            .id();
        world.entity_mut(rig).add_child(key);
        rig
    });
    let requests: Vec<BakeRequest> = targets
        .into_iter()
        .map(|target| match rig {
            Some(rig) => BakeRequest::new(target).with_lighting_rig(rig),
            None => BakeRequest::new(target),
        })
        .collect();

    info!(
        "settings: frames: {}, image: {}, mode: {:?}, lit: {lit}",
        config.frames,
        config.atlas_resolution.pixels(),
        config.mode
    );

    let (sender, receiver) = crossbeam_channel::unbounded();
    let printer = std::thread::spawn(move || {
        for message in receiver.iter() {
            match message {
                BakeProgress::Snapshot { index, progress } if progress.index % 64 == 0 => {
                    let pass = match progress.pass {
                        CapturePass::Measure => "measure",
                        CapturePass::Final => "capture",
                    };
                    info!(
                        "target {}: {pass} {}/{}",
                        index + 1,
                        progress.index + 1,
                        progress.total
                    );
                }
                BakeProgress::Finished { index, success } => {
                    info!("target {} done (success: {success})", index + 1);
                }
                _ => (),
            }
        }
    });

    let mut backend = SoftwareBackend::new();
    let cancel = Arc::new(AtomicBool::new(false));
    let results = bake_batch(world, &mut backend, &requests, &config, &sender, &cancel);
    drop(sender);
    let _ = printer.join();

    let mut failed = false;
    for result in results {
        match result {
            Ok(asset) => {
                let path = asset.output_path(&out);
                if let Err(e) = write_asset(&path, &asset) {
                    error!("failed to save {}: {e}", asset.name);
                    failed = true;
                }
            }
            Err(e) => {
                error!("{e}");
                failed = true;
            }
        }
    }
    if failed {
        std::process::exit(1);
    }
}

fn spawn_shape(world: &mut World, name: &str, mesh: Mesh, color: Color) -> Entity {
    let mesh = world.resource_mut::<Assets<Mesh>>().add(mesh);
    let material = world
        .resource_mut::<Assets<StandardMaterial>>()
        .add(StandardMaterial::from(color));
    world
        .spawn((
            Name::new(name.to_owned()),
            PbrBundle {
                mesh,
                material,
                ..Default::default()
            },
        ))
        .id()
}

fn spawn_sphere(world: &mut World) -> Entity {
    spawn_shape(
        world,
        "sphere",
        Sphere::new(1.0).mesh().uv(32, 16),
        Color::srgb(0.8, 0.2, 0.2),
    )
}

fn spawn_cube(world: &mut World) -> Entity {
    spawn_shape(
        world,
        "cube",
        Cuboid::new(1.0, 2.0, 1.0).into(),
        Color::srgb(0.2, 0.4, 0.8),
    )
}

fn spawn_tree(world: &mut World) -> Entity {
    let trunk = spawn_shape(
        world,
        "trunk",
        Cylinder::new(0.15, 1.0).into(),
        Color::srgb(0.4, 0.25, 0.1),
    );
    let canopy = spawn_shape(
        world,
        "canopy",
        Sphere::new(0.6).mesh().uv(24, 12),
        Color::srgb(0.1, 0.6, 0.15),
    );
    let trunk_transform = Transform::from_xyz(0.0, 0.5, 0.0);
    let canopy_transform = Transform::from_xyz(0.0, 1.2, 0.0);
    world
        .entity_mut(trunk)
        .insert((trunk_transform, GlobalTransform::from(trunk_transform)));
    world
        .entity_mut(canopy)
        .insert((canopy_transform, GlobalTransform::from(canopy_transform)));

    let tree = world
        .spawn((Name::new("tree"), SpatialBundle::default()))
        .id();
    world.entity_mut(tree).push_children(&[trunk, canopy]);
    tree
}
