//! Example: stream a planet, dig a hole, persist the edits
//!
//! Runs the whole pipeline headless: configure a planet with terrain layers,
//! biomes and caves, stream chunks around a viewpoint on the surface, edit
//! the terrain, and save the modifications.

use glam::Vec3;
use voxel_planet::{
    BiomeConfig, BiomeSelectionConfig, BiomeSettings, CaveStyle, EngineConfig, NoiseLayerConfig,
    PlanetEngine,
};

fn main() {
    env_logger::init();

    let mut config = EngineConfig::default();
    config.seed = 1337;
    config.planet.radius = 200.0;
    config.planet.max_terrain_height = 24.0;
    config.planet.max_terrain_depth = 60.0;
    config.stream.load_distance = 64.0;
    config.stream.unload_distance = 96.0;
    config.stream.worker_threads = 4;

    config.biomes = BiomeSettings {
        biomes: vec![
            BiomeConfig {
                name: "plains".to_string(),
                layers: vec![NoiseLayerConfig {
                    frequency: 0.02,
                    strength: 4.0,
                    ..Default::default()
                }],
                color: [0.30, 0.60, 0.25, 1.0],
                ..Default::default()
            },
            BiomeConfig {
                name: "mountains".to_string(),
                layers: vec![NoiseLayerConfig {
                    frequency: 0.05,
                    octaves: 4,
                    strength: 14.0,
                    ..Default::default()
                }],
                height_multiplier: 1.5,
                color: [0.45, 0.42, 0.40, 1.0],
                max_slope_deg: 60.0,
                ..Default::default()
            },
        ],
        selection: BiomeSelectionConfig {
            blend_width: 0.08,
            ..Default::default()
        },
    };

    config.caves.enabled = true;
    config.caves.style = CaveStyle::Worm;
    config.caves.min_depth = 6.0;
    config.caves.max_depth = 50.0;

    let mut engine = PlanetEngine::new(config).expect("config is valid");

    engine.on_chunk_mesh_ready(|coord, mesh| {
        println!(
            "  mesh ready {:>3?}: {} triangles",
            coord,
            mesh.triangle_count()
        );
    });

    // Stand on the surface along +X
    let surface = engine
        .query_surface(Vec3::X)
        .expect("surface along +X exists");
    println!(
        "surface at {:.1}, altitude {:.2}, slope {:.1} deg, biome {}",
        surface.position, surface.altitude, surface.slope_deg, surface.biome
    );

    println!("\n--- streaming around the viewpoint ---");
    engine.set_viewpoint(surface.position);
    run_until_idle(&mut engine);

    let stats = engine.stats();
    println!(
        "\nactive {} | generated {} (avg {:.2} ms) | meshed {} (avg {:.2} ms)",
        stats.active,
        stats.total_generated,
        stats.avg_generation_ms,
        stats.total_meshed,
        stats.avg_meshing_ms
    );

    println!("\n--- digging a hole at the viewpoint ---");
    let dirtied = engine.modify_terrain(surface.position, 4.0, -12.0, false);
    println!("modified terrain: {dirtied}");
    run_until_idle(&mut engine);

    let after = engine.query_surface(Vec3::X).expect("surface still exists");
    println!(
        "surface moved {:.2} m inward",
        surface.position.length() - after.position.length()
    );

    let path = std::env::temp_dir().join("planet_demo_mods.bin");
    engine.save_modifications(&path).expect("save edits");
    println!("modifications saved to {}", path.display());
}

fn run_until_idle(engine: &mut PlanetEngine) {
    loop {
        engine.tick();
        if engine.is_idle() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}
