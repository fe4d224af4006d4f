//! Engine configuration
//!
//! The whole world is a pure function of `(seed, EngineConfig)`. Everything
//! here is serde-backed; `load_from_file`/`save_to_file` round-trip through
//! JSON. `validate` enforces the constraints the engine cannot start without.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::biome::BiomeSettings;
use crate::caves::CaveConfig;
use crate::error::EngineError;
use crate::mesh::SurfacePointConfig;
use crate::noise::NoiseLayerConfig;

/// Planet geometry and density shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanetConfig {
    /// Planet center in world space
    pub center: Vec3,

    /// Nominal surface radius, world units
    pub radius: f32,

    /// Highest terrain above the nominal surface
    pub max_terrain_height: f32,

    /// Deepest terrain below the nominal surface
    pub max_terrain_depth: f32,

    /// Window around the surface inside which noise can shape density
    pub surface_blend_distance: f32,

    /// Interior density clamp applied before negative cave contributions
    pub max_interior_density: f32,
}

impl Default for PlanetConfig {
    fn default() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: 100.0,
            max_terrain_height: 20.0,
            max_terrain_depth: 50.0,
            surface_blend_distance: 25.0,
            max_interior_density: 5.0,
        }
    }
}

/// Chunk partition parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Chunk side length, world units
    pub size: f32,

    /// Voxels per chunk edge; the lattice is (resolution + 1)^3 samples
    pub resolution: i32,
}

impl ChunkConfig {
    pub fn voxel_step(&self) -> f32 {
        self.size / self.resolution as f32
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            size: 16.0,
            resolution: 16,
        }
    }
}

/// Streaming distances and per-tick budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Chunks within this distance of the viewpoint are loaded
    pub load_distance: f32,

    /// Chunks beyond this distance are destroyed; must exceed load_distance
    pub unload_distance: f32,

    /// New chunk generations dispatched per tick
    pub chunks_per_frame: usize,

    /// Mesh generations dispatched per tick
    pub meshes_per_frame: usize,

    /// Seconds between search sweeps when the viewpoint stays in one chunk
    pub search_interval_s: f32,

    /// Worker threads for generation and meshing
    pub worker_threads: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            load_distance: 80.0,
            unload_distance: 120.0,
            chunks_per_frame: 8,
            meshes_per_frame: 8,
            search_interval_s: 0.5,
            worker_threads: 2,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub seed: i32,
    pub planet: PlanetConfig,
    pub chunk: ChunkConfig,
    pub stream: StreamConfig,

    /// Global terrain layers, used when no biomes are configured
    pub terrain_layers: Vec<NoiseLayerConfig>,

    pub biomes: BiomeSettings,
    pub caves: CaveConfig,

    #[serde(default)]
    pub surface_points: SurfacePointConfig,
}

impl EngineConfig {
    /// Check every constraint the engine refuses to start without.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.planet.radius <= 0.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "planet radius must be positive, got {}",
                self.planet.radius
            )));
        }
        if self.planet.surface_blend_distance <= 0.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "surface_blend_distance must be positive, got {}",
                self.planet.surface_blend_distance
            )));
        }
        if !(4..=64).contains(&self.chunk.resolution) {
            return Err(EngineError::ConfigInvalid(format!(
                "chunk resolution must be in [4, 64], got {}",
                self.chunk.resolution
            )));
        }
        if self.chunk.size <= 0.0 {
            return Err(EngineError::ConfigInvalid(format!(
                "chunk size must be positive, got {}",
                self.chunk.size
            )));
        }
        if self.stream.unload_distance <= self.stream.load_distance {
            return Err(EngineError::ConfigInvalid(format!(
                "unload_distance {} must exceed load_distance {}",
                self.stream.unload_distance, self.stream.load_distance
            )));
        }
        if !self.biomes.biomes.is_empty() && self.biomes.selection.blend_width < 0.0 {
            return Err(EngineError::ConfigInvalid(
                "biome blend_width must not be negative".to_string(),
            ));
        }
        for (i, biome) in self.biomes.biomes.iter().enumerate() {
            if biome.min_altitude > biome.max_altitude {
                return Err(EngineError::ConfigInvalid(format!(
                    "biome {} ({}) has min_altitude above max_altitude",
                    i, biome.name
                )));
            }
        }
        if self.caves.enabled && self.caves.min_depth >= self.caves.max_depth {
            return Err(EngineError::ConfigInvalid(format!(
                "cave min_depth {} must be below max_depth {}",
                self.caves.min_depth, self.caves.max_depth
            )));
        }
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_nonpositive_radius() {
        let mut config = EngineConfig::default();
        config.planet.radius = 0.0;
        assert!(matches!(
            config.validate(),
            Err(EngineError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn rejects_resolution_out_of_range() {
        let mut config = EngineConfig::default();
        config.chunk.resolution = 3;
        assert!(config.validate().is_err());
        config.chunk.resolution = 65;
        assert!(config.validate().is_err());
        config.chunk.resolution = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unload_not_above_load() {
        let mut config = EngineConfig::default();
        config.stream.unload_distance = config.stream.load_distance;
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_round_trip() {
        let mut config = EngineConfig::default();
        config.seed = 777;
        config.planet.radius = 250.0;

        let path = std::env::temp_dir().join(format!(
            "voxel_planet_config_{}.json",
            std::process::id()
        ));
        config.save_to_file(&path).unwrap();
        let back = EngineConfig::load_from_file(&path).unwrap();
        assert_eq!(back.seed, 777);
        assert_eq!(back.planet.radius, 250.0);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn json_round_trip() {
        let config = EngineConfig::default();
        let text = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.seed, config.seed);
        assert_eq!(back.planet.radius, config.planet.radius);
        assert_eq!(back.chunk.resolution, config.chunk.resolution);
    }
}
