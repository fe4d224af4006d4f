#![forbid(unsafe_code)]

//! Streaming, modifiable, spherical volumetric terrain.
//!
//! A deterministic density field (sphere base, stacked noise layers, biome
//! blending, subtractive caves) feeds a chunked marching-cubes pipeline that
//! streams around a moving viewpoint, with shared boundary sampling so
//! neighboring chunks agree bitwise, and dirty-region edits that re-mesh
//! only what changed.

// Density field: noise primitives, layers, biomes, caves
pub mod biome;
pub mod caves;
pub mod density;
pub mod noise;

// Chunked spatial partition and isosurface extraction
pub mod boundary;
pub mod chunk;
pub mod marching_cubes;
pub mod mesh;

// Streaming, workers, persistence, host API
pub mod config;
pub mod deltas;
pub mod engine;
pub mod error;
pub mod streamer;

mod job_queue;

// Re-exports
pub use biome::{
    Biome, BiomeConfig, BiomeSelectionConfig, BiomeSelector, BiomeSettings, BiomeWeights,
};
pub use boundary::{Axis, BoundaryStore, EdgeId, FaceDir};
pub use caves::{CaveConfig, CaveField, CaveNoiseParams, CaveStyle};
pub use chunk::Chunk;
pub use config::{ChunkConfig, EngineConfig, PlanetConfig, StreamConfig};
pub use density::PlanetField;
pub use deltas::{ModificationLog, ModificationStats};
pub use engine::PlanetEngine;
pub use error::EngineError;
pub use mesh::{MeshData, MeshStats, SurfacePoint, SurfacePointConfig};
pub use noise::{value_noise3, NoiseLayerConfig};
pub use streamer::{ChunkStreamer, StreamerStats};
