//! Host-facing engine facade
//!
//! Wires the density field, boundary store and streamer together behind the
//! runtime API: viewpoint updates, ticking, terrain modification,
//! regeneration, surface queries and modification persistence. Construction
//! is the only fallible entry point; everything after recovers locally.

use glam::{IVec3, Vec3};
use std::path::Path;
use std::sync::Arc;

use crate::boundary::BoundaryStore;
use crate::chunk::Chunk;
use crate::config::EngineConfig;
use crate::density::PlanetField;
use crate::deltas::ModificationLog;
use crate::error::EngineError;
use crate::mesh::{MeshData, SurfacePoint};
use crate::streamer::{ChunkStreamer, StreamerStats};

/// Binary-search halting threshold on |density|
const SURFACE_QUERY_EPSILON: f32 = 0.1;

/// Central-difference epsilon for query normals
const QUERY_NORMAL_EPSILON: f32 = 0.1;

const SURFACE_QUERY_ITERATIONS: u32 = 32;
const RAY_REFINE_ITERATIONS: u32 = 16;

pub struct PlanetEngine {
    config: EngineConfig,
    field: Arc<PlanetField>,
    streamer: ChunkStreamer,
}

impl PlanetEngine {
    /// Validate the configuration and bring the engine up. The only error
    /// that crosses the public API.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let field = Arc::new(PlanetField::new(&config));
        let store = Arc::new(BoundaryStore::new(
            config.chunk.resolution,
            config.chunk.voxel_step(),
        ));
        let streamer = ChunkStreamer::new(config.clone(), Arc::clone(&field), store);

        Ok(Self {
            config,
            field,
            streamer,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn field(&self) -> &PlanetField {
        &self.field
    }

    /// Called each tick by the host before [`PlanetEngine::tick`].
    pub fn set_viewpoint(&mut self, position: Vec3) {
        self.streamer.set_viewpoint(position);
    }

    /// One frame of streaming work.
    pub fn tick(&mut self) {
        self.streamer.tick();
    }

    /// True when no generation or meshing work is outstanding.
    pub fn is_idle(&self) -> bool {
        self.streamer.is_idle()
    }

    pub fn on_chunk_mesh_ready(&mut self, callback: impl FnMut(IVec3, &MeshData) + 'static) {
        self.streamer.set_mesh_ready_callback(Box::new(callback));
    }

    pub fn on_chunk_mesh_cleared(&mut self, callback: impl FnMut(IVec3) + 'static) {
        self.streamer.set_mesh_cleared_callback(Box::new(callback));
    }

    /// Spherical density edit; returns true when any chunk was dirtied.
    pub fn modify_terrain(
        &mut self,
        center: Vec3,
        radius: f32,
        strength: f32,
        immediate_collider: bool,
    ) -> bool {
        self.streamer
            .modify_terrain(center, radius, strength, immediate_collider)
    }

    pub fn regenerate_chunk(&mut self, coord: IVec3) {
        self.streamer.regenerate_chunk(coord);
    }

    pub fn regenerate_chunks_in_radius(&mut self, center: Vec3, radius: f32) {
        self.field.clear_caches();
        self.streamer.regenerate_chunks_in_radius(center, radius);
    }

    pub fn get_chunk(&self, coord: IVec3) -> Option<&Chunk> {
        self.streamer.get_chunk(coord)
    }

    pub fn is_chunk_loaded(&self, coord: IVec3) -> bool {
        self.streamer.is_chunk_loaded(coord)
    }

    pub fn is_chunk_pending(&self, coord: IVec3) -> bool {
        self.streamer.is_chunk_pending(coord)
    }

    pub fn stats(&self) -> StreamerStats {
        self.streamer.stats()
    }

    /// Effective density at a world position: the loaded chunk lattice when
    /// one covers `p` (so player edits are visible), the pure field
    /// otherwise.
    pub fn density_at(&self, p: Vec3) -> f32 {
        let coord = (p / self.config.chunk.size).floor().as_ivec3();
        match self.streamer.get_chunk(coord) {
            Some(chunk) => chunk.sample_density_at(p),
            None => self.field.density_checked(p),
        }
    }

    fn effective_normal(&self, p: Vec3) -> Vec3 {
        let e = QUERY_NORMAL_EPSILON;
        let g = Vec3::new(
            self.density_at(p + Vec3::X * e) - self.density_at(p - Vec3::X * e),
            self.density_at(p + Vec3::Y * e) - self.density_at(p - Vec3::Y * e),
            self.density_at(p + Vec3::Z * e) - self.density_at(p - Vec3::Z * e),
        );
        if g.length_squared() > 1e-12 {
            -g.normalize()
        } else {
            (p - self.config.planet.center).normalize_or_zero()
        }
    }

    fn surface_point_at(&self, p: Vec3, radial: Vec3) -> SurfacePoint {
        let planet = &self.config.planet;
        let normal = self.effective_normal(p);
        SurfacePoint {
            position: p,
            normal,
            slope_deg: normal.dot(radial).clamp(-1.0, 1.0).acos().to_degrees(),
            altitude: (p - planet.center).length() - planet.radius,
            biome: self.field.primary_biome(radial),
        }
    }

    /// Radial binary search for the surface along a unit direction.
    pub fn query_surface(&self, direction: Vec3) -> Option<SurfacePoint> {
        let u = direction.normalize_or_zero();
        if u == Vec3::ZERO {
            return None;
        }

        let planet = &self.config.planet;
        let mut lo = planet.radius - planet.max_terrain_height;
        let mut hi = planet.radius + planet.max_terrain_height;
        let mut mid = (lo + hi) * 0.5;

        for _ in 0..SURFACE_QUERY_ITERATIONS {
            mid = (lo + hi) * 0.5;
            let d = self.density_at(planet.center + u * mid);
            if d.abs() < SURFACE_QUERY_EPSILON {
                break;
            }
            if d > 0.0 {
                // Still inside solid, the surface is farther out
                lo = mid;
            } else {
                hi = mid;
            }
        }

        Some(self.surface_point_at(planet.center + u * mid, u))
    }

    /// March a ray through the effective density until it enters solid,
    /// then refine the crossing by bisection.
    pub fn query_surface_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        length: f32,
    ) -> Option<SurfacePoint> {
        let dir = direction.normalize_or_zero();
        if dir == Vec3::ZERO || length <= 0.0 {
            return None;
        }

        let step = self.config.chunk.voxel_step() * 0.5;
        let mut prev = origin;
        if self.density_at(origin) >= 0.0 {
            let radial = (origin - self.config.planet.center).normalize_or_zero();
            return Some(self.surface_point_at(origin, radial));
        }

        let mut t = step;
        while t <= length {
            let p = origin + dir * t;
            if self.density_at(p) >= 0.0 {
                // Bisect between the last empty point and the solid hit
                let mut a = prev;
                let mut b = p;
                for _ in 0..RAY_REFINE_ITERATIONS {
                    let m = (a + b) * 0.5;
                    if self.density_at(m) >= 0.0 {
                        b = m;
                    } else {
                        a = m;
                    }
                }
                let hit = (a + b) * 0.5;
                let radial = (hit - self.config.planet.center).normalize_or_zero();
                return Some(self.surface_point_at(hit, radial));
            }
            prev = p;
            t += step;
        }

        None
    }

    /// Persist every known modification.
    pub fn save_modifications(&self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        self.streamer.modification_log().save_to_file(path)
    }

    /// Load modifications saved earlier; they apply to chunks as they
    /// generate and immediately to already-loaded ones.
    pub fn load_modifications(&mut self, path: impl AsRef<Path>) -> Result<(), EngineError> {
        let log = ModificationLog::load_from_file(path)?;
        self.streamer.load_modification_log(log);
        Ok(())
    }
}
