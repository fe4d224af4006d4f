//! Chunk streamer: decides what exists around the viewpoint
//!
//! A single control loop owns the active/pending/in-progress bookkeeping and
//! integrates worker results each tick. Search sweeps enumerate candidate
//! coordinates around the viewpoint, a distance-ordered queue feeds the
//! worker pool under per-tick budgets, and an unload sweep with hysteresis
//! destroys chunks that fell far enough behind.

use glam::{IVec3, Vec3};
use log::warn;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::boundary::BoundaryStore;
use crate::chunk::Chunk;
use crate::config::EngineConfig;
use crate::density::PlanetField;
use crate::deltas::ModificationLog;
use crate::job_queue::{ChunkJob, JobResult, WorkerPool};
use crate::mesh::MeshData;

pub type MeshReadyCallback = Box<dyn FnMut(IVec3, &MeshData)>;
pub type MeshClearedCallback = Box<dyn FnMut(IVec3)>;

/// Public streaming counters
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamerStats {
    pub active: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub mesh_queue: usize,
    pub total_generated: u64,
    pub total_unloaded: u64,
    pub total_meshed: u64,
    pub avg_generation_ms: f32,
    pub avg_meshing_ms: f32,
}

pub struct ChunkStreamer {
    config: EngineConfig,
    field: Arc<PlanetField>,
    store: Arc<BoundaryStore>,
    pool: WorkerPool,

    /// Loaded chunks by coordinate
    active: HashMap<IVec3, Chunk>,

    /// Coordinates waiting to be generated; disjoint from active and
    /// in-progress
    pending: HashSet<IVec3>,

    /// Pending coordinates ordered farthest-first so pop() yields the
    /// nearest; rebuilt lazily
    queue: Vec<IVec3>,
    queue_dirty: bool,
    queue_viewpoint: Vec3,

    /// Coordinates being materialized, with their cancellation flags
    in_progress: HashMap<IVec3, Arc<AtomicBool>>,

    mesh_queue: VecDeque<IVec3>,
    mesh_queued: HashSet<IVec3>,
    mesh_inflight: HashSet<IVec3>,

    viewpoint: Vec3,
    last_sweep_chunk: IVec3,
    last_sweep_at: Instant,
    swept_once: bool,

    modifications: ModificationLog,

    total_generated: u64,
    total_unloaded: u64,
    total_meshed: u64,
    generation_time_ms: f32,
    meshing_time_ms: f32,

    on_mesh_ready: Option<MeshReadyCallback>,
    on_mesh_cleared: Option<MeshClearedCallback>,
}

impl ChunkStreamer {
    pub fn new(config: EngineConfig, field: Arc<PlanetField>, store: Arc<BoundaryStore>) -> Self {
        let pool = WorkerPool::new(
            config.stream.worker_threads,
            Arc::clone(&field),
            Arc::clone(&store),
            config.chunk.resolution as usize,
            config.chunk.size,
            config.surface_points.clone(),
        );

        Self {
            config,
            field,
            store,
            pool,
            active: HashMap::new(),
            pending: HashSet::new(),
            queue: Vec::new(),
            queue_dirty: false,
            queue_viewpoint: Vec3::ZERO,
            in_progress: HashMap::new(),
            mesh_queue: VecDeque::new(),
            mesh_queued: HashSet::new(),
            mesh_inflight: HashSet::new(),
            viewpoint: Vec3::ZERO,
            last_sweep_chunk: IVec3::MAX,
            last_sweep_at: Instant::now(),
            swept_once: false,
            modifications: ModificationLog::new(),
            total_generated: 0,
            total_unloaded: 0,
            total_meshed: 0,
            generation_time_ms: 0.0,
            meshing_time_ms: 0.0,
            on_mesh_ready: None,
            on_mesh_cleared: None,
        }
    }

    pub fn set_viewpoint(&mut self, viewpoint: Vec3) {
        self.viewpoint = viewpoint;
    }

    pub fn set_mesh_ready_callback(&mut self, callback: MeshReadyCallback) {
        self.on_mesh_ready = Some(callback);
    }

    pub fn set_mesh_cleared_callback(&mut self, callback: MeshClearedCallback) {
        self.on_mesh_cleared = Some(callback);
    }

    pub fn get_chunk(&self, coord: IVec3) -> Option<&Chunk> {
        self.active.get(&coord)
    }

    pub fn is_chunk_loaded(&self, coord: IVec3) -> bool {
        self.active.contains_key(&coord)
    }

    pub fn is_chunk_pending(&self, coord: IVec3) -> bool {
        self.pending.contains(&coord) || self.in_progress.contains_key(&coord)
    }

    pub fn active_coords(&self) -> impl Iterator<Item = IVec3> + '_ {
        self.active.keys().copied()
    }

    /// True when no generation or meshing work remains outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
            && self.in_progress.is_empty()
            && self.mesh_queue.is_empty()
            && self.mesh_inflight.is_empty()
    }

    pub fn stats(&self) -> StreamerStats {
        StreamerStats {
            active: self.active.len(),
            pending: self.pending.len(),
            in_progress: self.in_progress.len(),
            mesh_queue: self.mesh_queue.len() + self.mesh_inflight.len(),
            total_generated: self.total_generated,
            total_unloaded: self.total_unloaded,
            total_meshed: self.total_meshed,
            avg_generation_ms: if self.total_generated > 0 {
                self.generation_time_ms / self.total_generated as f32
            } else {
                0.0
            },
            avg_meshing_ms: if self.total_meshed > 0 {
                self.meshing_time_ms / self.total_meshed as f32
            } else {
                0.0
            },
        }
    }

    /// One control-loop frame: integrate worker results, sweep for new
    /// coordinates, dispatch budgeted work, unload what fell behind.
    pub fn tick(&mut self) {
        self.integrate_results();
        self.maybe_sweep();
        self.rebuild_queue_if_stale();
        self.dispatch_generation();
        self.dispatch_meshing();
        self.unload_sweep();
    }

    fn chunk_coord_of(&self, p: Vec3) -> IVec3 {
        (p / self.config.chunk.size).floor().as_ivec3()
    }

    fn chunk_center(&self, coord: IVec3) -> Vec3 {
        let s = self.config.chunk.size;
        coord.as_vec3() * s + Vec3::splat(s * 0.5)
    }

    fn integrate_results(&mut self) {
        for result in self.pool.drain() {
            match result {
                JobResult::Generated {
                    coord,
                    chunk,
                    elapsed_ms,
                } => {
                    self.in_progress.remove(&coord);
                    let mut chunk = *chunk;

                    // Left the world while in flight
                    let dist = self.chunk_center(coord).distance(self.viewpoint);
                    if dist > self.config.stream.unload_distance {
                        continue;
                    }

                    if let Some(edits) = self.modifications.get(coord).cloned() {
                        chunk.apply_edits(&edits);
                    }

                    self.total_generated += 1;
                    self.generation_time_ms += elapsed_ms;
                    self.active.insert(coord, chunk);
                    self.queue_mesh(coord);
                }

                JobResult::Cancelled { coord } => {
                    self.in_progress.remove(&coord);
                }

                JobResult::Meshed {
                    coord,
                    revision,
                    mesh,
                    points,
                    elapsed_ms,
                } => {
                    self.mesh_inflight.remove(&coord);
                    self.total_meshed += 1;
                    self.meshing_time_ms += elapsed_ms;

                    let stale = match self.active.get(&coord) {
                        Some(chunk) => chunk.revision() != revision,
                        None => continue,
                    };
                    if stale {
                        // Edited while the snapshot was meshing
                        self.queue_mesh(coord);
                        continue;
                    }

                    let chunk = self.active.get_mut(&coord).expect("checked above");
                    let had_mesh = chunk.mesh().is_some();
                    chunk.install_mesh(mesh, points);
                    match chunk.mesh() {
                        Some(m) => {
                            if let Some(cb) = self.on_mesh_ready.as_mut() {
                                cb(coord, m);
                            }
                        }
                        None => {
                            if had_mesh {
                                if let Some(cb) = self.on_mesh_cleared.as_mut() {
                                    cb(coord);
                                }
                            }
                        }
                    }
                }

                JobResult::MeshFailed {
                    coord,
                    revision: _,
                    reason,
                } => {
                    self.mesh_inflight.remove(&coord);
                    warn!("meshing failed for chunk {coord:?}: {reason}");
                    if let Some(chunk) = self.active.get_mut(&coord) {
                        let had_mesh = chunk.mesh().is_some();
                        chunk.set_failed(true);
                        chunk.clear_mesh();
                        if had_mesh {
                            if let Some(cb) = self.on_mesh_cleared.as_mut() {
                                cb(coord);
                            }
                        }
                    }
                }
            }
        }
    }

    fn maybe_sweep(&mut self) {
        let vp_chunk = self.chunk_coord_of(self.viewpoint);
        let interval_elapsed =
            self.last_sweep_at.elapsed().as_secs_f32() >= self.config.stream.search_interval_s;
        if self.swept_once && vp_chunk == self.last_sweep_chunk && !interval_elapsed {
            return;
        }
        self.search_sweep(vp_chunk);
    }

    /// Enumerate candidate coordinates around the viewpoint and add the
    /// survivors to the pending set.
    fn search_sweep(&mut self, vp_chunk: IVec3) {
        let s = self.config.chunk.size;
        let load = self.config.stream.load_distance;
        let radius_chunks = (load / s).ceil() as i32 + 1;

        // Chunks whose whole box sits outside the terrain shell can never
        // contain surface
        let diag = s * 3.0f32.sqrt();
        let shell_min = self.config.planet.radius - self.config.planet.max_terrain_depth - diag;
        let shell_max = self.config.planet.radius + self.config.planet.max_terrain_height + diag;

        let mut added = false;
        for z in -radius_chunks..=radius_chunks {
            for y in -radius_chunks..=radius_chunks {
                for x in -radius_chunks..=radius_chunks {
                    let coord = vp_chunk + IVec3::new(x, y, z);
                    if self.active.contains_key(&coord)
                        || self.pending.contains(&coord)
                        || self.in_progress.contains_key(&coord)
                    {
                        continue;
                    }

                    let center = self.chunk_center(coord);
                    if center.distance(self.viewpoint) > load {
                        continue;
                    }

                    let radial = center.distance(self.config.planet.center);
                    if radial < shell_min || radial > shell_max {
                        continue;
                    }

                    self.pending.insert(coord);
                    added = true;
                }
            }
        }

        if added {
            self.queue_dirty = true;
        }
        self.last_sweep_chunk = vp_chunk;
        self.last_sweep_at = Instant::now();
        self.swept_once = true;
    }

    fn rebuild_queue_if_stale(&mut self) {
        let moved = self.viewpoint.distance(self.queue_viewpoint)
            >= 0.5 * self.config.chunk.size;
        if !self.queue_dirty && !(moved && !self.pending.is_empty()) {
            return;
        }

        let s = self.config.chunk.size;
        let viewpoint = self.viewpoint;
        let center = |c: IVec3| c.as_vec3() * s + Vec3::splat(s * 0.5);

        let mut queue: Vec<IVec3> = self.pending.iter().copied().collect();
        // Farthest first so pop() takes the nearest
        queue.sort_by(|a, b| {
            let da = center(*a).distance_squared(viewpoint);
            let db = center(*b).distance_squared(viewpoint);
            db.total_cmp(&da)
        });
        self.queue = queue;
        self.queue_viewpoint = viewpoint;
        self.queue_dirty = false;
    }

    fn dispatch_generation(&mut self) {
        for _ in 0..self.config.stream.chunks_per_frame {
            let Some(coord) = self.queue.pop() else {
                break;
            };
            if !self.pending.remove(&coord) {
                continue; // stale queue entry
            }

            let cancel = Arc::new(AtomicBool::new(false));
            self.in_progress.insert(coord, Arc::clone(&cancel));
            self.pool.submit(ChunkJob::Generate { coord, cancel });
        }
    }

    fn queue_mesh(&mut self, coord: IVec3) {
        if self.mesh_queued.insert(coord) {
            self.mesh_queue.push_back(coord);
        }
    }

    fn dispatch_meshing(&mut self) {
        for _ in 0..self.config.stream.meshes_per_frame {
            let Some(coord) = self.mesh_queue.pop_front() else {
                break;
            };
            self.mesh_queued.remove(&coord);

            let Some(chunk) = self.active.get(&coord) else {
                continue; // unloaded while queued
            };
            if !self.mesh_inflight.insert(coord) {
                continue; // already meshing; revision check requeues if needed
            }
            self.pool.submit(ChunkJob::Mesh {
                coord,
                revision: chunk.revision(),
                samples: chunk.snapshot_lattice(),
            });
        }
    }

    fn unload_sweep(&mut self) {
        let unload = self.config.stream.unload_distance;

        let to_remove: Vec<IVec3> = self
            .active
            .keys()
            .copied()
            .filter(|&coord| self.chunk_center(coord).distance(self.viewpoint) > unload)
            .collect();

        for coord in to_remove {
            let chunk = self.active.remove(&coord).expect("collected from keys");
            if chunk.is_modified() {
                self.modifications.set(coord, chunk.edits().clone());
            }
            if chunk.mesh().is_some() {
                if let Some(cb) = self.on_mesh_cleared.as_mut() {
                    cb(coord);
                }
            }
            self.mesh_queued.remove(&coord);
            self.total_unloaded += 1;
            self.queue_dirty = true;
        }

        // Chunks that left while generating drop their work at the next
        // phase boundary
        for (coord, cancel) in &self.in_progress {
            if self.chunk_center(*coord).distance(self.viewpoint) > unload {
                cancel.store(true, Ordering::Relaxed);
            }
        }

        let before = self.pending.len();
        let viewpoint = self.viewpoint;
        let s = self.config.chunk.size;
        self.pending.retain(|coord| {
            let center = coord.as_vec3() * s + Vec3::splat(s * 0.5);
            center.distance(viewpoint) <= unload
        });
        if self.pending.len() != before {
            self.queue_dirty = true;
        }
    }

    /// Edit the density field inside a sphere. Returns true when any chunk
    /// was dirtied. Dirtied chunks are re-meshed asynchronously unless
    /// `immediate_collider` asks for a synchronous rebuild.
    pub fn modify_terrain(
        &mut self,
        center: Vec3,
        radius: f32,
        strength: f32,
        immediate_collider: bool,
    ) -> bool {
        let s = self.config.chunk.size;
        let min = ((center - Vec3::splat(radius)) / s).floor().as_ivec3();
        let max = ((center + Vec3::splat(radius)) / s).floor().as_ivec3();

        let mut dirtied = Vec::new();
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    let coord = IVec3::new(x, y, z);
                    let Some(chunk) = self.active.get_mut(&coord) else {
                        continue;
                    };
                    if chunk.modify(center, radius, strength) {
                        dirtied.push(coord);
                    }
                }
            }
        }

        for &coord in &dirtied {
            let edits = self.active[&coord].edits().clone();
            self.modifications.set(coord, edits);
            if immediate_collider {
                self.mesh_chunk_now(coord);
            } else {
                self.queue_mesh(coord);
            }
        }

        !dirtied.is_empty()
    }

    /// Synchronous meshing path for immediate-collider edits and tests.
    fn mesh_chunk_now(&mut self, coord: IVec3) {
        let Some(chunk) = self.active.get_mut(&coord) else {
            return;
        };
        let had_mesh = chunk.mesh().is_some();
        match chunk.generate_mesh(&self.field, &self.config.surface_points) {
            Ok(true) => {
                self.total_meshed += 1;
                let mesh = self.active[&coord].mesh().expect("just generated");
                if let Some(cb) = self.on_mesh_ready.as_mut() {
                    cb(coord, mesh);
                }
            }
            Ok(false) => {
                self.total_meshed += 1;
                if had_mesh {
                    if let Some(cb) = self.on_mesh_cleared.as_mut() {
                        cb(coord);
                    }
                }
            }
            Err(err) => {
                warn!("synchronous meshing failed for chunk {coord:?}: {err}");
                if let Some(chunk) = self.active.get_mut(&coord) {
                    chunk.set_failed(true);
                    chunk.clear_mesh();
                }
            }
        }
    }

    /// Invalidate shared boundaries, regenerate the density lattice in place
    /// and queue a re-mesh. Player edits are re-applied on top.
    pub fn regenerate_chunk(&mut self, coord: IVec3) {
        self.store.invalidate(coord);
        let Some(chunk) = self.active.get_mut(&coord) else {
            return;
        };
        chunk.generate_density_field(&self.field, &self.store, None);
        let edits = chunk.edits().clone();
        if !edits.is_empty() {
            chunk.apply_edits(&edits);
        }
        self.queue_mesh(coord);
    }

    /// Regenerate every loaded chunk whose box intersects the sphere.
    pub fn regenerate_chunks_in_radius(&mut self, center: Vec3, radius: f32) {
        let affected: Vec<IVec3> = self
            .active
            .values()
            .filter(|chunk| {
                let closest = center.clamp(chunk.world_min(), chunk.world_max());
                (closest - center).length_squared() <= radius * radius
            })
            .map(|chunk| chunk.coord())
            .collect();

        for &coord in &affected {
            self.store.invalidate(coord);
        }

        let mut taken: Vec<Chunk> = affected
            .iter()
            .filter_map(|coord| self.active.remove(coord))
            .collect();

        let field = &*self.field;
        let store = &*self.store;
        taken.par_iter_mut().for_each(|chunk| {
            chunk.generate_density_field(field, store, None);
        });

        for mut chunk in taken {
            let edits = chunk.edits().clone();
            if !edits.is_empty() {
                chunk.apply_edits(&edits);
            }
            let coord = chunk.coord();
            self.active.insert(coord, chunk);
            self.queue_mesh(coord);
        }
    }

    /// Snapshot of every known edit: stored overlays plus live chunks.
    pub fn modification_log(&self) -> ModificationLog {
        let mut log = self.modifications.clone();
        for (coord, chunk) in &self.active {
            if chunk.is_modified() {
                log.set(*coord, chunk.edits().clone());
            }
        }
        log
    }

    /// Install a loaded modification log; overlays apply to chunks as they
    /// generate, and immediately to already-active ones.
    pub fn load_modification_log(&mut self, log: ModificationLog) {
        self.modifications = log;
        let coords: Vec<IVec3> = self.active.keys().copied().collect();
        for coord in coords {
            if let Some(edits) = self.modifications.get(coord).cloned() {
                if let Some(chunk) = self.active.get_mut(&coord) {
                    chunk.apply_edits(&edits);
                }
                self.queue_mesh(coord);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.seed = 1;
        config.planet.radius = 100.0;
        // Shell spans everything the tests touch
        config.planet.max_terrain_depth = 100.0;
        config.planet.max_terrain_height = 100.0;
        config.terrain_layers.clear();
        config.caves.enabled = false;
        config.chunk.size = 16.0;
        config.chunk.resolution = 8;
        config.stream.load_distance = 40.0;
        config.stream.unload_distance = 70.0;
        config.stream.chunks_per_frame = 32;
        config.stream.meshes_per_frame = 32;
        config.stream.search_interval_s = 0.0;
        config.stream.worker_threads = 2;
        config
    }

    fn streamer(config: EngineConfig) -> ChunkStreamer {
        let field = Arc::new(PlanetField::new(&config));
        let store = Arc::new(BoundaryStore::new(
            config.chunk.resolution,
            config.chunk.voxel_step(),
        ));
        ChunkStreamer::new(config, field, store)
    }

    fn settle(streamer: &mut ChunkStreamer) {
        let deadline = Instant::now() + Duration::from_secs(30);
        loop {
            streamer.tick();
            if streamer.is_idle() {
                // One more tick to integrate the last drained results
                streamer.tick();
                if streamer.is_idle() {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "streamer did not settle");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn loads_chunks_within_load_distance() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        let stats = s.stats();
        assert!(stats.active > 0);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.in_progress, 0);
        assert!(stats.total_generated as usize >= stats.active);

        for coord in s.active_coords().collect::<Vec<_>>() {
            let dist = s.chunk_center(coord).distance(s.viewpoint);
            assert!(
                dist <= 40.0 + 1e-3,
                "chunk {coord} at distance {dist} beyond load radius"
            );
        }
    }

    #[test]
    fn surface_chunks_receive_meshes() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        let meshed = s
            .active_coords()
            .filter(|&c| s.get_chunk(c).unwrap().mesh().is_some())
            .count();
        assert!(meshed > 0, "no surface chunk produced a mesh");

        // Chunks flagged uniform have no mesh
        for coord in s.active_coords().collect::<Vec<_>>() {
            let chunk = s.get_chunk(coord).unwrap();
            if chunk.all_empty() || chunk.all_solid() {
                assert!(chunk.mesh().is_none());
            }
        }
    }

    #[test]
    fn unload_uses_hysteresis() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        // Move along the surface; chunks between load and unload distance
        // must survive, chunks beyond unload must go
        s.set_viewpoint(Vec3::new(100.0, 0.0, 50.0));
        settle(&mut s);

        let viewpoint = s.viewpoint;
        let mut kept_in_band = 0;
        for coord in s.active_coords().collect::<Vec<_>>() {
            let dist = s.chunk_center(coord).distance(viewpoint);
            assert!(
                dist <= 70.0,
                "chunk {coord} at {dist} should have been unloaded"
            );
            if dist > 40.0 {
                kept_in_band += 1;
            }
        }
        assert!(kept_in_band > 0, "hysteresis band kept no chunks");
        assert!(s.stats().total_unloaded > 0);
    }

    #[test]
    fn sets_stay_disjoint_while_streaming() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));

        for _ in 0..50 {
            s.tick();
            for coord in s.pending.iter() {
                assert!(!s.active.contains_key(coord));
                assert!(!s.in_progress.contains_key(coord));
            }
            for coord in s.in_progress.keys() {
                assert!(!s.active.contains_key(coord));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn modify_dirties_loaded_chunks_only() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        // A point well outside every loaded chunk
        assert!(!s.modify_terrain(Vec3::new(500.0, 500.0, 500.0), 3.0, -10.0, false));

        // Dig at a loaded surface position
        let target = Vec3::new(100.0, 4.0, 4.0);
        assert!(s.modify_terrain(target, 3.0, -10.0, false));

        let coord = s.chunk_coord_of(target);
        let chunk = s.get_chunk(coord).expect("target chunk loaded");
        assert!(chunk.is_modified());

        settle(&mut s);
        assert!(!s.get_chunk(coord).unwrap().is_dirty());
    }

    #[test]
    fn immediate_collider_meshes_synchronously() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        let target = Vec3::new(100.0, 4.0, 4.0);
        assert!(s.modify_terrain(target, 3.0, -10.0, true));

        // Dirty region already cleared by the synchronous re-mesh
        let coord = s.chunk_coord_of(target);
        assert!(!s.get_chunk(coord).unwrap().is_dirty());
    }

    #[test]
    fn regenerate_preserves_edits_bitwise() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        let target = Vec3::new(100.0, 4.0, 4.0);
        assert!(s.modify_terrain(target, 3.0, -10.0, false));
        let coord = s.chunk_coord_of(target);
        let before = s.get_chunk(coord).unwrap().snapshot_lattice();

        s.regenerate_chunk(coord);
        let after = s.get_chunk(coord).unwrap().snapshot_lattice();
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn modification_log_round_trips_through_unload() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        let target = Vec3::new(100.0, 4.0, 4.0);
        assert!(s.modify_terrain(target, 3.0, -10.0, false));
        let coord = s.chunk_coord_of(target);
        let edited = s.get_chunk(coord).unwrap().snapshot_lattice();

        // Walk far away so the chunk unloads, then come back
        s.set_viewpoint(Vec3::new(100.0, 0.0, 300.0));
        settle(&mut s);
        assert!(!s.is_chunk_loaded(coord));

        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);
        let reloaded = s.get_chunk(coord).expect("chunk reloaded");
        assert!(reloaded.is_modified());
        for (a, b) in edited.iter().zip(reloaded.snapshot_lattice().iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn invalidation_removes_every_boundary_entry_of_a_chunk() {
        let mut s = streamer(test_config());
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        // An interior chunk: all of its boundary entries were created by
        // its own generation pass
        let coord = s.chunk_coord_of(Vec3::new(100.0, 4.0, 4.0));
        assert!(s.is_chunk_loaded(coord));

        let (corners, edges, faces) = s.store.entry_counts();
        s.store.invalidate(coord);
        let after = s.store.entry_counts();
        assert_eq!(after.0, corners - 8);
        assert_eq!(after.1, edges - 12);
        assert_eq!(after.2, faces - 6);
    }

    #[test]
    fn mesh_callbacks_fire_on_control_thread() {
        use std::cell::RefCell;
        use std::rc::Rc;

        let ready = Rc::new(RefCell::new(Vec::new()));
        let ready_cb = Rc::clone(&ready);

        let mut s = streamer(test_config());
        s.set_mesh_ready_callback(Box::new(move |coord, mesh| {
            assert!(mesh.triangle_count() > 0);
            ready_cb.borrow_mut().push(coord);
        }));
        s.set_viewpoint(Vec3::new(100.0, 0.0, 0.0));
        settle(&mut s);

        assert!(!ready.borrow().is_empty(), "no mesh-ready callbacks fired");
    }
}
