//! Chunk: a cubic partition carrying a density lattice and at most one mesh
//!
//! A chunk owns `(R + 1)^3` f32 density samples. Boundary samples come from
//! the shared store so neighbors agree bitwise; interior samples come
//! straight from the density field. The same chunk type supports in-place
//! spherical modification with dirty-region tracking, and meshing through
//! marching cubes.

use glam::{IVec3, Vec3};
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::boundary::{BoundaryStore, EdgeId, FaceDir};
use crate::density::PlanetField;
use crate::error::EngineError;
use crate::marching_cubes::{polygonize, CORNER_OFFSETS};
use crate::mesh::{
    collect_surface_points, has_surface_crossing, tint_vertices, MeshData, SurfacePoint,
    SurfacePointConfig,
};

/// Epsilon for gradient normals, matching the surface query path
const NORMAL_EPSILON: f32 = 0.1;

pub struct Chunk {
    coord: IVec3,
    resolution: usize,
    chunk_size: f32,
    voxel_step: f32,

    lattice: Box<[f32]>,

    mesh: Option<MeshData>,
    surface_points: Vec<SurfacePoint>,

    dirty_min: IVec3,
    dirty_max: IVec3,

    modified: bool,
    all_empty: bool,
    all_solid: bool,
    failed: bool,

    /// Bumped on every edit; stale mesh results are discarded against it
    revision: u64,

    /// Sparse overlay of edited samples: lattice index -> current value.
    /// Persisted by the modification log and re-applied after base
    /// generation, which makes reload bitwise exact.
    edits: HashMap<u32, f32>,
}

impl Chunk {
    pub fn new(coord: IVec3, resolution: usize, chunk_size: f32) -> Self {
        let n = resolution + 1;
        Self {
            coord,
            resolution,
            chunk_size,
            voxel_step: chunk_size / resolution as f32,
            lattice: vec![0.0; n * n * n].into_boxed_slice(),
            mesh: None,
            surface_points: Vec::new(),
            dirty_min: IVec3::MAX,
            dirty_max: IVec3::MIN,
            modified: false,
            all_empty: false,
            all_solid: false,
            failed: false,
            revision: 0,
            edits: HashMap::new(),
        }
    }

    pub fn coord(&self) -> IVec3 {
        self.coord
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn mesh(&self) -> Option<&MeshData> {
        self.mesh.as_ref()
    }

    pub fn surface_points(&self) -> &[SurfacePoint] {
        &self.surface_points
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn all_empty(&self) -> bool {
        self.all_empty
    }

    pub fn all_solid(&self) -> bool {
        self.all_solid
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn set_failed(&mut self, failed: bool) {
        self.failed = failed;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn edits(&self) -> &HashMap<u32, f32> {
        &self.edits
    }

    /// Global lattice coordinate of the chunk origin
    pub fn base_lattice(&self) -> IVec3 {
        self.coord * self.resolution as i32
    }

    /// World-space box `[coord * S, (coord + 1) * S)`
    pub fn world_min(&self) -> Vec3 {
        self.coord.as_vec3() * self.chunk_size
    }

    pub fn world_max(&self) -> Vec3 {
        self.world_min() + Vec3::splat(self.chunk_size)
    }

    pub fn center(&self) -> Vec3 {
        self.world_min() + Vec3::splat(self.chunk_size * 0.5)
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        let n = self.resolution + 1;
        x + y * n + z * n * n
    }

    pub fn sample(&self, x: usize, y: usize, z: usize) -> f32 {
        self.lattice[self.index(x, y, z)]
    }

    /// World position of a lattice sample, derived from global integer
    /// lattice coordinates so neighbors compute identical floats.
    pub fn sample_world_pos(&self, x: usize, y: usize, z: usize) -> Vec3 {
        (self.base_lattice() + IVec3::new(x as i32, y as i32, z as i32)).as_vec3()
            * self.voxel_step
    }

    pub fn snapshot_lattice(&self) -> Box<[f32]> {
        self.lattice.clone()
    }

    /// Trilinear density at a world position inside the chunk box. Includes
    /// any player edits, unlike the pure field.
    pub fn sample_density_at(&self, p: Vec3) -> f32 {
        let r = self.resolution;
        let q = (p / self.voxel_step - self.base_lattice().as_vec3())
            .clamp(Vec3::ZERO, Vec3::splat(r as f32));

        let xi = (q.x.floor() as usize).min(r - 1);
        let yi = (q.y.floor() as usize).min(r - 1);
        let zi = (q.z.floor() as usize).min(r - 1);
        let fx = q.x - xi as f32;
        let fy = q.y - yi as f32;
        let fz = q.z - zi as f32;

        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let x00 = lerp(self.sample(xi, yi, zi), self.sample(xi + 1, yi, zi), fx);
        let x10 = lerp(self.sample(xi, yi + 1, zi), self.sample(xi + 1, yi + 1, zi), fx);
        let x01 = lerp(self.sample(xi, yi, zi + 1), self.sample(xi + 1, yi, zi + 1), fx);
        let x11 = lerp(
            self.sample(xi, yi + 1, zi + 1),
            self.sample(xi + 1, yi + 1, zi + 1),
            fx,
        );
        let y0 = lerp(x00, x10, fy);
        let y1 = lerp(x01, x11, fy);
        lerp(y0, y1, fz)
    }

    /// Fill the lattice in four phases: shared corners, shared edges, shared
    /// faces, then direct interior sampling. `cancel` is observed at phase
    /// boundaries; a cancelled fill returns false and leaves the chunk
    /// unusable.
    pub fn generate_density_field(
        &mut self,
        field: &PlanetField,
        store: &BoundaryStore,
        cancel: Option<&AtomicBool>,
    ) -> bool {
        let r = self.resolution;
        let cancelled = |c: Option<&AtomicBool>| c.is_some_and(|f| f.load(Ordering::Relaxed));

        // Phase 1: the 8 corners
        for (i, offset) in CORNER_OFFSETS.iter().enumerate() {
            let value = store.get_or_create_corner(field, self.coord, i);
            let p = *offset * r as i32;
            let idx = self.index(p.x as usize, p.y as usize, p.z as usize);
            self.lattice[idx] = value;
        }
        if cancelled(cancel) {
            return false;
        }

        // Phase 2: the 12 edges, endpoints skipped
        for edge in EdgeId::all() {
            let values = store.get_or_create_edge(field, self.coord, edge);
            let start = edge.corner_offset() * r as i32;
            let unit = edge.axis.unit();
            for t in 1..r {
                let p = start + unit * t as i32;
                let idx = self.index(p.x as usize, p.y as usize, p.z as usize);
                self.lattice[idx] = values[t];
            }
        }
        if cancelled(cancel) {
            return false;
        }

        // Phase 3: the 6 faces, edges skipped. Grid (u, v) indices map
        // directly onto local lattice coordinates on both positive and
        // negative faces.
        let n = r + 1;
        for dir in FaceDir::ALL {
            let grid = store.get_or_create_face(field, self.coord, dir);
            let axis = dir.axis();
            let plane = if dir.is_positive() { r as i32 } else { 0 };
            let (u_axis, v_axis) = axis.others();
            for u in 1..r {
                for v in 1..r {
                    let mut p = IVec3::ZERO;
                    set_axis(&mut p, axis, plane);
                    set_axis(&mut p, u_axis, u as i32);
                    set_axis(&mut p, v_axis, v as i32);
                    let idx = self.index(p.x as usize, p.y as usize, p.z as usize);
                    self.lattice[idx] = grid[u * n + v];
                }
            }
        }
        if cancelled(cancel) {
            return false;
        }

        // Phase 4: interior samples straight from the field
        let base = self.base_lattice();
        let mut nan_count = 0u32;
        for z in 1..r {
            for y in 1..r {
                for x in 1..r {
                    let p = (base + IVec3::new(x as i32, y as i32, z as i32)).as_vec3()
                        * self.voxel_step;
                    let mut d = field.density(p);
                    if !d.is_finite() {
                        d = 0.0;
                        nan_count += 1;
                    }
                    let idx = self.index(x, y, z);
                    self.lattice[idx] = d;
                }
            }
        }
        if nan_count > 0 {
            warn!(
                "chunk {:?}: clamped {} non-finite density samples to 0",
                self.coord, nan_count
            );
        }

        self.refresh_fill_flags();
        true
    }

    fn refresh_fill_flags(&mut self) {
        let mut any_solid = false;
        let mut any_empty = false;
        for &d in self.lattice.iter() {
            if d < 0.0 {
                any_empty = true;
            } else {
                any_solid = true;
            }
            if any_solid && any_empty {
                break;
            }
        }
        self.all_empty = !any_solid;
        self.all_solid = !any_empty;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_min.x <= self.dirty_max.x
    }

    pub fn dirty_region(&self) -> Option<(IVec3, IVec3)> {
        self.is_dirty().then_some((self.dirty_min, self.dirty_max))
    }

    /// Expand the dirty AABB to include `[min, max]` (lattice indices).
    pub fn mark_dirty(&mut self, min: IVec3, max: IVec3) {
        let r = self.resolution as i32;
        self.dirty_min = self.dirty_min.min(min.clamp(IVec3::ZERO, IVec3::splat(r)));
        self.dirty_max = self.dirty_max.max(max.clamp(IVec3::ZERO, IVec3::splat(r)));
    }

    pub fn clear_dirty(&mut self) {
        self.dirty_min = IVec3::MAX;
        self.dirty_max = IVec3::MIN;
    }

    /// Add `strength * (1 - d/r)^2` to every sample within `radius` of
    /// `center`. Returns false without touching anything when the edit
    /// sphere misses the chunk box.
    pub fn modify(&mut self, center: Vec3, radius: f32, strength: f32) -> bool {
        if radius <= 0.0 || strength == 0.0 {
            return false;
        }

        let min = self.world_min();
        let max = self.world_max();
        let closest = center.clamp(min, max);
        if (closest - center).length_squared() > radius * radius {
            return false;
        }

        let r = self.resolution as i32;
        let base = self.base_lattice();
        let window_axis = |c: f32| -> (i32, i32) {
            let lo = ((c - radius) / self.voxel_step).floor() as i32;
            let hi = ((c + radius) / self.voxel_step).ceil() as i32;
            (lo, hi)
        };
        let (x_lo, x_hi) = window_axis(center.x);
        let (y_lo, y_hi) = window_axis(center.y);
        let (z_lo, z_hi) = window_axis(center.z);

        let x_range = (x_lo - base.x).clamp(0, r)..=(x_hi - base.x).clamp(0, r);
        let y_range = (y_lo - base.y).clamp(0, r)..=(y_hi - base.y).clamp(0, r);
        let z_range = (z_lo - base.z).clamp(0, r)..=(z_hi - base.z).clamp(0, r);

        let mut changed = false;
        for z in z_range.clone() {
            for y in y_range.clone() {
                for x in x_range.clone() {
                    let p = (base + IVec3::new(x, y, z)).as_vec3() * self.voxel_step;
                    let dist = (p - center).length();
                    if dist >= radius {
                        continue;
                    }
                    let falloff = 1.0 - dist / radius;
                    let delta = strength * falloff * falloff;
                    if delta == 0.0 {
                        continue;
                    }
                    let idx = self.index(x as usize, y as usize, z as usize);
                    self.lattice[idx] += delta;
                    self.edits.insert(idx as u32, self.lattice[idx]);
                    self.mark_dirty(IVec3::new(x, y, z), IVec3::new(x, y, z));
                    changed = true;
                }
            }
        }

        if changed {
            self.modified = true;
            self.revision += 1;
            self.refresh_fill_flags();
        }
        changed
    }

    /// Overwrite lattice samples with a persisted edit overlay.
    pub fn apply_edits(&mut self, edits: &HashMap<u32, f32>) {
        if edits.is_empty() {
            return;
        }
        let n = self.resolution + 1;
        let r = self.resolution as i32;
        for (&idx, &value) in edits {
            let idx = idx as usize;
            if idx >= self.lattice.len() {
                continue;
            }
            self.lattice[idx] = value;
            self.edits.insert(idx as u32, value);
            let p = IVec3::new(
                (idx % n) as i32,
                ((idx / n) % n) as i32,
                (idx / (n * n)) as i32,
            );
            self.mark_dirty(p.min(IVec3::splat(r)), p.min(IVec3::splat(r)));
        }
        self.modified = true;
        self.revision += 1;
        self.refresh_fill_flags();
    }

    /// Run marching cubes over the lattice, decorate the mesh, cache surface
    /// points and clear the dirty region. Returns true when a mesh exists.
    pub fn generate_mesh(
        &mut self,
        field: &PlanetField,
        surface_config: &SurfacePointConfig,
    ) -> Result<bool, EngineError> {
        let (mesh, points) = build_chunk_mesh(
            &self.lattice,
            self.resolution,
            self.base_lattice(),
            self.voxel_step,
            field,
            surface_config,
        )?;
        self.surface_points = points;
        self.mesh = mesh;
        self.clear_dirty();
        Ok(self.mesh.is_some())
    }

    /// Install a mesh produced by a worker. Clears the dirty region the
    /// snapshot covered.
    pub fn install_mesh(&mut self, mesh: Option<MeshData>, points: Vec<SurfacePoint>) {
        self.mesh = mesh;
        self.surface_points = points;
        self.clear_dirty();
    }

    pub fn clear_mesh(&mut self) {
        self.mesh = None;
        self.surface_points.clear();
    }
}

fn set_axis(v: &mut IVec3, axis: crate::boundary::Axis, value: i32) {
    match axis {
        crate::boundary::Axis::X => v.x = value,
        crate::boundary::Axis::Y => v.y = value,
        crate::boundary::Axis::Z => v.z = value,
    }
}

/// Shared meshing path for the synchronous and worker code.
///
/// Returns `(None, [])` when the lattice has no surface crossing.
pub(crate) fn build_chunk_mesh(
    samples: &[f32],
    resolution: usize,
    base: IVec3,
    voxel_step: f32,
    field: &PlanetField,
    surface_config: &SurfacePointConfig,
) -> Result<(Option<MeshData>, Vec<SurfacePoint>), EngineError> {
    if !has_surface_crossing(samples) {
        return Ok((None, Vec::new()));
    }

    let mut mesh = polygonize(samples, resolution, base, voxel_step)?;
    mesh.normals = mesh
        .positions
        .iter()
        .map(|p| {
            field
                .surface_normal(Vec3::from_array(*p), NORMAL_EPSILON)
                .to_array()
        })
        .collect();
    tint_vertices(&mut mesh, field);
    let points = collect_surface_points(&mesh, field, surface_config);

    Ok((Some(mesh), points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn sphere_setup(radius: f32) -> (PlanetField, BoundaryStore) {
        let mut config = EngineConfig::default();
        config.seed = 1;
        config.planet.radius = radius;
        config.terrain_layers.clear();
        config.caves.enabled = false;
        let field = PlanetField::new(&config);
        let store = BoundaryStore::new(16, 1.0);
        (field, store)
    }

    fn generated(coord: IVec3, radius: f32) -> (Chunk, PlanetField) {
        let (field, store) = sphere_setup(radius);
        let mut chunk = Chunk::new(coord, 16, 16.0);
        assert!(chunk.generate_density_field(&field, &store, None));
        (chunk, field)
    }

    #[test]
    fn chunk_containing_center_is_all_solid() {
        let (chunk, field) = generated(IVec3::ZERO, 50.0);
        assert!(chunk.all_solid());
        assert!(!chunk.all_empty());

        let mut c = chunk;
        let has_mesh = c
            .generate_mesh(&field, &SurfacePointConfig::default())
            .unwrap();
        assert!(!has_mesh);
        assert!(c.mesh().is_none());
    }

    #[test]
    fn chunk_far_outside_is_all_empty() {
        let (chunk, _) = generated(IVec3::new(4, 0, 0), 50.0);
        assert!(chunk.all_empty());
        assert!(!chunk.all_solid());
    }

    #[test]
    fn surface_chunk_emits_mesh_and_clears_dirty() {
        let (mut chunk, field) = generated(IVec3::new(3, 0, 0), 60.0);
        assert!(!chunk.all_empty() && !chunk.all_solid());

        chunk.mark_dirty(IVec3::ZERO, IVec3::splat(16));
        let has_mesh = chunk
            .generate_mesh(&field, &SurfacePointConfig::default())
            .unwrap();
        assert!(has_mesh);
        let mesh = chunk.mesh().unwrap();
        assert!(mesh.triangle_count() >= 1);
        assert_eq!(mesh.normals.len(), mesh.positions.len());
        assert_eq!(mesh.colors.len(), mesh.positions.len());
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn adjacent_chunks_share_face_samples_bitwise() {
        let (field, store) = sphere_setup(50.0);
        let mut a = Chunk::new(IVec3::ZERO, 16, 16.0);
        let mut b = Chunk::new(IVec3::new(1, 0, 0), 16, 16.0);
        a.generate_density_field(&field, &store, None);
        b.generate_density_field(&field, &store, None);

        for y in 0..=16 {
            for z in 0..=16 {
                let va = a.sample(16, y, z);
                let vb = b.sample(0, y, z);
                assert_eq!(va.to_bits(), vb.to_bits(), "face mismatch at ({y},{z})");
            }
        }
    }

    #[test]
    fn boundary_samples_match_store_values() {
        let (field, store) = sphere_setup(50.0);
        let mut chunk = Chunk::new(IVec3::new(2, 1, 0), 16, 16.0);
        chunk.generate_density_field(&field, &store, None);

        // Corner 0 equals the stored corner value
        let expected = store.get_or_create_corner(&field, chunk.coord(), 0);
        assert_eq!(chunk.sample(0, 0, 0).to_bits(), expected.to_bits());
    }

    #[test]
    fn cancellation_stops_generation() {
        let (field, store) = sphere_setup(50.0);
        let mut chunk = Chunk::new(IVec3::ZERO, 16, 16.0);
        let cancel = AtomicBool::new(true);
        assert!(!chunk.generate_density_field(&field, &store, Some(&cancel)));
    }

    #[test]
    fn modify_misses_chunk_returns_false() {
        let (mut chunk, _) = generated(IVec3::ZERO, 50.0);
        assert!(!chunk.modify(Vec3::new(100.0, 100.0, 100.0), 3.0, -5.0));
        assert!(!chunk.is_modified());
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn modify_changes_only_samples_inside_sphere() {
        let (mut chunk, _) = generated(IVec3::ZERO, 50.0);
        let before = chunk.snapshot_lattice();

        let center = Vec3::new(8.0, 8.0, 8.0);
        let radius = 3.0;
        assert!(chunk.modify(center, radius, -5.0));
        assert!(chunk.is_modified());
        assert_eq!(chunk.revision(), 1);

        let (dirty_min, dirty_max) = chunk.dirty_region().unwrap();
        let mut changed_min = IVec3::MAX;
        let mut changed_max = IVec3::MIN;
        for z in 0..=16usize {
            for y in 0..=16usize {
                for x in 0..=16usize {
                    let idx = IVec3::new(x as i32, y as i32, z as i32);
                    let pos = chunk.sample_world_pos(x, y, z);
                    let old = before[x + y * 17 + z * 17 * 17];
                    let new = chunk.sample(x, y, z);
                    if (pos - center).length() >= radius {
                        assert_eq!(
                            old.to_bits(),
                            new.to_bits(),
                            "sample outside edit sphere changed at {idx}"
                        );
                    } else if old.to_bits() != new.to_bits() {
                        changed_min = changed_min.min(idx);
                        changed_max = changed_max.max(idx);
                        // Quadratic falloff, negative strength: value decreased
                        assert!(new < old);
                    }
                }
            }
        }

        // Dirty AABB covers exactly the changed samples
        assert_eq!(dirty_min, changed_min);
        assert_eq!(dirty_max, changed_max);
    }

    #[test]
    fn edits_overlay_reproduces_lattice_bitwise() {
        let (mut chunk, _) = generated(IVec3::ZERO, 50.0);
        chunk.modify(Vec3::new(8.0, 8.0, 8.0), 4.0, -6.0);
        chunk.modify(Vec3::new(4.0, 8.0, 8.0), 2.0, 3.0);
        let edited = chunk.snapshot_lattice();
        let edits = chunk.edits().clone();

        // Regenerate the base field and re-apply the overlay
        let (field, store) = sphere_setup(50.0);
        let mut fresh = Chunk::new(IVec3::ZERO, 16, 16.0);
        fresh.generate_density_field(&field, &store, None);
        fresh.apply_edits(&edits);

        let replayed = fresh.snapshot_lattice();
        for (a, b) in edited.iter().zip(replayed.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
