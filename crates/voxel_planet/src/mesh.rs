//! Mesh data and the utilities that decorate it
//!
//! Marching cubes fills positions and indices; the helpers here add biome
//! vertex colors (with cave tinting when caves are enabled) and extract the
//! strided surface-point list that external decorators consume.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::density::PlanetField;

/// Fallback vertex color when no biomes are configured
const DEFAULT_SURFACE_COLOR: [f32; 4] = [0.55, 0.52, 0.48, 1.0];

/// Cave tint at the shallow and deep end of the cave depth band
const CAVE_TINT_SHALLOW: [f32; 4] = [0.32, 0.24, 0.18, 1.0];
const CAVE_TINT_DEEP: [f32; 4] = [0.06, 0.05, 0.04, 1.0];

/// How strongly the cave tint overrides the surface color
const CAVE_TINT_STRENGTH: f32 = 0.75;

/// Triangle mesh handed to the renderer and physics collaborators
#[derive(Debug, Default, Clone)]
pub struct MeshData {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 4]>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn stats(&self) -> MeshStats {
        MeshStats {
            vertex_count: self.positions.len(),
            triangle_count: self.triangle_count(),
            memory_bytes: self.memory_size(),
        }
    }

    pub fn memory_size(&self) -> usize {
        self.positions.len() * std::mem::size_of::<[f32; 3]>()
            + self.normals.len() * std::mem::size_of::<[f32; 3]>()
            + self.colors.len() * std::mem::size_of::<[f32; 4]>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }
}

/// Mesh statistics
#[derive(Debug, Default, Clone, Copy)]
pub struct MeshStats {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub memory_bytes: usize,
}

/// One sampled surface location, consumed by decorators and surface queries
#[derive(Debug, Clone, Copy)]
pub struct SurfacePoint {
    pub position: Vec3,
    pub normal: Vec3,

    /// Angle between the normal and the planet-radial direction, degrees
    pub slope_deg: f32,

    /// Radial distance above the nominal surface
    pub altitude: f32,

    /// Primary biome index at this direction
    pub biome: usize,
}

/// Filters for the strided surface-point sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurfacePointConfig {
    /// Upper bound on points collected per chunk
    pub target_count: usize,

    /// Minimum dot between vertex normal and the radial direction
    pub min_alignment: f32,

    /// Points below this altitude are skipped
    pub min_altitude: f32,
}

impl Default for SurfacePointConfig {
    fn default() -> Self {
        Self {
            target_count: 64,
            min_alignment: 0.6,
            min_altitude: 0.0,
        }
    }
}

/// True iff the lattice contains both a solid and an empty sample.
pub fn has_surface_crossing(samples: &[f32]) -> bool {
    let mut any_solid = false;
    let mut any_empty = false;
    for &s in samples {
        if s < 0.0 {
            any_empty = true;
        } else {
            any_solid = true;
        }
        if any_solid && any_empty {
            return true;
        }
    }
    false
}

/// Fill per-vertex colors from blended biome debug colors.
///
/// Vertices inside carved cave space are tinted toward a depth-dependent cave
/// color, but only when caves are enabled in the configuration.
pub fn tint_vertices(mesh: &mut MeshData, field: &PlanetField) {
    let center = field.planet().center;
    mesh.colors.clear();
    mesh.colors.reserve(mesh.positions.len());

    for pos in &mesh.positions {
        let p = Vec3::from_array(*pos);
        let dir = (p - center).normalize_or_zero();

        let mut color = DEFAULT_SURFACE_COLOR;
        if let Some(selector) = field.selector() {
            let weights = selector.select(dir);
            let mut blended = [0.0f32; 4];
            for (index, weight) in weights.iter() {
                let biome_color = selector.biome(index).config.color;
                for (acc, c) in blended.iter_mut().zip(biome_color) {
                    *acc += c * weight;
                }
            }
            color = blended;
        }

        if let Some(caves) = field.caves() {
            if caves.is_cave_at(p) {
                let depth = caves.depth_factor(p);
                let cave_color = lerp_color(CAVE_TINT_SHALLOW, CAVE_TINT_DEEP, depth);
                color = lerp_color(color, cave_color, CAVE_TINT_STRENGTH);
            }
        }

        mesh.colors.push(color);
    }
}

/// Stride over mesh vertices and keep those suitable for decoration.
pub fn collect_surface_points(
    mesh: &MeshData,
    field: &PlanetField,
    config: &SurfacePointConfig,
) -> Vec<SurfacePoint> {
    if mesh.positions.is_empty() || mesh.normals.len() != mesh.positions.len() {
        return Vec::new();
    }

    let center = field.planet().center;
    let radius = field.planet().radius;
    let stride = (mesh.positions.len() / config.target_count.max(1)).max(1);

    let mut points = Vec::new();
    for i in (0..mesh.positions.len()).step_by(stride) {
        if points.len() >= config.target_count {
            break;
        }

        let position = Vec3::from_array(mesh.positions[i]);
        let normal = Vec3::from_array(mesh.normals[i]);
        let to_center = position - center;
        let radial = to_center.normalize_or_zero();

        let alignment = normal.dot(radial);
        if alignment < config.min_alignment {
            continue;
        }

        let altitude = to_center.length() - radius;
        if altitude < config.min_altitude {
            continue;
        }

        points.push(SurfacePoint {
            position,
            normal,
            slope_deg: alignment.clamp(-1.0, 1.0).acos().to_degrees(),
            altitude,
            biome: field.primary_biome(radial),
        });
    }

    points
}

fn lerp_color(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    let mut out = [0.0; 4];
    for i in 0..4 {
        out[i] = a[i] + (b[i] - a[i]) * t;
    }
    out
}
