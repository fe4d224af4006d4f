//! Subtractive cave field
//!
//! Caves are carved by adding a negative contribution to the density wherever
//! a threshold-gated noise exceeds the configured worm threshold, restricted
//! to a depth band below the nominal surface with a smoothstep fade at both
//! ends. The cave noise is evaluated on a coarse cell lattice and trilinearly
//! interpolated; coarse samples go through a shared cell cache so neighboring
//! queries reuse them.

use glam::Vec3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::noise::{lerp, smoothstep01, value_noise3};

/// Seed offset decorrelating cave noise from the terrain layers
const CAVE_SEED_OFFSET: i32 = 1313;

/// Cache shard count; cells are distributed by coordinate hash
const SHARD_COUNT: usize = 8;

/// How the cave noise octaves are folded together and whether the sample
/// domain is warped first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaveStyle {
    /// Plain fBM tunnels
    Worm,
    /// Ridged folding, produces connected chamber walls
    Cavern,
    /// Billowy folding, produces isolated pockets
    Sponge,
    /// Sharpened ridges over a warped domain; narrow crack networks
    Fracture,
    /// Radially stretched sampling; sheet-like voids between strata
    Stratified,
    /// Worm/cavern mix over a warped domain
    Hybrid,
}

/// Octave parameters for the cave noise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaveNoiseParams {
    pub frequency: f32,
    pub octaves: u32,
    pub lacunarity: f32,
    pub persistence: f32,
}

impl Default for CaveNoiseParams {
    fn default() -> Self {
        Self {
            frequency: 0.05,
            octaves: 3,
            lacunarity: 2.0,
            persistence: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaveConfig {
    pub enabled: bool,
    pub style: CaveStyle,

    /// Depth band below the nominal surface where caves may exist
    pub min_depth: f32,
    pub max_depth: f32,

    /// Fade distance inside both ends of the depth band
    pub fade_range: f32,

    /// Normalized noise must exceed this for a cave to open
    pub threshold: f32,

    /// Tunnel width multiplier on the carved strength
    pub width: f32,

    /// Overall carving strength
    pub cave_density: f32,

    pub noise: CaveNoiseParams,

    /// Coarse lattice cell size in world units
    pub cell_size: f32,
}

impl Default for CaveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            style: CaveStyle::Worm,
            min_depth: 5.0,
            max_depth: 40.0,
            fade_range: 5.0,
            threshold: 0.3,
            width: 3.0,
            cave_density: 30.0,
            noise: CaveNoiseParams::default(),
            cell_size: 4.0,
        }
    }
}

/// The cave field bound to one planet configuration.
///
/// The cell cache is keyed by packed coarse coordinates; it is valid only for
/// the `(seed, center, radius)` the field was built with, so changing any of
/// those means building a new field (or calling [`CaveField::clear_cache`]).
pub struct CaveField {
    config: CaveConfig,
    seed: i32,
    center: Vec3,
    radius: f32,
    shards: [RwLock<HashMap<i64, f32>>; SHARD_COUNT],
}

impl CaveField {
    pub fn new(config: CaveConfig, seed: i32, center: Vec3, radius: f32) -> Self {
        Self {
            config,
            seed: seed.wrapping_add(CAVE_SEED_OFFSET),
            center,
            radius,
            shards: std::array::from_fn(|_| RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CaveConfig {
        &self.config
    }

    /// Drop every cached coarse sample
    pub fn clear_cache(&self) {
        for shard in &self.shards {
            shard.write().clear();
        }
    }

    /// Additive density contribution at `p`; zero or negative.
    pub fn sample(&self, p: Vec3) -> f32 {
        if !self.config.enabled {
            return 0.0;
        }

        let depth = self.radius - (p - self.center).length();
        if depth < self.config.min_depth || depth > self.config.max_depth {
            return 0.0;
        }

        let fade = self.depth_fade(depth);
        if fade <= 0.0 {
            return 0.0;
        }

        self.carve_from_value(self.interpolated_noise(p), fade)
    }

    /// True when `p` lies inside carved cave space
    pub fn is_cave_at(&self, p: Vec3) -> bool {
        self.sample(p) < 0.0
    }

    /// Normalized depth position in [0, 1] used for cave tinting; 0 at the
    /// shallow bound, 1 at the deep bound.
    pub fn depth_factor(&self, p: Vec3) -> f32 {
        let depth = self.radius - (p - self.center).length();
        let span = self.config.max_depth - self.config.min_depth;
        if span <= 0.0 {
            return 0.0;
        }
        ((depth - self.config.min_depth) / span).clamp(0.0, 1.0)
    }

    /// Smoothstep fade to zero inside `fade_range` of both depth bounds
    fn depth_fade(&self, depth: f32) -> f32 {
        let range = self.config.fade_range.max(f32::EPSILON);
        let lower = ((depth - self.config.min_depth) / range).clamp(0.0, 1.0);
        let upper = ((self.config.max_depth - depth) / range).clamp(0.0, 1.0);
        smoothstep01(lower) * smoothstep01(upper)
    }

    /// Threshold/strength discipline shared by every style
    pub(crate) fn carve_from_value(&self, value: f32, fade: f32) -> f32 {
        let threshold = self.config.threshold;
        if value <= threshold || threshold >= 1.0 {
            return 0.0;
        }
        let strength = (value - threshold) / (1.0 - threshold) * self.config.cave_density * fade;
        -strength * self.config.width
    }

    /// Trilinear interpolation of the coarse cell noise with smoothstepped
    /// interpolants
    fn interpolated_noise(&self, p: Vec3) -> f32 {
        let cell = self.config.cell_size.max(f32::EPSILON);
        let q = p / cell;

        let ix = q.x.floor() as i64;
        let iy = q.y.floor() as i64;
        let iz = q.z.floor() as i64;

        let fx = smoothstep01(q.x - ix as f32);
        let fy = smoothstep01(q.y - iy as f32);
        let fz = smoothstep01(q.z - iz as f32);

        let c000 = self.cell_value(ix, iy, iz);
        let c100 = self.cell_value(ix + 1, iy, iz);
        let c010 = self.cell_value(ix, iy + 1, iz);
        let c110 = self.cell_value(ix + 1, iy + 1, iz);
        let c001 = self.cell_value(ix, iy, iz + 1);
        let c101 = self.cell_value(ix + 1, iy, iz + 1);
        let c011 = self.cell_value(ix, iy + 1, iz + 1);
        let c111 = self.cell_value(ix + 1, iy + 1, iz + 1);

        let x00 = lerp(c000, c100, fx);
        let x10 = lerp(c010, c110, fx);
        let x01 = lerp(c001, c101, fx);
        let x11 = lerp(c011, c111, fx);

        let y0 = lerp(x00, x10, fy);
        let y1 = lerp(x01, x11, fy);

        lerp(y0, y1, fz)
    }

    /// Coarse sample at a cell lattice point, read through the cache.
    ///
    /// Racing writers compute identical values, so first-writer-wins keeps
    /// every reader consistent.
    fn cell_value(&self, ix: i64, iy: i64, iz: i64) -> f32 {
        let key = pack_cell(ix, iy, iz);
        let shard = &self.shards[(key as u64 % SHARD_COUNT as u64) as usize];

        if let Some(v) = shard.read().get(&key) {
            return *v;
        }

        let world = Vec3::new(ix as f32, iy as f32, iz as f32) * self.config.cell_size;
        let v = self.raw_noise(world);
        *shard.write().entry(key).or_insert(v)
    }

    /// Style-folded octave noise normalized to [0, 1]
    fn raw_noise(&self, p: Vec3) -> f32 {
        let params = &self.config.noise;
        let q = match self.config.style {
            CaveStyle::Fracture | CaveStyle::Hybrid => self.warp(p),
            CaveStyle::Stratified => self.radial_stretch(p),
            _ => p,
        };

        let mut total = 0.0;
        let mut amplitude = 1.0;
        let mut amplitude_sum = 0.0;
        let mut frequency = params.frequency;

        for _ in 0..params.octaves.max(1) {
            let s = value_noise3(q * frequency, self.seed);
            let folded = match self.config.style {
                CaveStyle::Worm | CaveStyle::Stratified => s,
                CaveStyle::Cavern => 1.0 - s.abs() * 2.0,
                CaveStyle::Sponge => 2.0 * s * s - 1.0,
                CaveStyle::Fracture => {
                    let r = 1.0 - s.abs() * 2.0;
                    r * r.abs()
                }
                CaveStyle::Hybrid => 0.5 * (s + 1.0 - s.abs() * 2.0),
            };
            total += folded * amplitude;
            amplitude_sum += amplitude;
            amplitude *= params.persistence;
            frequency *= params.lacunarity;
        }

        ((total / amplitude_sum + 1.0) * 0.5).clamp(0.0, 1.0)
    }

    /// Low-frequency domain warp, one cell of displacement at most
    fn warp(&self, p: Vec3) -> Vec3 {
        let f = self.config.noise.frequency * 0.5;
        let offset = Vec3::new(
            value_noise3(p * f, self.seed.wrapping_add(131)),
            value_noise3(p * f, self.seed.wrapping_add(313)),
            value_noise3(p * f, self.seed.wrapping_add(757)),
        );
        p + offset * self.config.cell_size
    }

    /// Stretch the radial component so the noise varies much faster with
    /// depth than along the surface
    fn radial_stretch(&self, p: Vec3) -> Vec3 {
        let to_center = p - self.center;
        let r = to_center.length();
        if r < 1e-6 {
            return p;
        }
        p + (to_center / r) * (r * 3.0)
    }
}

/// Pack signed cell coordinates into one 64-bit key, 21 bits per axis
fn pack_cell(ix: i64, iy: i64, iz: i64) -> i64 {
    const MASK: i64 = 0x1F_FFFF;
    (ix & MASK) | ((iy & MASK) << 21) | ((iz & MASK) << 42)
}
