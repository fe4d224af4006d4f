//! Direction-based biome selection with smoothstep blending
//!
//! A large-scale selection noise maps a normalized surface direction to a
//! position in [0, 1]; that position picks one biome out of an ordered list,
//! or a blended pair inside a band around the interior boundaries. Each biome
//! references its terrain layers by an index range into a flat layer arena so
//! evaluation never goes through dynamic dispatch.

use glam::Vec3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::noise::{evaluate_stack, smoothstep01, NoiseLayerConfig};

/// Seed offset applied to the biome selection noise
const SELECTION_SEED_OFFSET: i32 = 9999;

/// Position epsilon for the last-query cache
const CACHE_EPSILON: f32 = 1e-6;

/// One biome as loaded from configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiomeConfig {
    pub name: String,

    /// Terrain layers applied where this biome is active
    pub layers: Vec<NoiseLayerConfig>,

    /// Scale on the summed layer noise
    pub height_multiplier: f32,

    /// Constant height added after scaling
    pub height_offset: f32,

    /// Debug vertex color, RGBA in [0, 1]
    pub color: [f32; 4],

    /// Decorators skip surface points steeper than this (degrees)
    pub max_slope_deg: f32,

    /// Altitude window in which the biome predicate holds
    pub min_altitude: f32,
    pub max_altitude: f32,

    /// Surface directions the biome accepts; empty means all. A direction
    /// passes when its dot with any entry exceeds `direction_tolerance`.
    pub allowed_directions: Vec<Vec3>,
    pub direction_tolerance: f32,
}

impl Default for BiomeConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            layers: Vec::new(),
            height_multiplier: 1.0,
            height_offset: 0.0,
            color: [0.5, 0.5, 0.5, 1.0],
            max_slope_deg: 90.0,
            min_altitude: f32::MIN,
            max_altitude: f32::MAX,
            allowed_directions: Vec::new(),
            direction_tolerance: 0.0,
        }
    }
}

impl BiomeConfig {
    /// Application predicate consulted by decorators and surface sampling
    pub fn applies_at(&self, slope_deg: f32, altitude: f32, direction: Vec3) -> bool {
        if slope_deg > self.max_slope_deg {
            return false;
        }
        if altitude < self.min_altitude || altitude > self.max_altitude {
            return false;
        }
        if self.allowed_directions.is_empty() {
            return true;
        }
        self.allowed_directions
            .iter()
            .any(|d| direction.dot(*d) > self.direction_tolerance)
    }
}

/// Selection noise parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiomeSelectionConfig {
    /// Large-scale noise sampled at `direction * sample_radius`
    pub noise: NoiseLayerConfig,

    /// Radius of the selection sample sphere
    pub sample_radius: f32,

    /// Half-width of the blend band around interior boundaries, in t units
    pub blend_width: f32,

    /// Contrast remap exponent; 1.0 leaves t untouched
    pub contrast: f32,
}

impl Default for BiomeSelectionConfig {
    fn default() -> Self {
        Self {
            noise: NoiseLayerConfig {
                frequency: 0.004,
                octaves: 2,
                ..Default::default()
            },
            sample_radius: 200.0,
            blend_width: 0.05,
            contrast: 1.0,
        }
    }
}

/// Biome list plus its selection parameters, as configured
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BiomeSettings {
    pub biomes: Vec<BiomeConfig>,
    pub selection: BiomeSelectionConfig,
}

/// Up to two weighted biomes; weights sum to 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiomeWeights {
    pub primary: (usize, f32),
    pub secondary: Option<(usize, f32)>,
}

impl BiomeWeights {
    fn singleton(index: usize) -> Self {
        Self {
            primary: (index, 1.0),
            secondary: None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f32)> {
        std::iter::once(self.primary).chain(self.secondary)
    }
}

/// Runtime biome: the config fields the field evaluation needs plus an index
/// range into the shared layer arena
#[derive(Debug, Clone)]
pub struct Biome {
    pub config: BiomeConfig,
    pub layer_range: Range<usize>,
}

/// Maps normalized surface directions to biome weights and blended terrain
/// noise. Shared across worker threads behind the planet field.
pub struct BiomeSelector {
    biomes: Vec<Biome>,
    selection: BiomeSelectionConfig,
    seed: i32,
    cache: Mutex<Option<(Vec3, BiomeWeights)>>,
}

impl BiomeSelector {
    /// Build the selector, appending each biome's layers to `arena`.
    pub fn new(settings: &BiomeSettings, seed: i32, arena: &mut Vec<NoiseLayerConfig>) -> Self {
        let biomes = settings
            .biomes
            .iter()
            .map(|config| {
                let start = arena.len();
                arena.extend(config.layers.iter().cloned());
                Biome {
                    config: config.clone(),
                    layer_range: start..arena.len(),
                }
            })
            .collect();

        Self {
            biomes,
            selection: settings.selection.clone(),
            seed,
            cache: Mutex::new(None),
        }
    }

    pub fn biome_count(&self) -> usize {
        self.biomes.len()
    }

    pub fn biome(&self, index: usize) -> &Biome {
        &self.biomes[index]
    }

    /// Weighted biome set for a normalized direction
    pub fn select(&self, direction: Vec3) -> BiomeWeights {
        {
            let cache = self.cache.lock();
            if let Some((cached_dir, weights)) = *cache {
                if (direction - cached_dir).length_squared() < CACHE_EPSILON * CACHE_EPSILON {
                    return weights;
                }
            }
        }

        let raw = self
            .selection
            .noise
            .fbm(direction * self.selection.sample_radius, self.seed.wrapping_add(SELECTION_SEED_OFFSET));
        let t = self.remap(((raw + 1.0) * 0.5).clamp(0.0, 1.0));
        let weights = self.weights_for_t(t);

        *self.cache.lock() = Some((direction, weights));
        weights
    }

    /// Blended terrain noise for the density function.
    ///
    /// `point` is the sample position on the nominal sphere; `arena` is the
    /// shared layer arena the biome ranges index into.
    pub fn terrain_noise(
        &self,
        direction: Vec3,
        point: Vec3,
        seed: i32,
        arena: &[NoiseLayerConfig],
    ) -> f32 {
        let weights = self.select(direction);
        let mut total = 0.0;
        let mut weight_sum = 0.0;

        for (index, weight) in weights.iter() {
            let biome = &self.biomes[index];
            let layer_sum = evaluate_stack(&arena[biome.layer_range.clone()], point, seed);
            total += weight * (layer_sum * biome.config.height_multiplier + biome.config.height_offset);
            weight_sum += weight;
        }

        if weight_sum > 0.0 {
            total / weight_sum
        } else {
            0.0
        }
    }

    /// Contrast remap around t = 0.5
    fn remap(&self, t: f32) -> f32 {
        let contrast = self.selection.contrast;
        if contrast <= 0.0 || (contrast - 1.0).abs() < f32::EPSILON {
            return t;
        }
        let centered = 2.0 * t - 1.0;
        centered.signum() * centered.abs().powf(1.0 / contrast) * 0.5 + 0.5
    }

    /// Weights for a selection position t in [0, 1].
    ///
    /// Inside `blend_width` of an interior boundary the two adjacent biomes
    /// blend via smoothstep, exactly 0.5/0.5 at the boundary itself.
    pub(crate) fn weights_for_t(&self, t: f32) -> BiomeWeights {
        let n = self.biomes.len();
        if n == 0 {
            return BiomeWeights::singleton(0);
        }

        let index = ((t * n as f32) as usize).min(n - 1);
        let blend_width = self.selection.blend_width;
        if blend_width <= 0.0 {
            return BiomeWeights::singleton(index);
        }

        let cell = 1.0 / n as f32;
        let lower = index as f32 * cell;
        let upper = lower + cell;

        // Nearest interior boundary and the biome on its far side
        let (distance, neighbor) = match (index > 0, index + 1 < n) {
            (true, true) => {
                if t - lower <= upper - t {
                    (t - lower, index - 1)
                } else {
                    (upper - t, index + 1)
                }
            }
            (true, false) => (t - lower, index - 1),
            (false, true) => (upper - t, index + 1),
            (false, false) => return BiomeWeights::singleton(index),
        };

        if distance >= blend_width {
            return BiomeWeights::singleton(index);
        }

        let s = smoothstep01(distance / blend_width);
        let primary_weight = 0.5 + 0.5 * s;
        BiomeWeights {
            primary: (index, primary_weight),
            secondary: Some((neighbor, 1.0 - primary_weight)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector_with(n: usize, blend_width: f32) -> BiomeSelector {
        let settings = BiomeSettings {
            biomes: (0..n)
                .map(|i| BiomeConfig {
                    name: format!("biome{i}"),
                    ..Default::default()
                })
                .collect(),
            selection: BiomeSelectionConfig {
                blend_width,
                ..Default::default()
            },
        };
        let mut arena = Vec::new();
        BiomeSelector::new(&settings, 1, &mut arena)
    }

    #[test]
    fn singleton_outside_blend_band() {
        let selector = selector_with(4, 0.02);
        let weights = selector.weights_for_t(0.125); // middle of biome 0
        assert_eq!(weights.primary, (0, 1.0));
        assert!(weights.secondary.is_none());
    }

    #[test]
    fn boundary_blends_half_and_half() {
        let selector = selector_with(4, 0.02);
        // t = 0.25 is the boundary between biome 0 and biome 1
        let weights = selector.weights_for_t(0.25);
        assert_eq!(weights.primary.1, 0.5);
        assert_eq!(weights.secondary.unwrap().1, 0.5);
    }

    #[test]
    fn blend_weights_sum_to_one() {
        let selector = selector_with(3, 0.05);
        for i in 0..100 {
            let t = i as f32 / 99.0;
            let weights = selector.weights_for_t(t);
            let sum: f32 = weights.iter().map(|(_, w)| w).sum();
            assert!((sum - 1.0).abs() < 1e-6, "weights at t={t} sum to {sum}");
        }
    }

    #[test]
    fn band_edge_returns_full_weight() {
        let selector = selector_with(2, 0.125);
        // Exactly blend_width away from the t=0.5 boundary
        let weights = selector.weights_for_t(0.375);
        assert_eq!(weights.primary, (0, 1.0));
        assert!(weights.secondary.is_none());
    }

    #[test]
    fn outer_edges_never_blend() {
        let selector = selector_with(4, 0.1);
        assert!(selector.weights_for_t(0.0).secondary.is_none());
        assert!(selector.weights_for_t(1.0).secondary.is_none());
    }

    #[test]
    fn select_is_cached_and_deterministic() {
        let selector = selector_with(4, 0.05);
        let n = Vec3::new(0.6, 0.8, 0.0);
        let a = selector.select(n);
        let b = selector.select(n);
        assert_eq!(a.primary, b.primary);
        assert_eq!(a.secondary, b.secondary);
    }

    #[test]
    fn terrain_noise_applies_multiplier_and_offset() {
        let layer = NoiseLayerConfig {
            frequency: 0.03,
            strength: 2.0,
            ..Default::default()
        };
        let settings = BiomeSettings {
            biomes: vec![BiomeConfig {
                name: "single".to_string(),
                layers: vec![layer.clone()],
                height_multiplier: 2.0,
                height_offset: 7.0,
                ..Default::default()
            }],
            selection: BiomeSelectionConfig::default(),
        };
        let mut arena = Vec::new();
        let selector = BiomeSelector::new(&settings, 3, &mut arena);

        let dir = Vec3::new(0.0, 1.0, 0.0);
        let point = dir * 150.0;
        let expected = evaluate_stack(&[layer], point, 3) * 2.0 + 7.0;
        assert_eq!(selector.terrain_noise(dir, point, 3, &arena), expected);
    }

    #[test]
    fn predicate_rejects_steep_slopes() {
        let config = BiomeConfig {
            max_slope_deg: 30.0,
            ..Default::default()
        };
        assert!(config.applies_at(20.0, 0.0, Vec3::Y));
        assert!(!config.applies_at(45.0, 0.0, Vec3::Y));
    }

    #[test]
    fn predicate_checks_directions() {
        let config = BiomeConfig {
            allowed_directions: vec![Vec3::Y],
            direction_tolerance: 0.5,
            ..Default::default()
        };
        assert!(config.applies_at(0.0, 0.0, Vec3::Y));
        assert!(!config.applies_at(0.0, 0.0, Vec3::X));
    }
}
