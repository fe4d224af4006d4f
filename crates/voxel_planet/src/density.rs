//! Planet density field
//!
//! Sign convention: positive = solid, negative = empty, zero = the surface.
//! The field is a pure function of `(seed, EngineConfig)`; the only mutable
//! state anywhere near it is the cave cell cache, which is itself a pure
//! memoization. Contributions are a closed sum type dispatched in a fixed
//! order: sphere base, then terrain noise (global layers or biome-blended),
//! then the subtractive cave field guarded by the interior clamp.

use glam::Vec3;

use crate::biome::BiomeSelector;
use crate::caves::CaveField;
use crate::config::{EngineConfig, PlanetConfig};
use crate::noise::{evaluate_stack, NoiseLayerConfig};

/// One density contribution; evaluation dispatches by tag
enum Contribution {
    SphereBase,
    /// Global layer stack, an index range into the arena
    Layered(std::ops::Range<usize>),
    BiomeBlend,
    CaveField,
}

/// The assembled density field for one planet
pub struct PlanetField {
    seed: i32,
    planet: PlanetConfig,

    /// Flat arena of every noise layer: global stack first, then each
    /// biome's layers
    arena: Vec<NoiseLayerConfig>,

    selector: Option<BiomeSelector>,
    caves: Option<CaveField>,

    contributions: Vec<Contribution>,
}

impl PlanetField {
    pub fn new(config: &EngineConfig) -> Self {
        let mut arena: Vec<NoiseLayerConfig> = config.terrain_layers.clone();
        let global_range = 0..arena.len();

        let selector = if config.biomes.biomes.is_empty() {
            None
        } else {
            Some(BiomeSelector::new(&config.biomes, config.seed, &mut arena))
        };

        let caves = config.caves.enabled.then(|| {
            CaveField::new(
                config.caves.clone(),
                config.seed,
                config.planet.center,
                config.planet.radius,
            )
        });

        let mut contributions = vec![Contribution::SphereBase];
        if selector.is_some() {
            contributions.push(Contribution::BiomeBlend);
        } else if !global_range.is_empty() {
            contributions.push(Contribution::Layered(global_range));
        }
        if caves.is_some() {
            contributions.push(Contribution::CaveField);
        }

        Self {
            seed: config.seed,
            planet: config.planet.clone(),
            arena,
            selector,
            caves,
            contributions,
        }
    }

    pub fn seed(&self) -> i32 {
        self.seed
    }

    pub fn planet(&self) -> &PlanetConfig {
        &self.planet
    }

    pub fn selector(&self) -> Option<&BiomeSelector> {
        self.selector.as_ref()
    }

    pub fn caves(&self) -> Option<&CaveField> {
        self.caves.as_ref()
    }

    /// Drop memoized cave cells; used when regenerating terrain in place.
    pub fn clear_caches(&self) {
        if let Some(caves) = &self.caves {
            caves.clear_cache();
        }
    }

    /// Density at a world position.
    pub fn density(&self, p: Vec3) -> f32 {
        let to_center = p - self.planet.center;
        let r = to_center.length();
        let base = self.planet.radius - r;

        // Noise is windowed to a band around the nominal surface so the
        // geometric sphere dominates far from it.
        let blend = (1.0 - base.abs() / self.planet.surface_blend_distance).clamp(0.0, 1.0);
        let dir = if r > 1e-6 { to_center / r } else { Vec3::ZERO };
        let surface_point = dir * self.planet.radius;

        let mut value = 0.0;
        for contribution in &self.contributions {
            match contribution {
                Contribution::SphereBase => value += base,
                Contribution::Layered(range) => {
                    if blend > 0.0 && dir != Vec3::ZERO {
                        value += evaluate_stack(&self.arena[range.clone()], surface_point, self.seed)
                            * blend;
                    }
                }
                Contribution::BiomeBlend => {
                    if blend > 0.0 && dir != Vec3::ZERO {
                        let selector = self.selector.as_ref().expect("biome contribution without selector");
                        value += selector.terrain_noise(dir, surface_point, self.seed, &self.arena)
                            * blend;
                    }
                }
                Contribution::CaveField => {
                    let caves = self.caves.as_ref().expect("cave contribution without field");
                    let carved = caves.sample(p);
                    if carved < 0.0 {
                        // Deep interior density would otherwise swallow the
                        // carved amount.
                        if value > self.planet.max_interior_density {
                            value = self.planet.max_interior_density;
                        }
                        value += carved;
                    }
                }
            }
        }

        value
    }

    /// Density with non-finite results clamped to 0.0.
    ///
    /// Misconfigured noise can overflow to infinity; callers that fill
    /// lattices use this and count the clamps for rate-limited logging.
    pub fn density_checked(&self, p: Vec3) -> f32 {
        let d = self.density(p);
        if d.is_finite() {
            d
        } else {
            0.0
        }
    }

    /// Central-difference gradient of the density
    pub fn gradient(&self, p: Vec3, epsilon: f32) -> Vec3 {
        let dx = self.density(p + Vec3::X * epsilon) - self.density(p - Vec3::X * epsilon);
        let dy = self.density(p + Vec3::Y * epsilon) - self.density(p - Vec3::Y * epsilon);
        let dz = self.density(p + Vec3::Z * epsilon) - self.density(p - Vec3::Z * epsilon);
        Vec3::new(dx, dy, dz)
    }

    /// Outward surface normal at `p`, from the negated density gradient.
    pub fn surface_normal(&self, p: Vec3, epsilon: f32) -> Vec3 {
        let g = self.gradient(p, epsilon);
        if g.length_squared() > 1e-12 {
            -g.normalize()
        } else {
            // Degenerate gradient, fall back to the radial direction
            (p - self.planet.center).normalize_or_zero()
        }
    }

    /// Primary biome index at a normalized direction; 0 when no biomes are
    /// configured.
    pub fn primary_biome(&self, direction: Vec3) -> usize {
        self.selector
            .as_ref()
            .map(|s| s.select(direction).primary.0)
            .unwrap_or(0)
    }
}
