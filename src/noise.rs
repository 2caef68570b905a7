//! Value noise - production chunk seeding.
//!
//! A small band-limited value noise: random values on an integer lattice,
//! interpolated with a raised-cosine (smootherstep-adjacent) blend, summed
//! across three octaves at persistence 0.5. Used to vary terrain height and
//! grain density across a freshly generated chunk without the fixed
//! crystalline look `topology::GrainPacker` gives test fixtures.

use crate::grain::Grain;
use crate::ids::GrainIdGen;
use crate::vecmath::Vec3;

const OCTAVES: u32 = 3;
const PERSISTENCE: f32 = 0.5;

/// One octave's deterministic lattice value in `[-1, 1]`, derived from an
/// xorshift stream seeded by the integer lattice coordinates themselves so
/// the same `(seed, x, y)` always yields the same value.
fn lattice_value(seed: u64, x: i32, y: i32) -> f32 {
    let key = seed
        ^ ((x as u64).wrapping_mul(0x9E3779B97F4A7C15))
        ^ ((y as u64).wrapping_mul(0xC2B2AE3D27D4EB4F));
    let mut gen = GrainIdGen::new(key | 1);
    let raw = gen.next().0;
    (raw as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0
}

#[inline]
fn smooth(t: f32) -> f32 {
    0.5 * (1.0 - (std::f32::consts::PI * t).cos())
}

/// One octave of 2D value noise at integer-lattice frequency `freq`.
fn octave(seed: u64, x: f32, y: f32, freq: f32) -> f32 {
    let fx = x * freq;
    let fy = y * freq;
    let x0 = fx.floor() as i32;
    let y0 = fy.floor() as i32;
    let tx = smooth(fx - x0 as f32);
    let ty = smooth(fy - y0 as f32);

    let v00 = lattice_value(seed, x0, y0);
    let v10 = lattice_value(seed, x0 + 1, y0);
    let v01 = lattice_value(seed, x0, y0 + 1);
    let v11 = lattice_value(seed, x0 + 1, y0 + 1);

    let a = v00 + (v10 - v00) * tx;
    let b = v01 + (v11 - v01) * tx;
    a + (b - a) * ty
}

/// Band-limited value noise at `(x, y)`, summing `OCTAVES` octaves starting
/// at frequency 1 and halving amplitude (`PERSISTENCE`) each octave. Result
/// is in roughly `[-1, 1]` (not renormalized - callers that need a tight
/// bound should clamp).
pub fn value_noise_2d(seed: u64, x: f32, y: f32) -> f32 {
    let mut total = 0.0;
    let mut amplitude = 1.0;
    let mut freq = 1.0;
    let mut max_amplitude = 0.0;
    for _ in 0..OCTAVES {
        total += octave(seed, x, y, freq) * amplitude;
        max_amplitude += amplitude;
        amplitude *= PERSISTENCE;
        freq *= 2.0;
    }
    total / max_amplitude
}

/// Column lattice spacing used when seeding a freshly spawned chunk.
const SEED_SPACING: f32 = 0.1;

/// Builds a freshly generated chunk's initial grains from its noise field:
/// one soil column per `SEED_SPACING` lattice point in `(x, y)`, with the
/// column's height set by `value_noise_2d` remapped into the chunk's Z
/// extent, topped with a water layer filling the remainder up to
/// `water_level` wherever the soil height falls short of it.
pub fn seed_chunk_grains(seed: u64, extent: Vec3, water_level: f32, id_gen: &mut GrainIdGen) -> Vec<Grain> {
    let mut grains = Vec::new();
    let nx = (extent.x / SEED_SPACING).floor().max(1.0) as i32;
    let ny = (extent.y / SEED_SPACING).floor().max(1.0) as i32;

    for iy in 0..ny {
        for ix in 0..nx {
            let x = (ix as f32 + 0.5) * SEED_SPACING;
            let y = (iy as f32 + 0.5) * SEED_SPACING;
            let n = value_noise_2d(seed, x * 4.0, y * 4.0);
            let soil_height = ((n + 1.0) * 0.5 * extent.z * 0.4).clamp(SEED_SPACING, extent.z);

            let mut z = SEED_SPACING * 0.5;
            while z < soil_height {
                grains.push(Grain::soil(id_gen.next(), Vec3::new(x, y, z)));
                z += SEED_SPACING;
            }
            while z < water_level {
                grains.push(Grain::water(id_gen.next(), Vec3::new(x, y, z)));
                z += SEED_SPACING;
            }
        }
    }

    grains
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_and_coords_are_deterministic() {
        assert_eq!(value_noise_2d(42, 1.3, 2.7), value_noise_2d(42, 1.3, 2.7));
    }

    #[test]
    fn different_seeds_usually_diverge() {
        assert_ne!(value_noise_2d(1, 1.3, 2.7), value_noise_2d(2, 1.3, 2.7));
    }

    #[test]
    fn stays_within_expected_band() {
        for i in 0..50 {
            let v = value_noise_2d(7, i as f32 * 0.37, i as f32 * 1.11);
            assert!((-1.5..=1.5).contains(&v), "out of band: {v}");
        }
    }

    #[test]
    fn lattice_points_are_continuous_across_a_cell_boundary() {
        let a = value_noise_2d(3, 0.999, 0.5);
        let b = value_noise_2d(3, 1.001, 0.5);
        assert!((a - b).abs() < 0.1);
    }
}
