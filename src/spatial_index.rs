//! Spatial index - uniform-grid neighbor lookup.
//!
//! Uniform-grid binning of one chunk's grains by `floor(position / h)`, for
//! O(1) neighbor lookup during constraint generation. Rebuilt once per step,
//! over `scratch` positions, after gravity integration and before constraint
//! iteration. "Bin by coarse key, rebuild every frame" rather than a
//! persistent tree, since grain positions move every tick anyway.
//!
//! Per-grain neighbor search only reads the shared bin map, so under the
//! `parallel` feature it runs on rayon's pool - a real chunk's grain count
//! (hundreds to low thousands) makes this worth the fork/join cost, unlike
//! the rest of the solver's Gauss-Seidel loop, which is inherently
//! sequential within an iteration.

use std::collections::HashMap;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::grain::Grain;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct BinKey {
    x: i32,
    y: i32,
    z: i32,
}

fn bin_key(p: crate::vecmath::Vec3, inv_h: f32) -> BinKey {
    BinKey {
        x: (p.x * inv_h).floor() as i32,
        y: (p.y * inv_h).floor() as i32,
        z: (p.z * inv_h).floor() as i32,
    }
}

/// Every grain index within `h` of `grain`, searching the 27 bins
/// surrounding its own. A grain is always included in its own list.
fn neighbors_of_one(
    grain: &Grain,
    bins: &HashMap<BinKey, Vec<usize>>,
    inv_h: f32,
    h_sq: f32,
    grains: &[Grain],
) -> Vec<usize> {
    let key = bin_key(grain.scratch, inv_h);
    let mut found = Vec::new();
    for dx in -1..=1 {
        for dy in -1..=1 {
            for dz in -1..=1 {
                let nkey = BinKey { x: key.x + dx, y: key.y + dy, z: key.z + dz };
                if let Some(candidates) = bins.get(&nkey) {
                    for &candidate in candidates {
                        let d = grains[candidate].scratch.sub(grain.scratch);
                        if d.length_sq() < h_sq {
                            found.push(candidate);
                        }
                    }
                }
            }
        }
    }
    found
}

/// Neighbor lists, one per grain index, built over `scratch` positions.
/// A grain is always included in its own neighbor list.
pub struct SpatialIndex {
    h: f32,
    neighbors: Vec<Vec<usize>>,
}

impl SpatialIndex {
    /// Build the index for the current grain list (owned grains plus any
    /// shadow tail already appended).
    pub fn build(grains: &[Grain], h: f32) -> Self {
        let inv_h = 1.0 / h;
        let mut bins: HashMap<BinKey, Vec<usize>> = HashMap::new();
        for (ix, grain) in grains.iter().enumerate() {
            bins.entry(bin_key(grain.scratch, inv_h)).or_default().push(ix);
        }

        let h_sq = h * h;

        #[cfg(feature = "parallel")]
        let neighbors: Vec<Vec<usize>> =
            grains.par_iter().map(|grain| neighbors_of_one(grain, &bins, inv_h, h_sq, grains)).collect();

        #[cfg(not(feature = "parallel"))]
        let neighbors: Vec<Vec<usize>> =
            grains.iter().map(|grain| neighbors_of_one(grain, &bins, inv_h, h_sq, grains)).collect();

        Self { h, neighbors }
    }

    #[inline]
    pub fn h(&self) -> f32 {
        self.h
    }

    #[inline]
    pub fn neighbors_of(&self, ix: usize) -> &[usize] {
        &self.neighbors[ix]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grain::Grain;
    use crate::ids::GrainIdGen;
    use crate::vecmath::Vec3;

    fn grain_at(gen: &mut GrainIdGen, p: Vec3) -> Grain {
        Grain::water(gen.next(), p)
    }

    #[test]
    fn self_is_always_a_neighbor() {
        let mut gen = GrainIdGen::new(1);
        let grains = vec![grain_at(&mut gen, Vec3::new(0.5, 0.5, 0.5))];
        let idx = SpatialIndex::build(&grains, 0.1);
        assert!(idx.neighbors_of(0).contains(&0));
    }

    #[test]
    fn distant_grains_are_not_neighbors() {
        let mut gen = GrainIdGen::new(1);
        let grains = vec![
            grain_at(&mut gen, Vec3::new(0.1, 0.1, 0.1)),
            grain_at(&mut gen, Vec3::new(0.9, 0.9, 0.9)),
        ];
        let idx = SpatialIndex::build(&grains, 0.1);
        assert_eq!(idx.neighbors_of(0), &[0]);
        assert_eq!(idx.neighbors_of(1), &[1]);
    }

    #[test]
    fn nearby_grains_across_bin_boundary_are_found() {
        let mut gen = GrainIdGen::new(1);
        // 0.099 and 0.101 straddle the h=0.1 bin boundary but are < h apart.
        let grains = vec![
            grain_at(&mut gen, Vec3::new(0.099, 0.5, 0.5)),
            grain_at(&mut gen, Vec3::new(0.101, 0.5, 0.5)),
        ];
        let idx = SpatialIndex::build(&grains, 0.1);
        assert!(idx.neighbors_of(0).contains(&1));
        assert!(idx.neighbors_of(1).contains(&0));
    }
}
