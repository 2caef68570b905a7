//! Chunk topology.
//!
//! The rectangular-cylinder chunk grid: X wraps modulo `nx` (the cylinder's
//! circumference), Y does not (it's walled at both ends). Also carries the
//! deterministic lattice grain-packer used to seed demo/test biospheres, and
//! the locality-sensitive placement hash the controller uses to assign
//! chunks to workers.

use crate::grain::Grain;
use crate::ids::GrainIdGen;
use crate::solver::{Bounds, ChunkWall};
use crate::vecmath::Vec3;

/// A chunk's grid coordinates within one biosphere.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub ix: i32,
    pub iy: i32,
}

impl ChunkCoord {
    /// The wire/storage chunk id: `"<biosphere_id>-<ix>:<iy>"`.
    pub fn chunk_id(&self, biosphere_id: &str) -> String {
        format!("{biosphere_id}-{}:{}", self.ix, self.iy)
    }
}

/// Parses a chunk id of the form `"<biosphere_id>-<ix>:<iy>"` back into its
/// biosphere id and coordinate.
pub fn parse_chunk_id(chunk_id: &str) -> Option<(String, ChunkCoord)> {
    let (biosphere_id, rest) = chunk_id.rsplit_once('-')?;
    let (ix, iy) = rest.split_once(':')?;
    Some((biosphere_id.to_string(), ChunkCoord { ix: ix.parse().ok()?, iy: iy.parse().ok()? }))
}

/// The rectangular-cylinder grid: `nx` chunks wrap around the circumference,
/// `ny` chunks run along the (walled) axis.
#[derive(Clone, Copy, Debug)]
pub struct CylinderTopology {
    pub nx: i32,
    pub ny: i32,
}

impl CylinderTopology {
    pub fn new(nx: i32, ny: i32) -> Self {
        Self { nx, ny }
    }

    /// Wraps `ix` into `[0, nx)`, handling negative input the way Go's `%`
    /// (which can return negative results) does not.
    #[inline]
    pub fn wrap_x(&self, ix: i32) -> i32 {
        ((ix % self.nx) + self.nx) % self.nx
    }

    /// All `nx * ny` chunk coordinates in this topology.
    pub fn chunks(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        (0..self.ny).flat_map(move |iy| (0..self.nx).map(move |ix| ChunkCoord { ix, iy }))
    }

    /// The up-to-8 neighbor offsets to consider from `coord`: X always wraps,
    /// Y neighbors outside `[0, ny)` are simply omitted (there is no chunk
    /// there - that edge is a real wall, not a crossing).
    pub fn neighbors(&self, coord: ChunkCoord) -> Vec<(i32, i32, ChunkCoord)> {
        let mut out = Vec::with_capacity(8);
        for dy in -1..=1 {
            let iy = coord.iy + dy;
            if iy < 0 || iy >= self.ny {
                continue;
            }
            for dx in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let ix = self.wrap_x(coord.ix + dx);
                out.push((dx, dy, ChunkCoord { ix, iy }));
            }
        }
        out
    }

    /// Which sides of `coord` are a real wall: X is walled only if `nx == 1`
    /// (a single ring has no neighbor to wrap to); Y is walled at `iy == 0`
    /// and `iy == ny - 1`.
    pub fn wall_for(&self, coord: ChunkCoord) -> ChunkWall {
        ChunkWall {
            x_minus: self.nx <= 1,
            x_plus: self.nx <= 1,
            y_minus: coord.iy == 0,
            y_plus: coord.iy == self.ny - 1,
        }
    }

    /// The world-space offset of `coord`'s origin, given a per-chunk extent.
    pub fn global_offset(&self, coord: ChunkCoord, extent: Vec3) -> Vec3 {
        Vec3::new(coord.ix as f32 * extent.x, coord.iy as f32 * extent.y, 0.0)
    }

    /// Local bounds every chunk shares, given a per-chunk extent.
    pub fn local_bounds(extent: Vec3) -> Bounds {
        Bounds { min: Vec3::ZERO, max: extent }
    }
}

/// A locality-sensitive placement key: chunks are ordered boustrophedon
/// (alternating scan direction per row) so that chunks adjacent in the grid
/// are usually adjacent in this ordering too, which keeps a contiguous
/// worker-id range's chunks spatially clustered.
pub fn locality_key(coord: ChunkCoord, nx: i32) -> i64 {
    let row_major = if coord.iy % 2 == 0 { coord.ix } else { nx - 1 - coord.ix };
    coord.iy as i64 * nx as i64 + row_major as i64
}

/// Cubic-lattice packing style for deterministic grain seeding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackingType {
    /// Primitive cubic: one grain per lattice cell.
    Simple,
    /// Body-centered: one grain per lattice cell plus one at the cell's center.
    BodyCentered,
}

/// Deterministically packs a lattice of grains into a box, optionally
/// jittered, for demo and test fixtures. Not used by production chunk
/// seeding (see `noise.rs` for that) - this mirrors the original envgen
/// tool's fixed test biospheres exactly, which makes it useful for
/// reproducing their seed scenarios in tests.
pub struct GrainPacker {
    pub lattice_size: f32,
    pub pack_type: PackingType,
    pub origin: Vec3,
    pub nx: u32,
    pub ny: u32,
    pub nz: u32,
    pub natural: bool,
}

impl GrainPacker {
    fn cell_offsets(&self) -> &'static [Vec3] {
        const SIMPLE: [Vec3; 1] = [Vec3::new(0.0, 0.0, 0.0)];
        const BCC: [Vec3; 2] = [Vec3::new(0.0, 0.0, 0.0), Vec3::new(0.5, 0.5, 0.5)];
        match self.pack_type {
            PackingType::Simple => &SIMPLE,
            PackingType::BodyCentered => &BCC,
        }
    }

    /// Generates the lattice's grain positions. `jitter_seed`, when
    /// `self.natural`, perturbs each position with a small deterministic
    /// offset derived from an xorshift stream so fixtures don't look
    /// perfectly crystalline while staying fully reproducible.
    pub fn generate_positions(&self, jitter_seed: u64) -> Vec<Vec3> {
        let mut id_gen = GrainIdGen::new(jitter_seed);
        let mut out = Vec::new();
        for iz in 0..self.nz {
            for iy in 0..self.ny {
                for ix in 0..self.nx {
                    for offset in self.cell_offsets() {
                        let mut pos = self.origin.add(Vec3::new(
                            (ix as f32 + offset.x) * self.lattice_size,
                            (iy as f32 + offset.y) * self.lattice_size,
                            (iz as f32 + offset.z) * self.lattice_size,
                        ));
                        if self.natural {
                            pos = pos.add(jitter(&mut id_gen, self.lattice_size * 0.1));
                        }
                        out.push(pos);
                    }
                }
            }
        }
        out
    }

    /// Packs this lattice as water grains.
    pub fn generate_water(&self, id_gen: &mut GrainIdGen, jitter_seed: u64) -> Vec<Grain> {
        self.generate_positions(jitter_seed).into_iter().map(|p| Grain::water(id_gen.next(), p)).collect()
    }

    /// Packs this lattice as soil grains.
    pub fn generate_soil(&self, id_gen: &mut GrainIdGen, jitter_seed: u64) -> Vec<Grain> {
        self.generate_positions(jitter_seed).into_iter().map(|p| Grain::soil(id_gen.next(), p)).collect()
    }
}

fn jitter(id_gen: &mut GrainIdGen, magnitude: f32) -> Vec3 {
    let unit = |raw: u64| (raw as f64 / u64::MAX as f64) as f32 * 2.0 - 1.0;
    Vec3::new(
        unit(id_gen.next().0) * magnitude,
        unit(id_gen.next().0) * magnitude,
        unit(id_gen.next().0) * magnitude,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x_wraps_and_y_does_not() {
        let topo = CylinderTopology::new(4, 3);
        assert_eq!(topo.wrap_x(-1), 3);
        assert_eq!(topo.wrap_x(4), 0);
        assert_eq!(topo.wrap_x(5), 1);
    }

    #[test]
    fn interior_chunk_has_no_real_walls() {
        let topo = CylinderTopology::new(4, 3);
        let wall = topo.wall_for(ChunkCoord { ix: 1, iy: 1 });
        assert!(!wall.x_minus && !wall.x_plus && !wall.y_minus && !wall.y_plus);
    }

    #[test]
    fn edge_rows_are_walled_in_y_only() {
        let topo = CylinderTopology::new(4, 3);
        let south = topo.wall_for(ChunkCoord { ix: 0, iy: 0 });
        assert!(south.y_minus && !south.y_plus && !south.x_minus);
        let north = topo.wall_for(ChunkCoord { ix: 0, iy: 2 });
        assert!(north.y_plus && !north.y_minus);
    }

    #[test]
    fn neighbor_count_matches_a_fully_interior_chunk() {
        let topo = CylinderTopology::new(5, 5);
        let neighbors = topo.neighbors(ChunkCoord { ix: 2, iy: 2 });
        assert_eq!(neighbors.len(), 8);
    }

    #[test]
    fn edge_row_drops_the_missing_y_neighbors() {
        let topo = CylinderTopology::new(5, 5);
        let neighbors = topo.neighbors(ChunkCoord { ix: 2, iy: 0 });
        assert_eq!(neighbors.len(), 5);
    }

    #[test]
    fn chunk_id_format_matches_the_wire_convention() {
        let coord = ChunkCoord { ix: 3, iy: 5 };
        assert_eq!(coord.chunk_id("bs1"), "bs1-3:5");
    }

    #[test]
    fn packer_generates_expected_count_for_simple_cubic() {
        let packer = GrainPacker {
            lattice_size: 0.07,
            pack_type: PackingType::Simple,
            origin: Vec3::ZERO,
            nx: 2,
            ny: 2,
            nz: 2,
            natural: false,
        };
        assert_eq!(packer.generate_positions(1).len(), 8);
    }

    #[test]
    fn packer_generates_expected_count_for_body_centered() {
        let packer = GrainPacker {
            lattice_size: 0.07,
            pack_type: PackingType::BodyCentered,
            origin: Vec3::ZERO,
            nx: 2,
            ny: 2,
            nz: 2,
            natural: false,
        };
        assert_eq!(packer.generate_positions(1).len(), 16);
    }

    #[test]
    fn boustrophedon_order_is_contiguous_across_a_row_boundary() {
        let last_of_row0 = locality_key(ChunkCoord { ix: 3, iy: 0 }, 4);
        let first_of_row1 = locality_key(ChunkCoord { ix: 3, iy: 1 }, 4);
        assert_eq!(first_of_row1 - last_of_row0, 1);
    }
}
