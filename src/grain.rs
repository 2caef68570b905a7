//! Grain model.
//!
//! A grain is one particle: water, soil, or a living cell. Modeled as a
//! tagged sum (`Grain { id, pos, vel } x Kind`) rather than a record with a
//! nullable cell sub-record, so non-cell grains can never be caught holding
//! a half-initialized `CellProp` - see DESIGN.md (Open Question 1 / design
//! note on sum-variant grains).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::GrainId;
use crate::vecmath::Vec3;

/// A division-promoting qualifier name. Cells are seeded with one unit of it.
pub const ZD_QUALIFIER: &str = "zd";

/// A gene: activated by a product of `1 - 2^-qual[activator]` terms, and
/// once its accumulator reaches 1000 it bumps every product qualifier.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Gene {
    pub activators: Vec<String>,
    pub products: Vec<String>,
    /// Always in `[0, 1000)`.
    pub activation: u32,
}

impl Gene {
    pub fn new(activators: Vec<String>, products: Vec<String>) -> Self {
        Self { activators, products, activation: 0 }
    }
}

/// The dividing-cycle sub-state of a cell.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct DivisionCycle {
    pub is_dividing: bool,
    pub division_count: u32,
}

/// Auxiliary state carried only by `Kind::Cell` grains.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CellProp {
    pub energy: i32,
    pub cycle: DivisionCycle,
    /// Insertion order is irrelevant; qualifier presence/absence is what matters.
    pub quals: HashMap<String, i32>,
    pub genome: Vec<Gene>,
}

impl CellProp {
    /// A freshly constructed cell: `zd = 1`, not dividing, no genes yet.
    pub fn fresh(energy: i32) -> Self {
        let mut quals = HashMap::new();
        quals.insert(ZD_QUALIFIER.to_string(), 1);
        Self { energy, cycle: DivisionCycle::default(), quals, genome: Vec::new() }
    }

    /// A cell born from division: inherits the parent's genome verbatim but
    /// starts with no qualifiers at all (not even `zd`) and isn't dividing.
    fn newborn(energy: i32, genome: Vec<Gene>) -> Self {
        Self { energy, cycle: DivisionCycle::default(), quals: HashMap::new(), genome }
    }

    #[inline]
    pub fn qual(&self, name: &str) -> i32 {
        *self.quals.get(name).unwrap_or(&0)
    }

    #[inline]
    pub fn bump_qual(&mut self, name: &str, delta: i32) {
        *self.quals.entry(name.to_string()).or_insert(0) += delta;
    }

    /// Energy bounds: strictly positive while alive; removed at 0 or above
    /// 10000.
    #[inline]
    pub fn is_energy_in_bounds(&self) -> bool {
        self.energy > 0 && self.energy < 10000
    }
}

/// What kind of grain this is, plus its kind-specific state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Kind {
    Water,
    Soil,
    Cell(CellProp),
}

impl Kind {
    #[inline]
    pub fn is_water(&self) -> bool {
        matches!(self, Kind::Water)
    }

    #[inline]
    pub fn is_cell(&self) -> bool {
        matches!(self, Kind::Cell(_))
    }

    pub fn cell_prop(&self) -> Option<&CellProp> {
        match self {
            Kind::Cell(p) => Some(p),
            _ => None,
        }
    }

    pub fn cell_prop_mut(&mut self) -> Option<&mut CellProp> {
        match self {
            Kind::Cell(p) => Some(p),
            _ => None,
        }
    }

    /// Water-equivalent mass factor used by the SPH density constraint:
    /// water = 1, soil = 0.3, cell = 0.5.
    #[inline]
    pub fn water_equiv(&self) -> f32 {
        match self {
            Kind::Water => 1.0,
            Kind::Soil => 0.3,
            Kind::Cell(_) => 0.5,
        }
    }
}

/// One particle. `scratch` is the per-step working position; it is never
/// serialized and is only valid during a single `Chunk::step` call.
#[derive(Clone, Debug)]
pub struct Grain {
    pub id: GrainId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub kind: Kind,
    pub scratch: Vec3,
}

impl Grain {
    pub fn new(id: GrainId, kind: Kind, position: Vec3) -> Self {
        Self { id, position, velocity: Vec3::ZERO, kind, scratch: position }
    }

    pub fn water(id: GrainId, position: Vec3) -> Self {
        Self::new(id, Kind::Water, position)
    }

    pub fn soil(id: GrainId, position: Vec3) -> Self {
        Self::new(id, Kind::Soil, position)
    }

    pub fn cell(id: GrainId, position: Vec3, energy: i32) -> Self {
        Self::new(id, Kind::Cell(CellProp::fresh(energy)), position)
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }

    /// Clone this cell on division: the child is placed slightly behind the
    /// parent along the parent's velocity direction, with half the velocity,
    /// the parent's genome, and an empty qualifier map. Caller is responsible
    /// for halving the parent's (and thus the shared) energy and clearing the
    /// parent's own qualifiers *before* calling this - see DESIGN.md Open
    /// Question 1.
    pub fn spawn_child_cell(&self, child_id: GrainId, half_energy: i32, genome: Vec<Gene>) -> Grain {
        debug_assert!(self.kind.is_cell());
        let behind = self.velocity.normalized().scale(-0.02);
        let child_pos = self.position.add(behind);
        Grain {
            id: child_id,
            position: child_pos,
            velocity: self.velocity.scale(0.5),
            kind: Kind::Cell(CellProp::newborn(half_energy, genome)),
            scratch: child_pos,
        }
    }
}
