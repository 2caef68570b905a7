//! Wire types - the over-the-network grain/packet encoding.
//!
//! A deliberately small serde-mirrored shadow of the domain `Grain`/`Kind`
//! types, so the solver's internal representation can change without
//! breaking the wire format and vice versa. Encoded as CBOR (`ciborium`) over
//! length-prefixed TCP frames in `rpc.rs`.

use serde::{Deserialize, Serialize};

use crate::grain::{CellProp, Gene, Grain, Kind};
use crate::ids::GrainId;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireGene {
    pub activators: Vec<String>,
    pub products: Vec<String>,
    pub activation: u32,
}

impl From<&Gene> for WireGene {
    fn from(g: &Gene) -> Self {
        Self { activators: g.activators.clone(), products: g.products.clone(), activation: g.activation }
    }
}

impl From<WireGene> for Gene {
    fn from(g: WireGene) -> Self {
        Gene { activators: g.activators, products: g.products, activation: g.activation }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireCellProp {
    pub energy: i32,
    pub is_dividing: bool,
    pub division_count: u32,
    pub quals: std::collections::HashMap<String, i32>,
    pub genome: Vec<WireGene>,
}

impl From<&CellProp> for WireCellProp {
    fn from(p: &CellProp) -> Self {
        Self {
            energy: p.energy,
            is_dividing: p.cycle.is_dividing,
            division_count: p.cycle.division_count,
            quals: p.quals.clone(),
            genome: p.genome.iter().map(WireGene::from).collect(),
        }
    }
}

impl From<WireCellProp> for CellProp {
    fn from(p: WireCellProp) -> Self {
        CellProp {
            energy: p.energy,
            cycle: crate::grain::DivisionCycle {
                is_dividing: p.is_dividing,
                division_count: p.division_count,
            },
            quals: p.quals,
            genome: p.genome.into_iter().map(Gene::from).collect(),
        }
    }
}

/// `kind` tag: 0 = water, 1 = soil, 2 = cell (with `cell_prop` present).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WireGrain {
    pub id: u64,
    pub kind: u8,
    pub pos: (f32, f32, f32),
    pub vel: (f32, f32, f32),
    pub cell_prop: Option<WireCellProp>,
}

impl From<&Grain> for WireGrain {
    fn from(g: &Grain) -> Self {
        let (kind, cell_prop) = match &g.kind {
            Kind::Water => (0, None),
            Kind::Soil => (1, None),
            Kind::Cell(p) => (2, Some(WireCellProp::from(p))),
        };
        WireGrain {
            id: g.id.0,
            kind,
            pos: (g.position.x, g.position.y, g.position.z),
            vel: (g.velocity.x, g.velocity.y, g.velocity.z),
            cell_prop,
        }
    }
}

impl TryFrom<WireGrain> for Grain {
    type Error = &'static str;

    fn try_from(w: WireGrain) -> Result<Self, Self::Error> {
        let kind = match (w.kind, w.cell_prop) {
            (0, _) => Kind::Water,
            (1, _) => Kind::Soil,
            (2, Some(prop)) => Kind::Cell(CellProp::from(prop)),
            (2, None) => return Err("cell grain missing cell_prop"),
            _ => return Err("unknown grain kind tag"),
        };
        let position = crate::vecmath::Vec3::new(w.pos.0, w.pos.1, w.pos.2);
        let velocity = crate::vecmath::Vec3::new(w.vel.0, w.vel.1, w.vel.2);
        Ok(Grain { id: GrainId(w.id), position, velocity, kind, scratch: position })
    }
}

/// One chunk's outgoing packet for a tick: who it's from, at what tick, the
/// originator's full grain list (its environment shadow, in the originator's
/// own local coordinates), and a map from destination chunk id to the grains
/// escaping to it, already expressed in that destination's coordinates.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NeighborExport {
    pub origin_chunk_id: String,
    pub timestamp: u64,
    pub chunk_grains: Vec<WireGrain>,
    pub escaped: std::collections::HashMap<String, Vec<WireGrain>>,
}

/// What a chunk receives back from the router before stepping: grains routed
/// in from neighbors this tick, plus a read-only environmental fringe used
/// only for constraint generation.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NeighborImport {
    pub incoming_grains: Vec<WireGrain>,
    pub env_grains: Vec<WireGrain>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grain::Grain;
    use crate::ids::GrainIdGen;
    use crate::vecmath::Vec3;

    #[test]
    fn water_grain_round_trips() {
        let mut gen = GrainIdGen::new(1);
        let grain = Grain::water(gen.next(), Vec3::new(1.0, 2.0, 3.0));
        let wire = WireGrain::from(&grain);
        let back = Grain::try_from(wire).unwrap();
        assert_eq!(back.id, grain.id);
        assert_eq!(back.position, grain.position);
        assert!(matches!(back.kind, Kind::Water));
    }

    #[test]
    fn cell_grain_carries_its_prop_through() {
        let mut gen = GrainIdGen::new(1);
        let grain = Grain::cell(gen.next(), Vec3::ZERO, 4000);
        let wire = WireGrain::from(&grain);
        let back = Grain::try_from(wire).unwrap();
        assert_eq!(back.kind.cell_prop().unwrap().energy, 4000);
    }

    #[test]
    fn cell_tag_without_prop_is_rejected() {
        let wire = WireGrain { id: 1, kind: 2, pos: (0.0, 0.0, 0.0), vel: (0.0, 0.0, 0.0), cell_prop: None };
        assert!(Grain::try_from(wire).is_err());
    }
}
