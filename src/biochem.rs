//! Biochemistry.
//!
//! Per-tick gene activation and the cell division cycle. Each cell's genome
//! is a list of `Gene { activators, products, activation }`; every tick each
//! gene accumulates `p = product(1 - 2^-qual[activator])` of its current
//! activation chance (the empty product, for a gene with no activators, is
//! 1 - such a gene fires every tick), and once the accumulator crosses 1000
//! every product qualifier is bumped and the accumulator resets to 0.
//! Division is driven by the `zd` qualifier and a free-running tick counter
//! on the cell's cycle.

use crate::grain::{Grain, Kind, ZD_QUALIFIER};
use crate::ids::GrainIdGen;

/// Gene activation accumulator ceiling; crossing it fires the gene's products.
const ACTIVATION_CEILING: u32 = 1000;

/// Division-cycle tick count at which a sufficiently energized, moving cell splits.
const DIVISION_CEILING: u32 = 1000;

/// Runs one tick of gene activation for a single cell. Each gene's activation
/// chance is the product of `1 - 2^-qual[activator]` over its activators - an
/// empty activator list gives the empty product, 1, so such a gene fires
/// every tick; once a gene's accumulator reaches `ACTIVATION_CEILING` every
/// product qualifier is bumped by one and the accumulator resets to 0.
pub fn activate_genes(prop: &mut crate::grain::CellProp) {
    let mut bumps: Vec<String> = Vec::new();

    for gene in prop.genome.iter_mut() {
        let mut chance = 1.0_f32;
        for activator in &gene.activators {
            let qual = prop.quals.get(activator).copied().unwrap_or(0);
            chance *= 1.0 - 2.0_f32.powi(-qual);
        }
        gene.activation += (chance * ACTIVATION_CEILING as f32) as u32;
        if gene.activation >= ACTIVATION_CEILING {
            gene.activation = 0;
            bumps.extend(gene.products.iter().cloned());
        }
    }

    for product in bumps {
        prop.bump_qual(&product, 1);
    }
}

/// Outcome of stepping one cell's division cycle.
pub enum DivisionOutcome {
    /// Nothing happened this tick.
    None,
    /// The cell split; `child` is the newly spawned grain (already given a
    /// fresh id and half the parent's energy). The parent (`grains[ix]`) has
    /// already had its own energy halved and its cycle reset in place.
    Divided(Grain),
}

/// Advances one cell's division cycle by a tick. A cell with `zd > 0` starts
/// (or continues) dividing; once its cycle has run for `DIVISION_CEILING`
/// ticks and it's actually moving, it splits into two: the parent's energy is
/// halved and its qualifier map is emptied, and the child is spawned with the
/// other half and an equally empty qualifier map - see DESIGN.md Open
/// Question 1 for why halving happens before `spawn_child_cell` is called,
/// not after.
pub fn step_division(grain: &mut Grain, id_gen: &mut GrainIdGen) -> DivisionOutcome {
    let velocity = grain.velocity;
    let prop = match grain.kind.cell_prop_mut() {
        Some(p) => p,
        None => return DivisionOutcome::None,
    };

    if !prop.cycle.is_dividing {
        if prop.qual(ZD_QUALIFIER) > 0 {
            prop.cycle.is_dividing = true;
            prop.cycle.division_count = 0;
        }
        return DivisionOutcome::None;
    }

    prop.cycle.division_count += 1;
    if prop.cycle.division_count <= DIVISION_CEILING || velocity.length_sq() <= 0.0 {
        return DivisionOutcome::None;
    }

    let half_energy = prop.energy / 2;
    prop.energy = half_energy;
    prop.cycle.is_dividing = false;
    prop.cycle.division_count = 0;
    let genome = prop.genome.clone();
    prop.quals.clear();

    let child = grain.spawn_child_cell(id_gen.next(), half_energy, genome);
    DivisionOutcome::Divided(child)
}

/// Cell energy decays by one unit of metabolic cost per tick; a cell whose
/// energy leaves `[1, 9999]` is no longer viable and should be removed by the
/// caller.
pub fn step_metabolism(prop: &mut crate::grain::CellProp) {
    prop.energy -= 1;
}

/// Runs gene activation, the division cycle, and finally metabolism for
/// every cell grain in `grains[0..owned_count]` - in that order, so a cell
/// that divides this tick halves the energy it had *before* this tick's
/// upkeep cost is charged. Newly spawned children are appended to `grains`;
/// grains whose energy has left its viable bounds are dropped. Returns the
/// number of grains removed this tick, for accounting.
pub fn step_biochemistry(grains: &mut Vec<Grain>, owned_count: usize, id_gen: &mut GrainIdGen) -> usize {
    let mut children = Vec::new();
    let mut doomed = Vec::new();

    for ix in 0..owned_count {
        if !grains[ix].kind.is_cell() {
            continue;
        }

        if let Some(prop) = grains[ix].kind.cell_prop_mut() {
            activate_genes(prop);
        }

        if let DivisionOutcome::Divided(child) = step_division(&mut grains[ix], id_gen) {
            children.push(child);
        }

        if let Some(prop) = grains[ix].kind.cell_prop_mut() {
            step_metabolism(prop);
        }

        if let Kind::Cell(prop) = &grains[ix].kind {
            if !prop.is_energy_in_bounds() {
                doomed.push(ix);
            }
        }
    }

    let removed = doomed.len();
    for ix in doomed.into_iter().rev() {
        grains.remove(ix);
    }
    grains.extend(children);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grain::Gene;
    use crate::ids::GrainIdGen;
    use crate::vecmath::Vec3;

    #[test]
    fn gene_with_no_activators_fires_every_tick() {
        let mut prop = crate::grain::CellProp::fresh(100);
        prop.genome.push(Gene::new(vec![], vec!["x".into()]));
        activate_genes(&mut prop);
        assert_eq!(prop.qual("x"), 1);
        activate_genes(&mut prop);
        assert_eq!(prop.qual("x"), 2);
    }

    #[test]
    fn fully_activated_qualifier_fires_gene_every_tick() {
        let mut prop = crate::grain::CellProp::fresh(100);
        prop.quals.insert("a".into(), 30);
        prop.genome.push(Gene::new(vec!["a".into()], vec!["b".into()]));
        activate_genes(&mut prop);
        assert_eq!(prop.qual("b"), 1);
    }

    #[test]
    fn metabolism_decrements_energy() {
        let mut prop = crate::grain::CellProp::fresh(100);
        step_metabolism(&mut prop);
        assert_eq!(prop.energy, 99);
    }

    #[test]
    fn zd_qualifier_starts_division_cycle() {
        let mut gen = GrainIdGen::new(1);
        let mut cell = Grain::cell(gen.next(), Vec3::new(0.0, 0.0, 0.0), 5000);
        let mut id_gen = GrainIdGen::new(2);
        let outcome = step_division(&mut cell, &mut id_gen);
        assert!(matches!(outcome, DivisionOutcome::None));
        assert!(cell.kind.cell_prop().unwrap().cycle.is_dividing);
    }

    #[test]
    fn stationary_dividing_cell_does_not_split() {
        let mut gen = GrainIdGen::new(1);
        let mut cell = Grain::cell(gen.next(), Vec3::new(0.0, 0.0, 0.0), 5000);
        cell.kind.cell_prop_mut().unwrap().cycle.is_dividing = true;
        cell.kind.cell_prop_mut().unwrap().cycle.division_count = DIVISION_CEILING + 1;
        let mut id_gen = GrainIdGen::new(2);
        let outcome = step_division(&mut cell, &mut id_gen);
        assert!(matches!(outcome, DivisionOutcome::None));
    }

    #[test]
    fn moving_ripe_cell_splits_with_halved_energy() {
        let mut gen = GrainIdGen::new(1);
        let mut cell = Grain::cell(gen.next(), Vec3::new(0.0, 0.0, 0.0), 4000);
        cell.velocity = Vec3::new(1.0, 0.0, 0.0);
        cell.kind.cell_prop_mut().unwrap().cycle.is_dividing = true;
        cell.kind.cell_prop_mut().unwrap().cycle.division_count = DIVISION_CEILING + 1;
        let mut id_gen = GrainIdGen::new(2);
        match step_division(&mut cell, &mut id_gen) {
            DivisionOutcome::Divided(child) => {
                assert_eq!(cell.kind.cell_prop().unwrap().energy, 2000);
                assert_eq!(child.kind.cell_prop().unwrap().energy, 2000);
                assert_ne!(child.id, cell.id);
            }
            DivisionOutcome::None => panic!("expected division"),
        }
    }

    #[test]
    fn division_empties_both_qualifier_maps_but_keeps_the_genome() {
        let mut gen = GrainIdGen::new(1);
        let mut cell = Grain::cell(gen.next(), Vec3::new(0.0, 0.0, 0.0), 4000);
        cell.velocity = Vec3::new(1.0, 0.0, 0.0);
        {
            let prop = cell.kind.cell_prop_mut().unwrap();
            prop.genome.push(Gene::new(vec!["a".into()], vec!["b".into()]));
            prop.bump_qual("a", 5);
            prop.cycle.is_dividing = true;
            prop.cycle.division_count = DIVISION_CEILING + 1;
        }
        let mut id_gen = GrainIdGen::new(2);
        match step_division(&mut cell, &mut id_gen) {
            DivisionOutcome::Divided(child) => {
                let parent_prop = cell.kind.cell_prop().unwrap();
                let child_prop = child.kind.cell_prop().unwrap();
                assert!(parent_prop.quals.is_empty());
                assert!(child_prop.quals.is_empty());
                assert_eq!(parent_prop.genome.len(), 1);
                assert_eq!(child_prop.genome.len(), 1);
            }
            DivisionOutcome::None => panic!("expected division"),
        }
    }
}
