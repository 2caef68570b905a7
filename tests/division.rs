//! Cell division end-to-end: one CELL with `zd = 1`, initial energy 5000,
//! nonzero velocity. After enough ticks the population doubles to 2, with
//! both grains left holding an equal share of whatever energy the parent had
//! left once its division cycle ran out (metabolism keeps decrementing
//! energy every tick it's alive, so the split share trails the idealized
//! 2500 by the number of ticks actually elapsed).

use biosphere::chunk::Chunk;
use biosphere::grain::Grain;
use biosphere::ids::GrainId;
use biosphere::solver::{Bounds, ChunkWall};
use biosphere::vecmath::Vec3;

fn enclosed_bounds() -> Bounds {
    Bounds { min: Vec3::ZERO, max: Vec3::new(2.0, 2.0, 2.0) }
}

#[test]
fn one_moving_cell_with_zd_divides_into_two() {
    let mut cell = Grain::cell(GrainId(1), Vec3::new(1.0, 1.0, 1.0), 5000);
    cell.velocity = Vec3::new(0.05, 0.0, 0.0);
    assert_eq!(cell.kind.cell_prop().unwrap().qual(biosphere::grain::ZD_QUALIFIER), 1);

    let mut chunk = Chunk::new(
        vec![cell],
        0,
        Vec3::ZERO,
        Vec::new(),
        ChunkWall { x_minus: true, x_plus: true, y_minus: true, y_plus: true },
        enclosed_bounds(),
        1,
    );

    // One tick to arm the division cycle (zd > 0 starts it), then
    // DIVISION_CEILING (1000) further ticks of an always-moving cell before
    // the split fires; run comfortably past that.
    for _ in 0..1100 {
        chunk.step(Vec::new(), Vec::new()).unwrap();
        if chunk.cell_count() == 2 {
            break;
        }
    }

    assert_eq!(chunk.cell_count(), 2, "the cell should have divided by now");
    let energies: Vec<i32> =
        chunk.grains.iter().filter_map(|g| g.kind.cell_prop().map(|p| p.energy)).collect();
    assert_eq!(energies.len(), 2);
    assert_eq!(energies[0], energies[1], "both children split the parent's energy evenly");
    assert!(energies[0] > 0 && energies[0] < 5000, "child energy {} should be a fraction of the parent's 5000", energies[0]);

    let ids: std::collections::HashSet<GrainId> = chunk.grains.iter().map(|g| g.id).collect();
    assert_eq!(ids.len(), 2, "parent and child must carry distinct ids");
}
