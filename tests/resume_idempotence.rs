//! Resume idempotence: a biosphere run for 200 ticks with a snapshot
//! recorded at tick 100 must produce the same tick-200 state whether it ran
//! continuously or was "restarted" from that snapshot partway through - same
//! grain ids/kinds, positions within 1e-4.

use biosphere::chunk::Chunk;
use biosphere::grain::Grain;
use biosphere::ids::GrainId;
use biosphere::snapshot_store::temp_store;
use biosphere::solver::{Bounds, ChunkWall};
use biosphere::vecmath::Vec3;
use biosphere::worker::resume_chunk;

fn walled_bounds() -> Bounds {
    Bounds { min: Vec3::ZERO, max: Vec3::new(2.0, 2.0, 2.0) }
}

fn walled() -> ChunkWall {
    ChunkWall { x_minus: true, x_plus: true, y_minus: true, y_plus: true }
}

fn gravity() -> Vec3 {
    Vec3::new(0.0, 0.0, -1.0)
}

fn seed_grains() -> Vec<Grain> {
    vec![
        Grain::water(GrainId(1), Vec3::new(0.3, 0.3, 1.5)),
        Grain::water(GrainId(2), Vec3::new(0.35, 0.3, 1.4)),
        Grain::soil(GrainId(3), Vec3::new(1.0, 1.0, 1.2)),
        Grain::soil(GrainId(4), Vec3::new(1.05, 1.02, 1.1)),
        Grain::soil(GrainId(5), Vec3::new(0.9, 1.1, 0.8)),
    ]
}

fn snapshot_of(chunk: &Chunk) -> Vec<(GrainId, Vec3)> {
    let mut out: Vec<(GrainId, Vec3)> = chunk.grains.iter().map(|g| (g.id, g.position)).collect();
    out.sort_by_key(|(id, _)| id.0);
    out
}

#[test]
fn restarting_from_a_tick_100_snapshot_matches_a_continuous_run_at_tick_200() {
    let mut continuous = Chunk::new(seed_grains(), 0, gravity(), Vec::new(), walled(), walled_bounds(), 1);
    for _ in 0..200 {
        continuous.step(Vec::new(), Vec::new()).unwrap();
    }
    let continuous_final = snapshot_of(&continuous);

    let (store, dir) = temp_store("resume-idempotence");
    let mut first_half = Chunk::new(seed_grains(), 0, gravity(), Vec::new(), walled(), walled_bounds(), 1);
    for _ in 0..100 {
        first_half.step(Vec::new(), Vec::new()).unwrap();
    }
    store.add("bs1-0:0", first_half.timestamp, &first_half.grains).unwrap();
    assert_eq!(first_half.timestamp, 100);

    let mut resumed =
        resume_chunk(&store, "bs1-0:0", None, gravity(), walled(), walled_bounds(), 1).unwrap();
    assert_eq!(resumed.timestamp, 100);
    for _ in 0..100 {
        resumed.step(Vec::new(), Vec::new()).unwrap();
    }
    let resumed_final = snapshot_of(&resumed);

    assert_eq!(
        continuous_final.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        resumed_final.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
        "the same set of grain ids must survive both paths"
    );
    for ((id_a, pos_a), (id_b, pos_b)) in continuous_final.iter().zip(resumed_final.iter()) {
        assert_eq!(id_a, id_b);
        assert!(
            (pos_a.x - pos_b.x).abs() < 1e-4 && (pos_a.y - pos_b.y).abs() < 1e-4 && (pos_a.z - pos_b.z).abs() < 1e-4,
            "grain {id_a:?} diverged: continuous={pos_a:?} resumed={pos_b:?}"
        );
    }

    let _ = std::fs::remove_dir_all(&dir);
}
