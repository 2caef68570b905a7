//! Chunk orchestration.
//!
//! A `Chunk` owns one rectangular-cylinder cell's grains and ties together
//! source emission, biochemistry, and the constraint solver into a single
//! `step()`:
//!
//! 1. emit any due particle sources
//! 2. run biochemistry (gene activation, division, metabolism) on owned cells
//! 3. take ownership of the tick's incoming grains, then append the
//!    read-only environmental shadow tail
//! 4. integrate gravity, run the Gauss-Seidel solver, enforce bounds
//! 5. discard the shadow tail and classify which owned grains escaped

use crate::biochem::step_biochemistry;
use crate::constraints::consts::DT;
use crate::error::ChunkError;
use crate::grain::{Grain, Kind};
use crate::ids::{GrainId, GrainIdGen};
use crate::solver::{integrate_gravity, resolve_step, Bounds, ChunkWall};
use crate::vecmath::Vec3;

/// What kind of grain a `ParticleSource` mints. Cell sources carry the fixed
/// starting energy every grain they emit is given.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceKind {
    Water,
    Soil,
    Cell { energy: i32 },
}

/// A round-robin emitter cycling through a fixed set of spawn points, firing
/// one grain every `frames_per_particle` ticks until `total` have been
/// emitted.
#[derive(Clone, Debug)]
pub struct ParticleSource {
    pub kind: SourceKind,
    pub total: u32,
    pub frames_per_particle: u32,
    pub positions: Vec<Vec3>,
    emitted: u32,
}

impl ParticleSource {
    pub fn new(kind: SourceKind, total: u32, positions: Vec<Vec3>) -> Self {
        Self { kind, total, frames_per_particle: 4, positions, emitted: 0 }
    }

    pub fn water(total: u32, positions: Vec<Vec3>) -> Self {
        Self::new(SourceKind::Water, total, positions)
    }

    pub fn soil(total: u32, positions: Vec<Vec3>) -> Self {
        Self::new(SourceKind::Soil, total, positions)
    }

    pub fn cell(total: u32, energy: i32, positions: Vec<Vec3>) -> Self {
        Self::new(SourceKind::Cell { energy }, total, positions)
    }

    /// Emits a grain if this source is due to fire at `timestamp`, advancing
    /// its round-robin position cursor. Returns `None` once `total` grains
    /// have been emitted or the source has no spawn positions.
    pub fn maybe_emit(&mut self, timestamp: u64, id_gen: &mut GrainIdGen) -> Option<Grain> {
        if self.emitted >= self.total || self.positions.is_empty() {
            return None;
        }
        if timestamp % self.frames_per_particle as u64 != 0 {
            return None;
        }
        let pos = self.positions[(self.emitted as usize) % self.positions.len()];
        self.emitted += 1;
        let id = id_gen.next();
        Some(match self.kind {
            SourceKind::Water => Grain::water(id, pos),
            SourceKind::Soil => Grain::soil(id, pos),
            SourceKind::Cell { energy } => Grain::cell(id, pos, energy),
        })
    }
}

/// A grain that left the chunk's owned region this step, destined for the
/// neighbor chunk in direction `(dx, dy)`.
#[derive(Clone, Debug)]
pub struct EscapedGrain {
    pub dx: i32,
    pub dy: i32,
    pub grain: Grain,
}

/// One simulation cell: its own grains, its sources, and its wall/bounds
/// configuration. Shadow grains from neighbors are supplied fresh each tick
/// by the caller (`worker.rs`) and never persisted as part of the chunk's
/// own state.
pub struct Chunk {
    pub grains: Vec<Grain>,
    pub timestamp: u64,
    pub gravity: Vec3,
    pub sources: Vec<ParticleSource>,
    pub wall: ChunkWall,
    pub bounds: Bounds,
    id_gen: GrainIdGen,
}

impl Chunk {
    pub fn new(
        grains: Vec<Grain>,
        timestamp: u64,
        gravity: Vec3,
        sources: Vec<ParticleSource>,
        wall: ChunkWall,
        bounds: Bounds,
        id_seed: u64,
    ) -> Self {
        Self::with_id_gen(grains, timestamp, gravity, sources, wall, bounds, GrainIdGen::new(id_seed))
    }

    /// Like `new`, but takes an already-advanced id generator - for a chunk
    /// whose initial grains were minted by a seeding pass that needs to hand
    /// off its generator state rather than have the chunk restart the same
    /// id stream from scratch.
    #[allow(clippy::too_many_arguments)]
    pub fn with_id_gen(
        grains: Vec<Grain>,
        timestamp: u64,
        gravity: Vec3,
        sources: Vec<ParticleSource>,
        wall: ChunkWall,
        bounds: Bounds,
        id_gen: GrainIdGen,
    ) -> Self {
        Self { grains, timestamp, gravity, sources, wall, bounds, id_gen }
    }

    /// Runs one full tick: emission, biochemistry, takes ownership of
    /// `incoming` (grains the router handed back from neighbors, already
    /// shifted into this chunk's local coordinate frame), then resolves
    /// constraints against `env_grains` (a read-only environmental fringe
    /// used for constraint generation only, discarded at the end of the
    /// step). Returns the grains that crossed into a neighbor this tick, to
    /// be routed onward by the caller.
    pub fn step(&mut self, incoming: Vec<Grain>, env_grains: Vec<Grain>) -> Result<Vec<EscapedGrain>, ChunkError> {
        for mut source in std::mem::take(&mut self.sources) {
            if let Some(grain) = source.maybe_emit(self.timestamp, &mut self.id_gen) {
                self.grains.push(grain);
            }
            self.sources.push(source);
        }

        step_biochemistry(&mut self.grains, self.grains.len(), &mut self.id_gen);

        self.grains.extend(incoming);
        let owned_count = self.grains.len();
        self.grains.extend(env_grains);

        integrate_gravity(&mut self.grains[..owned_count], self.gravity);
        for grain in self.grains.iter_mut().skip(owned_count) {
            grain.scratch = grain.position;
        }

        resolve_step(&mut self.grains, owned_count, self.wall, self.bounds, self.timestamp)?;

        // Discard the shadow tail; `resolve_step` has already reflected
        // owned grains off walls/floor on every iteration plus the final
        // floor-less pass, and derived their position from the net scratch
        // delta, so nothing further needs enforcing here.
        self.grains.truncate(owned_count);

        let mut escaped = Vec::new();
        let mut kept = Vec::with_capacity(self.grains.len());
        for grain in self.grains.drain(..) {
            match self.escape_direction(&grain) {
                Some((dx, dy)) => escaped.push(EscapedGrain { dx, dy, grain }),
                None => kept.push(grain),
            }
        }
        self.grains = kept;

        self.timestamp += 1;
        Ok(escaped)
    }

    /// Determines whether `grain` has crossed outside `self.bounds` on a side
    /// that isn't a real wall, and if so which neighbor direction it went.
    fn escape_direction(&self, grain: &Grain) -> Option<(i32, i32)> {
        let mut dx = 0;
        let mut dy = 0;
        if !self.wall.x_minus && grain.position.x < self.bounds.min.x {
            dx = -1;
        } else if !self.wall.x_plus && grain.position.x > self.bounds.max.x {
            dx = 1;
        }
        if !self.wall.y_minus && grain.position.y < self.bounds.min.y {
            dy = -1;
        } else if !self.wall.y_plus && grain.position.y > self.bounds.max.y {
            dy = 1;
        }
        if dx == 0 && dy == 0 {
            None
        } else {
            Some((dx, dy))
        }
    }

    pub fn grain_ids(&self) -> impl Iterator<Item = GrainId> + '_ {
        self.grains.iter().map(|g| g.id)
    }

    pub fn cell_count(&self) -> usize {
        self.grains.iter().filter(|g| matches!(g.kind, Kind::Cell(_))).count()
    }
}
