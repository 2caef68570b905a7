//! Grain identity - stable 64-bit ids, generated per-worker.
//!
//! A plain xorshift64 PRNG, widened from the 32-bit variant commonly used for
//! dispersion jitter, hands out grain ids. Ids only need to be unique within
//! one running biosphere, not globally unguessable, so a cryptographic or
//! UUID generator would be the wrong tool for the job.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GrainId(pub u64);

impl std::fmt::Display for GrainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// xorshift64 generator used to mint fresh grain ids.
pub struct GrainIdGen {
    state: u64,
}

impl GrainIdGen {
    /// `seed` should differ per chunk (e.g. derived from the chunk id) so
    /// sibling chunks don't mint colliding ids for demo/test purposes.
    pub fn new(seed: u64) -> Self {
        Self { state: if seed == 0 { 0x9E3779B97F4A7C15 } else { seed } }
    }

    pub fn next(&mut self) -> GrainId {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        GrainId(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_nonzero_after_warmup() {
        let mut gen = GrainIdGen::new(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let id = gen.next();
            assert!(seen.insert(id), "duplicate id {id:?}");
        }
    }
}
