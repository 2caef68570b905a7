//! Error types - invariant violations and subsystem failures.
//!
//! An invariant violation (NaN/Inf, grain-count mismatch, a dynamic-friction
//! condition that would exceed relative velocity) halts the chunk with a
//! diagnostic rather than silently continuing, so the worker can log a
//! structured diagnostic and exit instead of panicking mid-tick.

use thiserror::Error;

use crate::ids::GrainId;

/// A fatal internal-invariant violation raised by the constraint solver or
/// chunk stepper. Carries enough state for the caller to log a diagnostic.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("non-finite position or velocity for grain {grain:?} at tick {tick} (phase: {phase})")]
    NonFinite { grain: GrainId, tick: u64, phase: &'static str },

    #[error(
        "dynamic friction condition breached for grains {a:?}/{b:?} at tick {tick}: f_t={f_t} >= |dv|={dv_len}"
    )]
    DynamicFrictionBreach { a: GrainId, b: GrainId, tick: u64, f_t: f32, dv_len: f32 },

    #[error("grain accounting mismatch at tick {tick}: expected {expected}, got {actual}")]
    GrainCountMismatch { tick: u64, expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no snapshot at or before timestamp {requested} for chunk {chunk_id}")]
    ResumePointMissing { chunk_id: String, requested: u64 },
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("chunk {0} is already registered")]
    AlreadyRunning(String),
    #[error("remote multicast to {0} failed: {1}")]
    RemoteSendFailed(String, String),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Router(#[from] RouterError),
    #[error("resume snapshot missing for chunk {0}, refusing to start")]
    ResumeMissing(String),
}
