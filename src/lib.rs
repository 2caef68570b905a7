//! Distributed biosphere grain simulation: per-chunk position-based-dynamics
//! physics plus the chunk coordinator that runs a biosphere of chunks in
//! lockstep across a pool of workers.
//!
//! Module map:
//!
//! - [`vecmath`]         - 3D vectors and the SPH kernels
//! - [`ids`]             - stable grain identity generation
//! - [`grain`]           - the grain record and its kind-specific state
//! - [`spatial_index`]   - uniform-grid neighbor lookup
//! - [`constraints`]     - PBD constraint generation
//! - [`solver`]          - the Gauss-Seidel constraint solver
//! - [`biochem`]         - gene activation, metabolism, division
//! - [`chunk`]           - the per-tick chunk stepper
//! - [`worker`]          - chunk task lifecycle within one worker process
//! - [`router`]          - neighbor routing and synchronized snapshots
//! - [`topology`]        - the rectangular-cylinder grid and env seeding
//! - [`controller`]      - biosphere-wide chunk-to-worker placement
//! - [`noise`]           - value noise used by production chunk seeding
//! - [`wire`]            - the over-the-network grain/packet encoding
//! - [`rpc`]             - length-prefixed CBOR framing for the worker RPC surface
//! - [`snapshot_store`]  - durable per-chunk snapshot persistence
//! - [`config`]          - worker/controller process configuration
//! - [`error`]           - typed error enums for every fallible subsystem

pub mod biochem;
pub mod chunk;
pub mod config;
pub mod constraints;
pub mod controller;
pub mod error;
pub mod grain;
pub mod ids;
pub mod noise;
pub mod router;
pub mod rpc;
pub mod snapshot_store;
pub mod solver;
pub mod spatial_index;
pub mod topology;
pub mod vecmath;
pub mod wire;
pub mod worker;

pub use chunk::Chunk;
pub use error::{ChunkError, RouterError, StoreError, WorkerError};
pub use grain::{Grain, Kind};
