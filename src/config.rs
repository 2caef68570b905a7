//! Configuration - serde + toml, loaded by both binaries.
//!
//! A plain `serde::Deserialize` struct loaded from a `toml` file, with
//! `Default` covering every field so an empty or partial file still produces
//! a runnable config. Worker and controller are configured via file, not
//! command-line flags, aside from the config path itself.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::StoreError;

fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:7700".parse().unwrap()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./biosphere-data")
}

fn default_snapshot_every() -> u64 {
    300
}

fn default_record_every() -> u64 {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nx() -> i32 {
    4
}

fn default_ny() -> i32 {
    4
}

fn default_extent() -> (f32, f32, f32) {
    (1.0, 1.0, 4.0)
}

/// Gravity acceleration vector, default straight down.
fn default_gravity() -> (f32, f32, f32) {
    (0.0, 0.0, -1.0)
}

/// Worker process configuration: which address it listens on for RPC, where
/// it persists snapshots, how often it records/snapshots, and the topology
/// geometry it needs to derive a newly spawned chunk's walls and neighbor
/// ids from its chunk id alone.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub listen_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Ticks between durable snapshots.
    pub snapshot_every: u64,
    /// Ticks between lightweight state records used for the `ChunkSummary` RPC.
    pub record_every: u64,
    pub log_level: String,
    /// The biosphere's topology, duplicated here (rather than queried from
    /// the controller) so a worker can resume chunks on its own at startup.
    pub nx: i32,
    pub ny: i32,
    /// Per-chunk local coordinate extent, `(x, y, z)`.
    pub extent: (f32, f32, f32),
    pub gravity: (f32, f32, f32),
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            snapshot_every: default_snapshot_every(),
            record_every: default_record_every(),
            log_level: default_log_level(),
            nx: default_nx(),
            ny: default_ny(),
            extent: default_extent(),
            gravity: default_gravity(),
        }
    }
}

fn default_controller_listen_addr() -> SocketAddr {
    "127.0.0.1:7600".parse().unwrap()
}

fn default_tick_interval_secs() -> u64 {
    10
}

/// Controller process configuration: its own RPC listen address, the
/// topology it's maintaining, and how often it reconciles worker placement
/// against that topology.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub listen_addr: SocketAddr,
    pub biosphere_id: String,
    pub nx: i32,
    pub ny: i32,
    /// Seconds between `StatefulLoop` reconciliation passes.
    pub tick_interval_secs: u64,
    pub log_level: String,
    /// Per-chunk local coordinate extent, `(x, y, z)`, handed to every
    /// worker a chunk is spawned onto.
    pub extent: (f32, f32, f32),
    pub gravity: (f32, f32, f32),
    pub snapshot_every: u64,
    pub record_every: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_controller_listen_addr(),
            biosphere_id: "bs1".to_string(),
            nx: 4,
            ny: 4,
            tick_interval_secs: default_tick_interval_secs(),
            log_level: default_log_level(),
            extent: default_extent(),
            gravity: default_gravity(),
            snapshot_every: default_snapshot_every(),
            record_every: default_record_every(),
        }
    }
}

/// Loads a config from `path`, falling back to all-defaults if the file
/// doesn't exist. Environment overrides for `log_level` specifically are
/// handled by the binaries via `RUST_LOG`, per the `tracing-subscriber`
/// convention, rather than here.
pub fn load<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}
