//! `biosphered` - the controller process.
//!
//! Holds the intended topology/worker-pool state for one biosphere and, on a
//! fixed cadence, reconciles it against what's actually running on each
//! worker: asks for a `ChunkSummary`, then issues `SpawnChunk`/`DeleteChunk`
//! to close the gap. Worker provisioning and autoscaling are out of scope -
//! the pool here is a fixed, configured list of addresses.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use biosphere::config::{self, ControllerConfig};
use biosphere::controller::{apply_delta, BiosphereSettings, WorkerPool};
use biosphere::topology::CylinderTopology;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("biosphered.toml"));
    let controller_config: ControllerConfig = config::load(&config_path)?;
    init_tracing(&controller_config.log_level);

    let workers = worker_pool_from_env();
    if workers.workers.is_empty() {
        anyhow::bail!(
            "no workers configured - set BIOSPHERE_WORKERS to a comma-separated list of worker RPC addresses"
        );
    }

    let topology = CylinderTopology::new(controller_config.nx, controller_config.ny);
    let settings = BiosphereSettings {
        extent: controller_config.extent,
        gravity: controller_config.gravity,
        snapshot_every: controller_config.snapshot_every,
        record_every: controller_config.record_every,
    };

    info!(
        biosphere_id = %controller_config.biosphere_id,
        nx = controller_config.nx,
        ny = controller_config.ny,
        workers = workers.workers.len(),
        "biosphered starting reconciliation loop"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(controller_config.tick_interval_secs.max(1)));
    loop {
        ticker.tick().await;
        apply_delta(&workers, &topology, &controller_config.biosphere_id, &settings).await;
    }
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Reads the fixed worker pool from `BIOSPHERE_WORKERS` (comma-separated
/// `host:port` entries). Provisioning workers is out of scope; this is the
/// simplest interface that lets an operator point the controller at an
/// already-running pool.
fn worker_pool_from_env() -> WorkerPool {
    let workers = std::env::var("BIOSPHERE_WORKERS")
        .unwrap_or_default()
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|s| s.trim().parse::<SocketAddr>().ok())
        .collect();
    WorkerPool { workers }
}
