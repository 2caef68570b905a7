//! `biosphere-worker` - one process hosting some number of chunks, each
//! driven by its own `ChunkTask`.
//!
//! Listens on a single TCP port for the worker RPC surface: `SpawnChunk`,
//! `DeleteChunk`, `ChunkSummary`, `Snapshot`, `NotifyNeighbor`. One request
//! per connection, matching `rpc.rs`'s framing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info, warn};

use biosphere::chunk::Chunk;
use biosphere::config::{self, WorkerConfig};
use biosphere::error::{RouterError, StoreError, WorkerError};
use biosphere::noise::seed_chunk_grains;
use biosphere::rpc::{read_frame, write_frame, ChunkTopologyWire, WorkerRequest, WorkerResponse};
use biosphere::router::{ChunkLocation, Router};
use biosphere::snapshot_store::SnapshotStore;
use biosphere::solver::{Bounds, ChunkWall};
use biosphere::vecmath::Vec3;
use biosphere::worker::{self, ChunkTask};

/// A running chunk's handle, as seen by the RPC dispatcher: enough to tear it
/// down. Routing to it while it's alive goes through the `Router`, not this
/// struct - this only exists for `DeleteChunk`/idempotent-`SpawnChunk` checks.
struct ChunkHandle {
    quit_tx: Option<oneshot::Sender<()>>,
}

struct WorkerState {
    router: Arc<Router>,
    store: Arc<SnapshotStore>,
    chunks: Mutex<HashMap<String, ChunkHandle>>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let config_path =
        std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("biosphere-worker.toml"));
    let worker_config: WorkerConfig = config::load(&config_path)?;
    init_tracing(&worker_config.log_level);

    let listen_addr = std::env::var("BIOSPHERE_WORKER_ADDR")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(worker_config.listen_addr);

    let router = Arc::new(Router::new());
    let (_retry_shutdown_tx, retry_shutdown_rx) = oneshot::channel();
    router.clone().spawn_retry_loop(retry_shutdown_rx);

    let state = Arc::new(WorkerState {
        router,
        store: Arc::new(SnapshotStore::new(worker_config.data_dir.clone())),
        chunks: Mutex::new(HashMap::new()),
    });

    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, data_dir = %worker_config.data_dir.display(), "biosphere-worker listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                warn!(%peer, error = %e, "connection handling failed");
            }
        });
    }
}

fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_string()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn handle_connection(mut stream: TcpStream, state: Arc<WorkerState>) -> anyhow::Result<()> {
    let request: WorkerRequest = read_frame(&mut stream).await?;
    let response = dispatch(request, &state).await;
    write_frame(&mut stream, &response).await?;
    Ok(())
}

async fn dispatch(request: WorkerRequest, state: &WorkerState) -> WorkerResponse {
    match request {
        WorkerRequest::SpawnChunk { topology, snapshot_every, record_every, resume_before } => {
            match spawn_chunk(state, topology, snapshot_every, record_every, resume_before).await {
                Ok(()) => WorkerResponse::Ack,
                Err(e) => {
                    warn!(error = %e, "spawn_chunk failed");
                    WorkerResponse::Error { message: e.to_string() }
                }
            }
        }
        WorkerRequest::DeleteChunk { chunk_id } => {
            delete_chunk(state, &chunk_id).await;
            WorkerResponse::Ack
        }
        WorkerRequest::ChunkSummary => {
            let chunk_ids = state.chunks.lock().await.keys().cloned().collect();
            WorkerResponse::Summary { chunk_ids }
        }
        WorkerRequest::Snapshot { chunk_ids, deadline_ms } => snapshot(state, chunk_ids, deadline_ms).await,
        WorkerRequest::NotifyNeighbor { chunk_id, export } => {
            state.router.accept_from_peer(&chunk_id, export).await;
            WorkerResponse::Ack
        }
    }
}

/// Registers and starts a chunk's task. Idempotent: a chunk id already
/// running here is left alone and reported as a success, since the
/// controller may re-issue `SpawnChunk` for a chunk it already believes is
/// up (reconciliation passes are level-triggered).
async fn spawn_chunk(
    state: &WorkerState,
    topology: ChunkTopologyWire,
    snapshot_every: u64,
    record_every: u64,
    resume_before: Option<u64>,
) -> Result<(), WorkerError> {
    let chunk_id = topology.chunk_id.clone();
    if state.chunks.lock().await.contains_key(&chunk_id) {
        return Ok(());
    }

    let wall =
        ChunkWall { x_minus: topology.wall.0, x_plus: topology.wall.1, y_minus: topology.wall.2, y_plus: topology.wall.3 };
    let bounds = Bounds { min: Vec3::ZERO, max: Vec3::new(topology.extent.0, topology.extent.1, topology.extent.2) };
    let gravity = Vec3::new(topology.gravity.0, topology.gravity.1, topology.gravity.2);
    let id_seed = fnv1a(&chunk_id);

    let chunk = match worker::resume_chunk(&state.store, &chunk_id, resume_before, gravity, wall, bounds, id_seed) {
        Ok(chunk) => chunk,
        // Resuming a named start point with nothing to resume from is fatal;
        // a bare fresh start (no resume point named at all) seeds a brand
        // new chunk from its noise field instead.
        Err(WorkerError::Store(StoreError::ResumePointMissing { .. })) if resume_before.is_some() => {
            return Err(WorkerError::ResumeMissing(chunk_id));
        }
        Err(WorkerError::Store(StoreError::ResumePointMissing { .. })) => {
            let mut id_gen = biosphere::ids::GrainIdGen::new(id_seed);
            let extent = Vec3::new(topology.extent.0, topology.extent.1, topology.extent.2);
            let water_level = extent.z * 0.3;
            let grains = seed_chunk_grains(id_seed, extent, water_level, &mut id_gen);
            Chunk::with_id_gen(grains, 0, gravity, Vec::new(), wall, bounds, id_gen)
        }
        Err(e) => return Err(e),
    };

    for neighbor in &topology.neighbors {
        if let Some(addr) = neighbor.addr {
            if let Err(e) = state.router.register_chunk(neighbor.chunk_id.clone(), ChunkLocation::Remote(addr)).await
            {
                if !matches!(e, RouterError::AlreadyRunning(_)) {
                    return Err(WorkerError::from(e));
                }
            }
        }
    }

    let neighbor_ids: Vec<(i32, i32, String)> =
        topology.neighbors.iter().map(|n| (n.dx, n.dy, n.chunk_id.clone())).collect();

    let (mut task, self_tx, quit_tx) = ChunkTask::new(
        chunk_id.clone(),
        chunk,
        neighbor_ids,
        state.router.clone(),
        state.store.clone(),
        snapshot_every,
        record_every,
    );
    task.register(self_tx).await?;

    state.chunks.lock().await.insert(chunk_id.clone(), ChunkHandle { quit_tx: Some(quit_tx) });

    let task_chunk_id = chunk_id.clone();
    tokio::spawn(async move {
        if let Err(e) = task.run().await {
            error!(chunk_id = %task_chunk_id, error = %e, "chunk task halted");
        }
    });

    info!(chunk_id, "chunk spawned");
    Ok(())
}

async fn delete_chunk(state: &WorkerState, chunk_id: &str) {
    let handle = state.chunks.lock().await.remove(chunk_id);
    if let Some(mut handle) = handle {
        if let Some(quit_tx) = handle.quit_tx.take() {
            let _ = quit_tx.send(());
        }
    }
    state.router.delete_chunk(chunk_id).await;
    info!(chunk_id, "chunk deleted");
}

/// Implements the `Snapshot` RPC: asks the router to coordinate a
/// synchronized snapshot across the named chunks, then reads the resulting
/// records back out of the store. Returns an empty map if the deadline
/// elapsed.
async fn snapshot(state: &WorkerState, chunk_ids: Vec<String>, deadline_ms: u64) -> WorkerResponse {
    let deadline = Duration::from_millis(deadline_ms);
    match state.router.request_synchronized_snapshot(&chunk_ids, deadline).await {
        Some(target) => {
            let mut grains = HashMap::new();
            for chunk_id in &chunk_ids {
                if let Some(record) = state.store.get(chunk_id, target) {
                    grains.insert(chunk_id.clone(), record.grains);
                }
            }
            WorkerResponse::SnapshotData { timestamp: target, grains }
        }
        None => {
            warn!(?chunk_ids, deadline_ms, "synchronized snapshot deadline elapsed");
            WorkerResponse::SnapshotData { timestamp: 0, grains: HashMap::new() }
        }
    }
}

/// Deterministic, non-cryptographic FNV-1a hash of a chunk id, used to seed
/// that chunk's grain-id generator so restarts of the same chunk id produce
/// the same id stream for any newly created grain.
fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
