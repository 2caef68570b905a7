//! Controller.
//!
//! Assigns chunks to a fixed pool of workers using the topology's locality
//! hash, then reconciles that assignment against what's actually running: on
//! each `tick_interval_secs` pass it asks every worker for its chunk summary
//! and issues `SpawnChunk`/`DeleteChunk` to close the gap. Node provisioning
//! and autoscaling is explicitly out of scope here - this only places chunks
//! onto an already-running worker pool.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::rpc::{read_frame, write_frame, ChunkTopologyWire, NeighborDescriptor, WorkerRequest, WorkerResponse};
use crate::topology::{locality_key, ChunkCoord, CylinderTopology};

/// A fixed pool of already-running worker processes, addressed by their RPC
/// listen address. Provisioning workers themselves is out of scope.
#[derive(Clone, Debug)]
pub struct WorkerPool {
    pub workers: Vec<SocketAddr>,
}

impl WorkerPool {
    /// Assigns every chunk in `topology` to a worker by boustrophedon
    /// locality order, striping contiguous ranges of that order across the
    /// pool so neighboring chunks tend to land on the same or an adjacent
    /// worker.
    pub fn assign(&self, topology: &CylinderTopology) -> HashMap<ChunkCoord, SocketAddr> {
        if self.workers.is_empty() {
            return HashMap::new();
        }
        let mut coords: Vec<ChunkCoord> = topology.chunks().collect();
        coords.sort_by_key(|c| locality_key(*c, topology.nx));

        let per_worker = (coords.len() + self.workers.len() - 1) / self.workers.len().max(1);
        let mut assignment = HashMap::with_capacity(coords.len());
        for (i, coord) in coords.into_iter().enumerate() {
            let worker_ix = (i / per_worker.max(1)).min(self.workers.len() - 1);
            assignment.insert(coord, self.workers[worker_ix]);
        }
        assignment
    }

    /// Collapses the neighbor set of `coord` down to only those neighbors
    /// hosted on a *different* worker than `coord` itself: same-worker
    /// neighbor exchange is an in-process channel send, not an RPC, so the
    /// controller never needs to hand the worker a locator for it.
    pub fn cross_worker_neighbors(
        &self,
        coord: ChunkCoord,
        topology: &CylinderTopology,
        assignment: &HashMap<ChunkCoord, SocketAddr>,
    ) -> Vec<(ChunkCoord, SocketAddr)> {
        let own_addr = assignment.get(&coord).copied();
        topology
            .neighbors(coord)
            .into_iter()
            .filter_map(|(_, _, neighbor)| {
                let addr = assignment.get(&neighbor).copied()?;
                if Some(addr) != own_addr {
                    Some((neighbor, addr))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Queries a worker for the chunk ids it currently has running.
pub async fn chunk_summary(addr: SocketAddr) -> Result<Vec<String>, crate::rpc::RpcError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, &WorkerRequest::ChunkSummary).await?;
    let response: WorkerResponse = read_frame(&mut stream).await?;
    match response {
        WorkerResponse::Summary { chunk_ids } => Ok(chunk_ids),
        other => {
            warn!(?other, "unexpected response to ChunkSummary");
            Ok(Vec::new())
        }
    }
}

/// Builds the wire topology record `coord` needs to start: its neighbor set
/// (each carrying `Some(addr)` when hosted by a different worker, `None`
/// when co-located), its wall configuration, and the biosphere's per-chunk
/// extent/gravity.
pub fn topology_for(
    coord: ChunkCoord,
    topology: &CylinderTopology,
    assignment: &HashMap<ChunkCoord, SocketAddr>,
    biosphere_id: &str,
    extent: (f32, f32, f32),
    gravity: (f32, f32, f32),
) -> ChunkTopologyWire {
    let own_addr = assignment.get(&coord).copied();
    let wall = topology.wall_for(coord);
    let neighbors = topology
        .neighbors(coord)
        .into_iter()
        .map(|(dx, dy, neighbor)| {
            let addr = assignment.get(&neighbor).copied();
            let is_remote = addr.is_some() && addr != own_addr;
            NeighborDescriptor {
                dx,
                dy,
                chunk_id: neighbor.chunk_id(biosphere_id),
                addr: if is_remote { addr } else { None },
            }
        })
        .collect();
    ChunkTopologyWire {
        chunk_id: coord.chunk_id(biosphere_id),
        neighbors,
        wall: (wall.x_minus, wall.x_plus, wall.y_minus, wall.y_plus),
        extent,
        gravity,
    }
}

/// Tells a worker to spawn (or resume) a chunk, handing it the full
/// topology record it needs to route neighbor exchange on its own.
pub async fn spawn_chunk(
    addr: SocketAddr,
    topology: ChunkTopologyWire,
    snapshot_every: u64,
    record_every: u64,
    resume_before: Option<u64>,
) -> Result<(), crate::rpc::RpcError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(
        &mut stream,
        &WorkerRequest::SpawnChunk { topology, snapshot_every, record_every, resume_before },
    )
    .await?;
    let _response: WorkerResponse = read_frame(&mut stream).await?;
    Ok(())
}

/// Tells a worker to stop and tear down a chunk.
pub async fn delete_chunk(addr: SocketAddr, chunk_id: &str) -> Result<(), crate::rpc::RpcError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, &WorkerRequest::DeleteChunk { chunk_id: chunk_id.to_string() }).await?;
    let _response: WorkerResponse = read_frame(&mut stream).await?;
    Ok(())
}

/// Requests a synchronized snapshot of `chunk_ids` from `addr`. Returns an
/// empty map if the worker's deadline elapsed before every named chunk
/// reported in.
pub async fn request_snapshot(
    addr: SocketAddr,
    chunk_ids: Vec<String>,
    deadline_ms: u64,
) -> Result<HashMap<String, Vec<crate::wire::WireGrain>>, crate::rpc::RpcError> {
    let mut stream = TcpStream::connect(addr).await?;
    write_frame(&mut stream, &WorkerRequest::Snapshot { chunk_ids, deadline_ms }).await?;
    let response: WorkerResponse = read_frame(&mut stream).await?;
    match response {
        WorkerResponse::SnapshotData { grains, .. } => Ok(grains),
        other => {
            warn!(?other, "unexpected response to Snapshot");
            Ok(HashMap::new())
        }
    }
}

/// The biosphere-wide settings every chunk's topology record is derived
/// from; distinct from `WorkerPool`, which is purely about worker placement.
#[derive(Clone, Copy, Debug)]
pub struct BiosphereSettings {
    pub extent: (f32, f32, f32),
    pub gravity: (f32, f32, f32),
    pub snapshot_every: u64,
    pub record_every: u64,
}

/// One reconciliation pass: compares the desired assignment against each
/// worker's actual chunk summary and issues spawn/delete calls to close the
/// gap. Errors talking to one worker are logged and skipped rather than
/// aborting the whole pass, so one unreachable worker doesn't block
/// reconciling the rest of the pool.
pub async fn apply_delta(
    pool: &WorkerPool,
    topology: &CylinderTopology,
    biosphere_id: &str,
    settings: &BiosphereSettings,
) {
    let assignment = pool.assign(topology);

    let mut desired_by_worker: HashMap<SocketAddr, Vec<(ChunkCoord, String)>> = HashMap::new();
    for (coord, addr) in &assignment {
        desired_by_worker.entry(*addr).or_default().push((*coord, coord.chunk_id(biosphere_id)));
    }

    for addr in &pool.workers {
        let desired = desired_by_worker.remove(addr).unwrap_or_default();
        let actual = match chunk_summary(*addr).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(%addr, error = %e, "skipping unreachable worker this pass");
                continue;
            }
        };

        for (coord, chunk_id) in &desired {
            if !actual.contains(chunk_id) {
                info!(%addr, chunk_id, "spawning chunk");
                let wire = topology_for(*coord, topology, &assignment, biosphere_id, settings.extent, settings.gravity);
                if let Err(e) =
                    spawn_chunk(*addr, wire, settings.snapshot_every, settings.record_every, None).await
                {
                    warn!(%addr, chunk_id, error = %e, "spawn failed");
                }
            }
        }
        let desired_ids: Vec<&String> = desired.iter().map(|(_, id)| id).collect();
        for chunk_id in &actual {
            if !desired_ids.iter().any(|id| *id == chunk_id) {
                info!(%addr, chunk_id, "deleting stale chunk");
                if let Err(e) = delete_chunk(*addr, chunk_id).await {
                    warn!(%addr, chunk_id, error = %e, "delete failed");
                }
            }
        }
    }
}
