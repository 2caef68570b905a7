//! Router.
//!
//! Mediates escaped-grain delivery between chunks, whether they live in this
//! same worker process or a remote one, and coordinates whole-worker
//! synchronized snapshots. State is guarded by a single mutex; every
//! operation that can block on the network (a remote multicast, a retry)
//! collects what it needs under the lock and then does the actual I/O after
//! releasing it, so one slow peer never stalls another chunk's routing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::error::RouterError;
use crate::rpc::{read_frame, write_frame, WorkerRequest, WorkerResponse};
use crate::wire::NeighborExport;

/// A message delivered to a chunk's own task: either a data packet (escaped
/// grains arriving from a neighbor) or a control request from the router's
/// snapshot-coordination protocol.
pub enum ChunkMessage {
    Export(NeighborExport),
    QueryTimestamp(oneshot::Sender<u64>),
    SnapshotAt(u64, oneshot::Sender<()>),
}

/// Where a registered chunk actually lives.
#[derive(Clone)]
pub enum ChunkLocation {
    Local(mpsc::Sender<ChunkMessage>),
    Remote(SocketAddr),
}

/// A multicast that couldn't be delivered immediately and is retried on the
/// router's 1-second housekeeping tick. `Local` covers a full channel -
/// internal routing writes are non-blocking, treating a full neighbor
/// channel as a deferrable failure rather than something worth blocking the
/// sender chunk's own tick over; `Remote` covers a failed RPC send.
enum PendingTarget {
    Local(mpsc::Sender<ChunkMessage>),
    Remote(SocketAddr),
}

struct PendingSend {
    target_chunk: String,
    target: PendingTarget,
    export: NeighborExport,
    attempts: u32,
}

struct RouterState {
    chunks: HashMap<String, ChunkLocation>,
    pending: Vec<PendingSend>,
}

const MAX_RETRY_ATTEMPTS: u32 = 5;

pub struct Router {
    state: Mutex<RouterState>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self { state: Mutex::new(RouterState { chunks: HashMap::new(), pending: Vec::new() }) }
    }

    pub async fn register_chunk(&self, chunk_id: String, location: ChunkLocation) -> Result<(), RouterError> {
        let mut state = self.state.lock().await;
        if state.chunks.contains_key(&chunk_id) {
            return Err(RouterError::AlreadyRunning(chunk_id));
        }
        state.chunks.insert(chunk_id, location);
        Ok(())
    }

    pub async fn delete_chunk(&self, chunk_id: &str) {
        let mut state = self.state.lock().await;
        state.chunks.remove(chunk_id);
        state.pending.retain(|p| p.target_chunk != chunk_id);
    }

    /// Routes one chunk's escaped grains to `target_chunk`. Never fails
    /// outright: a closed local channel, an unregistered target, or a failed
    /// remote send all fall back to the pending-retry list instead of
    /// propagating an error to the caller's tick.
    pub async fn multicast(&self, target_chunk: &str, export: NeighborExport) {
        let location = {
            let state = self.state.lock().await;
            state.chunks.get(target_chunk).cloned()
        };
        match location {
            Some(ChunkLocation::Local(tx)) => match tx.try_send(ChunkMessage::Export(export.clone())) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(target_chunk, "local chunk channel full, queuing retry");
                    self.queue_retry(target_chunk, PendingTarget::Local(tx), export).await;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    warn!(target_chunk, "local chunk channel closed, dropping");
                }
            },
            Some(ChunkLocation::Remote(addr)) => {
                if let Err(e) = send_remote(addr, target_chunk, &export).await {
                    warn!(target_chunk, %addr, error = %e, "remote multicast failed, queuing retry");
                    self.queue_retry(target_chunk, PendingTarget::Remote(addr), export).await;
                }
            }
            None => {
                warn!(target_chunk, "multicast target not registered");
            }
        }
    }

    /// Routes a packet that arrived over the wire from a peer worker into
    /// the local destination chunk's channel. Identical to `multicast` once
    /// the target is known to be local - kept as its own entry point so the
    /// RPC handler reads clearly at the call site.
    pub async fn accept_from_peer(&self, target_chunk: &str, export: NeighborExport) {
        self.multicast(target_chunk, export).await;
    }

    async fn queue_retry(&self, target_chunk: &str, target: PendingTarget, export: NeighborExport) {
        let mut state = self.state.lock().await;
        state.pending.push(PendingSend { target_chunk: target_chunk.to_string(), target, export, attempts: 0 });
    }

    /// Drains and retries every pending send once. Meant to be driven by a
    /// 1-second tick from the worker's main loop. A local target retries via
    /// `try_send`, staying non-blocking the same way the original send was;
    /// a remote target retries the RPC.
    pub async fn drain_retries(&self) {
        let batch = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.pending)
        };
        if batch.is_empty() {
            return;
        }

        let mut still_pending = Vec::new();
        for mut item in batch {
            let outcome: Result<(), String> = match &item.target {
                PendingTarget::Local(tx) => match tx.try_send(ChunkMessage::Export(item.export.clone())) {
                    Ok(()) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(_)) => Err("channel still full".to_string()),
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        error!(target_chunk = %item.target_chunk, "local chunk channel closed, dropping retry");
                        continue;
                    }
                },
                PendingTarget::Remote(addr) => {
                    send_remote(*addr, &item.target_chunk, &item.export).await.map_err(|e| e.to_string())
                }
            };
            match outcome {
                Ok(()) => info!(target_chunk = %item.target_chunk, "retry succeeded"),
                Err(e) => {
                    item.attempts += 1;
                    if item.attempts < MAX_RETRY_ATTEMPTS {
                        warn!(
                            target_chunk = %item.target_chunk,
                            attempts = item.attempts,
                            error = %e,
                            "retry failed, requeuing"
                        );
                        still_pending.push(item);
                    } else {
                        error!(target_chunk = %item.target_chunk, "dropping escaped grains, retries exhausted");
                    }
                }
            }
        }

        if !still_pending.is_empty() {
            let mut state = self.state.lock().await;
            state.pending.append(&mut still_pending);
        }
    }

    /// Spawns a background task draining pending retries once a second until
    /// `shutdown` resolves.
    pub fn spawn_retry_loop(self: Arc<Self>, mut shutdown: oneshot::Receiver<()>) {
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.drain_retries().await,
                    _ = &mut shutdown => break,
                }
            }
        });
    }

    /// Coordinates a consistent snapshot across the named (locally-hosted)
    /// chunks: first asks each its current timestamp (phase 1), then asks
    /// every one of them to record its state once it reaches
    /// `target = max(collected) + 1` (phase 2). The two-phase shape avoids
    /// asking a chunk to snapshot a tick it has already advanced past by the
    /// time the router gets around to asking. If `deadline` elapses at any
    /// point, returns `None` rather than the computed target - the caller
    /// should treat that the same as an empty snapshot. Chunk ids not hosted
    /// locally by this router are silently skipped; this protocol requires
    /// the whole named set to be actively running.
    pub async fn request_synchronized_snapshot(
        &self,
        chunk_ids: &[String],
        deadline: Duration,
    ) -> Option<u64> {
        tokio::time::timeout(deadline, self.run_synchronized_snapshot(chunk_ids)).await.ok().flatten()
    }

    async fn run_synchronized_snapshot(&self, chunk_ids: &[String]) -> Option<u64> {
        let chunks: Vec<(String, mpsc::Sender<ChunkMessage>)> = {
            let state = self.state.lock().await;
            chunk_ids
                .iter()
                .filter_map(|id| match state.chunks.get(id) {
                    Some(ChunkLocation::Local(tx)) => Some((id.clone(), tx.clone())),
                    _ => None,
                })
                .collect()
        };
        if chunks.is_empty() {
            return None;
        }

        let mut max_ts = 0u64;
        for (_, tx) in &chunks {
            let (reply_tx, reply_rx) = oneshot::channel();
            tx.send(ChunkMessage::QueryTimestamp(reply_tx)).await.ok()?;
            max_ts = max_ts.max(reply_rx.await.ok()?);
        }

        let target = max_ts + 1;
        for (_, tx) in &chunks {
            let (done_tx, done_rx) = oneshot::channel();
            tx.send(ChunkMessage::SnapshotAt(target, done_tx)).await.ok()?;
            done_rx.await.ok()?;
        }

        Some(target)
    }

    pub async fn registered_chunk_ids(&self) -> Vec<String> {
        self.state.lock().await.chunks.keys().cloned().collect()
    }
}

async fn send_remote(addr: SocketAddr, target_chunk: &str, export: &NeighborExport) -> Result<(), RouterError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| RouterError::RemoteSendFailed(target_chunk.to_string(), e.to_string()))?;
    let request =
        WorkerRequest::NotifyNeighbor { chunk_id: target_chunk.to_string(), export: export.clone() };
    write_frame(&mut stream, &request)
        .await
        .map_err(|e| RouterError::RemoteSendFailed(target_chunk.to_string(), e.to_string()))?;
    let _response: WorkerResponse = read_frame(&mut stream)
        .await
        .map_err(|e| RouterError::RemoteSendFailed(target_chunk.to_string(), e.to_string()))?;
    Ok(())
}
