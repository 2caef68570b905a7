//! Worker lifecycle.
//!
//! A worker process owns some number of chunks, each run by its own task.
//! Each tick, a chunk's task waits for one `Export` packet from every
//! neighbor it expects to hear from (a chunk never steps ahead of its
//! neighbors' grain exchange), steps, then hands its own escaped grains to
//! the router to forward onward. Control messages from the router's
//! synchronized-snapshot protocol, and the one-shot quit signal, are
//! serviced as they arrive, interleaved with the neighbor wait.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::chunk::Chunk;
use crate::error::WorkerError;
use crate::router::{ChunkLocation, ChunkMessage, Router};
use crate::snapshot_store::SnapshotStore;
use crate::wire::{NeighborExport, WireGrain};

/// Bounded channel capacity for a chunk's inbound message queue.
pub const CHUNK_CHANNEL_CAPACITY: usize = 10;

/// One chunk's running task state.
pub struct ChunkTask {
    pub chunk_id: String,
    pub chunk: Chunk,
    /// `(dx, dy, neighbor_chunk_id)` for every non-wall neighbor, per
    /// `topology::CylinderTopology::neighbors`. This chunk expects exactly
    /// one `Export` per tick from each entry's chunk id, and routes its own
    /// escapees back out by looking up their `(dx, dy)` here.
    pub neighbors: Vec<(i32, i32, String)>,
    pub router: Arc<Router>,
    pub store: Arc<SnapshotStore>,
    pub snapshot_every: u64,
    /// Ticks between lightweight state records (grain/cell counts), logged
    /// via `tracing` rather than persisted - cheap enough to run far more
    /// often than a durable snapshot, and what backs the `ChunkSummary` RPC's
    /// picture of a chunk between snapshots.
    pub record_every: u64,
    rx: mpsc::Receiver<ChunkMessage>,
    quit: oneshot::Receiver<()>,
    /// Packets that arrived for a tick this chunk hasn't reached yet,
    /// replayed once it gets there.
    future_packets: Vec<NeighborExport>,
    /// A synchronized-snapshot request that named this chunk before it
    /// reached the requested `target` tick. Resolved the moment this chunk's
    /// own timestamp catches up to it - acking early would tell the router
    /// this chunk's state is in the snapshot when it hasn't actually reached
    /// that tick yet.
    pending_snapshot: Option<(u64, oneshot::Sender<()>)>,
}

impl ChunkTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chunk_id: String,
        chunk: Chunk,
        neighbors: Vec<(i32, i32, String)>,
        router: Arc<Router>,
        store: Arc<SnapshotStore>,
        snapshot_every: u64,
        record_every: u64,
    ) -> (Self, mpsc::Sender<ChunkMessage>, oneshot::Sender<()>) {
        let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let (quit_tx, quit_rx) = oneshot::channel();
        (
            Self {
                chunk_id,
                chunk,
                neighbors,
                router,
                store,
                snapshot_every,
                record_every,
                rx,
                quit: quit_rx,
                future_packets: Vec::new(),
                pending_snapshot: None,
            },
            tx,
            quit_tx,
        )
    }

    fn neighbor_ids(&self) -> impl Iterator<Item = &str> {
        self.neighbors.iter().map(|(_, _, id)| id.as_str())
    }

    fn neighbor_for_offset(&self, dx: i32, dy: i32) -> Option<&str> {
        self.neighbors.iter().find(|(ndx, ndy, _)| *ndx == dx && *ndy == dy).map(|(_, _, id)| id.as_str())
    }

    /// Registers this chunk with the router under its own channel, then
    /// sends an initial multicast (at the resume timestamp, with no escaped
    /// grains) to every neighbor so chunks that start up before their peers
    /// register aren't left waiting forever.
    pub async fn register(&self, self_tx: mpsc::Sender<ChunkMessage>) -> Result<(), WorkerError> {
        self.router
            .register_chunk(self.chunk_id.clone(), ChunkLocation::Local(self_tx))
            .await
            .map_err(WorkerError::from)?;
        let export = NeighborExport {
            origin_chunk_id: self.chunk_id.clone(),
            timestamp: self.chunk.timestamp,
            chunk_grains: self.chunk.grains.iter().map(WireGrain::from).collect(),
            escaped: HashMap::new(),
        };
        for neighbor in self.neighbor_ids() {
            self.router.multicast(neighbor, export.clone()).await;
        }
        Ok(())
    }

    /// Routes one freshly-arrived packet: older than the current tick is
    /// dropped with a warning, from the future is buffered, exactly at the
    /// current tick is accepted (keyed by `origin_chunk_id`, so a duplicate
    /// resend for the same tick simply overwrites - the biosphere tolerates
    /// duplicate `(origin, timestamp)` packets by design).
    fn accept_packet(&mut self, export: NeighborExport, by_origin: &mut HashMap<String, NeighborExport>) {
        use std::cmp::Ordering;
        match export.timestamp.cmp(&self.chunk.timestamp) {
            Ordering::Less => {
                warn!(
                    chunk_id = %self.chunk_id,
                    origin = %export.origin_chunk_id,
                    packet_ts = export.timestamp,
                    local_ts = self.chunk.timestamp,
                    "dropping stale packet"
                );
            }
            Ordering::Greater => self.future_packets.push(export),
            Ordering::Equal => {
                by_origin.insert(export.origin_chunk_id.clone(), export);
            }
        }
    }

    /// Services one `SnapshotAt(target, done)` request. If this chunk has
    /// already reached `target`, snapshots now and acks immediately; if it's
    /// still behind, the request is parked in `pending_snapshot` and resolved
    /// later by `check_pending_snapshot`, once a completed tick actually
    /// reaches that timestamp. A request for a tick this chunk has already
    /// passed can no longer be satisfied exactly - it's logged and acked so
    /// the router's snapshot attempt doesn't hang the whole cluster on one
    /// chunk's missed window.
    async fn handle_snapshot_at(&mut self, target: u64, done: oneshot::Sender<()>) -> Result<(), WorkerError> {
        use std::cmp::Ordering;
        match self.chunk.timestamp.cmp(&target) {
            Ordering::Equal => {
                self.snapshot().await?;
                let _ = done.send(());
            }
            Ordering::Less => {
                self.pending_snapshot = Some((target, done));
            }
            Ordering::Greater => {
                warn!(
                    chunk_id = %self.chunk_id,
                    target,
                    local_ts = self.chunk.timestamp,
                    "synchronized snapshot requested for a tick already passed"
                );
                let _ = done.send(());
            }
        }
        Ok(())
    }

    /// Fires a parked `pending_snapshot` request once this chunk's timestamp
    /// reaches its target, called after every completed tick.
    async fn check_pending_snapshot(&mut self) -> Result<(), WorkerError> {
        if let Some((target, _)) = &self.pending_snapshot {
            if self.chunk.timestamp == *target {
                let (_, done) = self.pending_snapshot.take().unwrap();
                self.snapshot().await?;
                let _ = done.send(());
            }
        }
        Ok(())
    }

    /// Waits for one packet from every neighbor at the current tick,
    /// interleaving control messages and the quit signal. Returns `None` if
    /// quit fired, or the router channel closed, before the wait completed.
    async fn collect_tick_packets(&mut self) -> Result<Option<HashMap<String, NeighborExport>>, WorkerError> {
        let mut by_origin: HashMap<String, NeighborExport> = HashMap::new();

        for buffered in std::mem::take(&mut self.future_packets) {
            self.accept_packet(buffered, &mut by_origin);
        }

        let wanted: Vec<String> = self.neighbor_ids().map(str::to_string).collect();
        while !wanted.iter().all(|id| by_origin.contains_key(id)) {
            tokio::select! {
                _ = &mut self.quit => {
                    info!(chunk_id = %self.chunk_id, "quit signal received, stopping");
                    return Ok(None);
                }
                msg = self.rx.recv() => match msg {
                    Some(ChunkMessage::Export(export)) => self.accept_packet(export, &mut by_origin),
                    Some(ChunkMessage::QueryTimestamp(reply)) => {
                        let _ = reply.send(self.chunk.timestamp);
                    }
                    Some(ChunkMessage::SnapshotAt(target, done)) => {
                        self.handle_snapshot_at(target, done).await?;
                    }
                    None => {
                        warn!(chunk_id = %self.chunk_id, "router channel closed, stopping");
                        return Ok(None);
                    }
                },
            }
        }

        Ok(Some(by_origin))
    }

    /// Runs one tick: waits for a packet from every neighbor, steps the
    /// chunk against the assembled incoming/shadow sets, periodically
    /// snapshots, then forwards escaped grains onward. Returns `false`
    /// (instead of running a tick) if the quit signal fired while waiting.
    pub async fn run_one_tick(&mut self) -> Result<bool, WorkerError> {
        let by_origin = match self.collect_tick_packets().await? {
            Some(packets) => packets,
            None => return Ok(false),
        };

        // Each neighbor's `chunk_grains` is its environment shadow for this
        // chunk; grains it routed to us live under our own id in `escaped`.
        let mut incoming = Vec::new();
        let mut env = Vec::new();
        for export in by_origin.into_values() {
            if let Some(mine) = export.escaped.get(&self.chunk_id) {
                incoming.extend(decode_grains(mine.clone()));
            }
            env.extend(decode_grains(export.chunk_grains));
        }

        let escaped = self.chunk.step(incoming, env)?;

        if self.snapshot_every > 0 && self.chunk.timestamp % self.snapshot_every == 0 {
            self.snapshot().await?;
        }
        self.check_pending_snapshot().await?;
        if self.record_every > 0 && self.chunk.timestamp % self.record_every == 0 {
            self.record();
        }

        let mut escaped_by_dest: HashMap<String, Vec<crate::grain::Grain>> = HashMap::new();
        for escapee in escaped {
            match self.neighbor_for_offset(escapee.dx, escapee.dy) {
                Some(dest) => escaped_by_dest.entry(dest.to_string()).or_default().push(escapee.grain),
                None => warn!(
                    chunk_id = %self.chunk_id,
                    dx = escapee.dx,
                    dy = escapee.dy,
                    grain_id = %escapee.grain.id,
                    "dropping grain escaping toward a walled direction"
                ),
            }
        }

        let export = NeighborExport {
            origin_chunk_id: self.chunk_id.clone(),
            timestamp: self.chunk.timestamp,
            chunk_grains: self.chunk.grains.iter().map(WireGrain::from).collect(),
            escaped: escaped_by_dest
                .into_iter()
                .map(|(dest, grains)| (dest, grains.iter().map(WireGrain::from).collect()))
                .collect(),
        };
        for neighbor in self.neighbor_ids() {
            self.router.multicast(neighbor, export.clone()).await;
        }

        Ok(true)
    }

    async fn snapshot(&self) -> Result<(), WorkerError> {
        self.store.add(&self.chunk_id, self.chunk.timestamp, &self.chunk.grains).map_err(WorkerError::from)?;
        info!(chunk_id = %self.chunk_id, timestamp = self.chunk.timestamp, "snapshot recorded");
        Ok(())
    }

    /// Emits a lightweight state record: grain and cell counts at the current
    /// tick, logged rather than persisted. Meant to run far more often than
    /// `snapshot_every` allows, for operators watching a chunk's population
    /// between durable snapshots.
    fn record(&self) {
        info!(
            chunk_id = %self.chunk_id,
            timestamp = self.chunk.timestamp,
            grain_count = self.chunk.grains.len(),
            cell_count = self.chunk.cell_count(),
            "chunk record"
        );
    }

    /// Runs ticks until quit fires or a tick returns a fatal error.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        while self.run_one_tick().await? {}
        Ok(())
    }
}

fn decode_grains(wire: Vec<WireGrain>) -> Vec<crate::grain::Grain> {
    wire.into_iter()
        .filter_map(|w| match crate::grain::Grain::try_from(w) {
            Ok(g) => Some(g),
            Err(e) => {
                warn!(error = e, "dropping malformed wire grain");
                None
            }
        })
        .collect()
}

/// Resumes a chunk from its most recent snapshot at or before `resume_before`
/// (or the latest one, if `None`), reconstructing a `Chunk` with an empty
/// source list (sources are a deploy-time concept, not persisted state -
/// see DESIGN.md).
pub fn resume_chunk(
    store: &SnapshotStore,
    chunk_id: &str,
    resume_before: Option<u64>,
    gravity: crate::vecmath::Vec3,
    wall: crate::solver::ChunkWall,
    bounds: crate::solver::Bounds,
    id_seed: u64,
) -> Result<Chunk, WorkerError> {
    let record = store.resume(chunk_id, resume_before).map_err(WorkerError::from)?;
    let grains = decode_grains(record.grains);
    Ok(Chunk::new(grains, record.timestamp, gravity, Vec::new(), wall, bounds, id_seed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::{Bounds, ChunkWall};
    use crate::vecmath::Vec3;

    fn bare_chunk(timestamp: u64) -> Chunk {
        Chunk::new(
            Vec::new(),
            timestamp,
            Vec3::new(0.0, 0.0, -9.8),
            Vec::new(),
            ChunkWall::default(),
            Bounds { min: Vec3::ZERO, max: Vec3::new(1.0, 1.0, 1.0) },
            1,
        )
    }

    fn new_task(timestamp: u64) -> (ChunkTask, mpsc::Sender<ChunkMessage>, oneshot::Sender<()>) {
        let router = Arc::new(Router::new());
        let store = Arc::new(SnapshotStore::new(
            std::env::temp_dir().join(format!("biosphere-worker-test-{}", std::process::id())),
        ));
        ChunkTask::new(
            "bs1-0:0".into(),
            bare_chunk(timestamp),
            vec![(1, 0, "bs1-1:0".into())],
            router,
            store,
            0,
            0,
        )
    }

    #[tokio::test]
    async fn tick_completes_once_every_neighbor_is_in_at_the_current_timestamp() {
        let (mut task, self_tx, _quit_tx) = new_task(0);
        task.register(self_tx.clone()).await.unwrap();

        self_tx
            .send(ChunkMessage::Export(NeighborExport {
                origin_chunk_id: "bs1-1:0".into(),
                timestamp: 0,
                chunk_grains: Vec::new(),
                escaped: HashMap::new(),
            }))
            .await
            .unwrap();

        let advanced = task.run_one_tick().await.unwrap();
        assert!(advanced);
        assert_eq!(task.chunk.timestamp, 1);
    }

    #[tokio::test]
    async fn stale_packet_is_dropped_and_does_not_satisfy_the_wait() {
        let (mut task, self_tx, _quit_tx) = new_task(5);
        task.register(self_tx.clone()).await.unwrap();

        let mut by_origin = HashMap::new();
        task.accept_packet(
            NeighborExport {
                origin_chunk_id: "bs1-1:0".into(),
                timestamp: 2,
                chunk_grains: Vec::new(),
                escaped: HashMap::new(),
            },
            &mut by_origin,
        );
        assert!(by_origin.is_empty());
    }

    #[tokio::test]
    async fn future_packet_is_buffered_and_replayed_later() {
        let (mut task, self_tx, _quit_tx) = new_task(0);
        task.register(self_tx.clone()).await.unwrap();

        let mut by_origin = HashMap::new();
        task.accept_packet(
            NeighborExport {
                origin_chunk_id: "bs1-1:0".into(),
                timestamp: 1,
                chunk_grains: Vec::new(),
                escaped: HashMap::new(),
            },
            &mut by_origin,
        );
        assert!(by_origin.is_empty());
        assert_eq!(task.future_packets.len(), 1);
    }

    #[tokio::test]
    async fn quit_signal_stops_the_tick_wait() {
        let (mut task, self_tx, quit_tx) = new_task(0);
        task.register(self_tx.clone()).await.unwrap();
        quit_tx.send(()).unwrap();

        let advanced = task.run_one_tick().await.unwrap();
        assert!(!advanced);
    }
}
