//! Snapshot persistence - resume and crash recovery.
//!
//! A chunk's state (its grains, timestamp, and sources) is periodically
//! recorded keyed by `(chunk_id, timestamp)`. On worker restart, resume
//! fetches the snapshot with the largest timestamp at or before the
//! requested point and the store discards anything recorded strictly after
//! it, so a resumed chunk can never replay a tick it already routed grains
//! out of.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::grain::Grain;
use crate::wire::WireGrain;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub chunk_id: String,
    pub timestamp: u64,
    pub grains: Vec<WireGrain>,
}

/// A durable, append-then-prune snapshot store. Backed by one JSON file per
/// chunk under `data_dir`, holding every recorded timestamp for that chunk;
/// this is adequate at the cadence snapshots are actually taken (every
/// `snapshot_every` ticks, not every tick) and keeps the format legible.
pub struct SnapshotStore {
    data_dir: PathBuf,
    cache: Mutex<std::collections::HashMap<String, BTreeMap<u64, SnapshotRecord>>>,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into(), cache: Mutex::new(std::collections::HashMap::new()) }
    }

    fn path_for(&self, chunk_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.snapshots.json", sanitize(chunk_id)))
    }

    fn load(&self, chunk_id: &str) -> Result<BTreeMap<u64, SnapshotRecord>, StoreError> {
        let path = self.path_for(chunk_id);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&path)?;
        let records: Vec<SnapshotRecord> = serde_json::from_slice(&bytes)?;
        Ok(records.into_iter().map(|r| (r.timestamp, r)).collect())
    }

    fn persist(&self, chunk_id: &str, records: &BTreeMap<u64, SnapshotRecord>) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.path_for(chunk_id);
        let values: Vec<&SnapshotRecord> = records.values().collect();
        let bytes = serde_json::to_vec(&values)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// Records a snapshot, replacing any earlier one at the same timestamp.
    pub fn add(&self, chunk_id: &str, timestamp: u64, grains: &[Grain]) -> Result<(), StoreError> {
        let mut cache = self.cache.lock().expect("snapshot cache lock poisoned");
        let entry = cache.entry(chunk_id.to_string()).or_insert_with(|| {
            self.load(chunk_id).unwrap_or_default()
        });
        entry.insert(
            timestamp,
            SnapshotRecord {
                chunk_id: chunk_id.to_string(),
                timestamp,
                grains: grains.iter().map(WireGrain::from).collect(),
            },
        );
        self.persist(chunk_id, entry)
    }

    /// Returns the snapshot with the largest timestamp at or before
    /// `requested`, or `None` if no snapshot qualifies (`requested = None`
    /// means "the latest available").
    pub fn resume(&self, chunk_id: &str, requested: Option<u64>) -> Result<SnapshotRecord, StoreError> {
        let mut cache = self.cache.lock().expect("snapshot cache lock poisoned");
        let entry = cache.entry(chunk_id.to_string()).or_insert_with(|| {
            self.load(chunk_id).unwrap_or_default()
        });
        let found = match requested {
            Some(at) => entry.range(..=at).next_back(),
            None => entry.iter().next_back(),
        };
        let record = found
            .map(|(_, r)| r.clone())
            .ok_or_else(|| StoreError::ResumePointMissing {
                chunk_id: chunk_id.to_string(),
                requested: requested.unwrap_or(0),
            })?;

        let cutoff = record.timestamp;
        entry.retain(|&ts, _| ts <= cutoff);
        self.persist(chunk_id, entry)?;
        Ok(record)
    }

    /// Looks up the exact `(chunk_id, timestamp)` record without pruning
    /// anything - unlike `resume`, this never mutates the store. Used to
    /// read back the state a synchronized snapshot just recorded.
    pub fn get(&self, chunk_id: &str, timestamp: u64) -> Option<SnapshotRecord> {
        let mut cache = self.cache.lock().expect("snapshot cache lock poisoned");
        let entry = cache.entry(chunk_id.to_string()).or_insert_with(|| self.load(chunk_id).unwrap_or_default());
        entry.get(&timestamp).cloned()
    }

    pub fn count(&self, chunk_id: &str) -> usize {
        self.cache
            .lock()
            .expect("snapshot cache lock poisoned")
            .get(chunk_id)
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

fn sanitize(chunk_id: &str) -> String {
    chunk_id.chars().map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' }).collect()
}

/// Convenience for tests/tools that want a throwaway store under a temp dir.
pub fn temp_store(prefix: &str) -> (SnapshotStore, PathBuf) {
    let dir = std::env::temp_dir().join(format!("biosphere-{prefix}-{}", std::process::id()));
    (SnapshotStore::new(dir.clone()), dir)
}
