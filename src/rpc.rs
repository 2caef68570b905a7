//! RPC framing - length-prefixed CBOR over TCP.
//!
//! A worker's whole request/response surface is carried over a small
//! hand-rolled framing: a big-endian `u32` byte length followed by a
//! `ciborium`-encoded message. No streaming, no multiplexing - one request
//! per connection.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("decode error: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte limit")]
    FrameTooLarge(u32),
}

/// Writes one length-prefixed CBOR frame to `stream`.
pub async fn write_frame<T: Serialize>(stream: &mut TcpStream, value: &T) -> Result<(), RpcError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)?;
    let len = buf.len() as u32;
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge(len));
    }
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one length-prefixed CBOR frame from `stream`.
pub async fn read_frame<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T, RpcError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(ciborium::from_reader(&buf[..])?)
}

/// One neighbor entry of a `ChunkTopologyWire`: its offset, chunk id, and -
/// when it lives on a different worker - the address to reach it at.
/// `addr = None` means the neighbor is co-located in this same worker
/// process.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct NeighborDescriptor {
    pub dx: i32,
    pub dy: i32,
    pub chunk_id: String,
    pub addr: Option<std::net::SocketAddr>,
}

/// A chunk's immutable routing record as carried over the wire by
/// `SpawnChunk`: its id, its neighbor set, the chunk wall configuration
/// derived from the biosphere topology, and the per-chunk extent/gravity
/// needed to reconstruct its `Bounds`.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub struct ChunkTopologyWire {
    pub chunk_id: String,
    pub neighbors: Vec<NeighborDescriptor>,
    /// `(x_minus, x_plus, y_minus, y_plus)`.
    pub wall: (bool, bool, bool, bool),
    pub extent: (f32, f32, f32),
    pub gravity: (f32, f32, f32),
}

/// The worker RPC surface a controller (or peer worker, for neighbor
/// exchange) calls over one of these framed connections.
#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub enum WorkerRequest {
    SpawnChunk {
        topology: ChunkTopologyWire,
        snapshot_every: u64,
        record_every: u64,
        resume_before: Option<u64>,
    },
    DeleteChunk { chunk_id: String },
    ChunkSummary,
    Snapshot { chunk_ids: Vec<String>, deadline_ms: u64 },
    NotifyNeighbor { chunk_id: String, export: crate::wire::NeighborExport },
}

#[derive(Clone, Debug, Serialize, serde::Deserialize)]
pub enum WorkerResponse {
    Ack,
    Summary { chunk_ids: Vec<String> },
    /// Empty when the synchronized-snapshot deadline elapsed before every
    /// named chunk reported in.
    SnapshotData { timestamp: u64, grains: std::collections::HashMap<String, Vec<crate::wire::WireGrain>> },
    Import(crate::wire::NeighborImport),
    Error { message: String },
}
