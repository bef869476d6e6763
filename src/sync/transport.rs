//! Transport seam between the sync engine and a peer. Transport-agnostic:
//! request/response over a reliable bidirectional channel, specifics left
//! to the caller's implementation.

use async_trait::async_trait;
use thiserror::Error;

use crate::changelog::ChangeRecord;
use crate::delta::Delta;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failure: {0}")]
    Failed(String),
    #[error("request timed out")]
    Timeout,
}

/// Request/response contract a concrete transport (HTTP, gRPC, in-process
/// channel, ...) implements as an `async_trait`.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fetch remote changes for `shard_id` strictly after `since_id`.
    async fn fetch_changes(&self, shard_id: &str, since_id: u64) -> Result<Vec<ChangeRecord>, TransportError>;

    /// Send a packaged delta of local changes to the peer.
    async fn send_delta(&self, delta: &Delta) -> Result<(), TransportError>;

    /// Lightweight reachability probe used by the coordinator's health
    /// check.
    async fn ping(&self) -> Result<(), TransportError>;
}
