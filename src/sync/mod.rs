//! Replication sync engine and shard coordinator.
//!
//! [`transport`] defines the transport-agnostic peer contract, [`engine`]
//! runs one pull/resolve/apply/push session against a single peer, and
//! [`coordinator`] schedules sessions across every peer registered for a
//! shard with bounded concurrency and retry/backoff.

mod coordinator;
mod engine;
mod transport;

pub use coordinator::{CoordinatorConfig, CoordinatorError, CoordinatorResult, ShardCoordinator};
pub use engine::{sync_once, PeerSyncState, SyncConfig, SyncError, SyncOutcome, SyncResult, SyncTarget};
pub use transport::{PeerTransport, TransportError};
