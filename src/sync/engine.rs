//! One sync session between a shard and a peer.

use thiserror::Error;

use crate::changelog::ChangeRecord;
use crate::conflict::{resolve_batch, Conflict, ResolutionPolicy};
use crate::delta::{self, Compression};
use crate::error::AgentDbError;
use crate::version_vector::VersionVector;

use super::transport::{PeerTransport, TransportError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Delta(#[from] crate::delta::DeltaError),
    #[error("failed to apply resolved change: {0}")]
    Apply(#[from] AgentDbError),
    #[error("protocol version mismatch")]
    VersionMismatch,
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Per-peer sync bookkeeping the caller persists between sessions.
#[derive(Debug, Clone)]
pub struct PeerSyncState {
    pub peer_id: String,
    pub last_synced_id: u64,
    pub version_vector: VersionVector,
}

impl PeerSyncState {
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            last_synced_id: 0,
            version_vector: VersionVector::new(),
        }
    }
}

/// What a sync round needs from the shard: the ability to read and apply
/// changes without the engine depending on the concrete `Shard`/`VectorDb`
/// type. Implemented by `crate::db::Shard`.
pub trait SyncTarget {
    fn shard_id(&self) -> &str;
    fn latest_change_id(&self) -> u64;
    fn changes_since(&self, from_id: u64) -> Vec<ChangeRecord>;
    fn apply_change(&mut self, change: &ChangeRecord) -> crate::error::Result<()>;
    fn version_vector(&self) -> VersionVector;
    fn advance_version_vector(&mut self, other: &VersionVector);
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub policy: ResolutionPolicy,
    pub compression: Compression,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            policy: ResolutionPolicy::LastWriteWins,
            compression: Compression::None,
        }
    }
}

/// Outcome of one sync round: how many changes were applied and any
/// conflicts surfaced (populated only under [`ResolutionPolicy::Manual`]).
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub applied: usize,
    pub conflicts: Vec<Conflict>,
}

/// Run one pull/resolve/apply/push round against `transport`: fetch the
/// peer's changes since the last sync point, push local changes since
/// then in batches, resolve any conflicts, apply the winners, and advance
/// the stored sync position.
#[tracing::instrument(skip(target, state, transport, config), fields(shard_id = %target.shard_id(), last_synced_id = state.last_synced_id))]
pub async fn sync_once(
    target: &mut impl SyncTarget,
    state: &mut PeerSyncState,
    transport: &dyn PeerTransport,
    config: &SyncConfig,
    now_us: u64,
) -> SyncResult<SyncOutcome> {
    let shard_id = target.shard_id().to_string();

    let remote_changes = transport.fetch_changes(&shard_id, state.last_synced_id).await?;
    tracing::debug!(remote_changes = remote_changes.len(), "fetched remote changes");

    let local_latest = target.latest_change_id();
    let local_changes = target.changes_since(state.last_synced_id);
    for batch in local_changes.chunks(config.batch_size) {
        let from = batch.first().map(|c| c.change_id - 1).unwrap_or(state.last_synced_id);
        let to = batch.last().map(|c| c.change_id).unwrap_or(from);
        let delta = delta::build(&shard_id, from, to, batch.to_vec(), config.compression)?;
        transport.send_delta(&delta).await?;
    }

    let local_for_resolve = target.changes_since(state.last_synced_id);
    let (resolved, conflicts) =
        resolve_batch(&shard_id, local_for_resolve, remote_changes, config.policy, now_us);

    let mut applied = 0;
    for resolved_change in &resolved {
        // Local-only winners (and, under Manual, the provisionally-kept
        // local change) are already reflected in the shard; applying them
        // again would re-append a duplicate changelog entry above
        // `last_synced_id`, which then gets re-sent and re-applied on
        // every later round. Only state the shard doesn't already hold
        // (the remote change, or a freshly merged record) gets applied.
        if !resolved_change.needs_apply {
            continue;
        }
        target.apply_change(&resolved_change.change)?;
        target.advance_version_vector(&resolved_change.change.version_vector);
        applied += 1;
    }

    state.last_synced_id = state.last_synced_id.max(local_latest);
    state.version_vector = target.version_vector();

    tracing::info!(applied, conflicts = conflicts.len(), "sync round complete");

    Ok(SyncOutcome { applied, conflicts })
}
