//! Conflict detection and resolution between a local and a remote change to
//! the same vector id.
//!
//! Pure comparison logic over the version-vector causal-order rules,
//! deliberately free of I/O so it is easy to property-test.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::changelog::ChangeRecord;
use crate::record::VectorId;
use crate::version_vector::CausalOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionPolicy {
    LastWriteWins,
    FirstWriteWins,
    Merge,
    Manual,
}

/// A pair of changes whose version vectors are concurrent and which
/// therefore requires resolution.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub conflict_id: u64,
    pub shard_id: String,
    pub vector_id: VectorId,
    pub local: ChangeRecord,
    pub remote: ChangeRecord,
    /// Microseconds since epoch.
    pub detected_at: u64,
}

/// Outcome of resolving one local/remote pair: either an automatically
/// chosen winner, or (for [`ResolutionPolicy::Manual`]) the local change
/// kept provisionally alongside a recorded conflict.
pub struct Resolution {
    pub winner: ChangeRecord,
    /// Whether `winner` reflects a state the shard doesn't already hold
    /// locally. `false` when the winner is the local change itself (the
    /// shard is already in that state and re-applying it would only
    /// duplicate a changelog entry); `true` when it's the remote change or
    /// a freshly merged record that must be written back.
    pub needs_apply: bool,
    pub conflict: Option<Conflict>,
}

/// A resolved winner paired with whether it still needs to be applied to
/// the local backend (see [`Resolution::needs_apply`]).
#[derive(Debug, Clone)]
pub struct ResolvedChange {
    pub change: ChangeRecord,
    pub needs_apply: bool,
}

/// Resolve a single `(local, remote)` pair per `policy`. Only version
/// vectors that compare as [`CausalOrder::Concurrent`] produce a conflict;
/// a dominated pair resolves silently to whichever side is causally ahead,
/// preserving causality.
pub fn resolve_pair(
    shard_id: &str,
    local: ChangeRecord,
    remote: ChangeRecord,
    policy: ResolutionPolicy,
    detected_at: u64,
    next_conflict_id: &mut u64,
) -> Resolution {
    match local.version_vector.compare(&remote.version_vector) {
        CausalOrder::Before => Resolution { winner: remote, needs_apply: true, conflict: None },
        // Equal version vectors mean both sides already hold this exact
        // causal state (e.g. a change echoed back by a peer after we applied
        // it to them). Re-applying would re-append it under a fresh local
        // change_id, which gets echoed right back — an unbounded ping-pong.
        CausalOrder::Equal => Resolution { winner: local, needs_apply: false, conflict: None },
        CausalOrder::After => Resolution { winner: local, needs_apply: false, conflict: None },
        CausalOrder::Concurrent => {
            let vector_id = local.vector_id;
            let conflict_id = *next_conflict_id;
            *next_conflict_id += 1;

            match policy {
                ResolutionPolicy::LastWriteWins => {
                    let (winner, needs_apply) = pick_by_timestamp(local, remote, true);
                    Resolution { winner, needs_apply, conflict: None }
                }
                ResolutionPolicy::FirstWriteWins => {
                    let (winner, needs_apply) = pick_by_timestamp(local, remote, false);
                    Resolution { winner, needs_apply, conflict: None }
                }
                ResolutionPolicy::Merge => Resolution {
                    winner: merge(local, remote),
                    needs_apply: true,
                    conflict: None,
                },
                ResolutionPolicy::Manual => {
                    let conflict = Conflict {
                        conflict_id,
                        shard_id: shard_id.to_string(),
                        vector_id,
                        local: local.clone(),
                        remote,
                        detected_at,
                    };
                    tracing::warn!(shard_id, conflict_id, vector_id = vector_id.0, "manual conflict raised");
                    Resolution { winner: local, needs_apply: false, conflict: Some(conflict) }
                }
            }
        }
    }
}

/// Picks the winner by timestamp and reports whether it's the remote side
/// (and therefore needs applying back to the local backend).
fn pick_by_timestamp(local: ChangeRecord, remote: ChangeRecord, prefer_later: bool) -> (ChangeRecord, bool) {
    let local_wins = match local.timestamp.cmp(&remote.timestamp) {
        std::cmp::Ordering::Greater => prefer_later,
        std::cmp::Ordering::Less => !prefer_later,
        std::cmp::Ordering::Equal => local.origin_node < remote.origin_node,
    };
    if local_wins {
        (local, false)
    } else {
        (remote, true)
    }
}

/// If either side is a delete, that side wins; otherwise metadata is
/// merged (local over remote), embeddings are averaged element-wise, and
/// version vectors take the element-wise max.
fn merge(local: ChangeRecord, remote: ChangeRecord) -> ChangeRecord {
    use crate::changelog::Operation;

    if local.operation == Operation::Delete {
        return local;
    }
    if remote.operation == Operation::Delete {
        return remote;
    }

    let mut merged = local.clone();
    merged.timestamp = local.timestamp.max(remote.timestamp);

    if let (Some(a), Some(b)) = (&local.embedding, &remote.embedding) {
        if a.len() == b.len() {
            merged.embedding = Some(a.iter().zip(b).map(|(x, y)| (x + y) / 2.0).collect());
        }
    }

    let mut metadata = remote.metadata.clone().unwrap_or_default();
    if let Some(local_meta) = &local.metadata {
        for (k, v) in local_meta {
            metadata.insert(k.clone(), v.clone());
        }
    }
    merged.metadata = Some(metadata);

    let mut vv = local.version_vector.clone();
    vv.merge(&remote.version_vector);
    merged.version_vector = vv;

    merged
}

/// Batch-resolve two lists of changes, bucketed by vector id. Ids present
/// on only one side pass through unchanged (no conflict is possible
/// without a counterpart).
pub fn resolve_batch(
    shard_id: &str,
    local: Vec<ChangeRecord>,
    remote: Vec<ChangeRecord>,
    policy: ResolutionPolicy,
    detected_at: u64,
) -> (Vec<ResolvedChange>, Vec<Conflict>) {
    let mut local_by_id: HashMap<VectorId, ChangeRecord> =
        local.into_iter().map(|r| (r.vector_id, r)).collect();
    let mut remote_by_id: HashMap<VectorId, ChangeRecord> =
        remote.into_iter().map(|r| (r.vector_id, r)).collect();

    let mut resolved = Vec::new();
    let mut conflicts = Vec::new();
    let mut next_conflict_id = 0u64;

    let ids: Vec<VectorId> = local_by_id.keys().chain(remote_by_id.keys()).copied().collect();
    let mut seen = std::collections::HashSet::new();

    for id in ids {
        if !seen.insert(id) {
            continue;
        }
        match (local_by_id.remove(&id), remote_by_id.remove(&id)) {
            (Some(l), Some(r)) => {
                let resolution = resolve_pair(shard_id, l, r, policy, detected_at, &mut next_conflict_id);
                resolved.push(ResolvedChange { change: resolution.winner, needs_apply: resolution.needs_apply });
                if let Some(conflict) = resolution.conflict {
                    conflicts.push(conflict);
                }
            }
            // Local-only: the shard already holds this state, nothing to apply.
            (Some(l), None) => resolved.push(ResolvedChange { change: l, needs_apply: false }),
            // Remote-only: a change we haven't seen, must be applied.
            (None, Some(r)) => resolved.push(ResolvedChange { change: r, needs_apply: true }),
            (None, None) => unreachable!(),
        }
    }

    (resolved, conflicts)
}
