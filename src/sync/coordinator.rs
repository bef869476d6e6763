//! Peer registry and scheduler sitting above the per-peer [`sync_once`]
//! session.
//!
//! Exponential backoff with jitter and bounded attempts per peer, run
//! under bounded concurrency (a `tokio::sync::Semaphore`, default 5) with
//! priority decay on repeated failure.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

use super::engine::{sync_once, PeerSyncState, SyncConfig, SyncError, SyncOutcome, SyncTarget};
use super::transport::PeerTransport;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("sync with peer {peer} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        peer: String,
        attempts: u32,
        #[source]
        source: SyncError,
    },
    #[error("sync task for peer {0} panicked or was cancelled")]
    TaskFailed(String),
}

pub type CoordinatorResult<T> = std::result::Result<T, CoordinatorError>;

struct PeerEntry {
    peer_id: String,
    transport: Arc<dyn PeerTransport>,
    priority: u8,
    state: PeerSyncState,
    consecutive_failures: u32,
}

#[derive(Eq, PartialEq)]
struct ScheduledJob {
    priority: u8,
    peer_id: String,
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority).then_with(|| other.peer_id.cmp(&self.peer_id))
    }
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_concurrency: usize,
    pub max_retries: u32,
    pub sync_config: SyncConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_retries: 3,
            sync_config: SyncConfig::default(),
        }
    }
}

/// Exponential backoff with jitter between retry attempts, matching the
/// resilience module's `base * 2^attempt` shape capped at a few seconds.
fn retry_backoff(attempt: u32) -> Duration {
    let base_ms = 100u64.saturating_mul(1u64 << attempt.min(6));
    let jitter_ms = (rand::random::<u64>() % 50).saturating_sub(25);
    Duration::from_millis(base_ms.min(5_000)) + Duration::from_millis(jitter_ms.min(25))
}

/// Registry of replication peers for a single shard, with bounded-concurrency
/// scheduled sync rounds.
pub struct ShardCoordinator {
    peers: Vec<PeerEntry>,
    config: CoordinatorConfig,
}

impl ShardCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self { peers: Vec::new(), config }
    }

    pub fn register_peer(&mut self, peer_id: impl Into<String>, transport: Arc<dyn PeerTransport>, priority: u8) {
        let peer_id = peer_id.into();
        self.peers.retain(|p| p.peer_id != peer_id);
        self.peers.push(PeerEntry {
            state: PeerSyncState::new(peer_id.clone()),
            peer_id,
            transport,
            priority,
            consecutive_failures: 0,
        });
    }

    pub fn unregister_peer(&mut self, peer_id: &str) {
        self.peers.retain(|p| p.peer_id != peer_id);
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.peers.iter().map(|p| p.peer_id.clone()).collect()
    }

    pub fn peer_state(&self, peer_id: &str) -> CoordinatorResult<&PeerSyncState> {
        self.peers
            .iter()
            .find(|p| p.peer_id == peer_id)
            .map(|p| &p.state)
            .ok_or_else(|| CoordinatorError::UnknownPeer(peer_id.to_string()))
    }

    /// Probe reachability without running a full sync session.
    pub async fn health_check(&self, peer_id: &str) -> CoordinatorResult<bool> {
        let peer = self
            .peers
            .iter()
            .find(|p| p.peer_id == peer_id)
            .ok_or_else(|| CoordinatorError::UnknownPeer(peer_id.to_string()))?;
        Ok(peer.transport.ping().await.is_ok())
    }

    /// Run one sync round against every registered peer, highest priority
    /// first, bounded by `max_concurrency` concurrent sessions. Each peer
    /// retries up to `max_retries` times with exponential backoff before
    /// giving up; a peer that fails has its scheduling priority decayed so
    /// a persistently unreachable peer stops starving healthy ones.
    #[tracing::instrument(skip(self, target), fields(peers = self.peers.len()))]
    pub async fn sync_all(
        &mut self,
        target: Arc<Mutex<dyn SyncTarget + Send>>,
    ) -> Vec<(String, CoordinatorResult<SyncOutcome>)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let queue: BinaryHeap<ScheduledJob> = self
            .peers
            .iter()
            .map(|p| ScheduledJob { priority: p.priority, peer_id: p.peer_id.clone() })
            .collect();

        let mut handles = Vec::new();
        for job in queue.into_sorted_vec().into_iter().rev() {
            let Some(entry) = self.peers.iter().find(|p| p.peer_id == job.peer_id) else {
                continue;
            };
            let transport = Arc::clone(&entry.transport);
            let mut state = entry.state.clone();
            let sync_config = self.config.sync_config.clone();
            let max_retries = self.config.max_retries.max(1);
            let target = Arc::clone(&target);
            let permit = Arc::clone(&semaphore);
            let peer_id = job.peer_id.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closes");
                let mut attempt = 0u32;
                loop {
                    attempt += 1;
                    let outcome = {
                        let mut guard = target.lock().await;
                        sync_once(&mut *guard, &mut state, transport.as_ref(), &sync_config, 0).await
                    };
                    match outcome {
                        Ok(outcome) => break (peer_id, state, Ok(outcome)),
                        Err(err) if attempt < max_retries => {
                            tracing::warn!(peer_id = %peer_id, attempt, %err, "sync attempt failed, retrying");
                            tokio::time::sleep(retry_backoff(attempt)).await;
                            continue;
                        }
                        Err(err) => {
                            break (
                                peer_id.clone(),
                                state,
                                Err(CoordinatorError::RetriesExhausted { peer: peer_id, attempts: attempt, source: err }),
                            )
                        }
                    }
                }
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((peer_id, state, outcome)) => {
                    if let Some(entry) = self.peers.iter_mut().find(|p| p.peer_id == peer_id) {
                        entry.state = state;
                        if outcome.is_ok() {
                            entry.consecutive_failures = 0;
                        } else {
                            entry.consecutive_failures += 1;
                            entry.priority = entry.priority.saturating_sub(1);
                        }
                    }
                    results.push((peer_id, outcome));
                }
                Err(_join_err) => results.push(("<unknown>".to_string(), Err(CoordinatorError::TaskFailed("join error".to_string())))),
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::ChangeRecord;
    use crate::version_vector::VersionVector;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    struct CountingTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PeerTransport for CountingTransport {
        async fn fetch_changes(&self, _shard_id: &str, _since: u64) -> Result<Vec<ChangeRecord>, super::super::transport::TransportError> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(Vec::new())
        }
        async fn send_delta(&self, _delta: &crate::delta::Delta) -> Result<(), super::super::transport::TransportError> {
            Ok(())
        }
        async fn ping(&self) -> Result<(), super::super::transport::TransportError> {
            Ok(())
        }
    }

    struct EmptyShard {
        vv: VersionVector,
    }

    impl SyncTarget for EmptyShard {
        fn shard_id(&self) -> &str {
            "s1"
        }
        fn latest_change_id(&self) -> u64 {
            0
        }
        fn changes_since(&self, _from_id: u64) -> Vec<ChangeRecord> {
            Vec::new()
        }
        fn apply_change(&mut self, _change: &ChangeRecord) -> crate::error::Result<()> {
            Ok(())
        }
        fn version_vector(&self) -> VersionVector {
            self.vv.clone()
        }
        fn advance_version_vector(&mut self, other: &VersionVector) {
            self.vv.merge(other);
        }
    }

    #[tokio::test]
    async fn sync_all_visits_every_registered_peer() {
        let mut coordinator = ShardCoordinator::new(CoordinatorConfig::default());
        let transport_a = Arc::new(CountingTransport { calls: AtomicU32::new(0) });
        let transport_b = Arc::new(CountingTransport { calls: AtomicU32::new(0) });
        coordinator.register_peer("peer-a", transport_a.clone(), 10);
        coordinator.register_peer("peer-b", transport_b.clone(), 5);

        let target: Arc<Mutex<dyn SyncTarget + Send>> = Arc::new(Mutex::new(EmptyShard { vv: VersionVector::new() }));
        let results = coordinator.sync_all(target).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, r)| r.is_ok()));
        assert_eq!(transport_a.calls.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(transport_b.calls.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn health_check_reports_reachable_peer() {
        let mut coordinator = ShardCoordinator::new(CoordinatorConfig::default());
        coordinator.register_peer("peer-a", Arc::new(CountingTransport { calls: AtomicU32::new(0) }), 1);
        assert!(coordinator.health_check("peer-a").await.unwrap());
        assert!(coordinator.health_check("missing").await.is_err());
    }
}
