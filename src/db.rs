//! Vector DB facade: one [`Shard`] per dimension-homogeneous collection,
//! composing a storage backend with an optional HNSW index, an optional
//! quantizer, and a query cache behind a single mutation path.
//!
//! The storage backend and HNSW index are composed behind one explicit
//! `Shard`/`ShardConfig` pair rather than exposed as separate handles.

use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};

use crate::cache::{fingerprint, CacheConfig, QueryCache};
use crate::changelog::{ChangeRecord, Changelog, Operation};
use crate::error::{AgentDbError, Result};
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::metadata::Metadata;
use crate::metric::Metric;
use crate::quantization::{QuantizerChoice, TrainedQuantizer};
use crate::record::{VectorId, VectorRecord};
use crate::storage::{self, BackendChoice, BackendStats, StorageBackend, VectorProvider};
use crate::sync::SyncTarget;
use crate::version_vector::VersionVector;

/// Adapts a `&dyn StorageBackend` trait object into [`VectorProvider`]. The
/// blanket `impl<T: StorageBackend> VectorProvider for T` in `storage::mod`
/// only covers sized backend types, not the boxed trait object the facade
/// stores, so HNSW's provider seam is bridged through this thin wrapper.
struct BackendProvider<'a>(&'a dyn StorageBackend);

impl<'a> VectorProvider for BackendProvider<'a> {
    fn vector_for(&self, id: VectorId) -> Option<std::borrow::Cow<'_, [f32]>> {
        self.0.get_vector(id)
    }
}

/// Everything needed to open a [`Shard`], constructed explicitly by the
/// caller: no environment auto-detection.
pub struct ShardConfig {
    pub shard_id: String,
    pub node_id: String,
    pub backend: BackendChoice,
    pub metric: Metric,
    pub hnsw: Option<HnswConfig>,
    pub quantizer: QuantizerChoice,
    pub cache: CacheConfig,
}

impl ShardConfig {
    pub fn new(shard_id: impl Into<String>, node_id: impl Into<String>, metric: Metric) -> Self {
        Self {
            shard_id: shard_id.into(),
            node_id: node_id.into(),
            backend: BackendChoice::Memory,
            metric,
            hnsw: None,
            quantizer: QuantizerChoice::None,
            cache: CacheConfig::default(),
        }
    }
}

/// Point-in-time counters returned by [`Shard::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardStats {
    pub count: usize,
    pub on_disk_size_bytes: u64,
    pub changelog_len: usize,
    pub cache: crate::cache::CacheStats,
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Keeps cached results reachable only while they were inserted under the
/// current generation; bumping it on every mutation invalidates the whole
/// cache without walking or clearing the map. Entries from a stale
/// generation simply age out under the cache's own TTL/LRU pressure
/// instead of being removed immediately, trading a little memory for
/// avoiding an O(n) sweep on every write.
fn cache_key(base_fingerprint: u64, epoch: u64) -> u64 {
    base_fingerprint ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

fn passes_threshold(metric: Metric, raw_score: f32, threshold: f32) -> bool {
    match metric {
        // threshold == 0 means "no filter" only for Euclidean (spec §4.2).
        Metric::Euclidean => threshold == 0.0 || raw_score <= threshold,
        Metric::DotProduct | Metric::Cosine => raw_score >= threshold,
    }
}

/// Orders two raw metric scores so that "closer" always sorts first,
/// matching [`Metric::score`]'s polarity without double-negating results
/// already reported in raw (non-negated) form.
fn sort_key(metric: Metric, raw_score: f32) -> f32 {
    match metric {
        Metric::Euclidean => raw_score,
        Metric::DotProduct | Metric::Cosine => -raw_score,
    }
}

/// An isolated, dimension-homogeneous collection of vectors: its own
/// backend, optional HNSW index, optional quantizer, query cache, changelog
/// and version vector. A shard serializes its own writes and lets reads
/// proceed concurrently.
pub struct Shard {
    shard_id: String,
    node_id: String,
    metric: Metric,
    hnsw_config: Option<HnswConfig>,
    backend_choice: BackendChoice,
    quantizer_choice: QuantizerChoice,
    trained_quantizer: Option<TrainedQuantizer>,
    cache: QueryCache,
    next_id: Mutex<u64>,

    /// Single-writer mutation path: backend, HNSW graph, and changelog are
    /// only ever touched while holding this lock.
    write_state: Mutex<WriteState>,
    /// Read-mostly snapshot-friendly state consulted by `get`/`search`.
    version_vector: RwLock<VersionVector>,
    epoch: std::sync::atomic::AtomicU64,
}

struct WriteState {
    backend: Box<dyn StorageBackend>,
    hnsw: Option<HnswIndex>,
    changelog: Changelog,
}

impl Shard {
    #[tracing::instrument(skip(config), fields(shard_id = %config.shard_id, node_id = %config.node_id))]
    pub fn open(config: ShardConfig) -> Result<Self> {
        let backend = storage::open(&config.backend)?;
        let hnsw = config.hnsw.clone().map(HnswIndex::new);
        let cache = QueryCache::new(config.cache)?;
        let changelog = Changelog::new(config.shard_id.clone());
        tracing::info!(hnsw = hnsw.is_some(), "shard opened");

        Ok(Self {
            shard_id: config.shard_id,
            node_id: config.node_id,
            metric: config.metric,
            hnsw_config: hnsw.as_ref().map(|h| h.config().clone()),
            backend_choice: config.backend,
            quantizer_choice: config.quantizer,
            trained_quantizer: None,
            cache,
            next_id: Mutex::new(1),
            write_state: Mutex::new(WriteState { backend, hnsw, changelog }),
            version_vector: RwLock::new(VersionVector::new()),
            epoch: std::sync::atomic::AtomicU64::new(0),
        })
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Train the shard's quantizer from a representative sample, per
    /// the train/encode/decode lifecycle. A shard with
    /// `QuantizerChoice::None` trains to nothing and quantization is a
    /// no-op everywhere else in the facade.
    pub fn train_quantizer(&mut self, samples: &[Vec<f32>]) -> Result<()> {
        self.trained_quantizer = TrainedQuantizer::train(&self.quantizer_choice, samples)
            .map_err(AgentDbError::Quantization)?;
        Ok(())
    }

    fn bump_epoch(&self) {
        self.epoch.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Insert (or, if `id` already exists, overwrite) a vector. Assigns a
    /// generated id when `id` is `None`.
    #[tracing::instrument(skip(self, vector, metadata), fields(shard_id = %self.shard_id, dim = vector.len()))]
    pub fn insert(&self, id: Option<VectorId>, vector: Vec<f32>, metadata: Metadata) -> Result<VectorId> {
        let mut state = self.write_state.lock();
        let id = match id {
            Some(id) => id,
            None => {
                let mut next = self.next_id.lock();
                let id = VectorId(*next);
                *next += 1;
                id
            }
        };

        let is_update = state.backend.contains(id) && !state.backend.is_deleted(id);
        if is_update {
            state.backend.delete(id)?;
            if let Some(hnsw) = &mut state.hnsw {
                hnsw.delete(id, &BackendProvider(state.backend.as_ref()));
            }
        }

        let created_at = now_micros();
        let record = VectorRecord::with_timestamp(id, vector.clone(), metadata.clone(), created_at);
        state.backend.insert(record)?;

        if let Some(hnsw) = &mut state.hnsw {
            if hnsw.insert(id, &vector, &BackendProvider(state.backend.as_ref())).is_err() {
                // id already present in the index from a prior insert that
                // raced the backend's own duplicate check; ignore, backend
                // is the source of truth for existence.
            }
        }

        let mut vv = self.version_vector.write();
        vv.increment(&self.node_id);
        state.changelog.append(
            if is_update { Operation::Update } else { Operation::Insert },
            id,
            Some(vector),
            Some(metadata),
            created_at,
            &self.node_id,
            vv.clone(),
        );
        drop(vv);

        self.bump_epoch();
        tracing::debug!(vector_id = id.0, is_update, "vector inserted");
        Ok(id)
    }

    /// Insert a full batch as a single all-or-nothing backend commit
    /// (chunked internally by the backend at [`storage::BATCH_CHUNK_SIZE`]):
    /// every record's dimension is checked against the shard's dimension up
    /// front, before anything is written, so a bad record can't leave the
    /// backend holding only part of the batch. HNSW indexing and the
    /// changelog are still one entry per record afterward, same as calling
    /// `insert` in a loop, but those are best-effort bookkeeping over an
    /// already-committed backend, not the guarantee this op makes.
    #[tracing::instrument(skip(self, records), fields(shard_id = %self.shard_id, batch_len = records.len()))]
    pub fn insert_batch(&self, records: Vec<(Vec<f32>, Metadata)>) -> Result<Vec<VectorId>> {
        let mut state = self.write_state.lock();

        let expected_dim = state.backend.dimension().or_else(|| records.first().map(|(v, _)| v.len()));
        if let Some(dim) = expected_dim {
            for (vector, _) in &records {
                if vector.len() != dim {
                    return Err(AgentDbError::DimensionMismatch { expected: dim, actual: vector.len() });
                }
            }
        }

        let mut next_id = self.next_id.lock();
        let assigned: Vec<(VectorId, Vec<f32>, Metadata)> = records
            .into_iter()
            .map(|(vector, metadata)| {
                let id = VectorId(*next_id);
                *next_id += 1;
                (id, vector, metadata)
            })
            .collect();
        drop(next_id);

        let created_at = now_micros();
        let backend_records: Vec<VectorRecord> = assigned
            .iter()
            .map(|(id, vector, metadata)| VectorRecord::with_timestamp(*id, vector.clone(), metadata.clone(), created_at))
            .collect();
        state.backend.insert_batch(backend_records)?;

        let mut ids = Vec::with_capacity(assigned.len());
        let mut vv = self.version_vector.write();
        for (id, vector, metadata) in assigned {
            if let Some(hnsw) = &mut state.hnsw {
                let _ = hnsw.insert(id, &vector, &BackendProvider(state.backend.as_ref()));
            }
            vv.increment(&self.node_id);
            state.changelog.append(
                Operation::Insert,
                id,
                Some(vector),
                Some(metadata),
                created_at,
                &self.node_id,
                vv.clone(),
            );
            ids.push(id);
        }
        drop(vv);

        self.bump_epoch();
        tracing::debug!(count = ids.len(), "batch inserted");
        Ok(ids)
    }

    pub fn get(&self, id: VectorId) -> Option<VectorRecord> {
        let state = self.write_state.lock();
        state.backend.get_record(id)
    }

    #[tracing::instrument(skip(self), fields(shard_id = %self.shard_id, vector_id = id.0))]
    pub fn delete(&self, id: VectorId) -> Result<bool> {
        let mut state = self.write_state.lock();
        if !state.backend.contains(id) || state.backend.is_deleted(id) {
            return Ok(false);
        }
        state.backend.delete(id)?;
        if let Some(hnsw) = &mut state.hnsw {
            hnsw.delete(id, &BackendProvider(state.backend.as_ref()));
        }

        let mut vv = self.version_vector.write();
        vv.increment(&self.node_id);
        state
            .changelog
            .append(Operation::Delete, id, None, None, now_micros(), &self.node_id, vv.clone());
        drop(vv);

        self.bump_epoch();
        tracing::debug!(vector_id = id.0, "vector deleted");
        Ok(true)
    }

    /// Brute-force or HNSW search depending on index availability and
    /// dataset size: consults the cache first, then delegates to HNSW (if
    /// built and the query metric matches the shard's configured metric)
    /// or falls back to brute force.
    #[tracing::instrument(skip(self, query), fields(shard_id = %self.shard_id, k, dim = query.len()))]
    pub fn search(&self, query: &[f32], k: usize, metric: Metric, threshold: f32) -> Result<Vec<(VectorId, f32)>> {
        let base_key = fingerprint(metric, k, threshold, query);
        let key = cache_key(base_key, self.epoch());
        if let Some(hit) = self.cache.get(key) {
            tracing::debug!(hits = hit.len(), "cache hit");
            return Ok(hit);
        }

        let state = self.write_state.lock();
        let min_for_index = self.hnsw_config.as_ref().map(|c| c.min_vectors_for_index).unwrap_or(usize::MAX);
        let use_hnsw = metric == self.metric
            && state.hnsw.as_ref().map(|h| h.len() >= min_for_index).unwrap_or(false);

        let results = if use_hnsw {
            let hnsw = state.hnsw.as_ref().unwrap();
            let ef = k.max(self.hnsw_config.as_ref().map(|c| c.ef_search).unwrap_or(k));
            let raw = hnsw.search(query, ef, &BackendProvider(state.backend.as_ref())).map_err(AgentDbError::Graph)?;
            let mut filtered: Vec<(VectorId, f32)> = raw
                .into_iter()
                .map(|(id, score)| (id, if metric == Metric::Euclidean { score } else { -score }))
                .filter(|(_, raw_score)| passes_threshold(metric, *raw_score, threshold))
                .collect();
            filtered.sort_by(|a, b| {
                sort_key(metric, a.1)
                    .partial_cmp(&sort_key(metric, b.1))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0 .0.cmp(&b.0 .0))
            });
            filtered.truncate(k);
            filtered
        } else {
            self.brute_force_search(state.backend.as_ref(), query, k, metric, threshold)
        };
        drop(state);

        tracing::debug!(hits = results.len(), used_hnsw = use_hnsw, "search completed");
        self.cache.insert(key, results.clone());
        Ok(results)
    }

    fn brute_force_search(
        &self,
        backend: &dyn StorageBackend,
        query: &[f32],
        k: usize,
        metric: Metric,
        threshold: f32,
    ) -> Vec<(VectorId, f32)> {
        let mut scored: Vec<(VectorId, f32)> = backend
            .live_ids()
            .into_iter()
            .filter_map(|id| {
                let vector = backend.get_vector(id)?;
                let raw_score = metric.compute(query, vector.as_ref());
                passes_threshold(metric, raw_score, threshold).then_some((id, raw_score))
            })
            .collect();

        scored.sort_by(|a, b| {
            sort_key(metric, a.1)
                .partial_cmp(&sort_key(metric, b.1))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0 .0.cmp(&b.0 .0))
        });
        scored.truncate(k);
        scored
    }

    pub fn stats(&self) -> ShardStats {
        let state = self.write_state.lock();
        let BackendStats { count, on_disk_size_bytes } = state.backend.stats();
        ShardStats {
            count,
            on_disk_size_bytes,
            changelog_len: state.changelog.len(),
            cache: self.cache.stats(),
        }
    }

    /// Serialize every live record for cold transfer or backup.
    pub fn export(&self) -> Result<Vec<u8>> {
        let state = self.write_state.lock();
        let records: Vec<VectorRecord> = state
            .backend
            .live_ids()
            .into_iter()
            .filter_map(|id| state.backend.get_record(id))
            .collect();
        serde_json::to_vec(&records).map_err(AgentDbError::Serde)
    }

    /// Replace the backend's contents from a byte blob previously produced
    /// by [`Shard::export`]. The HNSW index and changelog are rebuilt
    /// against the restored records; the cache is fully cleared (this is a
    /// bulk replace, not an incremental mutation, so an epoch bump alone
    /// would leave stale results reachable for any fingerprint sharing the
    /// new epoch by chance).
    pub fn import(&self, bytes: &[u8]) -> Result<()> {
        let records: Vec<VectorRecord> = serde_json::from_slice(bytes).map_err(AgentDbError::Serde)?;

        let mut state = self.write_state.lock();
        let mut backend = storage::open(&self.backend_choice)?;
        backend.insert_batch(records.clone())?;
        let mut hnsw = self.hnsw_config.clone().map(HnswIndex::new);
        if let Some(hnsw) = &mut hnsw {
            for record in &records {
                let _ = hnsw.insert(record.id, &record.vector, &BackendProvider(backend.as_ref()));
            }
        }
        state.backend = backend;
        state.hnsw = hnsw;
        state.changelog = Changelog::new(self.shard_id.clone());
        drop(state);

        self.cache.clear();
        self.bump_epoch();
        Ok(())
    }
}

/// Adapter so [`crate::sync`] can drive replication against a shard without
/// depending on its concrete type.
impl SyncTarget for Shard {
    fn shard_id(&self) -> &str {
        &self.shard_id
    }

    fn latest_change_id(&self) -> u64 {
        self.write_state.lock().changelog.latest_change_id()
    }

    fn changes_since(&self, from_id: u64) -> Vec<ChangeRecord> {
        self.write_state.lock().changelog.read_since(from_id, None)
    }

    fn apply_change(&mut self, change: &ChangeRecord) -> Result<()> {
        let mut state = self.write_state.lock();
        match change.operation {
            Operation::Insert | Operation::Update => {
                if state.backend.contains(change.vector_id) && !state.backend.is_deleted(change.vector_id) {
                    state.backend.delete(change.vector_id)?;
                    if let Some(hnsw) = &mut state.hnsw {
                        hnsw.delete(change.vector_id, &BackendProvider(state.backend.as_ref()));
                    }
                }
                if let Some(vector) = &change.embedding {
                    let record = VectorRecord::with_timestamp(
                        change.vector_id,
                        vector.clone(),
                        change.metadata.clone().unwrap_or_default(),
                        change.timestamp,
                    );
                    state.backend.insert(record)?;
                    if let Some(hnsw) = &mut state.hnsw {
                        let _ = hnsw.insert(change.vector_id, vector, &BackendProvider(state.backend.as_ref()));
                    }
                }
            }
            Operation::Delete => {
                state.backend.delete(change.vector_id)?;
                if let Some(hnsw) = &mut state.hnsw {
                    hnsw.delete(change.vector_id, &BackendProvider(state.backend.as_ref()));
                }
            }
        }
        state
            .changelog
            .append(change.operation, change.vector_id, change.embedding.clone(), change.metadata.clone(), change.timestamp, &change.origin_node, change.version_vector.clone());
        drop(state);
        self.bump_epoch();
        Ok(())
    }

    fn version_vector(&self) -> VersionVector {
        self.version_vector.read().clone()
    }

    fn advance_version_vector(&mut self, other: &VersionVector) {
        self.version_vector.write().merge(other);
    }
}

/// A named collection of shards, the top-level entry point a caller opens.
#[derive(Default)]
pub struct VectorDb {
    shards: std::collections::HashMap<String, Shard>,
}

impl VectorDb {
    pub fn new() -> Self {
        Self { shards: std::collections::HashMap::new() }
    }

    pub fn open_shard(&mut self, config: ShardConfig) -> Result<()> {
        let shard_id = config.shard_id.clone();
        let shard = Shard::open(config)?;
        self.shards.insert(shard_id, shard);
        Ok(())
    }

    pub fn shard(&self, shard_id: &str) -> Option<&Shard> {
        self.shards.get(shard_id)
    }

    pub fn shard_mut(&mut self, shard_id: &str) -> Option<&mut Shard> {
        self.shards.get_mut(shard_id)
    }

    pub fn close_shard(&mut self, shard_id: &str) -> Option<Shard> {
        self.shards.remove(shard_id)
    }

    pub fn shard_ids(&self) -> Vec<String> {
        self.shards.keys().cloned().collect()
    }
}
