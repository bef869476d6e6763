//! Vector storage backends.
//!
//! Contiguous vector data with `BitVec` tombstones and a monotonic id
//! counter, backed by a CRC32-checked append log with write-before-memory-
//! update ordering for durability. Two concrete backends implement the
//! same [`StorageBackend`] trait: [`memory::MemoryBackend`] (pure
//! in-process) and [`persistent::PersistentBackend`] (WAL-backed,
//! recoverable on reopen).

pub mod memory;
pub mod mmap_view;
pub mod persistent;

use std::borrow::Cow;

use thiserror::Error;

use crate::record::{VectorId, VectorRecord};

/// Explicit backend selection; never environment-sniffed. Configuration
/// for which backend to use must always be passed in, not inferred.
#[derive(Debug, Clone)]
pub enum BackendChoice {
    Memory,
    Persistent { path: std::path::PathBuf },
}

/// Records are written to the WAL (and memory) in chunks of this size, so a
/// single oversized batch cannot block the writer lock for too long.
pub const BATCH_CHUNK_SIZE: usize = 5_000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("vector {0:?} not found")]
    NotFound(VectorId),
    #[error("dimension mismatch: shard expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("duplicate id: {0:?} already exists")]
    DuplicateId(VectorId),
    #[error("wal error: {0}")]
    Wal(#[from] crate::storage::persistent::WalError),
    #[error("mmap snapshot error: {0}")]
    MmapSnapshot(#[from] crate::storage::mmap_view::MmapSnapshotError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Point-in-time size counters, `stats() -> {count,
/// on-disk-size-bytes}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub count: usize,
    pub on_disk_size_bytes: u64,
}

/// Shared contract implemented by both storage backends.
pub trait StorageBackend: Send + Sync {
    /// Insert a record. Returns `DuplicateId` if the id already exists.
    fn insert(&mut self, record: VectorRecord) -> StorageResult<()>;

    /// Insert many records in [`BATCH_CHUNK_SIZE`]-sized chunks.
    fn insert_batch(&mut self, records: Vec<VectorRecord>) -> StorageResult<()> {
        for chunk in records.chunks(BATCH_CHUNK_SIZE) {
            for record in chunk {
                self.insert(record.clone())?;
            }
        }
        Ok(())
    }

    /// Mark a record as deleted (tombstone). Idempotent: deleting an
    /// already-deleted or absent id is not an error.
    fn delete(&mut self, id: VectorId) -> StorageResult<()>;

    /// Fetch a live (non-tombstoned) record's vector by id.
    fn get_vector(&self, id: VectorId) -> Option<Cow<'_, [f32]>>;

    /// Fetch a live record in full, including metadata.
    fn get_record(&self, id: VectorId) -> Option<VectorRecord>;

    fn contains(&self, id: VectorId) -> bool;

    fn is_deleted(&self, id: VectorId) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension of vectors stored in this backend, if any have been
    /// inserted yet.
    fn dimension(&self) -> Option<usize>;

    /// Iterate over every live (non-tombstoned) record id.
    fn live_ids(&self) -> Vec<VectorId>;

    /// Live record count and on-disk footprint (`0` for a purely in-memory
    /// backend).
    fn stats(&self) -> BackendStats {
        BackendStats { count: self.len(), on_disk_size_bytes: 0 }
    }
}

/// Adapter so HNSW can fetch raw vectors from whichever backend is active
/// without depending on the concrete type, decoupling `hnsw::insert`/
/// `search` from any particular `StorageBackend` implementation.
pub trait VectorProvider {
    fn vector_for(&self, id: VectorId) -> Option<Cow<'_, [f32]>>;
}

impl<T: StorageBackend> VectorProvider for T {
    fn vector_for(&self, id: VectorId) -> Option<Cow<'_, [f32]>> {
        self.get_vector(id)
    }
}

/// Construct a backend from an explicit [`BackendChoice`].
pub fn open(choice: &BackendChoice) -> StorageResult<Box<dyn StorageBackend>> {
    match choice {
        BackendChoice::Memory => Ok(Box::new(memory::MemoryBackend::new())),
        BackendChoice::Persistent { path } => {
            Ok(Box::new(persistent::PersistentBackend::open(path)?))
        }
    }
}
