//! Append-only changelog: every mutating backend operation appends a
//! [`ChangeRecord`], timestamped and tagged with the shard's version vector
//! after the local node's component is advanced.
//!
//! Shares the append-only, CRC32-checked, sequence-numbered entry shape
//! of the WAL used for durability, generalized from a raw insert payload
//! to a structured `ChangeRecord`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metadata::Metadata;
use crate::record::VectorId;
use crate::version_vector::VersionVector;

#[derive(Debug, Error)]
pub enum ChangelogError {
    #[error("change id {0} was requested but never appended")]
    UnknownChangeId(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ChangelogResult<T> = std::result::Result<T, ChangelogError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

/// One entry in a shard's changelog. `change_id` is strictly increasing
/// within a shard; delete records carry no embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub change_id: u64,
    pub operation: Operation,
    pub shard_id: String,
    pub vector_id: VectorId,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Option<Metadata>,
    /// Microseconds since epoch.
    pub timestamp: u64,
    pub origin_node: String,
    pub version_vector: VersionVector,
}

/// Append-only, in-memory changelog. Persistence (if the shard is durable)
/// is handled by the same WAL the storage backend uses; this type owns the
/// strictly-increasing change-id ordering and the query-by-range contract.
#[derive(Debug, Default)]
pub struct Changelog {
    shard_id: String,
    next_change_id: u64,
    records: Vec<ChangeRecord>,
}

impl Changelog {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
            next_change_id: 1,
            records: Vec::new(),
        }
    }

    pub fn latest_change_id(&self) -> u64 {
        self.next_change_id - 1
    }

    /// Append a new entry, assigning it the next `change_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &mut self,
        operation: Operation,
        vector_id: VectorId,
        embedding: Option<Vec<f32>>,
        metadata: Option<Metadata>,
        timestamp: u64,
        origin_node: &str,
        version_vector: VersionVector,
    ) -> &ChangeRecord {
        let change_id = self.next_change_id;
        self.next_change_id += 1;
        self.records.push(ChangeRecord {
            change_id,
            operation,
            shard_id: self.shard_id.clone(),
            vector_id,
            embedding,
            metadata,
            timestamp,
            origin_node: origin_node.to_string(),
            version_vector,
        });
        self.records.last().unwrap()
    }

    /// Records with `change_id > from_id` (exclusive) and, if given,
    /// `change_id <= to_id` (inclusive), in ascending order.
    pub fn read_since(&self, from_id: u64, to_id: Option<u64>) -> Vec<ChangeRecord> {
        self.records
            .iter()
            .filter(|r| r.change_id > from_id && to_id.map(|to| r.change_id <= to).unwrap_or(true))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
