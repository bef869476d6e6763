//! Delta packaging: a contiguous changelog range becomes a checksummed,
//! optionally compressed message for transmission between peers.
//!
//! Follows the same CRC32 checksum discipline the WAL uses, applied as a
//! whole-message checksum over id-sorted records, plus a compaction step
//! that collapses repeated changes to the same vector id down to the
//! latest one before sending.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::changelog::{ChangeRecord, Operation};

#[derive(Debug, Error)]
pub enum DeltaError {
    #[error("checksum mismatch: delta payload is corrupt")]
    CorruptDelta,
    #[error("serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

pub type DeltaResult<T> = std::result::Result<T, DeltaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    None,
    PackedBinary,
    BlockCompressed,
}

/// A packaged, checksummed range of changelog entries's
/// wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta {
    pub shard_id: String,
    pub from_id: u64,
    pub to_id: u64,
    pub records: Vec<ChangeRecord>,
    /// Hex-encoded BLAKE3 digest over the id-sorted record list.
    pub checksum: String,
    pub compression: Compression,
}

/// Collapse multiple changes to the same vector id down to the last one,
/// preserving relative order, compaction step.
pub fn compact(records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    let mut latest: HashMap<crate::record::VectorId, usize> = HashMap::new();
    let mut out: Vec<Option<ChangeRecord>> = Vec::with_capacity(records.len());
    for record in records {
        if let Some(&slot) = latest.get(&record.vector_id) {
            out[slot] = None;
        }
        latest.insert(record.vector_id, out.len());
        out.push(Some(record));
    }
    out.into_iter().flatten().collect()
}

fn checksum_of(records: &[ChangeRecord]) -> DeltaResult<String> {
    let mut sorted: Vec<&ChangeRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.vector_id.0);
    let mut hasher = blake3::Hasher::new();
    for record in sorted {
        let bytes = postcard::to_allocvec(record)?;
        hasher.update(&bytes);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Package a contiguous range of changelog entries for transmission,
/// compacting duplicate-id changes first.
pub fn build(
    shard_id: &str,
    from_id: u64,
    to_id: u64,
    records: Vec<ChangeRecord>,
    compression: Compression,
) -> DeltaResult<Delta> {
    let records = compact(records);
    let checksum = checksum_of(&records)?;
    Ok(Delta {
        shard_id: shard_id.to_string(),
        from_id,
        to_id,
        records,
        checksum,
        compression,
    })
}

/// Verify a delta's checksum before accepting its records; a mismatch fails
/// with [`DeltaError::CorruptDelta`] rather than silently trusting
/// possibly-corrupted data.
pub fn decode(delta: &Delta) -> DeltaResult<Vec<ChangeRecord>> {
    let expected = checksum_of(&delta.records)?;
    if expected != delta.checksum {
        return Err(DeltaError::CorruptDelta);
    }
    Ok(delta.records.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VectorId;
    use crate::version_vector::VersionVector;

    fn record(id: u64, change_id: u64, op: Operation) -> ChangeRecord {
        ChangeRecord {
            change_id,
            operation: op,
            shard_id: "s1".to_string(),
            vector_id: VectorId(id),
            embedding: Some(vec![1.0]),
            metadata: None,
            timestamp: change_id,
            origin_node: "n1".to_string(),
            version_vector: VersionVector::new(),
        }
    }

    #[test]
    fn decode_round_trips_a_valid_delta() {
        let records = vec![record(1, 1, Operation::Insert), record(2, 2, Operation::Insert)];
        let delta = build("s1", 0, 2, records.clone(), Compression::None).unwrap();
        let decoded = decode(&delta).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn bit_flip_in_checksum_is_detected() {
        let records = vec![record(1, 1, Operation::Insert)];
        let mut delta = build("s1", 0, 1, records, Compression::None).unwrap();
        delta.checksum.push('f');
        delta.checksum.pop();
        delta.checksum.replace_range(0..1, "0");
        let err = decode(&delta).unwrap_err();
        assert!(matches!(err, DeltaError::CorruptDelta));
    }

    #[test]
    fn bit_flip_in_payload_is_detected() {
        let records = vec![record(1, 1, Operation::Insert)];
        let mut delta = build("s1", 0, 1, records, Compression::None).unwrap();
        delta.records[0].timestamp += 1;
        let err = decode(&delta).unwrap_err();
        assert!(matches!(err, DeltaError::CorruptDelta));
    }

    #[test]
    fn compact_keeps_only_latest_change_per_vector_id() {
        let records = vec![
            record(1, 1, Operation::Insert),
            record(2, 2, Operation::Insert),
            record(1, 3, Operation::Update),
        ];
        let compacted = compact(records);
        assert_eq!(compacted.len(), 2);
        assert_eq!(compacted.iter().find(|r| r.vector_id.0 == 1).unwrap().change_id, 3);
    }
}
