//! The vector record type and its on-disk/on-wire binary codec.
//!
//! A little-endian fixed header (id, creation timestamp, dimension,
//! metadata length) followed by the raw f32 vector and a JSON-encoded
//! metadata blob. Explicit little-endian fields keep the layout portable
//! across platforms.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

/// Wall-clock time in microseconds since the Unix epoch, used to stamp a
/// record's `created_at` when the caller doesn't supply one explicitly.
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Sentinel reserved id; never assigned to a real record.
pub const NULL_VECTOR_ID: u64 = 0;

/// Stable external identifier for a vector record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VectorId(pub u64);

impl VectorId {
    pub const NULL: VectorId = VectorId(NULL_VECTOR_ID);

    pub fn is_null(&self) -> bool {
        self.0 == NULL_VECTOR_ID
    }
}

impl std::fmt::Display for VectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VectorId {
    fn from(v: u64) -> Self {
        VectorId(v)
    }
}

/// A single stored vector plus its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: VectorId,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    /// Creation timestamp, microseconds since the Unix epoch. Set once at
    /// construction and never mutated by upsert (an overwrite builds a new
    /// record, and stamps it fresh the same way an initial insert would).
    pub created_at: u64,
}

impl VectorRecord {
    /// Build a record stamped with the current wall-clock time.
    pub fn new(id: VectorId, vector: Vec<f32>, metadata: Metadata) -> Self {
        Self::with_timestamp(id, vector, metadata, now_micros())
    }

    /// Build a record stamped with an explicit creation timestamp, for
    /// callers (e.g. sync applying a remote change) that need the record's
    /// `created_at` to reflect an already-known point in time rather than
    /// "now".
    pub fn with_timestamp(id: VectorId, vector: Vec<f32>, metadata: Metadata, created_at: u64) -> Self {
        Self { id, vector, metadata, created_at }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Euclidean norm, used by cosine scoring and by scalar-quantizer
    /// training to detect degenerate all-zero vectors.
    pub fn norm(&self) -> f32 {
        self.vector.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Encode to the wire/disk byte layout: `id(8) | created_at(8) | dim(4) |
    /// meta_len(4) | vector(dim*4) | metadata(meta_len, JSON)`, all
    /// little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let meta_bytes = serde_json::to_vec(&self.metadata).expect("metadata always serializes");
        let dim = self.vector.len() as u32;
        let meta_len = meta_bytes.len() as u32;

        let mut buf = Vec::with_capacity(HEADER_LEN + self.vector.len() * 4 + meta_bytes.len());
        buf.extend_from_slice(&self.id.0.to_le_bytes());
        buf.extend_from_slice(&self.created_at.to_le_bytes());
        buf.extend_from_slice(&dim.to_le_bytes());
        buf.extend_from_slice(&meta_len.to_le_bytes());
        for x in &self.vector {
            buf.extend_from_slice(&x.to_le_bytes());
        }
        buf.extend_from_slice(&meta_bytes);
        buf
    }

    /// Decode a record previously produced by [`VectorRecord::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordCodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(RecordCodecError::Truncated {
                needed: HEADER_LEN,
                have: bytes.len(),
            });
        }
        let id = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let created_at = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let dim = u32::from_le_bytes(bytes[16..20].try_into().unwrap()) as usize;
        let meta_len = u32::from_le_bytes(bytes[20..24].try_into().unwrap()) as usize;

        let vector_end = HEADER_LEN + dim * 4;
        let total = vector_end + meta_len;
        if bytes.len() < total {
            return Err(RecordCodecError::Truncated {
                needed: total,
                have: bytes.len(),
            });
        }

        let mut vector = Vec::with_capacity(dim);
        for chunk in bytes[HEADER_LEN..vector_end].chunks_exact(4) {
            vector.push(f32::from_le_bytes(chunk.try_into().unwrap()));
        }
        let metadata: Metadata = serde_json::from_slice(&bytes[vector_end..total])
            .map_err(|e| RecordCodecError::InvalidMetadata(e.to_string()))?;

        Ok(VectorRecord {
            id: VectorId(id),
            vector,
            metadata,
            created_at,
        })
    }
}

/// `id(8) | created_at(8) | dim(4) | meta_len(4)`.
const HEADER_LEN: usize = 24;

#[derive(Debug, thiserror::Error)]
pub enum RecordCodecError {
    #[error("truncated record: needed at least {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("invalid metadata blob: {0}")]
    InvalidMetadata(String),
}
