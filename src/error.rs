//! Unified error type for AgentDB, composed from each component's own error enum.

use thiserror::Error;

use crate::cache::CacheError;
use crate::changelog::ChangelogError;
use crate::delta::DeltaError;
use crate::hnsw::GraphError;
use crate::quantization::QuantizationError;
use crate::storage::StorageError;
use crate::sync::{CoordinatorError, SyncError};

/// Top-level error type returned by every public AgentDB operation.
#[derive(Debug, Error)]
pub enum AgentDbError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Quantization(#[from] QuantizationError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Changelog(#[from] ChangelogError),

    #[error(transparent)]
    Delta(#[from] DeltaError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("vector {0:?} not found")]
    NotFound(crate::record::VectorId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AgentDbError>;
