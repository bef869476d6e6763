//! The HNSW node arena.
//!
//! Neighbor lists are vectors of compact integer ids into a slab, not
//! pointers, with `VectorId` (the external id) kept distinct from `NodeId`
//! (the internal arena slot). No packed/compressed neighbor pool: that
//! kind of byte-level compaction exists to shrink WASM memory footprint,
//! which doesn't apply to a native target.

use std::collections::HashMap;

use thiserror::Error;

use crate::record::VectorId;

/// Compact arena index for a node. Distinguished from [`VectorId`] so
/// neighbor lists stay a dense `u32` rather than the wider external id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("hnsw index has not been built (no vectors inserted)")]
    NotBuilt,
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector {0:?} already present in the index")]
    AlreadyExists(VectorId),
    #[error("vector {0:?} not found in the index")]
    NotFound(VectorId),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// One node's adjacency lists, one `Vec<NodeId>` per layer it participates
/// in (`layers[0]` is always present; `layers.len() - 1` is the node's max
/// layer).
#[derive(Debug, Clone)]
pub struct HnswNode {
    pub vector_id: VectorId,
    pub layers: Vec<Vec<NodeId>>,
}

impl HnswNode {
    pub fn max_layer(&self) -> usize {
        self.layers.len() - 1
    }
}

/// Slab of nodes plus the reverse `VectorId -> NodeId` index and tombstones
/// for deleted slots. Slots are never reused within a session: the single-
/// writer mutation path repairs every neighbor list synchronously on
/// delete, so there is never a dangling reference for a reused slot to
/// hide behind.
#[derive(Debug, Default)]
pub struct Arena {
    nodes: Vec<HnswNode>,
    tombstones: Vec<bool>,
    index: HashMap<VectorId, NodeId>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, vector_id: VectorId, max_layer: usize) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(HnswNode {
            vector_id,
            layers: vec![Vec::new(); max_layer + 1],
        });
        self.tombstones.push(false);
        self.index.insert(vector_id, id);
        id
    }

    pub fn node(&self, id: NodeId) -> &HnswNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut HnswNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn node_for_vector(&self, vector_id: VectorId) -> Option<NodeId> {
        self.index.get(&vector_id).copied()
    }

    pub fn is_deleted(&self, id: NodeId) -> bool {
        self.tombstones[id.0 as usize]
    }

    pub fn delete(&mut self, vector_id: VectorId) -> Option<NodeId> {
        let id = self.index.remove(&vector_id)?;
        self.tombstones[id.0 as usize] = true;
        Some(id)
    }

    pub fn live_node_count(&self) -> usize {
        self.index.len()
    }

    /// Total arena slots ever allocated, live or tombstoned.
    pub fn slot_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn neighbors(&self, id: NodeId, layer: usize) -> &[NodeId] {
        self.nodes[id.0 as usize]
            .layers
            .get(layer)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}
