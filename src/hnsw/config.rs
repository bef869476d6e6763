//! HNSW tuning parameters.
//!
//! Field set: `m`, `m0`, `ef_construction`, `ef_search`, `metric`. A plain
//! `serde` struct rather than a `#[repr(C)]` POD layout, since there's no
//! fixed memory budget to pack against on a native target.

use serde::{Deserialize, Serialize};

use crate::metric::Metric;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswConfig {
    /// Target neighbors per node at layers above 0.
    pub m: usize,
    /// Target neighbors per node at layer 0, typically `2 * m`.
    pub m0: usize,
    /// Candidate pool size during insertion.
    pub ef_construction: usize,
    /// Default candidate pool size during search when the caller doesn't
    /// override it; effective `ef` is `max(k, ef_search)`.
    pub ef_search: usize,
    /// Metric the index is built for. An index supports exactly one
    /// metric; a shard wanting another metric needs its own index (or
    /// brute force).
    pub metric: Metric,
    /// Below this record count, brute force is used instead of the index.
    pub min_vectors_for_index: usize,
}

impl HnswConfig {
    pub fn new(metric: Metric) -> Self {
        Self {
            m: 16,
            m0: 32,
            ef_construction: 200,
            ef_search: 100,
            metric,
            min_vectors_for_index: 1_000,
        }
    }

    /// `1 / ln(m)`, the scale of the exponential layer-assignment
    /// distribution.
    pub(crate) fn level_scale(&self) -> f64 {
        1.0 / (self.m.max(2) as f64).ln()
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::new(Metric::Euclidean)
    }
}
