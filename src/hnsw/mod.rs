//! Hierarchical navigable small-world approximate nearest-neighbor index.
//!
//! Entry-point descent, bounded best-first layer search, and degree-capped
//! neighbor pruning on insert. Neighbor lists are plain `Vec<NodeId>` per
//! layer rather than a packed/compressed arena — no WASM memory budget to
//! optimize against here.

mod config;
mod graph;
mod insert;
mod search;

pub use config::HnswConfig;
pub use graph::GraphError;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::record::VectorId;
use crate::storage::VectorProvider;

use graph::{Arena, NodeId};
use search::{search_layer, Scored};

/// An HNSW index over vectors fetched lazily from a [`VectorProvider`]
/// rather than stored inline. The index itself only stores ids and
/// adjacency.
pub struct HnswIndex {
    config: HnswConfig,
    arena: Arena,
    entry_point: Option<NodeId>,
    rng: ChaCha8Rng,
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Self {
        Self {
            config,
            arena: Arena::new(),
            entry_point: None,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    pub fn config(&self) -> &HnswConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.arena.live_node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, vector_id: VectorId) -> bool {
        self.arena.node_for_vector(vector_id).is_some()
    }

    /// Insert a vector into the graph. Overwriting an existing id is not
    /// supported at this layer; callers upsert by deleting first (mirrors
    /// the facade's upsert-by-delete-then-insert policy in `crate::db`).
    pub fn insert(
        &mut self,
        vector_id: VectorId,
        vector: &[f32],
        provider: &dyn VectorProvider,
    ) -> Result<(), GraphError> {
        if self.arena.node_for_vector(vector_id).is_some() {
            return Err(GraphError::AlreadyExists(vector_id));
        }
        self.insert_impl(vector_id, vector, provider);
        Ok(())
    }

    /// Approximate k-nearest-neighbor search.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        provider: &dyn VectorProvider,
    ) -> Result<Vec<(VectorId, f32)>, GraphError> {
        if k == 0 {
            return Err(GraphError::InvalidParameter("k must be positive".into()));
        }
        let Some(entry_point) = self.entry_point else {
            return Err(GraphError::NotBuilt);
        };

        let top_layer = self.arena.node(entry_point).max_layer();
        let mut current = entry_point;
        for l in (1..=top_layer).rev() {
            current = self.greedy_closest_for_search(current, query, l, provider);
        }

        let ef = k.max(self.config.ef_search);
        let results = search_layer(&self.arena, provider, query, &[current], 0, ef, |a, b| {
            self.config.metric.score(a, b)
        });

        Ok(results
            .into_iter()
            .take(k)
            .map(|Scored { node, distance }| (self.arena.node(node).vector_id, distance))
            .collect())
    }

    fn greedy_closest_for_search(
        &self,
        from: NodeId,
        query: &[f32],
        layer: usize,
        provider: &dyn VectorProvider,
    ) -> NodeId {
        let mut current = from;
        let mut current_dist = match provider.vector_for(self.arena.node(current).vector_id) {
            Some(v) => self.config.metric.score(query, v.as_ref()),
            None => f32::INFINITY,
        };
        loop {
            let mut improved = false;
            for &neighbor in self.arena.neighbors(current, layer) {
                if self.arena.is_deleted(neighbor) {
                    continue;
                }
                if let Some(v) = provider.vector_for(self.arena.node(neighbor).vector_id) {
                    let d = self.config.metric.score(query, v.as_ref());
                    if d < current_dist {
                        current = neighbor;
                        current_dist = d;
                        improved = true;
                    }
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Remove a vector: drop it from every layer, repair each former
    /// neighbor's list, and promote a new entry point if the deleted node
    /// held that role.
    pub fn delete(&mut self, vector_id: VectorId, provider: &dyn VectorProvider) -> bool {
        let Some(node_id) = self.arena.node_for_vector(vector_id) else {
            return false;
        };
        let max_layer = self.arena.node(node_id).max_layer();
        let was_entry_point = self.entry_point == Some(node_id);

        let mut affected: Vec<(NodeId, usize)> = Vec::new();
        for layer in 0..=max_layer {
            for &neighbor in self.arena.neighbors(node_id, layer) {
                affected.push((neighbor, layer));
            }
        }

        self.arena.delete(vector_id);

        for (neighbor, layer) in affected {
            if self.arena.is_deleted(neighbor) {
                continue;
            }
            let neighbors = &mut self.arena.node_mut(neighbor).layers[layer];
            neighbors.retain(|&n| n != node_id);
            let cap = if layer == 0 { self.config.m0 } else { self.config.m };
            self.prune(neighbor, layer, cap, provider);
        }

        if was_entry_point {
            self.entry_point = self.find_new_entry_point();
        }

        true
    }

    fn find_new_entry_point(&self) -> Option<NodeId> {
        // Scan is O(n) but delete-of-the-entry-point is rare.
        let mut best: Option<(NodeId, usize)> = None;
        for idx in 0..self.arena_len() {
            let id = NodeId(idx as u32);
            if self.arena.is_deleted(id) {
                continue;
            }
            let layer = self.arena.node(id).max_layer();
            if best.map(|(_, l)| layer > l).unwrap_or(true) {
                best = Some((id, layer));
            }
        }
        best.map(|(id, _)| id)
    }

    fn arena_len(&self) -> usize {
        // Exposed only to this module: number of arena slots ever
        // allocated, live or tombstoned.
        self.arena.slot_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::Metric;
    use crate::record::VectorId;
    use std::collections::HashMap;

    struct MapProvider(HashMap<VectorId, Vec<f32>>);
    impl VectorProvider for MapProvider {
        fn vector_for(&self, id: VectorId) -> Option<std::borrow::Cow<'_, [f32]>> {
            self.0.get(&id).map(|v| std::borrow::Cow::Borrowed(v.as_slice()))
        }
    }

    fn fixture(n: usize) -> (MapProvider, Vec<VectorId>) {
        let mut map = HashMap::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let id = VectorId((i + 1) as u64);
            map.insert(id, vec![i as f32, (i * 2) as f32]);
            ids.push(id);
        }
        (MapProvider(map), ids)
    }

    #[test]
    fn search_before_any_insert_is_not_built() {
        let index = HnswIndex::new(HnswConfig::new(Metric::Euclidean));
        let (provider, _) = fixture(0);
        let err = index.search(&[0.0, 0.0], 1, &provider).unwrap_err();
        assert!(matches!(err, GraphError::NotBuilt));
    }

    #[test]
    fn insert_then_search_finds_exact_match() {
        let mut index = HnswIndex::new(HnswConfig::new(Metric::Euclidean));
        let (provider, ids) = fixture(20);
        for &id in &ids {
            index.insert(id, provider.0.get(&id).unwrap(), &provider).unwrap();
        }

        let query = provider.0.get(&ids[5]).unwrap().clone();
        let results = index.search(&query, 1, &provider).unwrap();
        assert_eq!(results[0].0, ids[5]);
        assert!(results[0].1 < 1e-6);
    }

    #[test]
    fn rejects_duplicate_insert() {
        let mut index = HnswIndex::new(HnswConfig::new(Metric::Euclidean));
        let (provider, ids) = fixture(1);
        index.insert(ids[0], provider.0.get(&ids[0]).unwrap(), &provider).unwrap();
        let err = index
            .insert(ids[0], provider.0.get(&ids[0]).unwrap(), &provider)
            .unwrap_err();
        assert!(matches!(err, GraphError::AlreadyExists(_)));
    }

    #[test]
    fn delete_removes_node_and_reassigns_entry_point_if_needed() {
        let mut index = HnswIndex::new(HnswConfig::new(Metric::Euclidean));
        let (provider, ids) = fixture(10);
        for &id in &ids {
            index.insert(id, provider.0.get(&id).unwrap(), &provider).unwrap();
        }
        assert!(index.delete(ids[0], &provider));
        assert!(!index.contains(ids[0]));
        assert_eq!(index.len(), 9);

        // The remaining graph should still answer queries.
        let query = provider.0.get(&ids[5]).unwrap().clone();
        let results = index.search(&query, 3, &provider).unwrap();
        assert!(!results.is_empty());
        assert!(!results.iter().any(|(id, _)| *id == ids[0]));
    }

    #[test]
    fn recall_is_high_against_brute_force_on_random_data() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let n = 300;
        let dim = 16;
        let mut map = HashMap::new();
        let mut ids = Vec::new();
        for i in 0..n {
            let v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let id = VectorId((i + 1) as u64);
            map.insert(id, v);
            ids.push(id);
        }
        let provider = MapProvider(map);

        let mut index = HnswIndex::new(HnswConfig::new(Metric::Euclidean));
        for &id in &ids {
            index
                .insert(id, provider.0.get(&id).unwrap(), &provider)
                .unwrap();
        }

        let query = provider.0.get(&ids[0]).unwrap().clone();
        let k = 10;
        let approx = index.search(&query, k, &provider).unwrap();

        let mut brute: Vec<(VectorId, f32)> = ids
            .iter()
            .map(|&id| {
                let v = provider.0.get(&id).unwrap();
                (id, Metric::Euclidean.score(&query, v))
            })
            .collect();
        brute.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let exact: std::collections::HashSet<VectorId> = brute[..k].iter().map(|(id, _)| *id).collect();

        let overlap = approx.iter().filter(|(id, _)| exact.contains(id)).count();
        assert!(overlap as f32 / k as f32 >= 0.7, "overlap too low: {overlap}/{k}");
    }
}
