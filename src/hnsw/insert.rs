//! Insertion: greedy-descend to the new node's sampled layer, then run a
//! bounded best-first search at each layer down to 0, selecting and wiring
//! neighbors with degree-capped pruning.

use rand::Rng;

use crate::storage::VectorProvider;

use super::graph::{Arena, NodeId};
use super::search::{search_layer, Scored};
use super::HnswIndex;

impl HnswIndex {
    /// Sample a layer: `L = floor(-ln(u) * (1 / ln(M)))`
    /// for `u` uniform on `(0, 1]`.
    pub(super) fn sample_layer(&mut self) -> usize {
        let u: f64 = loop {
            let u = self.rng.gen::<f64>();
            if u > 0.0 {
                break u;
            }
        };
        (-u.ln() * self.config.level_scale()).floor() as usize
    }

    pub(super) fn insert_impl(
        &mut self,
        vector_id: crate::record::VectorId,
        vector: &[f32],
        provider: &dyn VectorProvider,
    ) {
        let layer = self.sample_layer();
        let node_id = self.arena.insert(vector_id, layer);

        let Some(entry_point) = self.entry_point else {
            self.entry_point = Some(node_id);
            return;
        };
        let entry_layer = self.arena.node(entry_point).max_layer();

        // Greedy-descend from the entry point down to `layer + 1`,
        // tracking the single closest node found at each level.
        let mut current = entry_point;
        if entry_layer > layer {
            for l in (layer + 1..=entry_layer).rev() {
                current = self.greedy_closest(current, vector, l, provider);
            }
        }

        // From `min(layer, entry_layer)` down to 0, run a bounded
        // best-first search and wire neighbors.
        let mut entry_points = vec![current];
        for l in (0..=layer.min(entry_layer)).rev() {
            let candidates = search_layer(
                &self.arena,
                provider,
                vector,
                &entry_points,
                l,
                self.config.ef_construction,
                |a, b| self.config.metric.score(a, b),
            );

            let cap = if l == 0 { self.config.m0 } else { self.config.m };
            let selected = select_neighbors(&candidates, cap);

            for &Scored { node: neighbor, .. } in &selected {
                connect(&mut self.arena, node_id, neighbor, l);
                connect(&mut self.arena, neighbor, node_id, l);
                self.prune(neighbor, l, cap, provider);
            }

            entry_points = candidates.iter().map(|s| s.node).collect();
            if entry_points.is_empty() {
                entry_points = vec![current];
            }
        }

        if layer > entry_layer {
            self.entry_point = Some(node_id);
        }
    }

    fn greedy_closest(
        &self,
        from: NodeId,
        query: &[f32],
        layer: usize,
        provider: &dyn VectorProvider,
    ) -> NodeId {
        let mut current = from;
        let mut current_dist = self.distance_to(current, query, provider);
        loop {
            let mut improved = false;
            for &neighbor in self.arena.neighbors(current, layer) {
                if self.arena.is_deleted(neighbor) {
                    continue;
                }
                let d = self.distance_to(neighbor, query, provider);
                if d < current_dist {
                    current = neighbor;
                    current_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    fn distance_to(&self, node: NodeId, query: &[f32], provider: &dyn VectorProvider) -> f32 {
        match provider.vector_for(self.arena.node(node).vector_id) {
            Some(v) => self.config.metric.score(query, v.as_ref()),
            None => f32::INFINITY,
        }
    }

    /// Re-select a node's neighbor list at `layer` down to `cap` entries
    /// after a new edge pushed its degree over the cap
    /// step 3's pruning rule: keep the `cap` closest under the same metric.
    pub(super) fn prune(&mut self, node: NodeId, layer: usize, cap: usize, provider: &dyn VectorProvider) {
        let current_len = self.arena.neighbors(node, layer).len();
        if current_len <= cap {
            return;
        }
        let query_vec = match provider.vector_for(self.arena.node(node).vector_id) {
            Some(v) => v.into_owned(),
            None => return,
        };
        let mut scored: Vec<Scored> = self
            .arena
            .neighbors(node, layer)
            .iter()
            .filter(|&&n| !self.arena.is_deleted(n))
            .filter_map(|&n| {
                provider
                    .vector_for(self.arena.node(n).vector_id)
                    .map(|v| Scored {
                        distance: self.config.metric.score(&query_vec, v.as_ref()),
                        node: n,
                    })
            })
            .collect();
        scored.sort_by(|a, b| a.cmp(b));
        scored.truncate(cap);
        self.arena.node_mut(node).layers[layer] = scored.into_iter().map(|s| s.node).collect();
    }
}

fn select_neighbors(candidates: &[Scored], cap: usize) -> Vec<Scored> {
    candidates.iter().take(cap).copied().collect()
}

fn connect(arena: &mut Arena, from: NodeId, to: NodeId, layer: usize) {
    let neighbors = &mut arena.node_mut(from).layers[layer];
    if !neighbors.contains(&to) {
        neighbors.push(to);
    }
}
