//! Bounded best-first layer search shared by insertion and query-time
//! search: maintain a candidate heap and a result heap, both bounded by
//! `ef`, expanding only candidates that could still improve the result
//! set.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::storage::VectorProvider;

use super::graph::{Arena, NodeId};

/// Orders by distance; used both as a min-heap candidate queue (via
/// `Reverse`) and as a max-heap result set (furthest-first, so the worst
/// current result is cheap to evict).
#[derive(Debug, Clone, Copy)]
pub(crate) struct Scored {
    pub distance: f32,
    pub node: NodeId,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl Eq for Scored {}
impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.partial_cmp(&other.distance).unwrap_or(Ordering::Equal)
    }
}

/// Bounded best-first search at a single layer. Returns up to `ef` nodes
/// closest to `query`, best first.
pub(crate) fn search_layer(
    arena: &Arena,
    provider: &dyn VectorProvider,
    query: &[f32],
    entry_points: &[NodeId],
    layer: usize,
    ef: usize,
    distance: impl Fn(&[f32], &[f32]) -> f32,
) -> Vec<Scored> {
    let mut visited: HashSet<u32> = entry_points.iter().map(|n| n.0).collect();
    let mut candidates: BinaryHeap<std::cmp::Reverse<Scored>> = BinaryHeap::new();
    let mut results: BinaryHeap<Scored> = BinaryHeap::new();

    for &ep in entry_points {
        if let Some(v) = provider.vector_for(arena.node(ep).vector_id) {
            let d = distance(query, v.as_ref());
            candidates.push(std::cmp::Reverse(Scored { distance: d, node: ep }));
            results.push(Scored { distance: d, node: ep });
        }
    }

    while let Some(std::cmp::Reverse(current)) = candidates.pop() {
        if let Some(worst) = results.peek() {
            if results.len() >= ef && current.distance > worst.distance {
                break;
            }
        }

        for &neighbor in arena.neighbors(current.node, layer) {
            if arena.is_deleted(neighbor) || !visited.insert(neighbor.0) {
                continue;
            }
            let Some(v) = provider.vector_for(arena.node(neighbor).vector_id) else {
                continue;
            };
            let d = distance(query, v.as_ref());
            let should_consider = results.len() < ef || results.peek().map(|w| d < w.distance).unwrap_or(true);
            if should_consider {
                candidates.push(std::cmp::Reverse(Scored { distance: d, node: neighbor }));
                results.push(Scored { distance: d, node: neighbor });
                if results.len() > ef {
                    results.pop();
                }
            }
        }
    }

    let mut out: Vec<Scored> = results.into_vec();
    out.sort_by(|a, b| a.cmp(b));
    out
}
