//! Version vectors for causal ordering of changes across replicas.
//!
//! Keyed by node id string so serialized output is deterministic (a
//! `BTreeMap` rather than a `HashMap`), matching the determinism the delta
//! checksum in [`crate::delta`] depends on.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A causal clock: one counter per replica node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector(BTreeMap<String, u64>);

/// Result of comparing two version vectors for causal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausalOrder {
    Equal,
    Before,
    After,
    Concurrent,
}

impl VersionVector {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, node: &str) -> u64 {
        self.0.get(node).copied().unwrap_or(0)
    }

    /// Increment the counter for `node` and return the new value.
    pub fn increment(&mut self, node: &str) -> u64 {
        let entry = self.0.entry(node.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Merge another vector into this one, taking the component-wise max.
    /// Used after applying a remote change to advance local causal history.
    pub fn merge(&mut self, other: &VersionVector) {
        for (node, &counter) in &other.0 {
            let entry = self.0.entry(node.clone()).or_insert(0);
            if counter > *entry {
                *entry = counter;
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Compare causal order: `self < other` iff every
    /// component of `self` is `<=` the corresponding component of `other`
    /// and at least one is strictly less; symmetric for `>`; otherwise
    /// concurrent (or equal if every component matches).
    pub fn compare(&self, other: &VersionVector) -> CausalOrder {
        let mut self_less = false;
        let mut other_less = false;

        let mut nodes: Vec<&str> = self.0.keys().map(|s| s.as_str()).collect();
        for k in other.0.keys() {
            if !self.0.contains_key(k) {
                nodes.push(k.as_str());
            }
        }

        for node in nodes {
            let a = self.get(node);
            let b = other.get(node);
            match a.cmp(&b) {
                Ordering::Less => self_less = true,
                Ordering::Greater => other_less = true,
                Ordering::Equal => {}
            }
        }

        match (self_less, other_less) {
            (false, false) => CausalOrder::Equal,
            (true, false) => CausalOrder::Before,
            (false, true) => CausalOrder::After,
            (true, true) => CausalOrder::Concurrent,
        }
    }

    pub fn is_concurrent_with(&self, other: &VersionVector) -> bool {
        matches!(self.compare(other), CausalOrder::Concurrent)
    }
}

impl From<BTreeMap<String, u64>> for VersionVector {
    fn from(map: BTreeMap<String, u64>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_vectors_are_equal() {
        let a = VersionVector::new();
        let b = VersionVector::new();
        assert_eq!(a.compare(&b), CausalOrder::Equal);
    }

    #[test]
    fn strictly_advancing_one_node_orders_before_after() {
        let mut a = VersionVector::new();
        a.increment("n1");
        let b = a.clone();
        let mut c = b.clone();
        c.increment("n1");

        assert_eq!(a.compare(&c), CausalOrder::Before);
        assert_eq!(c.compare(&a), CausalOrder::After);
    }

    #[test]
    fn divergent_nodes_are_concurrent() {
        let mut a = VersionVector::new();
        a.increment("n1");
        let mut b = VersionVector::new();
        b.increment("n2");

        assert_eq!(a.compare(&b), CausalOrder::Concurrent);
        assert!(a.is_concurrent_with(&b));
    }

    #[test]
    fn merge_takes_componentwise_max() {
        let mut a = VersionVector::new();
        a.increment("n1");
        a.increment("n1");
        let mut b = VersionVector::new();
        b.increment("n1");
        b.increment("n2");

        a.merge(&b);
        assert_eq!(a.get("n1"), 2);
        assert_eq!(a.get("n2"), 1);
    }
}
