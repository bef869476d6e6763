//! End-to-end scenarios exercising the `Shard` facade directly: exact
//! brute-force search ordering and query-cache hits on an unchanged shard.

use std::collections::BTreeMap;

use agentdb::metric::Metric;
use agentdb::{ShardConfig, VectorId};

fn open(metric: Metric) -> agentdb::Shard {
    agentdb::Shard::open(ShardConfig::new("s1", "node-a", metric)).expect("shard opens")
}

#[test]
fn exact_search_in_memory_orders_identical_vector_first() {
    let shard = open(Metric::Cosine);
    let a = shard
        .insert(Some(VectorId(1)), vec![1.0, 0.0, 0.0], BTreeMap::new())
        .unwrap();
    let b = shard
        .insert(Some(VectorId(2)), vec![0.0, 1.0, 0.0], BTreeMap::new())
        .unwrap();
    let c = shard
        .insert(Some(VectorId(3)), vec![0.0, 0.0, 1.0], BTreeMap::new())
        .unwrap();

    let results = shard.search(&[1.0, 0.0, 0.0], 2, Metric::Cosine, 0.0).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, a);
    assert!(results[1].0 == b || results[1].0 == c);
}

#[test]
fn repeated_search_on_unchanged_shard_hits_the_cache() {
    let shard = open(Metric::Cosine);
    shard
        .insert(Some(VectorId(1)), vec![1.0, 0.0], BTreeMap::new())
        .unwrap();
    shard
        .insert(Some(VectorId(2)), vec![0.0, 1.0], BTreeMap::new())
        .unwrap();

    let first = shard.search(&[1.0, 0.0], 5, Metric::Cosine, 0.0).unwrap();
    let misses_before = shard.stats().cache.misses;
    let hits_before = shard.stats().cache.hits;

    let second = shard.search(&[1.0, 0.0], 5, Metric::Cosine, 0.0).unwrap();
    let stats_after = shard.stats().cache;

    assert_eq!(first, second);
    assert_eq!(stats_after.misses, misses_before);
    assert!(stats_after.hits > hits_before);
}

#[test]
fn threshold_zero_means_no_filter_on_euclidean() {
    let shard = open(Metric::Euclidean);
    shard
        .insert(Some(VectorId(1)), vec![0.0, 0.0], BTreeMap::new())
        .unwrap();
    shard
        .insert(Some(VectorId(2)), vec![100.0, 100.0], BTreeMap::new())
        .unwrap();

    let results = shard.search(&[0.0, 0.0], 10, Metric::Euclidean, 0.0).unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn ties_break_lexicographically_on_identity() {
    let shard = open(Metric::Euclidean);
    shard
        .insert(Some(VectorId(2)), vec![1.0, 0.0], BTreeMap::new())
        .unwrap();
    shard
        .insert(Some(VectorId(1)), vec![1.0, 0.0], BTreeMap::new())
        .unwrap();

    let results = shard.search(&[1.0, 0.0], 2, Metric::Euclidean, 0.0).unwrap();
    assert_eq!(results[0].0, VectorId(1));
    assert_eq!(results[1].0, VectorId(2));
}
