//! Storage/shard invariants: dimension invariance and the insert/get
//! round-trip, run over randomly generated vectors and ids.

use std::collections::BTreeMap;

use agentdb::metric::Metric;
use agentdb::{AgentDbError, Shard, ShardConfig, VectorId};
use proptest::prelude::*;

fn new_shard() -> Shard {
    Shard::open(ShardConfig::new("s1", "node-a", Metric::Euclidean)).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn insert_then_get_round_trips(
        vector in prop::collection::vec(-1000.0f32..1000.0, 1..16),
        id in 1u64..1_000_000,
    ) {
        let shard = new_shard();
        let vector_id = shard.insert(Some(VectorId(id)), vector.clone(), BTreeMap::new()).unwrap();
        let record = shard.get(vector_id).unwrap();
        prop_assert_eq!(record.vector, vector);
    }

    #[test]
    fn dimension_mismatch_after_first_insert_leaves_shard_unchanged(
        first in prop::collection::vec(-10.0f32..10.0, 2..5),
        second_len_offset in 1usize..4,
    ) {
        let shard = new_shard();
        shard.insert(None, first.clone(), BTreeMap::new()).unwrap();
        let count_before = shard.stats().count;

        let wrong = vec![0.0f32; first.len() + second_len_offset];
        let err = shard.insert(None, wrong, BTreeMap::new()).unwrap_err();
        prop_assert!(matches!(err, AgentDbError::Storage(_)));
        prop_assert_eq!(shard.stats().count, count_before);
    }

    #[test]
    fn delete_then_get_returns_none(
        vector in prop::collection::vec(-10.0f32..10.0, 1..8),
    ) {
        let shard = new_shard();
        let id = shard.insert(None, vector, BTreeMap::new()).unwrap();
        prop_assert!(shard.delete(id).unwrap());
        prop_assert!(shard.get(id).is_none());
        // Deleting again is not an error; it simply reports nothing changed.
        prop_assert!(!shard.delete(id).unwrap());
    }
}
