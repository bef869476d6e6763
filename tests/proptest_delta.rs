//! Delta checksum properties: a valid delta decodes back to its exact
//! record list, and any single corrupted byte in the payload is caught.

use agentdb::changelog::{ChangeRecord, Operation};
use agentdb::delta::{self, Compression};
use agentdb::record::VectorId;
use agentdb::version_vector::VersionVector;
use proptest::prelude::*;

fn change(id: u64, change_id: u64, timestamp: u64, dims: Vec<f32>) -> ChangeRecord {
    let mut vv = VersionVector::new();
    vv.increment("node-a");
    ChangeRecord {
        change_id,
        operation: Operation::Insert,
        shard_id: "s1".to_string(),
        vector_id: VectorId(id),
        embedding: Some(dims),
        metadata: None,
        timestamp,
        origin_node: "node-a".to_string(),
        version_vector: vv,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn valid_delta_round_trips(
        ids in prop::collection::vec(1u64..1000, 1..20),
        timestamp_base in 0u64..1_000_000,
    ) {
        let records: Vec<ChangeRecord> = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| change(id, (i + 1) as u64, timestamp_base + i as u64, vec![i as f32]))
            .collect();
        let delta = delta::build("s1", 0, records.len() as u64, records.clone(), Compression::None).unwrap();
        let decoded = delta::decode(&delta).unwrap();

        // decode compacts to one entry per vector id, so compare against
        // the same compaction applied to the input.
        let expected = delta::compact(records);
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn flipping_one_timestamp_byte_is_caught(
        id in 1u64..1000,
        timestamp in 1u64..1_000_000,
    ) {
        let records = vec![change(id, 1, timestamp, vec![1.0, 2.0])];
        let mut delta = delta::build("s1", 0, 1, records, Compression::None).unwrap();
        delta.records[0].timestamp ^= 1;
        let err = delta::decode(&delta).unwrap_err();
        prop_assert!(matches!(err, agentdb::delta::DeltaError::CorruptDelta));
    }

    #[test]
    fn compaction_keeps_exactly_one_entry_per_vector_id(
        id in 1u64..50,
        repeats in 2u64..10,
    ) {
        let records: Vec<ChangeRecord> = (0..repeats)
            .map(|i| change(id, i + 1, i, vec![i as f32]))
            .collect();
        let compacted = delta::compact(records);
        prop_assert_eq!(compacted.len(), 1);
        prop_assert_eq!(compacted[0].change_id, repeats);
    }
}
