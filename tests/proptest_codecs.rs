//! Quantization codec round-trip accuracy: decoding an encoded vector stays
//! within each codec's expected error bound on randomly distributed input.

use agentdb::quantization::binary::{BinaryConfig, BinaryQuantizer, ThresholdMethod};
use agentdb::quantization::scalar::{ScalarConfig, ScalarQuantizer};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn scalar_8bit_decode_error_is_bounded(
        values in prop::collection::vec(-1.0f32..1.0, 8..64),
    ) {
        let samples = vec![vec![-1.0; values.len()], vec![1.0; values.len()]];
        let q = ScalarQuantizer::train(&ScalarConfig { bit_depth: 8 }, &samples).unwrap();
        let code = q.encode(&values).unwrap();
        let restored = q.decode(&code).unwrap();

        for (a, b) in values.iter().zip(restored.iter()) {
            prop_assert!((a - b).abs() < 0.02, "expected {a} ~= {b} within 0.02");
        }
    }

    #[test]
    fn binary_encode_decode_preserves_sign(
        values in prop::collection::vec(-100.0f32..100.0, 8..64),
    ) {
        // Degenerate inputs (every component exactly 0.0) can't have a
        // stable sign to preserve under a zero threshold.
        prop_assume!(values.iter().all(|&v| v != 0.0));

        let q = BinaryQuantizer::train(
            &BinaryConfig { method: ThresholdMethod::Fixed(0.0), asymmetric: true },
            &[values.clone()],
        )
        .unwrap();
        let code = q.encode(&values).unwrap();
        let restored = q.decode(&code).unwrap();

        for (original, bit) in values.iter().zip(restored.iter()) {
            prop_assert_eq!(original.is_sign_positive(), *bit > 0.0);
        }
    }
}
