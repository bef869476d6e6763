//! Scoring kernels: Euclidean, dot product, and cosine similarity.
//!
//! Deliberately no arch-specific SIMD dispatch: AgentDB is not a WASM
//! target, and hand-rolled unsafe SIMD kernels without test coverage
//! aren't worth the risk. Kernels stay pure portable Rust behind one
//! `Metric` seam so a SIMD backend could be dropped in later without
//! touching call sites.

use serde::{Deserialize, Serialize};

/// Distance/similarity metric selectable per shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    Euclidean,
    DotProduct,
    Cosine,
}

impl Metric {
    /// Compute the configured metric between two equal-length vectors.
    ///
    /// For `Euclidean` this is a distance (smaller is closer); for
    /// `DotProduct` and `Cosine` this is a similarity (larger is closer).
    /// Callers that need a uniform "smaller is better" ordering should use
    /// [`Metric::score`] instead.
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len(), "metric inputs must share dimension");
        match self {
            Metric::Euclidean => euclidean_distance(a, b),
            Metric::DotProduct => dot_product(a, b),
            Metric::Cosine => cosine_similarity(a, b),
        }
    }

    /// Ranking score where smaller is always closer, regardless of metric.
    /// Similarities are negated so a single comparator works for top-k
    /// selection across all three metrics.
    pub fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Euclidean => self.compute(a, b),
            Metric::DotProduct | Metric::Cosine => -self.compute(a, b),
        }
    }
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a).sqrt();
    let norm_b = dot_product(b, b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Hamming distance between two bit-packed binary vectors (popcount of XOR).
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    debug_assert_eq!(a.len(), b.len(), "hamming inputs must share byte length");
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn euclidean_of_identical_vectors_is_zero() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(euclidean_distance(&v, &v), 0.0);
    }

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![2.0, 4.0, 6.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn score_orients_similarities_as_smaller_is_closer() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![-1.0, 0.0];
        assert!(Metric::Cosine.score(&a, &b) < Metric::Cosine.score(&a, &c));
    }

    #[test]
    fn hamming_counts_differing_bits() {
        assert_eq!(hamming_distance(&[0b1111_0000], &[0b0000_1111]), 8);
        assert_eq!(hamming_distance(&[0xFF], &[0xFF]), 0);
    }
}
