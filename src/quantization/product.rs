//! Product quantization: split each vector into `m` sub-vectors, replace
//! each with the id of its nearest centroid in a sub-vector-specific
//! codebook learned by k-means.
//!
//! Follows the same `train -> encode -> decode -> asymmetric_distance`
//! lifecycle the other two codecs share, using `rand`/`rand_chacha` (also
//! used for HNSW level sampling) to seed k-means centroids.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{QuantizationError, QuantizationResult};

#[derive(Debug, Clone)]
pub struct ProductConfig {
    pub dimension: usize,
    /// Number of sub-vectors; must divide `dimension` evenly.
    pub sub_count: usize,
    /// Bits per code; only values `<= 8` are supported (one byte per code).
    pub bits: u8,
    pub kmeans_iterations: usize,
    pub seed: u64,
}

impl ProductConfig {
    pub fn new(dimension: usize, sub_count: usize, bits: u8) -> Self {
        Self {
            dimension,
            sub_count,
            bits,
            kmeans_iterations: 20,
            seed: 0,
        }
    }

    fn sub_dimension(&self) -> usize {
        self.dimension / self.sub_count
    }

    fn centroid_count(&self) -> usize {
        1usize << self.bits
    }
}

/// One k-means codebook per sub-vector slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebook {
    dimension: usize,
    sub_count: usize,
    sub_dimension: usize,
    bits: u8,
    /// `sub_count` codebooks, each `centroid_count` centroids of length
    /// `sub_dimension`.
    centroids: Vec<Vec<Vec<f32>>>,
}

/// An `m`-byte code, one byte (centroid id) per sub-vector. Only bit depths
/// `<= 8` are supported ("for `b <= 8`").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductCode(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl Codebook {
    pub fn train(config: &ProductConfig, samples: &[Vec<f32>]) -> QuantizationResult<Self> {
        if samples.is_empty() {
            return Err(QuantizationError::EmptyTrainingSet);
        }
        if config.bits > 8 {
            return Err(QuantizationError::UnsupportedBitDepth(config.bits));
        }
        if config.sub_count == 0 || config.dimension % config.sub_count != 0 {
            return Err(QuantizationError::InvalidSubvectorCount {
                sub_count: config.sub_count,
                dimension: config.dimension,
            });
        }
        for sample in samples {
            if sample.len() != config.dimension {
                return Err(QuantizationError::DimensionMismatch {
                    expected: config.dimension,
                    actual: sample.len(),
                });
            }
        }

        let sub_dimension = config.sub_dimension();
        let k = config.centroid_count();
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut centroids = Vec::with_capacity(config.sub_count);
        for sub in 0..config.sub_count {
            let start = sub * sub_dimension;
            let end = start + sub_dimension;
            let sub_vectors: Vec<&[f32]> = samples.iter().map(|v| &v[start..end]).collect();
            centroids.push(train_kmeans(&sub_vectors, k, config.kmeans_iterations, &mut rng));
        }

        Ok(Self {
            dimension: config.dimension,
            sub_count: config.sub_count,
            sub_dimension,
            bits: config.bits,
            centroids,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// `4d / (m * ceil(b/8))`.
    pub fn compression_ratio(&self) -> f32 {
        let bytes_per_code = ((self.bits as usize) + 7) / 8;
        (4 * self.dimension) as f32 / (self.sub_count * bytes_per_code.max(1)) as f32
    }

    pub fn encode(&self, vector: &[f32]) -> QuantizationResult<ProductCode> {
        if vector.len() != self.dimension {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let mut code = Vec::with_capacity(self.sub_count);
        for sub in 0..self.sub_count {
            let start = sub * self.sub_dimension;
            let end = start + self.sub_dimension;
            let sub_vector = &vector[start..end];
            let nearest = nearest_centroid(sub_vector, &self.centroids[sub]);
            code.push(nearest as u8);
        }
        Ok(ProductCode(code))
    }

    pub fn decode(&self, code: &ProductCode) -> QuantizationResult<Vec<f32>> {
        if code.0.len() != self.sub_count {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.sub_count,
                actual: code.0.len(),
            });
        }
        let mut out = Vec::with_capacity(self.dimension);
        for (sub, &id) in code.0.iter().enumerate() {
            out.extend_from_slice(&self.centroids[sub][id as usize]);
        }
        Ok(out)
    }

    /// Sum of squared distances between each query sub-vector and the
    /// centroid its code selected, then square-rooted.
    pub fn asymmetric_distance(&self, query: &[f32], code: &ProductCode) -> QuantizationResult<f32> {
        if query.len() != self.dimension {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if code.0.len() != self.sub_count {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.sub_count,
                actual: code.0.len(),
            });
        }
        let mut sum = 0.0f32;
        for (sub, &id) in code.0.iter().enumerate() {
            let start = sub * self.sub_dimension;
            let end = start + self.sub_dimension;
            let centroid = &self.centroids[sub][id as usize];
            sum += squared_distance(&query[start..end], centroid);
        }
        Ok(sum.sqrt())
    }
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(v, c);
        if d < best_dist {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// Lloyd's algorithm with random-sample seeding, run for a fixed iteration
/// count (no convergence check, matching the "until max
/// iterations reached").
fn train_kmeans(data: &[&[f32]], k: usize, iterations: usize, rng: &mut ChaCha8Rng) -> Vec<Vec<f32>> {
    let dim = data[0].len();
    let k = k.min(data.len()).max(1);

    let mut indices: Vec<usize> = (0..data.len()).collect();
    indices.shuffle(rng);
    let mut centroids: Vec<Vec<f32>> = indices[..k].iter().map(|&i| data[i].to_vec()).collect();

    for _ in 0..iterations {
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];

        for point in data {
            let cluster = nearest_centroid(point, &centroids);
            counts[cluster] += 1;
            for (s, &x) in sums[cluster].iter_mut().zip(*point) {
                *s += x;
            }
        }

        for c in 0..k {
            if counts[c] > 0 {
                for d in 0..dim {
                    centroids[c][d] = sums[c][d] / counts[c] as f32;
                }
            }
        }
    }

    // Pad out to the full `2^bits` codebook size so encoded ids always fit
    // in the configured bit depth, repeating the last centroid if the
    // training set had fewer distinct points than requested clusters.
    while centroids.len() < k {
        centroids.push(centroids.last().cloned().unwrap_or_else(|| vec![0.0; dim]));
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Vec<f32>> {
        vec![
            vec![0.0, 0.0, 10.0, 10.0],
            vec![0.1, -0.1, 10.1, 9.9],
            vec![5.0, 5.0, -5.0, -5.0],
            vec![5.1, 4.9, -4.9, -5.1],
        ]
    }

    #[test]
    fn encode_decode_recovers_approximate_vector() {
        let config = ProductConfig::new(4, 2, 4);
        let codebook = Codebook::train(&config, &samples()).unwrap();

        let code = codebook.encode(&[0.0, 0.0, 10.0, 10.0]).unwrap();
        let restored = codebook.decode(&code).unwrap();
        for (a, b) in [0.0, 0.0, 10.0, 10.0].iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1.0, "expected {a} ~= {b}");
        }
    }

    #[test]
    fn asymmetric_distance_is_small_for_training_point() {
        let config = ProductConfig::new(4, 2, 4);
        let codebook = Codebook::train(&config, &samples()).unwrap();
        let code = codebook.encode(&[5.0, 5.0, -5.0, -5.0]).unwrap();
        let d = codebook
            .asymmetric_distance(&[5.0, 5.0, -5.0, -5.0], &code)
            .unwrap();
        assert!(d < 1.0);
    }

    #[test]
    fn rejects_dimension_not_divisible_by_subvector_count() {
        let config = ProductConfig::new(5, 2, 4);
        let err = Codebook::train(&config, &samples()).unwrap_err();
        assert!(matches!(err, QuantizationError::InvalidSubvectorCount { .. }));
    }

    #[test]
    fn compression_ratio_matches_formula() {
        let config = ProductConfig::new(128, 8, 8);
        let codebook = Codebook::train(&config, &vec![vec![0.0; 128]; 4]).unwrap();
        assert_eq!(codebook.compression_ratio(), (4.0 * 128.0) / 8.0);
    }
}
