//! Binary quantization: one sign bit per dimension.
//!
//! Bit `i` of byte `i/8` (LSB first) holds dimension `i`'s sign relative to
//! a threshold, which can be an explicit fixed value or the median of the
//! training set rather than always zero. Distance between two codes is
//! Hamming distance via XOR+popcount.

use serde::{Deserialize, Serialize};

use super::{QuantizationError, QuantizationResult};

/// How the quantization threshold is derived.
#[derive(Debug, Clone, Copy)]
pub enum ThresholdMethod {
    Fixed(f32),
    MedianOfTrainingSet,
}

#[derive(Debug, Clone, Copy)]
pub struct BinaryConfig {
    pub method: ThresholdMethod,
    /// When true, [`BinaryQuantizer::asymmetric_distance`] compares the raw
    /// float query against the `±1` expansion of each code instead of first
    /// encoding the query to bits.
    pub asymmetric: bool,
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::Fixed(0.0),
            asymmetric: true,
        }
    }
}

/// Trained threshold plus the dimension it was trained for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryQuantizer {
    dimension: usize,
    threshold: f32,
    asymmetric: bool,
}

/// A packed binary code: `ceil(d / 8)` bytes, bit `i` of byte `i/8` (counted
/// from the LSB) set iff the source dimension `i` exceeded the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryCode(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl BinaryQuantizer {
    pub fn train(config: &BinaryConfig, samples: &[Vec<f32>]) -> QuantizationResult<Self> {
        let dimension = samples
            .first()
            .ok_or(QuantizationError::EmptyTrainingSet)?
            .len();
        for sample in samples {
            if sample.len() != dimension {
                return Err(QuantizationError::DimensionMismatch {
                    expected: dimension,
                    actual: sample.len(),
                });
            }
        }

        let threshold = match config.method {
            ThresholdMethod::Fixed(t) => t,
            ThresholdMethod::MedianOfTrainingSet => median_of_all(samples),
        };

        Ok(Self {
            dimension,
            threshold,
            asymmetric: config.asymmetric,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn packed_len(&self) -> usize {
        (self.dimension + 7) / 8
    }

    pub fn encode(&self, vector: &[f32]) -> QuantizationResult<BinaryCode> {
        if vector.len() != self.dimension {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let mut bytes = vec![0u8; self.packed_len()];
        for (i, &x) in vector.iter().enumerate() {
            if x > self.threshold {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(BinaryCode(bytes))
    }

    /// Reconstruct a lossy `{+1, -1}` approximation of the original vector.
    pub fn decode(&self, code: &BinaryCode) -> QuantizationResult<Vec<f32>> {
        if code.0.len() != self.packed_len() {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.packed_len(),
                actual: code.0.len(),
            });
        }
        Ok((0..self.dimension)
            .map(|i| if bit_set(&code.0, i) { 1.0 } else { -1.0 })
            .collect())
    }

    /// Symmetric comparison between two codes: Hamming distance via
    /// XOR + popcount.
    pub fn hamming_distance(&self, a: &BinaryCode, b: &BinaryCode) -> u32 {
        crate::metric::hamming_distance(&a.0, &b.0)
    }

    /// Distance between an uncompressed query and a compressed record.
    /// Always returns a *distance* (lower is better), never a similarity.
    pub fn asymmetric_distance(&self, query: &[f32], code: &BinaryCode) -> QuantizationResult<f32> {
        if query.len() != self.dimension {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if code.0.len() != self.packed_len() {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.packed_len(),
                actual: code.0.len(),
            });
        }
        if self.asymmetric {
            let sum: f32 = query
                .iter()
                .enumerate()
                .map(|(i, &q)| {
                    let bit = if bit_set(&code.0, i) { 1.0 } else { -1.0 };
                    let d = q - bit;
                    d * d
                })
                .sum();
            Ok(sum.sqrt())
        } else {
            let query_code = self.encode(query)?;
            Ok(self.hamming_distance(&query_code, code) as f32)
        }
    }
}

fn bit_set(bytes: &[u8], i: usize) -> bool {
    (bytes[i / 8] >> (i % 8)) & 1 == 1
}

fn median_of_all(samples: &[Vec<f32>]) -> f32 {
    let mut all: Vec<f32> = samples.iter().flatten().copied().collect();
    all.sort_by(|a, b| a.partial_cmp(b).unwrap());
    if all.is_empty() {
        return 0.0;
    }
    let mid = all.len() / 2;
    if all.len() % 2 == 0 {
        (all[mid - 1] + all[mid]) / 2.0
    } else {
        all[mid]
    }
}
