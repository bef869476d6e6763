//! Per-dimension scalar quantization at 4, 8, or 16 bits.
//!
//! Trains a per-dimension `{min, max}` pair rather than a single global
//! one, at a caller-selected bit depth.

use serde::{Deserialize, Serialize};

use super::{QuantizationError, QuantizationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitDepth {
    Four,
    Eight,
    Sixteen,
}

impl BitDepth {
    fn max_level(self) -> u32 {
        match self {
            BitDepth::Four => (1 << 4) - 1,
            BitDepth::Eight => (1 << 8) - 1,
            BitDepth::Sixteen => (1 << 16) - 1,
        }
    }

    fn validate(bits: u8) -> QuantizationResult<Self> {
        match bits {
            4 => Ok(BitDepth::Four),
            8 => Ok(BitDepth::Eight),
            16 => Ok(BitDepth::Sixteen),
            other => Err(QuantizationError::UnsupportedBitDepth(other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScalarConfig {
    pub bit_depth: u8,
}

/// Trained per-dimension `{min, max}` bounds plus the bit depth levels are
/// quantized into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    bit_depth: BitDepth,
    mins: Vec<f32>,
    maxs: Vec<f32>,
}

/// A quantized vector: one integer level per dimension, packed into `u32`
/// for simplicity across all three bit depths (the caller picks the bit
/// depth; this is not a further bit-packed on-disk form).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedVector {
    pub levels: Vec<u32>,
}

/// A packed scalar code: the on-disk/on-wire byte form of a
/// [`QuantizedVector`]. 4-bit codes pack two values per byte (first value
/// in the low nibble); 8-bit codes are one byte per
/// value; 16-bit codes are two little-endian bytes per value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalarCode(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl ScalarQuantizer {
    /// Train per-dimension bounds from a representative sample of vectors.
    /// Degenerate dimensions (all training values equal) get a bound of
    /// width 1.0 centered on the constant value so dequantization never
    /// divides by zero.
    pub fn train(config: &ScalarConfig, samples: &[Vec<f32>]) -> QuantizationResult<Self> {
        let bit_depth = BitDepth::validate(config.bit_depth)?;
        let dim = samples.first().ok_or(QuantizationError::EmptyTrainingSet)?.len();

        let mut mins = vec![f32::INFINITY; dim];
        let mut maxs = vec![f32::NEG_INFINITY; dim];
        for sample in samples {
            if sample.len() != dim {
                return Err(QuantizationError::DimensionMismatch {
                    expected: dim,
                    actual: sample.len(),
                });
            }
            for (i, &x) in sample.iter().enumerate() {
                mins[i] = mins[i].min(x);
                maxs[i] = maxs[i].max(x);
            }
        }
        for i in 0..dim {
            if (maxs[i] - mins[i]).abs() < f32::EPSILON {
                mins[i] -= 0.5;
                maxs[i] += 0.5;
            }
        }

        Ok(Self { bit_depth, mins, maxs })
    }

    pub fn dimension(&self) -> usize {
        self.mins.len()
    }

    pub fn quantize(&self, vector: &[f32]) -> QuantizationResult<QuantizedVector> {
        if vector.len() != self.dimension() {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.dimension(),
                actual: vector.len(),
            });
        }
        let max_level = self.bit_depth.max_level() as f32;
        let levels = vector
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let clamped = x.clamp(self.mins[i], self.maxs[i]);
                let span = self.maxs[i] - self.mins[i];
                let normalized = (clamped - self.mins[i]) / span;
                (normalized * max_level).round() as u32
            })
            .collect();
        Ok(QuantizedVector { levels })
    }

    pub fn dequantize(&self, quantized: &QuantizedVector) -> QuantizationResult<Vec<f32>> {
        if quantized.levels.len() != self.dimension() {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.dimension(),
                actual: quantized.levels.len(),
            });
        }
        let max_level = self.bit_depth.max_level() as f32;
        Ok(quantized
            .levels
            .iter()
            .enumerate()
            .map(|(i, &level)| {
                let normalized = level as f32 / max_level;
                self.mins[i] + normalized * (self.maxs[i] - self.mins[i])
            })
            .collect())
    }

    pub fn bit_depth(&self) -> u8 {
        match self.bit_depth {
            BitDepth::Four => 4,
            BitDepth::Eight => 8,
            BitDepth::Sixteen => 16,
        }
    }

    /// Encode straight to the packed byte form (`train -> encode -> decode
    /// -> asymmetric_distance` lifecycle shared with the other codecs).
    pub fn encode(&self, vector: &[f32]) -> QuantizationResult<ScalarCode> {
        let quantized = self.quantize(vector)?;
        Ok(ScalarCode(self.pack(&quantized)))
    }

    pub fn decode(&self, code: &ScalarCode) -> QuantizationResult<Vec<f32>> {
        let quantized = self.unpack(&code.0)?;
        self.dequantize(&quantized)
    }

    /// Decode then Euclidean distance.
    pub fn asymmetric_distance(&self, query: &[f32], code: &ScalarCode) -> QuantizationResult<f32> {
        if query.len() != self.dimension() {
            return Err(QuantizationError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        let decoded = self.decode(code)?;
        Ok(crate::metric::euclidean_distance(query, &decoded))
    }

    fn pack(&self, quantized: &QuantizedVector) -> Vec<u8> {
        match self.bit_depth {
            BitDepth::Four => {
                let mut bytes = Vec::with_capacity((quantized.levels.len() + 1) / 2);
                for pair in quantized.levels.chunks(2) {
                    let low = pair[0] as u8 & 0x0F;
                    let high = pair.get(1).map(|&v| (v as u8 & 0x0F) << 4).unwrap_or(0);
                    bytes.push(low | high);
                }
                bytes
            }
            BitDepth::Eight => quantized.levels.iter().map(|&v| v as u8).collect(),
            BitDepth::Sixteen => {
                let mut bytes = Vec::with_capacity(quantized.levels.len() * 2);
                for &v in &quantized.levels {
                    bytes.extend_from_slice(&(v as u16).to_le_bytes());
                }
                bytes
            }
        }
    }

    fn unpack(&self, bytes: &[u8]) -> QuantizationResult<QuantizedVector> {
        let dim = self.dimension();
        let levels = match self.bit_depth {
            BitDepth::Four => {
                let expected = (dim + 1) / 2;
                if bytes.len() != expected {
                    return Err(QuantizationError::DimensionMismatch {
                        expected,
                        actual: bytes.len(),
                    });
                }
                let mut levels = Vec::with_capacity(dim);
                for &byte in bytes.iter() {
                    levels.push((byte & 0x0F) as u32);
                    levels.push(((byte >> 4) & 0x0F) as u32);
                }
                levels.truncate(dim);
                levels
            }
            BitDepth::Eight => {
                if bytes.len() != dim {
                    return Err(QuantizationError::DimensionMismatch {
                        expected: dim,
                        actual: bytes.len(),
                    });
                }
                bytes.iter().map(|&b| b as u32).collect()
            }
            BitDepth::Sixteen => {
                let expected = dim * 2;
                if bytes.len() != expected {
                    return Err(QuantizationError::DimensionMismatch {
                        expected,
                        actual: bytes.len(),
                    });
                }
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
                    .collect()
            }
        };
        Ok(QuantizedVector { levels })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_dequantize_is_approximately_identity_at_8_bits() {
        let samples = vec![vec![0.0, 0.0], vec![10.0, -5.0], vec![5.0, 2.5]];
        let q = ScalarQuantizer::train(&ScalarConfig { bit_depth: 8 }, &samples).unwrap();

        let original = vec![5.0, 2.5];
        let quantized = q.quantize(&original).unwrap();
        let restored = q.dequantize(&quantized).unwrap();

        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 0.1, "expected {a} ~= {b}");
        }
    }

    #[test]
    fn handles_degenerate_constant_dimension() {
        let samples = vec![vec![3.0], vec![3.0], vec![3.0]];
        let q = ScalarQuantizer::train(&ScalarConfig { bit_depth: 4 }, &samples).unwrap();
        let quantized = q.quantize(&[3.0]).unwrap();
        let restored = q.dequantize(&quantized).unwrap();
        assert!((restored[0] - 3.0).abs() < 0.2);
    }

    #[test]
    fn rejects_unsupported_bit_depth() {
        let samples = vec![vec![1.0]];
        let err = ScalarQuantizer::train(&ScalarConfig { bit_depth: 5 }, &samples).unwrap_err();
        assert!(matches!(err, QuantizationError::UnsupportedBitDepth(5)));
    }

    #[test]
    fn rejects_dimension_mismatch_on_quantize() {
        let samples = vec![vec![1.0, 2.0]];
        let q = ScalarQuantizer::train(&ScalarConfig { bit_depth: 8 }, &samples).unwrap();
        let err = q.quantize(&[1.0]).unwrap_err();
        assert!(matches!(err, QuantizationError::DimensionMismatch { .. }));
    }

    #[test]
    fn four_bit_packing_round_trips() {
        let samples = vec![vec![0.0, 0.0, 0.0], vec![10.0, -5.0, 1.0]];
        let q = ScalarQuantizer::train(&ScalarConfig { bit_depth: 4 }, &samples).unwrap();
        let original = vec![5.0, -2.0, 0.5];
        let code = q.encode(&original).unwrap();
        // 3 dims at 4 bits pack into 2 bytes (second byte's high nibble unused).
        assert_eq!(code.0.len(), 2);
        let restored = q.decode(&code).unwrap();
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 2.0, "expected {a} ~= {b}");
        }
    }

    #[test]
    fn sixteen_bit_packing_has_low_relative_error() {
        let samples = vec![vec![-1.0; 4], vec![1.0; 4]];
        let q = ScalarQuantizer::train(&ScalarConfig { bit_depth: 16 }, &samples).unwrap();
        let original = vec![0.3, -0.7, 0.1, 0.9];
        let code = q.encode(&original).unwrap();
        assert_eq!(code.0.len(), 8);
        let restored = q.decode(&code).unwrap();
        for (a, b) in original.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 0.001, "expected {a} ~= {b}");
        }
    }

    #[test]
    fn asymmetric_distance_is_near_zero_for_encoded_point() {
        let samples = vec![vec![0.0, 0.0], vec![10.0, 10.0]];
        let q = ScalarQuantizer::train(&ScalarConfig { bit_depth: 8 }, &samples).unwrap();
        let code = q.encode(&[5.0, 5.0]).unwrap();
        let d = q.asymmetric_distance(&[5.0, 5.0], &code).unwrap();
        assert!(d < 0.1);
    }
}
