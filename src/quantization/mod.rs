//! Vector quantization codecs: scalar, binary, and product quantization.
//!
//! All three share one train/encode/decode lifecycle: a codec is trained
//! once against a representative sample, then encodes and decodes
//! individual vectors against the parameters it learned. Scalar and binary
//! quantize per-dimension at a caller-selected bit depth; product
//! quantization splits each vector into subvectors and encodes each
//! against its own trained codebook, using `rand`/`rand_chacha` for
//! k-means centroid seeding.

pub mod binary;
pub mod product;
pub mod scalar;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuantizationError {
    #[error("quantizer has not been trained")]
    NotTrained,
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("unsupported bit depth: {0}")]
    UnsupportedBitDepth(u8),
    #[error("invalid subvector count {sub_count} for dimension {dimension}")]
    InvalidSubvectorCount { sub_count: usize, dimension: usize },
}

pub type QuantizationResult<T> = std::result::Result<T, QuantizationError>;

/// Which codec a shard is configured to use. `None` means vectors are
/// stored and scored at full precision (brute-force / HNSW without
/// quantization).
#[derive(Debug, Clone)]
pub enum QuantizerChoice {
    None,
    Scalar(scalar::ScalarConfig),
    Binary(binary::BinaryConfig),
    Product(product::ProductConfig),
}

/// A trained codec of any kind, dispatched by `match` at encode/decode
/// sites rather than a trait object.
#[derive(Debug, Clone)]
pub enum TrainedQuantizer {
    Scalar(scalar::ScalarQuantizer),
    Binary(binary::BinaryQuantizer),
    Product(product::Codebook),
}

/// A quantized record body, one variant per codec.
#[derive(Debug, Clone, PartialEq)]
pub enum QuantizedCode {
    Scalar(scalar::ScalarCode),
    Binary(binary::BinaryCode),
    Product(product::ProductCode),
}

impl TrainedQuantizer {
    pub fn train(choice: &QuantizerChoice, samples: &[Vec<f32>]) -> QuantizationResult<Option<Self>> {
        match choice {
            QuantizerChoice::None => Ok(None),
            QuantizerChoice::Scalar(config) => {
                Ok(Some(Self::Scalar(scalar::ScalarQuantizer::train(config, samples)?)))
            }
            QuantizerChoice::Binary(config) => {
                Ok(Some(Self::Binary(binary::BinaryQuantizer::train(config, samples)?)))
            }
            QuantizerChoice::Product(config) => {
                Ok(Some(Self::Product(product::Codebook::train(config, samples)?)))
            }
        }
    }

    pub fn encode(&self, vector: &[f32]) -> QuantizationResult<QuantizedCode> {
        match self {
            Self::Scalar(q) => Ok(QuantizedCode::Scalar(q.encode(vector)?)),
            Self::Binary(q) => Ok(QuantizedCode::Binary(q.encode(vector)?)),
            Self::Product(q) => Ok(QuantizedCode::Product(q.encode(vector)?)),
        }
    }

    pub fn decode(&self, code: &QuantizedCode) -> QuantizationResult<Vec<f32>> {
        match (self, code) {
            (Self::Scalar(q), QuantizedCode::Scalar(c)) => q.decode(c),
            (Self::Binary(q), QuantizedCode::Binary(c)) => q.decode(c),
            (Self::Product(q), QuantizedCode::Product(c)) => q.decode(c),
            _ => Err(QuantizationError::NotTrained),
        }
    }

    pub fn asymmetric_distance(&self, query: &[f32], code: &QuantizedCode) -> QuantizationResult<f32> {
        match (self, code) {
            (Self::Scalar(q), QuantizedCode::Scalar(c)) => q.asymmetric_distance(query, c),
            (Self::Binary(q), QuantizedCode::Binary(c)) => q.asymmetric_distance(query, c),
            (Self::Product(q), QuantizedCode::Product(c)) => q.asymmetric_distance(query, c),
            _ => Err(QuantizationError::NotTrained),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_choice_trains_to_nothing() {
        let trained = TrainedQuantizer::train(&QuantizerChoice::None, &[vec![1.0]]).unwrap();
        assert!(trained.is_none());
    }

    #[test]
    fn scalar_choice_round_trips_through_dispatch() {
        let samples = vec![vec![0.0, 0.0], vec![10.0, 10.0]];
        let choice = QuantizerChoice::Scalar(scalar::ScalarConfig { bit_depth: 8 });
        let trained = TrainedQuantizer::train(&choice, &samples).unwrap().unwrap();

        let code = trained.encode(&[5.0, 5.0]).unwrap();
        let restored = trained.decode(&code).unwrap();
        assert!((restored[0] - 5.0).abs() < 0.2);
    }
}
