//! Artefact Registry.
//!
//! Loads the encoder weights, feature standardiser and risk thresholds at
//! startup and exposes them as immutable, `Arc`-shared handles. Artefacts
//! are loaded exactly once, before the batch consumer subscribes, and are
//! never mutated afterwards.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::model::{EMBEDDING_DIM, FEATURE_DIM};
use crate::thresholds::Thresholds;

const HIDDEN_DIM: usize = 64;

/// Failures while loading or validating an artefact at startup.
///
/// All variants are fatal unless the operator has explicitly set the
/// worker to degraded mode, in which case the caller decides whether to
/// abort or continue with defaults.
#[derive(Debug, Error)]
pub enum ArtefactError {
    /// The artefact file does not exist or could not be opened.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The on-disk bytes did not deserialize as a known encoder shape.
    #[error("malformed encoder artefact at {path}: {source}")]
    MalformedEncoder {
        /// Path of the malformed artefact.
        path: String,
        /// Underlying deserialization error.
        #[source]
        source: bincode::Error,
    },
    /// The on-disk bytes did not deserialize as a standardiser.
    #[error("malformed standardiser artefact at {path}: {source}")]
    MalformedStandardiser {
        /// Path of the malformed artefact.
        path: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// The on-disk bytes did not deserialize as a thresholds document.
    #[error("malformed thresholds artefact at {path}: {source}")]
    MalformedThresholds {
        /// Path of the malformed artefact.
        path: String,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// A loaded parameter tensor had the wrong shape for the fixed
    /// architecture (35→64→128→128).
    #[error("shape mismatch in layer {layer}: expected {expected} values, got {got}")]
    ShapeMismatch {
        /// Which layer failed validation.
        layer: &'static str,
        /// Expected element count.
        expected: usize,
        /// Actual element count found.
        got: usize,
    },
}

/// One fully-connected layer of the fixed encoder architecture: `y =
/// relu(Wx + b)`, row-major weights of shape `(out_dim, in_dim)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl DenseLayer {
    fn validate(&self, name: &'static str) -> Result<(), ArtefactError> {
        let expected = self.in_dim * self.out_dim;
        if self.weights.len() != expected {
            return Err(ArtefactError::ShapeMismatch {
                layer: name,
                expected,
                got: self.weights.len(),
            });
        }
        if self.bias.len() != self.out_dim {
            return Err(ArtefactError::ShapeMismatch {
                layer: name,
                expected: self.out_dim,
                got: self.bias.len(),
            });
        }
        Ok(())
    }

    /// `y = relu(Wx + b)`. Every layer of this architecture, including the
    /// last, is followed by a pointwise ReLU, so there is no separate
    /// linear-output path.
    fn forward(&self, input: &[f32]) -> Vec<f32> {
        let mut out = vec![0f32; self.out_dim];
        for o in 0..self.out_dim {
            let row = &self.weights[o * self.in_dim..(o + 1) * self.in_dim];
            let mut acc = self.bias[o];
            for (w, x) in row.iter().zip(input.iter()) {
                acc += w * x;
            }
            out[o] = acc.max(0.0);
        }
        out
    }
}

/// Materialised 3-layer MLP encoder: `(35→64) → ReLU → (64→128) → ReLU →
/// (128→128) → ReLU`. The final ReLU both introduces non-linearity and
/// caps the embedding to non-negative values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Encoder {
    layer1: DenseLayer,
    layer2: DenseLayer,
    layer3: DenseLayer,
}

/// On-disk encoder artefact shape: either a fully materialised model, or a
/// bare parameter map keyed by layer name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum EncoderArtefact {
    Materialised(Encoder),
    ParameterMap(std::collections::HashMap<String, Vec<f32>>),
}

impl Encoder {
    fn from_parameter_map(
        map: std::collections::HashMap<String, Vec<f32>>,
    ) -> Result<Self, ArtefactError> {
        let get = |key: &str| -> Result<Vec<f32>, ArtefactError> {
            map.get(key).cloned().ok_or(ArtefactError::ShapeMismatch {
                layer: "parameter_map",
                expected: 1,
                got: 0,
            })
        };
        let layer1 = DenseLayer {
            weights: get("layer1.weight")?,
            bias: get("layer1.bias")?,
            in_dim: FEATURE_DIM,
            out_dim: HIDDEN_DIM,
        };
        let layer2 = DenseLayer {
            weights: get("layer2.weight")?,
            bias: get("layer2.bias")?,
            in_dim: HIDDEN_DIM,
            out_dim: EMBEDDING_DIM,
        };
        let layer3 = DenseLayer {
            weights: get("layer3.weight")?,
            bias: get("layer3.bias")?,
            in_dim: EMBEDDING_DIM,
            out_dim: EMBEDDING_DIM,
        };
        let encoder = Encoder {
            layer1,
            layer2,
            layer3,
        };
        encoder.validate()?;
        Ok(encoder)
    }

    fn validate(&self) -> Result<(), ArtefactError> {
        self.layer1.validate("layer1")?;
        self.layer2.validate("layer2")?;
        self.layer3.validate("layer3")?;
        Ok(())
    }

    /// Forward pass over a single standardised 35-vector, producing a
    /// 128-dim embedding.
    pub fn encode_one(&self, input: &[f32; FEATURE_DIM]) -> [f32; EMBEDDING_DIM] {
        let h1 = self.layer1.forward(input);
        let h2 = self.layer2.forward(&h1);
        let h3 = self.layer3.forward(&h2);
        let mut out = [0f32; EMBEDDING_DIM];
        out.copy_from_slice(&h3);
        out
    }

    /// Forward pass over a batch of standardised vectors. Invoked once per
    /// batch rather than once per sample — the forward pass itself is
    /// still per-row because the fixed-architecture
    /// weights are not vectorised here, but no per-sample artefact lookup
    /// or locking occurs, which is the property the batching exists to buy.
    pub fn encode_batch(&self, inputs: &[[f32; FEATURE_DIM]]) -> Vec<[f32; EMBEDDING_DIM]> {
        inputs.iter().map(|v| self.encode_one(v)).collect()
    }
}

/// Offline-fit affine per-feature transform: `(x - mean) / sqrt(variance)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardiser {
    mean: [f64; FEATURE_DIM],
    variance: [f64; FEATURE_DIM],
}

impl Standardiser {
    /// Identity standardiser (mean 0, variance 1), used when no artefact
    /// path is configured — useful for local development against a
    /// pass-through encoder.
    pub fn identity() -> Self {
        Self {
            mean: [0.0; FEATURE_DIM],
            variance: [1.0; FEATURE_DIM],
        }
    }

    /// Apply the affine transform, casting down to `f32` for the encoder.
    pub fn transform(&self, input: &[f64]) -> [f32; FEATURE_DIM] {
        let mut out = [0f32; FEATURE_DIM];
        for i in 0..FEATURE_DIM {
            let sigma = self.variance[i].sqrt();
            let scaled = if sigma > f64::EPSILON {
                (input[i] - self.mean[i]) / sigma
            } else {
                input[i] - self.mean[i]
            };
            out[i] = scaled as f32;
        }
        out
    }
}

/// Immutable, process-wide handles produced by [`ArtefactRegistry::load`].
///
/// Shared behind `Arc` by the Lifecycle Manager with every batch executor;
/// the registry itself owns no interior mutability because artefacts never
/// change after boot.
#[derive(Debug, Clone)]
pub struct ArtefactRegistry {
    encoder: std::sync::Arc<Encoder>,
    standardiser: std::sync::Arc<Standardiser>,
    thresholds: std::sync::Arc<Thresholds>,
}

impl ArtefactRegistry {
    /// Load all three artefacts from disk. Missing/malformed encoder or
    /// standardiser files are fatal; a missing thresholds file falls back
    /// to [`Thresholds::default`] with a logged warning.
    pub fn load(
        encoder_path: &Path,
        standardiser_path: &Path,
        thresholds_path: Option<&Path>,
    ) -> Result<Self, ArtefactError> {
        let encoder = Self::load_encoder(encoder_path)?;
        let standardiser = Self::load_standardiser(standardiser_path)?;
        let thresholds = match thresholds_path {
            Some(path) => Self::load_thresholds(path)?,
            None => {
                warn!("no thresholds path configured, using default table");
                Thresholds::default()
            }
        };
        Ok(Self {
            encoder: std::sync::Arc::new(encoder),
            standardiser: std::sync::Arc::new(standardiser),
            thresholds: std::sync::Arc::new(thresholds),
        })
    }

    fn load_encoder(path: &Path) -> Result<Encoder, ArtefactError> {
        let bytes = std::fs::read(path).map_err(|source| ArtefactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let artefact: EncoderArtefact =
            bincode::deserialize(&bytes).map_err(|source| ArtefactError::MalformedEncoder {
                path: path.display().to_string(),
                source,
            })?;
        let encoder = match artefact {
            EncoderArtefact::Materialised(encoder) => {
                encoder.validate()?;
                encoder
            }
            EncoderArtefact::ParameterMap(map) => Encoder::from_parameter_map(map)?,
        };
        Ok(encoder)
    }

    fn load_standardiser(path: &Path) -> Result<Standardiser, ArtefactError> {
        let bytes = std::fs::read(path).map_err(|source| ArtefactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ArtefactError::MalformedStandardiser {
            path: path.display().to_string(),
            source,
        })
    }

    fn load_thresholds(path: &Path) -> Result<Thresholds, ArtefactError> {
        let bytes = std::fs::read(path).map_err(|source| ArtefactError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| ArtefactError::MalformedThresholds {
            path: path.display().to_string(),
            source,
        })
    }

    /// The loaded encoder handle.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// The loaded standardiser handle.
    pub fn standardiser(&self) -> &Standardiser {
        &self.standardiser
    }

    /// The loaded thresholds handle.
    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Build a registry with identity standardiser, default thresholds and
    /// a fixed zero-weight encoder. Used both by tests that don't need real
    /// weights and by the Lifecycle Manager's degraded-mode fallback
    /// (spec.md §4.A: "the operator explicitly sets the worker to degraded
    /// mode").
    pub fn degraded_fallback() -> Self {
        let zero_layer = |in_dim: usize, out_dim: usize| DenseLayer {
            weights: vec![0.0; in_dim * out_dim],
            bias: vec![0.0; out_dim],
            in_dim,
            out_dim,
        };
        let encoder = Encoder {
            layer1: zero_layer(FEATURE_DIM, HIDDEN_DIM),
            layer2: zero_layer(HIDDEN_DIM, EMBEDDING_DIM),
            layer3: zero_layer(EMBEDDING_DIM, EMBEDDING_DIM),
        };
        Self {
            encoder: std::sync::Arc::new(encoder),
            standardiser: std::sync::Arc::new(Standardiser::identity()),
            thresholds: std::sync::Arc::new(Thresholds::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standardiser_identity_is_passthrough() {
        let s = Standardiser::identity();
        let input = [1.5_f64; FEATURE_DIM];
        let out = s.transform(&input);
        assert!((out[0] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn standardiser_applies_affine_transform() {
        let mut mean = [0.0; FEATURE_DIM];
        let mut variance = [1.0; FEATURE_DIM];
        mean[0] = 2.0;
        variance[0] = 4.0;
        let s = Standardiser { mean, variance };
        let input = [4.0_f64; FEATURE_DIM];
        let out = s.transform(&input);
        assert!((out[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn encoder_produces_128_dim_embedding() {
        let registry = ArtefactRegistry::degraded_fallback();
        let input = [0.0f32; FEATURE_DIM];
        let embedding = registry.encoder().encode_one(&input);
        assert_eq!(embedding.len(), EMBEDDING_DIM);
    }

    #[test]
    fn encoder_batch_matches_per_sample() {
        let registry = ArtefactRegistry::degraded_fallback();
        let inputs = vec![[0.3f32; FEATURE_DIM]; 4];
        let batch = registry.encoder().encode_batch(&inputs);
        for v in &batch {
            let single = registry.encoder().encode_one(&inputs[0]);
            assert_eq!(v, &single);
        }
    }

    #[test]
    fn missing_thresholds_file_falls_back_to_default() {
        let dir = std::env::temp_dir().join(format!("riskflow-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        let encoder_path = dir.join("missing_encoder.bin");
        let standardiser_path = dir.join("missing_standardiser.json");
        let result = ArtefactRegistry::load(&encoder_path, &standardiser_path, None);
        assert!(result.is_err());
    }
}
