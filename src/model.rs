//! Wire types shared by the scoring kernel, the consumer and the dispatcher.

use serde::{Deserialize, Serialize};

/// Number of features in an inbound feature vector.
pub const FEATURE_DIM: usize = 35;

/// Dimensionality of the embedding produced by the encoder.
pub const EMBEDDING_DIM: usize = 128;

/// Number of neighbours requested per KNN query.
pub const KNN_K: usize = 10;

/// An ordered sequence of exactly [`FEATURE_DIM`] finite real numbers.
///
/// Immutable once constructed; [`FeatureVector::new`] rejects malformed
/// input so that every other component can assume the invariant holds.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f64>);

/// Why a candidate vector was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FeatureVectorError {
    /// Length was not exactly [`FEATURE_DIM`].
    #[error("dimension mismatch: expected {FEATURE_DIM} features, got {0}")]
    DimensionMismatch(usize),
    /// At least one element was NaN or infinite.
    #[error("non-finite element at index {0}")]
    NonFinite(usize),
}

impl FeatureVector {
    /// Validate and wrap a raw vector of features.
    pub fn new(values: Vec<f64>) -> Result<Self, FeatureVectorError> {
        if values.len() != FEATURE_DIM {
            return Err(FeatureVectorError::DimensionMismatch(values.len()));
        }
        if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
            return Err(FeatureVectorError::NonFinite(idx));
        }
        Ok(Self(values))
    }

    /// Borrow the underlying 35 values.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// The 128-dim vector produced by the encoder. Always derived, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(pub Vec<f32>);

impl Embedding {
    /// Raw little-endian float32 bytes, the wire format the vector index expects.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.0.len() * 4);
        for v in &self.0 {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// One result row from a KNN query against the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbour {
    pub id: String,
    pub distance: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<i8>,
}

/// Categorical risk bucket derived from `riskScore` via calibrated thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Normal,
    Low,
    Medium,
    High,
    Unknown,
}

/// Outcome of scoring one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

/// Inbound per-subject feature vector, as published by upstream producers.
///
/// Non-recognised JSON fields are ignored by construction: this struct only
/// names the fields the worker reads.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    #[serde(rename = "subjectId")]
    pub subject_id: String,
    #[serde(default)]
    pub vector: Option<Vec<f64>>,
    #[serde(flatten, default)]
    pub flat_features: std::collections::BTreeMap<String, serde_json::Value>,
}

impl RequestEnvelope {
    /// Resolve the feature vector, preferring the `vector` field and falling
    /// back to flat `feature_1..feature_35` fields.
    pub fn resolve_vector(&self) -> Option<Vec<f64>> {
        if let Some(v) = &self.vector {
            return Some(v.clone());
        }
        let mut out = Vec::with_capacity(FEATURE_DIM);
        for i in 1..=FEATURE_DIM {
            let key = format!("feature_{i}");
            let value = self.flat_features.get(&key)?.as_f64()?;
            out.push(value);
        }
        Some(out)
    }
}

/// Result of scoring one request, delivered to the downstream callback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub request_id: String,
    pub status: EnvelopeStatus,
    pub subject_id: String,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub neighbours: Vec<Neighbour>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ResultEnvelope {
    /// Build a SUCCESS envelope.
    pub fn success(
        request_id: String,
        subject_id: String,
        risk_score: f64,
        risk_level: RiskLevel,
        neighbours: Vec<Neighbour>,
    ) -> Self {
        Self {
            request_id,
            status: EnvelopeStatus::Success,
            subject_id,
            risk_score,
            risk_level,
            neighbours,
            message: None,
        }
    }

    /// Build an ERROR envelope. `riskScore`/`riskLevel` are set to neutral
    /// placeholders; consumers should branch on `status` first.
    pub fn error(request_id: String, subject_id: String, message: impl Into<String>) -> Self {
        Self {
            request_id,
            status: EnvelopeStatus::Error,
            subject_id,
            risk_score: 0.0,
            risk_level: RiskLevel::Unknown,
            neighbours: Vec::new(),
            message: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_vector_rejects_wrong_length() {
        let err = FeatureVector::new(vec![0.0; 34]).unwrap_err();
        assert_eq!(err, FeatureVectorError::DimensionMismatch(34));
    }

    #[test]
    fn feature_vector_rejects_non_finite() {
        let mut values = vec![0.0; FEATURE_DIM];
        values[10] = f64::NAN;
        let err = FeatureVector::new(values).unwrap_err();
        assert_eq!(err, FeatureVectorError::NonFinite(10));
    }

    #[test]
    fn feature_vector_accepts_well_formed_input() {
        let values = vec![1.0; FEATURE_DIM];
        assert!(FeatureVector::new(values).is_ok());
    }

    #[test]
    fn resolve_vector_prefers_vector_field() {
        let env = RequestEnvelope {
            request_id: "r1".into(),
            subject_id: "s1".into(),
            vector: Some(vec![1.0; FEATURE_DIM]),
            flat_features: Default::default(),
        };
        assert_eq!(env.resolve_vector().unwrap().len(), FEATURE_DIM);
    }

    #[test]
    fn resolve_vector_falls_back_to_flat_fields() {
        let mut flat = std::collections::BTreeMap::new();
        for i in 1..=FEATURE_DIM {
            flat.insert(format!("feature_{i}"), serde_json::json!(i as f64));
        }
        let env = RequestEnvelope {
            request_id: "r1".into(),
            subject_id: "s1".into(),
            vector: None,
            flat_features: flat,
        };
        let resolved = env.resolve_vector().unwrap();
        assert_eq!(resolved.len(), FEATURE_DIM);
        assert_eq!(resolved[0], 1.0);
    }
}
