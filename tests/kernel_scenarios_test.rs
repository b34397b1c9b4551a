//! End-to-end scenario tests for the scoring kernel, run against the real
//! `ScoringKernel` (not the bare `composite_score` function) so that the
//! standardise → encode → KNN → score → level pipeline is exercised as a
//! whole, per the seeded scenarios in spec.md §8.

use pretty_assertions::assert_eq;
use riskflow_worker::artefacts::ArtefactRegistry;
use riskflow_worker::index::StaticIndexClient;
use riskflow_worker::kernel::ScoringKernel;
use riskflow_worker::model::{EnvelopeStatus, FEATURE_DIM};
use rstest::rstest;

/// Scenario 3 (spec.md §8): a vector with 36 elements is rejected before it
/// ever reaches the index or the encoder.
#[tokio::test]
async fn wrong_dimension_vector_is_an_error_envelope() {
    let kernel = ScoringKernel::new(ArtefactRegistry::degraded_fallback(), StaticIndexClient::empty());
    let vector = vec![0.0; FEATURE_DIM + 1];
    let result = kernel.score_one(&vector, "r3".into(), "s3".into()).await;
    assert_eq!(result.status, EnvelopeStatus::Error);
    assert!(result.message.unwrap().contains("dimension"));
}

/// Scenario 4 (spec.md §8): an unavailable index degrades to an empty
/// neighbour list, which the kernel treats as "no anchor" (riskScore 85).
#[tokio::test]
async fn unavailable_index_yields_no_anchor_score() {
    let kernel = ScoringKernel::new(ArtefactRegistry::degraded_fallback(), StaticIndexClient::empty());
    let vector = vec![0.1; FEATURE_DIM];
    let result = kernel.score_one(&vector, "r4".into(), "s4".into()).await;
    assert_eq!(result.status, EnvelopeStatus::Success);
    assert!((result.risk_score - 85.0).abs() < 1e-9);
    assert!(result.neighbours.is_empty());
}

/// A non-finite element anywhere in the vector is rejected, regardless of
/// position (spec.md §3, §8 boundary behaviours).
#[rstest]
#[case(0)]
#[case(17)]
#[case(34)]
#[tokio::test]
async fn non_finite_element_at_any_position_is_rejected(#[case] index: usize) {
    let kernel = ScoringKernel::new(ArtefactRegistry::degraded_fallback(), StaticIndexClient::empty());
    let mut vector = vec![0.0; FEATURE_DIM];
    vector[index] = f64::NAN;
    let result = kernel.score_one(&vector, "r".into(), "s".into()).await;
    assert_eq!(result.status, EnvelopeStatus::Error);
}

/// Invariant 3 (spec.md §8): the result's requestId equals the input's
/// requestId, across both the success and error paths.
#[rstest]
#[case(vec![0.0; FEATURE_DIM], "well-formed-request")]
#[case(vec![0.0; FEATURE_DIM - 1], "malformed-request")]
#[tokio::test]
async fn request_id_is_propagated_unchanged(#[case] vector: Vec<f64>, #[case] request_id: &str) {
    let kernel = ScoringKernel::new(ArtefactRegistry::degraded_fallback(), StaticIndexClient::empty());
    let result = kernel.score_one(&vector, request_id.to_string(), "subject".into()).await;
    assert_eq!(result.request_id, request_id);
}
