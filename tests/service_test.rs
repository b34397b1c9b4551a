#![cfg(feature = "service")]
//! Integration tests for the synchronous scoring surface stub (spec.md §9
//! redesign note, SPEC_FULL.md §2 component M), driven through the router
//! directly with `tower::ServiceExt::oneshot` rather than a bound socket.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use riskflow_worker::artefacts::ArtefactRegistry;
use riskflow_worker::index::StaticIndexClient;
use riskflow_worker::kernel::ScoringKernel;
use riskflow_worker::model::FEATURE_DIM;
use riskflow_worker::service::{router, ServiceState};
use std::sync::Arc;
use tower::ServiceExt;

fn test_router() -> axum::Router {
    let kernel = Arc::new(ScoringKernel::new(
        ArtefactRegistry::degraded_fallback(),
        StaticIndexClient::empty(),
    ));
    router(ServiceState::new(kernel))
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let app = test_router();
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn score_endpoint_invokes_the_kernel_directly() {
    let app = test_router();
    let body = serde_json::json!({
        "request_id": "req-1",
        "subject_id": "subj-1",
        "vector": vec![0.0; FEATURE_DIM],
    })
    .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/score")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let payload: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(payload["status"], "SUCCESS");
    // No anchor in the index (StaticIndexClient::empty) -> riskScore 85.
    assert!((payload["riskScore"].as_f64().unwrap() - 85.0).abs() < 1e-9);
}
