//! riskflow-worker: a streaming risk-assessment worker for a fraud
//! detection platform.
//!
//! The worker consumes per-subject feature vectors from a durable message
//! broker, encodes each into a fixed-dimensional embedding, performs an
//! approximate nearest-neighbour lookup against a population of labelled
//! reference embeddings, derives a risk score and categorical risk level,
//! and delivers the result to a downstream HTTP callback.
//!
//! This crate implements the streaming pipeline end to end: the broker
//! consumer with adaptive micro-batching ([`consumer`]), the scoring
//! kernel ([`kernel`], backed by [`artefacts`] and [`index`]), the
//! callback dispatcher ([`dispatcher`]), and the process-wide resource
//! lifecycle ([`lifecycle`]). A minimal synchronous scoring surface
//! ([`service`]) demonstrates how a request/response HTTP endpoint would
//! invoke the same kernel directly.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

/// Encoder weights, feature standardiser and risk thresholds, loaded once
/// at startup.
pub mod artefacts;

/// Layered configuration.
pub mod config;

/// Broker consumer with micro-batching and acknowledgement discipline.
pub mod consumer;

/// Asynchronous callback dispatcher.
pub mod dispatcher;

/// Top-level error type.
pub mod error;

/// Vector Index Client: typed façade over the KV vector index.
pub mod index;

/// Scoring Kernel: standardise → encode → KNN → composite score → level.
pub mod kernel;

/// Lifecycle Manager: startup/shutdown orchestration.
pub mod lifecycle;

/// Wire types shared by the kernel, consumer and dispatcher.
pub mod model;

/// Discovery registry HTTP client.
pub mod registry_client;

/// Synchronous scoring surface: a trait boundary plus a minimal Axum
/// router that lets an external caller invoke the scoring kernel directly
/// over HTTP instead of via the broker.
pub mod service;

/// Thresholds & Level Mapper.
pub mod thresholds;

pub use config::Settings;
pub use error::{WorkerError, WorkerResult};
pub use lifecycle::LifecycleManager;

/// Library version, as set by Cargo at build time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the global tracing subscriber: JSON output in production,
/// pretty output when `RISKFLOW_PRETTY_LOGS` is set.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if std::env::var("RISKFLOW_PRETTY_LOGS").is_ok() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    }
}
