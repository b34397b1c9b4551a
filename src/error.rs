//! Top-level error type composing every module boundary's error enum.

use thiserror::Error;

use crate::artefacts::ArtefactError;
use crate::config::ConfigError;
use crate::consumer::ConsumerError;
use crate::dispatcher::DispatchError;
use crate::index::IndexError;
use crate::kernel::KernelError;

/// Errors that can abort the worker process.
///
/// Most failures inside the pipeline are recoverable per-message (see
/// [`crate::model::ResultEnvelope::error`]); this type only covers the
/// class of errors that should abort startup or shutdown.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Artefact loading failed at startup.
    #[error("artefact registry error: {0}")]
    Artefact(#[from] ArtefactError),

    /// Vector index client could not be constructed.
    #[error("vector index error: {0}")]
    Index(#[from] IndexError),

    /// Scoring kernel failed in a way that should not happen per-message.
    #[error("scoring kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// Broker consumer could not be started.
    #[error("consumer error: {0}")]
    Consumer(#[from] ConsumerError),

    /// Callback dispatcher could not be started.
    #[error("dispatcher error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Discovery registry registration/deregistration failed.
    #[error("registry client error: {0}")]
    Registry(#[from] crate::registry_client::RegistryError),

    /// The synchronous scoring surface failed to bind.
    #[error("service error: {0}")]
    Service(String),

    /// Shutdown did not complete within its deadline.
    #[error("shutdown deadline exceeded in {stage}")]
    ShutdownTimeout {
        /// Which shutdown stage timed out.
        stage: &'static str,
    },
}

/// Convenience alias for fallible worker-level operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
