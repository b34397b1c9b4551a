//! Errors raised while establishing or running the broker subscription.

use thiserror::Error;

/// Failures from the Batch Consumer (spec.md §4.D).
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The AMQP connection or channel could not be established.
    #[error("broker connection failed: {0}")]
    Connection(#[from] lapin::Error),
    /// Queue/exchange/binding declaration failed.
    #[error("failed to declare broker topology: {0}")]
    Topology(lapin::Error),
    /// The consumer was asked to start twice, or used out of order.
    #[error("consumer is not in the expected state: {0}")]
    InvalidState(&'static str),
}
