//! Batch Consumer (spec.md §4.D): AMQP subscription, size-or-age
//! micro-batching, and acknowledgement discipline.

pub mod batch;
pub mod consumer;
pub mod error;
pub mod retry;
pub mod state;

pub use batch::{decode_message, BatchBuffer, DecodeOutcome, PendingMessage};
pub use consumer::BatchConsumer;
pub use error::ConsumerError;
pub use retry::ReconnectBackoff;
pub use state::{ConsumerState, ConsumerStateTracker};
