//! Batch Consumer state machine (spec.md §4.D): `Init → Running →
//! Draining → Stopped`.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use tracing::info;

/// One state of the [`crate::consumer::BatchConsumer`] lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConsumerState {
    /// Constructed, no broker connection open yet.
    Init = 0,
    /// Subscription open, consuming and batching messages.
    Running = 1,
    /// Shutdown signalled; in-flight batches are finishing.
    Draining = 2,
    /// Subscription closed, buffer empty.
    Stopped = 3,
}

impl ConsumerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConsumerState::Init,
            1 => ConsumerState::Running,
            2 => ConsumerState::Draining,
            _ => ConsumerState::Stopped,
        }
    }
}

/// Shared, atomically-updated consumer state plus the in-flight-message
/// counter that gates the `Draining → Stopped` transition.
#[derive(Debug)]
pub struct ConsumerStateTracker {
    state: AtomicU8,
    in_flight: AtomicUsize,
}

impl Default for ConsumerStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerStateTracker {
    /// A tracker starting in [`ConsumerState::Init`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(ConsumerState::Init as u8),
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Init → Running`, on startup.
    pub fn mark_running(&self) {
        self.state.store(ConsumerState::Running as u8, Ordering::SeqCst);
        info!("batch consumer running");
    }

    /// `Running → Draining`, on shutdown signal.
    pub fn mark_draining(&self) {
        self.state.store(ConsumerState::Draining as u8, Ordering::SeqCst);
        info!("batch consumer draining");
    }

    /// `Draining → Stopped`, once the buffer is empty and in-flight
    /// batches have been dispatched.
    pub fn mark_stopped(&self) {
        self.state.store(ConsumerState::Stopped as u8, Ordering::SeqCst);
        info!("batch consumer stopped");
    }

    /// Register one batch as in flight.
    pub fn begin_batch(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark one in-flight batch as finished.
    pub fn end_batch(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Whether any batch is currently being executed.
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_documented_order() {
        let tracker = ConsumerStateTracker::new();
        assert_eq!(tracker.state(), ConsumerState::Init);
        tracker.mark_running();
        assert_eq!(tracker.state(), ConsumerState::Running);
        tracker.mark_draining();
        assert_eq!(tracker.state(), ConsumerState::Draining);
        tracker.mark_stopped();
        assert_eq!(tracker.state(), ConsumerState::Stopped);
    }

    #[test]
    fn in_flight_counter_tracks_batches() {
        let tracker = ConsumerStateTracker::new();
        assert!(!tracker.has_in_flight());
        tracker.begin_batch();
        assert!(tracker.has_in_flight());
        tracker.end_batch();
        assert!(!tracker.has_in_flight());
    }
}
