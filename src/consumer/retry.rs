//! Exponential backoff for broker reconnection (spec.md §4.D Recovery:
//! "initial 5s, cap 60s").

use std::time::Duration;

/// Exponential backoff with a floor and a cap, doubling on every call to
/// [`ReconnectBackoff::next_delay`] until the cap is reached.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectBackoff {
    initial: Duration,
    cap: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    /// A fresh backoff sequence starting at `initial`, doubling each step
    /// up to `cap`.
    pub fn new(initial: Duration, cap: Duration) -> Self {
        Self {
            initial,
            cap,
            current: initial,
        }
    }

    /// The worker's documented defaults: initial 5s, cap 60s.
    pub fn default_broker_policy() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(60))
    }

    /// The delay to sleep before the next reconnect attempt, then advance
    /// the sequence (doubling, capped).
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.cap);
        delay
    }

    /// Reset to the initial delay, e.g. after a successful reconnect.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_until_capped() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(10));
        assert_eq!(backoff.next_delay(), Duration::from_secs(20));
        assert_eq!(backoff.next_delay(), Duration::from_secs(40));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn reset_returns_to_initial() {
        let mut backoff = ReconnectBackoff::new(Duration::from_secs(5), Duration::from_secs(60));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }
}
