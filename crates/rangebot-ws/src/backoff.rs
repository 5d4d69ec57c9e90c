//! Exponential reconnect backoff with bounded jitter.
//!
//! Shared by every reconnecting client so that stream channels and the
//! RPC client follow the same policy.

use rand::Rng;
use std::time::Duration;

/// Reconnect delay policy: `min(base * 2^attempt, cap) + jitter`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    jitter_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64, jitter_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
            jitter_ms,
            attempt: 0,
        }
    }

    /// Delay before jitter for a given attempt number (0-based).
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(20);
        let delay = self.base_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_ms))
    }

    /// Delay for the next reconnect; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base_delay(self.attempt) + Duration::from_millis(self.jitter());
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Called after a successful open.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Largest delay this policy can produce.
    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.max_ms + self.jitter_ms)
    }

    fn jitter(&self) -> u64 {
        if self.jitter_ms == 0 {
            return 0;
        }
        rand::thread_rng().gen_range(0..self.jitter_ms)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(1_000, 30_000, 300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delay_doubles_until_cap() {
        let b = Backoff::new(1_000, 30_000, 0);
        assert_eq!(b.base_delay(0), Duration::from_millis(1_000));
        assert_eq!(b.base_delay(1), Duration::from_millis(2_000));
        assert_eq!(b.base_delay(4), Duration::from_millis(16_000));
        assert_eq!(b.base_delay(5), Duration::from_millis(30_000));
        assert_eq!(b.base_delay(60), Duration::from_millis(30_000));
    }

    #[test]
    fn test_delays_non_decreasing_and_bounded() {
        let mut b = Backoff::new(1_000, 30_000, 300);
        let mut prev_base = Duration::ZERO;
        for _ in 0..40 {
            let attempt = b.attempt();
            let base = b.base_delay(attempt);
            let delay = b.next_delay();

            assert!(base >= prev_base);
            assert!(delay >= base);
            assert!(delay < base + Duration::from_millis(300));
            assert!(delay <= b.ceiling());
            prev_base = base;
        }
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut b = Backoff::new(1_000, 30_000, 0);
        b.next_delay();
        b.next_delay();
        b.next_delay();
        assert_eq!(b.attempt(), 3);

        b.reset();
        assert_eq!(b.attempt(), 0);
        assert_eq!(b.next_delay(), Duration::from_millis(1_000));
    }
}
