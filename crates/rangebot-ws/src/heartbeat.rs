//! Heartbeat scheduling for stream connections.
//!
//! Sends an application-level ping on a fixed interval while a connection
//! is open. Pongs are not tracked; a dead peer is detected by the
//! transport closing.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Ping schedule for one channel.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatManager {
    interval: Duration,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ticker for one connection; first tick fires one interval after open.
    pub fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_clamped() {
        assert_eq!(HeartbeatManager::new(0).interval(), Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_skips_immediate_tick() {
        let hb = HeartbeatManager::new(20_000);
        let mut ticker = hb.ticker();

        let early = tokio::time::timeout(Duration::from_millis(19_000), ticker.tick()).await;
        assert!(early.is_err());
        let on_time = tokio::time::timeout(Duration::from_millis(2_000), ticker.tick()).await;
        assert!(on_time.is_ok());
    }
}
