//! Tracked topic set for a stream channel.
//!
//! The set is the source of truth for what the channel should be subscribed
//! to. Every successful open replays the whole set, so callers never need to
//! resubscribe after a reconnect.

use parking_lot::RwLock;
use tracing::debug;

/// Venue limit on topics per subscribe frame.
pub const MAX_TOPICS_PER_FRAME: usize = 10;

/// Insertion-ordered set of subscribed topics.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    topics: RwLock<Vec<String>>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track topics; returns those that were not tracked before.
    pub fn add<I, S>(&self, topics: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut guard = self.topics.write();
        let mut added = Vec::new();
        for topic in topics {
            let topic = topic.into();
            if topic.is_empty() || guard.contains(&topic) {
                continue;
            }
            guard.push(topic.clone());
            added.push(topic);
        }
        debug!(added = added.len(), total = guard.len(), "Topics tracked");
        added
    }

    /// Stop tracking topics; returns those that were tracked.
    pub fn remove<I, S>(&self, topics: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut guard = self.topics.write();
        let mut removed = Vec::new();
        for topic in topics {
            if let Some(pos) = guard.iter().position(|t| t == topic.as_ref()) {
                removed.push(guard.remove(pos));
            }
        }
        removed
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.read().iter().any(|t| t == topic)
    }

    pub fn len(&self) -> usize {
        self.topics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.read().is_empty()
    }

    /// Snapshot in insertion order.
    pub fn topics(&self) -> Vec<String> {
        self.topics.read().clone()
    }

    /// Topics split into frame-sized batches for replay.
    pub fn replay_batches(&self) -> Vec<Vec<String>> {
        self.topics
            .read()
            .chunks(MAX_TOPICS_PER_FRAME)
            .map(<[String]>::to_vec)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_dedups_and_keeps_order() {
        let subs = SubscriptionManager::new();
        let added = subs.add(["tickers.BTCUSDT", "publicTrade.BTCUSDT"]);
        assert_eq!(added.len(), 2);

        let added = subs.add(["tickers.BTCUSDT", "kline.5.BTCUSDT"]);
        assert_eq!(added, vec!["kline.5.BTCUSDT".to_string()]);
        assert_eq!(
            subs.topics(),
            vec!["tickers.BTCUSDT", "publicTrade.BTCUSDT", "kline.5.BTCUSDT"]
        );
    }

    #[test]
    fn test_remove() {
        let subs = SubscriptionManager::new();
        subs.add(["a", "b", "c"]);
        assert_eq!(subs.remove(["b", "zzz"]), vec!["b".to_string()]);
        assert!(!subs.contains("b"));
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn test_replay_batches_respect_frame_limit() {
        let subs = SubscriptionManager::new();
        subs.add((0..23).map(|i| format!("tickers.S{i}")));

        let batches = subs.replay_batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), MAX_TOPICS_PER_FRAME);
        assert_eq!(batches[2].len(), 3);
        assert_eq!(batches[2][2], "tickers.S22");
    }
}
