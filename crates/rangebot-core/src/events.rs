//! In-process event broadcaster.
//!
//! Components publish [`BotEvent`]s; observers (RPC connections, tests)
//! hold a [`Subscription`] for as long as they want to receive them.
//! Dropping the subscription unsubscribes.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::trace;

use crate::execution::{Candidate, ExecutionEvent};
use crate::report::{DecisionExplain, StatusSummary};

/// Topic for engine telemetry.
pub const TOPIC_RANGE_METRICS: &str = "rangeMetrics";
/// Topic for the watched-price ticker.
pub const TOPIC_MARKET_PRICES: &str = "marketPrices";

/// Event payload, tagged by `kind` on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BotEvent {
    Status(StatusSummary),
    Explain(DecisionExplain),
    #[serde(rename_all = "camelCase")]
    Plan {
        symbol: String,
        candidate: Candidate,
        regime: String,
        can_enter: bool,
    },
    Candidates {
        candidates: Vec<Candidate>,
    },
    Execution(ExecutionEvent),
    Log {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<Value>,
    },
    Error {
        message: String,
    },
    Prices {
        prices: BTreeMap<String, Option<Decimal>>,
    },
}

impl BotEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::Prices { .. } => TOPIC_MARKET_PRICES,
            _ => TOPIC_RANGE_METRICS,
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
            details: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// A published event with its emission time.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub ts: i64,
    pub event: BotEvent,
}

impl EventEnvelope {
    pub fn topic(&self) -> &'static str {
        self.event.topic()
    }

    /// Wire payload: the tagged event with `ts` merged in.
    pub fn payload(&self) -> Value {
        let mut payload = serde_json::to_value(&self.event).unwrap_or_else(|e| {
            json!({ "kind": "error", "message": format!("event serialization failed: {e}") })
        });
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("ts".to_string(), json!(self.ts));
        }
        payload
    }
}

/// Fan-out broadcaster for [`BotEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus; slow subscribers lag past `capacity` buffered events.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to every current subscriber. Returns how many received it.
    pub fn publish(&self, event: BotEvent) -> usize {
        let envelope = EventEnvelope {
            ts: now_ms(),
            event,
        };
        match self.tx.send(envelope) {
            Ok(n) => n,
            Err(_) => {
                trace!("Event published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Live subscription handle; dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<EventEnvelope>,
}

impl Subscription {
    /// Next event. Lagged gaps are surfaced so callers can log them.
    pub async fn recv(&mut self) -> Result<EventEnvelope, broadcast::error::RecvError> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<EventEnvelope, broadcast::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Explicit unsubscribe.
    pub fn unsubscribe(self) {}
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
