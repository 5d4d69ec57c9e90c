//! Execution-related types shared by the engine, dispatcher and backends.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::{IdempotencyKey, OrderKind, Side};
use crate::{Price, Size};

/// A trade idea produced by the candidate evaluator for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub symbol: String,
    pub side: Side,
    /// Short machine-readable explanation (e.g. "nearSupport").
    pub rationale: String,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Sizing reported for every dispatch attempt, placed or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sizing {
    pub notional: Decimal,
    pub qty: Size,
    pub min_qty: Size,
    pub qty_step: Size,
}

/// Outcome of dispatching one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub sizing: Option<Sizing>,
}

impl ExecutionResult {
    pub fn placed(sizing: Sizing) -> Self {
        Self {
            ok: true,
            reason: None,
            sizing: Some(sizing),
        }
    }

    pub fn blocked(reason: impl Into<String>, sizing: Option<Sizing>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
            sizing,
        }
    }
}

/// Acknowledgement returned by a backend for an accepted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAck {
    pub order_id: String,
    pub idempotency_key: IdempotencyKey,
    pub status: ExecutionStatus,
}

/// Open position as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub qty: Size,
    pub entry_price: Price,
}

/// Resting order as reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub qty: Size,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub stop_price: Option<Price>,
    pub reduce_only: bool,
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,
}

/// Lifecycle stage carried by an execution notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    Accepted,
    Filled,
    Triggered,
    Cancelled,
}

/// Execution or fill notification emitted by a backend.
///
/// `mode` is empty when emitted and filled in by the router that forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    #[serde(default)]
    pub mode: Option<String>,
    pub status: ExecutionStatus,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: Size,
    #[serde(default)]
    pub price: Option<Price>,
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,
}

impl ExecutionEvent {
    pub fn tagged(mut self, mode: &str) -> Self {
        self.mode = Some(mode.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_blocked_result_keeps_sizing() {
        let sizing = Sizing {
            notional: dec!(0),
            qty: Size::ZERO,
            min_qty: Size::new(dec!(0.001)),
            qty_step: Size::new(dec!(0.001)),
        };
        let result = ExecutionResult::blocked("qtyTooSmall:BTCUSDT", Some(sizing.clone()));

        assert!(!result.ok);
        assert_eq!(result.reason.as_deref(), Some("qtyTooSmall:BTCUSDT"));
        assert_eq!(result.sizing, Some(sizing));
    }

    #[test]
    fn test_execution_event_tagging() {
        let event = ExecutionEvent {
            mode: None,
            status: ExecutionStatus::Filled,
            order_id: "1".to_string(),
            symbol: "BTCUSDT".to_string(),
            side: Side::Buy,
            qty: Size::new(dec!(1)),
            price: None,
            idempotency_key: None,
        }
        .tagged("paper");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["mode"], "paper");
        assert_eq!(json["status"], "filled");
    }
}
