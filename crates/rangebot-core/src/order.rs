//! Order-related types and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Price, Size};

/// Order side, spelled the way the venue spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "Buy",
            Self::Sell => "Sell",
        }
    }

    /// Parse the venue spelling; anything that is not "Buy" counts as a sell
    /// aggressor, matching how trade and liquidation prints are reported.
    pub fn from_venue(s: &str) -> Self {
        if s.eq_ignore_ascii_case("buy") {
            Self::Buy
        } else {
            Self::Sell
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderKind {
    Market,
    Limit,
    /// Stop-market order that triggers at `stop_price`.
    Stop,
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "Market"),
            Self::Limit => write!(f, "Limit"),
            Self::Stop => write!(f, "Stop"),
        }
    }
}

/// Which leg of a bracket an order belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegPurpose {
    Entry1,
    StopLoss,
}

impl LegPurpose {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Entry1 => "entry1",
            Self::StopLoss => "sl",
        }
    }
}

/// Deterministic identifier that lets a backend deduplicate an order leg.
///
/// Unique per (session, cycle, symbol, side, purpose). The session prefix
/// keeps keys from colliding across process restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn for_leg(session: &str, cycle: u64, symbol: &str, side: Side, purpose: LegPurpose) -> Self {
        let side_char = match side {
            Side::Buy => 'B',
            Side::Sell => 'S',
        };
        Self(format!(
            "{session}-{cycle}-{symbol}-{side_char}-{}",
            purpose.tag()
        ))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single order leg handed to an execution backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    #[serde(rename = "type")]
    pub kind: OrderKind,
    pub qty: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Price>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Price>,
    #[serde(default)]
    pub reduce_only: bool,
    pub idempotency_key: IdempotencyKey,
}

impl OrderRequest {
    pub fn market(
        symbol: impl Into<String>,
        side: Side,
        qty: Size,
        price: Price,
        key: IdempotencyKey,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Market,
            qty,
            price: Some(price),
            stop_price: None,
            reduce_only: false,
            idempotency_key: key,
        }
    }

    /// Reduce-only stop that closes a position opened on `side.opposite()`.
    pub fn protective_stop(
        symbol: impl Into<String>,
        side: Side,
        qty: Size,
        stop_price: Price,
        key: IdempotencyKey,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            kind: OrderKind::Stop,
            qty,
            price: None,
            stop_price: Some(stop_price),
            reduce_only: true,
            idempotency_key: key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_side_from_venue() {
        assert_eq!(Side::from_venue("Buy"), Side::Buy);
        assert_eq!(Side::from_venue("Sell"), Side::Sell);
        assert_eq!(Side::from_venue(""), Side::Sell);
    }

    #[test]
    fn test_idempotency_key_is_deterministic_per_leg() {
        let a = IdempotencyKey::for_leg("s1", 7, "BTCUSDT", Side::Buy, LegPurpose::Entry1);
        let b = IdempotencyKey::for_leg("s1", 7, "BTCUSDT", Side::Buy, LegPurpose::Entry1);
        let sl = IdempotencyKey::for_leg("s1", 7, "BTCUSDT", Side::Sell, LegPurpose::StopLoss);
        let next = IdempotencyKey::for_leg("s1", 8, "BTCUSDT", Side::Buy, LegPurpose::Entry1);

        assert_eq!(a, b);
        assert_eq!(a.as_str(), "s1-7-BTCUSDT-B-entry1");
        assert_eq!(sl.as_str(), "s1-7-BTCUSDT-S-sl");
        assert_ne!(a, next);
    }

    #[test]
    fn test_order_request_wire_shape() {
        let key = IdempotencyKey::from_string("k".to_string());
        let order =
            OrderRequest::protective_stop("ETHUSDT", Side::Sell, Size::new(dec!(0.1)), Price::new(dec!(1900)), key);
        let json = serde_json::to_value(&order).unwrap();

        assert_eq!(json["type"], "Stop");
        assert_eq!(json["side"], "Sell");
        assert_eq!(json["reduceOnly"], true);
        assert_eq!(json["stopPrice"], "1900");
        assert!(json.get("price").is_none());
    }
}
