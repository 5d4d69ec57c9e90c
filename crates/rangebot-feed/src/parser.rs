//! Public stream message parsing.
//!
//! Topics are `<category>.<symbol>` or `kline.<interval>.<symbol>`. Numeric
//! fields arrive either as JSON strings or numbers; both are accepted and a
//! missing or unparseable field becomes `None` rather than an error.

use crate::error::{FeedError, FeedResult};
use rangebot_core::{Price, Side};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Candle intervals subscribed per symbol (minutes).
pub const CANDLE_INTERVALS: [&str; 3] = ["5", "15", "60"];

/// Message category of a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    Ticker,
    Trade,
    Liquidation,
    Kline { interval: String },
}

/// Parsed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub kind: TopicKind,
    pub symbol: String,
}

impl Topic {
    pub fn parse(topic: &str) -> FeedResult<Self> {
        let mut parts = topic.split('.');
        let category = parts.next().unwrap_or_default();
        let (kind, symbol) = match category {
            "tickers" => (TopicKind::Ticker, parts.next()),
            "publicTrade" => (TopicKind::Trade, parts.next()),
            "allLiquidation" | "liquidation" => (TopicKind::Liquidation, parts.next()),
            "kline" => {
                let interval = parts.next().unwrap_or_default().to_string();
                if interval.is_empty() {
                    return Err(FeedError::UnknownTopic(topic.to_string()));
                }
                (TopicKind::Kline { interval }, parts.next())
            }
            _ => return Err(FeedError::UnknownTopic(topic.to_string())),
        };
        match symbol {
            Some(s) if !s.is_empty() && parts.next().is_none() => Ok(Self {
                kind,
                symbol: s.to_string(),
            }),
            _ => Err(FeedError::UnknownTopic(topic.to_string())),
        }
    }
}

/// Every topic the feed subscribes for one symbol.
pub fn topics_for(symbol: &str) -> Vec<String> {
    let mut topics = vec![
        format!("tickers.{symbol}"),
        format!("publicTrade.{symbol}"),
    ];
    topics.extend(
        CANDLE_INTERVALS
            .iter()
            .map(|interval| format!("kline.{interval}.{symbol}")),
    );
    topics.push(format!("allLiquidation.{symbol}"));
    topics
}

/// One public trade print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradePrint {
    /// Aggressor side.
    pub side: Side,
    pub size: Decimal,
}

/// One liquidation print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationPrint {
    /// Side of the order that closed the liquidated position.
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
}

impl LiquidationPrint {
    /// Size times price, `None` when the product is out of range.
    pub fn notional(&self) -> Option<Decimal> {
        self.size.checked_mul(self.price)
    }
}

/// Normalized market message.
#[derive(Debug, Clone, PartialEq)]
pub enum MarketEvent {
    Ticker {
        symbol: String,
        last_price: Option<Price>,
        mark_price: Option<Price>,
        /// 24h change as a percentage (venue sends a fraction).
        change_24h_pct: Option<Decimal>,
    },
    Trades {
        symbol: String,
        trades: Vec<TradePrint>,
    },
    Liquidations {
        symbol: String,
        prints: Vec<LiquidationPrint>,
    },
    Candle {
        symbol: String,
        interval: String,
        high: Option<Price>,
        low: Option<Price>,
        close: Option<Price>,
    },
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Ticker { symbol, .. }
            | Self::Trades { symbol, .. }
            | Self::Liquidations { symbol, .. }
            | Self::Candle { symbol, .. } => symbol,
        }
    }
}

/// Parse the `data` of a topic push.
pub fn parse_message(topic: &str, data: &Value) -> FeedResult<MarketEvent> {
    let Topic { kind, symbol } = Topic::parse(topic)?;
    if data.is_null() {
        return Err(FeedError::InvalidData(format!("{topic}: empty data")));
    }

    let event = match kind {
        TopicKind::Ticker => {
            let t = first(data);
            MarketEvent::Ticker {
                symbol,
                last_price: price(t, &["lastPrice"]),
                mark_price: price(t, &["markPrice"]),
                change_24h_pct: decimal(t, &["price24hPcnt"])
                    .and_then(|f| f.checked_mul(Decimal::ONE_HUNDRED)),
            }
        }
        TopicKind::Trade => MarketEvent::Trades {
            symbol,
            trades: items(data)
                .map(|tr| TradePrint {
                    side: side(tr),
                    size: decimal(tr, &["v", "size"]).unwrap_or_default(),
                })
                .collect(),
        },
        TopicKind::Liquidation => MarketEvent::Liquidations {
            symbol,
            prints: items(data)
                .map(|liq| LiquidationPrint {
                    side: side(liq),
                    size: decimal(liq, &["v", "value"]).unwrap_or_default(),
                    price: decimal(liq, &["p", "price"]).unwrap_or_default(),
                })
                .collect(),
        },
        TopicKind::Kline { interval } => {
            let c = first(data);
            MarketEvent::Candle {
                symbol,
                interval,
                high: price(c, &["high", "h"]),
                low: price(c, &["low", "l"]),
                close: price(c, &["close", "c", "lastPrice"]),
            }
        }
    };
    Ok(event)
}

fn first(data: &Value) -> &Value {
    match data {
        Value::Array(arr) => arr.first().unwrap_or(&Value::Null),
        other => other,
    }
}

fn items(data: &Value) -> impl Iterator<Item = &Value> {
    let slice = match data {
        Value::Array(arr) => arr.as_slice(),
        other => std::slice::from_ref(other),
    };
    slice.iter().filter(|v| v.is_object())
}

fn side(v: &Value) -> Side {
    Side::from_venue(v.get("S").or_else(|| v.get("side")).and_then(Value::as_str).unwrap_or(""))
}

/// First present key parsed as a decimal.
fn decimal(v: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|k| match v.get(*k)? {
        Value::String(s) if !s.is_empty() => Decimal::from_str(s)
            .or_else(|_| Decimal::from_scientific(s))
            .ok(),
        Value::Number(n) => n
            .as_i64()
            .map(Decimal::from)
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        _ => None,
    })
}

/// Like [`decimal`] but treats zero and negative values as absent.
fn price(v: &Value, keys: &[&str]) -> Option<Price> {
    decimal(v, keys).filter(|d| *d > Decimal::ZERO).map(Price::new)
}
