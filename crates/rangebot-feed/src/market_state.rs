//! Per-symbol market state.
//!
//! Each message category has exactly one update function and touches only
//! its own fields, so tickers, trades, liquidations and candles for the same
//! symbol can interleave freely (last write wins per field).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rangebot_core::{Candle, MarketSnapshot, Price, Side, Timeframes};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::parser::{LiquidationPrint, MarketEvent, TradePrint};

/// Trailing trade-size samples kept per symbol.
pub const TRADE_WINDOW: usize = 80;

/// Normalized state for one symbol.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolState {
    pub symbol: String,
    pub last_price: Option<Price>,
    /// Volatility estimate from the ticker's 24h change, in percent.
    pub volatility_pct: Option<Decimal>,
    /// Cumulative signed trade volume (buys positive).
    pub delta_slope: Decimal,
    pub trade_sizes: VecDeque<Decimal>,
    /// Notional of liquidated longs (closed by sells).
    pub liq_long_notional: Decimal,
    /// Notional of liquidated shorts (closed by buys).
    pub liq_short_notional: Decimal,
    /// Latest candle per interval ("5", "15", "60").
    pub candles: BTreeMap<String, Candle>,
    pub updated_at: DateTime<Utc>,
}

impl SymbolState {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            last_price: None,
            volatility_pct: None,
            delta_slope: Decimal::ZERO,
            trade_sizes: VecDeque::with_capacity(TRADE_WINDOW),
            liq_long_notional: Decimal::ZERO,
            liq_short_notional: Decimal::ZERO,
            candles: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn candle(&self, interval: &str) -> Option<Candle> {
        self.candles.get(interval).copied()
    }

    fn apply_ticker(
        &mut self,
        last: Option<Price>,
        mark: Option<Price>,
        change_pct: Option<Decimal>,
    ) {
        if let Some(price) = last.or(mark) {
            self.last_price = Some(price);
        }
        if let Some(pct) = change_pct {
            self.volatility_pct = Some(pct.abs());
        }
    }

    fn apply_trades(&mut self, trades: &[TradePrint]) {
        for trade in trades {
            let delta = match trade.side {
                Side::Buy => self.delta_slope.checked_add(trade.size),
                Side::Sell => self.delta_slope.checked_sub(trade.size),
            };
            let Some(delta) = delta else {
                warn!(symbol = %self.symbol, size = %trade.size, "Trade size out of range, dropping print");
                continue;
            };
            self.delta_slope = delta;
            if self.trade_sizes.len() == TRADE_WINDOW {
                self.trade_sizes.pop_front();
            }
            self.trade_sizes.push_back(trade.size);
        }
    }

    fn apply_liquidations(&mut self, prints: &[LiquidationPrint]) {
        for liq in prints {
            let bucket = match liq.side {
                Side::Buy => &mut self.liq_short_notional,
                Side::Sell => &mut self.liq_long_notional,
            };
            match liq.notional().and_then(|n| bucket.checked_add(n)) {
                Some(total) => *bucket = total,
                None => warn!(
                    symbol = %self.symbol,
                    size = %liq.size,
                    price = %liq.price,
                    "Liquidation notional out of range, dropping print"
                ),
            }
        }
    }

    fn apply_candle(
        &mut self,
        interval: &str,
        high: Option<Price>,
        low: Option<Price>,
        close: Option<Price>,
    ) {
        let candle = Candle {
            high: high.unwrap_or(Price::ZERO),
            low: low.unwrap_or(Price::ZERO),
            close: close.or(self.last_price).unwrap_or(Price::ZERO),
            observed_at: Utc::now(),
        };
        self.candles.insert(interval.to_string(), candle);
    }
}

type Entry = Arc<RwLock<SymbolState>>;

/// Keyed store of [`SymbolState`], one entry per symbol, never removed.
#[derive(Debug, Default)]
pub struct MarketStore {
    entries: DashMap<String, Entry>,
}

impl MarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_or_create(&self, symbol: &str) -> Entry {
        self.entries
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(SymbolState::new(symbol))))
            .clone()
    }

    /// Route an event to its category's update function.
    pub fn apply(&self, event: &MarketEvent) {
        let entry = self.get_or_create(event.symbol());
        let mut state = entry.write();
        match event {
            MarketEvent::Ticker {
                last_price,
                mark_price,
                change_24h_pct,
                ..
            } => state.apply_ticker(*last_price, *mark_price, *change_24h_pct),
            MarketEvent::Trades { trades, .. } => state.apply_trades(trades),
            MarketEvent::Liquidations { prints, .. } => state.apply_liquidations(prints),
            MarketEvent::Candle {
                interval,
                high,
                low,
                close,
                ..
            } => state.apply_candle(interval, *high, *low, *close),
        }
        state.updated_at = Utc::now();
        trace!(symbol = %state.symbol, "Market state updated");
    }

    /// Copy of one symbol's state.
    pub fn get(&self, symbol: &str) -> Option<SymbolState> {
        self.entries.get(symbol).map(|e| e.read().clone())
    }

    pub fn last_price(&self, symbol: &str) -> Option<Price> {
        self.entries.get(symbol).and_then(|e| e.read().last_price)
    }

    /// Latest prices for `symbols`, `None` where unknown.
    pub fn prices<'a>(
        &self,
        symbols: impl IntoIterator<Item = &'a str>,
    ) -> BTreeMap<String, Option<Decimal>> {
        symbols
            .into_iter()
            .map(|s| (s.to_string(), self.last_price(s).map(|p| p.inner())))
            .collect()
    }

    /// Current price and 5m/15m/1h candles for one symbol.
    pub fn snapshot(&self, symbol: &str) -> MarketSnapshot {
        let state = self.get(symbol);
        MarketSnapshot {
            symbol: symbol.to_string(),
            current: state.as_ref().and_then(|s| s.last_price),
            timeframes: Timeframes {
                m5: state.as_ref().and_then(|s| s.candle("5")),
                m15: state.as_ref().and_then(|s| s.candle("15")),
                h1: state.as_ref().and_then(|s| s.candle("60")),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_message;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn apply(store: &MarketStore, topic: &str, data: serde_json::Value) {
        store.apply(&parse_message(topic, &data).unwrap());
    }

    #[test]
    fn test_ticker_falls_back_to_mark_then_previous() {
        let store = MarketStore::new();
        apply(&store, "tickers.BTCUSDT", json!({"markPrice": "30000"}));
        assert_eq!(store.last_price("BTCUSDT"), Some(Price::new(dec!(30000))));

        apply(&store, "tickers.BTCUSDT", json!({"lastPrice": "30100"}));
        assert_eq!(store.last_price("BTCUSDT"), Some(Price::new(dec!(30100))));

        apply(&store, "tickers.BTCUSDT", json!({"turnover24h": "1"}));
        assert_eq!(store.last_price("BTCUSDT"), Some(Price::new(dec!(30100))));
    }

    #[test]
    fn test_volatility_kept_when_field_missing() {
        let store = MarketStore::new();
        apply(&store, "tickers.ETHUSDT", json!({"lastPrice": "1500", "price24hPcnt": "-0.05"}));
        apply(&store, "tickers.ETHUSDT", json!({"lastPrice": "1501"}));
        assert_eq!(store.get("ETHUSDT").unwrap().volatility_pct, Some(dec!(5)));
    }

    #[test]
    fn test_trade_window_evicts_oldest() {
        let store = MarketStore::new();
        for i in 0..=TRADE_WINDOW {
            apply(
                &store,
                "publicTrade.BTCUSDT",
                json!([{"S": "Buy", "v": i.to_string()}]),
            );
        }
        let state = store.get("BTCUSDT").unwrap();
        assert_eq!(state.trade_sizes.len(), TRADE_WINDOW);
        assert_eq!(state.trade_sizes.front(), Some(&dec!(1)));
        assert_eq!(state.trade_sizes.back(), Some(&Decimal::from(TRADE_WINDOW)));
    }

    #[test]
    fn test_delta_slope_signed() {
        let store = MarketStore::new();
        apply(
            &store,
            "publicTrade.BTCUSDT",
            json!([{"S": "Buy", "v": "3"}, {"S": "Sell", "v": "1.5"}]),
        );
        assert_eq!(store.get("BTCUSDT").unwrap().delta_slope, dec!(1.5));
    }

    #[test]
    fn test_buy_liquidation_counts_as_short() {
        let store = MarketStore::new();
        apply(&store, "allLiquidation.BTCUSDT", json!({"S": "Buy", "v": "2", "p": "100"}));
        let state = store.get("BTCUSDT").unwrap();
        assert_eq!(state.liq_short_notional, dec!(200));
        assert_eq!(state.liq_long_notional, Decimal::ZERO);
    }

    #[test]
    fn test_out_of_range_prints_are_dropped() {
        let store = MarketStore::new();
        let max = Decimal::MAX.to_string();
        let max = max.as_str();
        apply(&store, "allLiquidation.BTCUSDT", json!({"S": "Buy", "v": max, "p": "2"}));
        apply(&store, "allLiquidation.BTCUSDT", json!({"S": "Buy", "v": "2", "p": "100"}));
        apply(&store, "publicTrade.BTCUSDT", json!([{"S": "Buy", "v": max}]));
        apply(&store, "publicTrade.BTCUSDT", json!([{"S": "Buy", "v": max}, {"S": "Sell", "v": "1"}]));
        apply(&store, "tickers.BTCUSDT", json!({"lastPrice": "30000", "price24hPcnt": max}));

        let state = store.get("BTCUSDT").unwrap();
        assert_eq!(state.liq_short_notional, dec!(200));
        assert_eq!(state.delta_slope, Decimal::MAX - dec!(1));
        assert_eq!(state.trade_sizes.len(), 2);
        assert_eq!(state.last_price, Some(Price::new(dec!(30000))));
        assert_eq!(state.volatility_pct, None);
    }

    #[test]
    fn test_candle_overwrites_and_falls_back_to_last_price() {
        let store = MarketStore::new();
        apply(&store, "tickers.SOLUSDT", json!({"lastPrice": "20"}));
        apply(&store, "kline.5.SOLUSDT", json!([{"high": "22", "low": "19", "close": "21"}]));
        apply(&store, "kline.5.SOLUSDT", json!([{"high": "23", "low": "18"}]));

        let candle = store.get("SOLUSDT").unwrap().candle("5").unwrap();
        assert_eq!(candle.high, Price::new(dec!(23)));
        assert_eq!(candle.close, Price::new(dec!(20)));
    }

    #[test]
    fn test_symbols_isolated() {
        let store = MarketStore::new();
        apply(&store, "tickers.BTCUSDT", json!({"lastPrice": "30000"}));
        apply(&store, "tickers.ETHUSDT", json!({"lastPrice": "1500"}));
        apply(&store, "publicTrade.ETHUSDT", json!([{"S": "Sell", "v": "4"}]));

        let btc = store.get("BTCUSDT").unwrap();
        assert_eq!(btc.last_price, Some(Price::new(dec!(30000))));
        assert_eq!(btc.delta_slope, Decimal::ZERO);
        assert!(btc.trade_sizes.is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_and_prices() {
        let store = MarketStore::new();
        apply(&store, "tickers.BTCUSDT", json!({"lastPrice": "30000"}));
        apply(&store, "kline.60.BTCUSDT", json!({"high": "31000", "low": "29000", "close": "30000"}));

        let snap = store.snapshot("BTCUSDT");
        assert_eq!(snap.current, Some(Price::new(dec!(30000))));
        assert!(snap.timeframes.h1.is_some());
        assert!(snap.timeframes.m5.is_none());

        let prices = store.prices(["BTCUSDT", "ETHUSDT"]);
        assert_eq!(prices["BTCUSDT"], Some(dec!(30000)));
        assert_eq!(prices["ETHUSDT"], None);
    }
}
