//! Instrument catalog.

use dashmap::DashMap;
use rangebot_core::{InstrumentSpec, Price, Size};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::ExecutorResult;
use crate::rest::RestClient;

/// True for linear USDT-settled perpetuals.
///
/// The symbol must end in `USDT` and carry neither `-` nor `PERP`. When the
/// venue reports quote/settle coins or a contract type, they must be `USDT`
/// and `LinearPerpetual` respectively.
pub fn is_linear_usdt_perpetual(item: &Value) -> bool {
    let symbol = item.get("symbol").and_then(Value::as_str).unwrap_or_default();
    if !symbol.ends_with("USDT") || symbol.contains('-') || symbol.contains("PERP") {
        return false;
    }
    for key in ["quoteCoin", "settleCoin"] {
        if let Some(coin) = item.get(key).and_then(Value::as_str) {
            if coin != "USDT" {
                return false;
            }
        }
    }
    match item.get("contractType").and_then(Value::as_str) {
        Some(kind) => kind.eq_ignore_ascii_case("LinearPerpetual"),
        None => true,
    }
}

fn filter_decimal(item: &Value, filter: &str, key: &str) -> Option<Decimal> {
    let raw = item.get(filter)?.get(key)?;
    match raw {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
        _ => None,
    }
}

/// Build a spec from an instruments-info entry. Missing filters yield `None`.
pub fn parse_instrument(item: &Value) -> Option<InstrumentSpec> {
    let symbol = item.get("symbol").and_then(Value::as_str)?;
    let min_qty = filter_decimal(item, "lotSizeFilter", "minOrderQty")?;
    let qty_step = filter_decimal(item, "lotSizeFilter", "qtyStep")?;
    let tick = filter_decimal(item, "priceFilter", "tickSize")?;
    Some(InstrumentSpec::new(
        symbol,
        Size::new(min_qty),
        Size::new(qty_step),
        Price::new(tick),
    ))
}

/// Lot and tick constraints per symbol, refreshed from the venue.
#[derive(Debug, Default)]
pub struct InstrumentCache {
    specs: DashMap<String, InstrumentSpec>,
}

impl InstrumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, spec: InstrumentSpec) {
        self.specs.insert(spec.symbol.clone(), spec);
    }

    pub fn get(&self, symbol: &str) -> Option<InstrumentSpec> {
        self.specs.get(symbol).map(|s| s.clone())
    }

    /// Known symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.specs.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Load every linear USDT perpetual. Returns how many were stored.
    pub fn load(&self, items: &[Value]) -> usize {
        let mut stored = 0;
        for item in items.iter().filter(|i| is_linear_usdt_perpetual(i)) {
            match parse_instrument(item) {
                Some(spec) => {
                    self.insert(spec);
                    stored += 1;
                }
                None => debug!(?item, "Instrument without usable filters"),
            }
        }
        stored
    }

    pub async fn refresh(&self, client: &RestClient) -> ExecutorResult<usize> {
        let items = client.fetch_instruments().await?;
        let stored = self.load(&items);
        info!(fetched = items.len(), stored, "Instrument catalog refreshed");
        Ok(stored)
    }
}
