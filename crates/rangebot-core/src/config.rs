//! Live trading configuration.
//!
//! [`BotConfig`] is the operator-editable configuration. It is held by a
//! [`ConfigStore`] that every component reads fresh on each access, so an
//! accepted update takes effect on the very next read.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{info, warn};

use crate::error::{CoreError, Result};

/// Execution backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Simulated fills.
    Paper,
    /// Venue demo account over signed REST.
    Demo,
    /// Live account over the authenticated trade stream.
    Real,
}

impl TradingMode {
    pub const ALL: [TradingMode; 3] = [Self::Paper, Self::Demo, Self::Real];

    /// Parse a configured mode string. Unknown strings yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Some(Self::Paper),
            "demo" => Some(Self::Demo),
            "real" => Some(Self::Real),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paper => "paper",
            Self::Demo => "demo",
            Self::Real => "real",
        }
    }
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator-editable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BotConfig {
    /// Requested execution mode. Kept as a free string: unrecognized values
    /// are accepted here and routed to the simulated backend.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Single-symbol universe override. Empty means "auto".
    #[serde(default)]
    pub symbol: String,
    /// Declared default universe, evaluated in this order.
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,
    #[serde(default)]
    pub enable_trading: bool,
    /// Protective stop distance from entry, in percent.
    #[serde(default = "default_sl_pct")]
    pub sl_pct_default: Decimal,
    /// Only dispatch while the regime classifier reports a ranging market.
    #[serde(default = "default_trade_only_crab")]
    pub trade_only_crab: bool,
    /// Target notional per entry, in USDT.
    #[serde(default = "default_order_notional")]
    pub order_notional_usdt: Decimal,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    /// Risk gate blocks entries above this 24h volatility estimate.
    #[serde(default = "default_max_volatility_pct")]
    pub max_volatility_pct: f64,
    /// Distance from a range edge, as percent of range width, that counts as "near".
    #[serde(default = "default_range_edge_pct")]
    pub range_edge_pct: f64,
    /// Minimum range width, as percent of price, worth trading.
    #[serde(default = "default_min_range_pct")]
    pub min_range_pct: f64,
}

fn default_mode() -> String {
    TradingMode::Paper.as_str().to_string()
}

fn default_universe() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

fn default_sl_pct() -> Decimal {
    dec!(0.5)
}

fn default_trade_only_crab() -> bool {
    true
}

fn default_order_notional() -> Decimal {
    dec!(100)
}

fn default_max_open_positions() -> usize {
    3
}

fn default_max_volatility_pct() -> f64 {
    8.0
}

fn default_range_edge_pct() -> f64 {
    15.0
}

fn default_min_range_pct() -> f64 {
    0.3
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            symbol: String::new(),
            universe: default_universe(),
            enable_trading: false,
            sl_pct_default: default_sl_pct(),
            trade_only_crab: default_trade_only_crab(),
            order_notional_usdt: default_order_notional(),
            max_open_positions: default_max_open_positions(),
            max_volatility_pct: default_max_volatility_pct(),
            range_edge_pct: default_range_edge_pct(),
            min_range_pct: default_min_range_pct(),
        }
    }
}

impl BotConfig {
    /// Check field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.mode.trim().is_empty() {
            return Err(CoreError::InvalidConfig("mode must not be empty".to_string()));
        }
        if self.sl_pct_default <= Decimal::ZERO || self.sl_pct_default >= Decimal::ONE_HUNDRED {
            return Err(CoreError::InvalidConfig(format!(
                "slPctDefault must be between 0 and 100 (exclusive), got {}",
                self.sl_pct_default
            )));
        }
        if self.order_notional_usdt <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(format!(
                "orderNotionalUsdt must be positive, got {}",
                self.order_notional_usdt
            )));
        }
        if let Some(bad) = self.universe.iter().find(|s| s.trim().is_empty()) {
            return Err(CoreError::InvalidConfig(format!(
                "universe contains an empty symbol: {bad:?}"
            )));
        }
        if !self.max_volatility_pct.is_finite() || self.max_volatility_pct < 0.0 {
            return Err(CoreError::InvalidConfig(
                "maxVolatilityPct must be a non-negative number".to_string(),
            ));
        }
        if !(self.range_edge_pct > 0.0 && self.range_edge_pct <= 50.0) {
            return Err(CoreError::InvalidConfig(
                "rangeEdgePct must be in (0, 50]".to_string(),
            ));
        }
        if !self.min_range_pct.is_finite() || self.min_range_pct < 0.0 {
            return Err(CoreError::InvalidConfig(
                "minRangePct must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }

    /// Upper-cased, trimmed universe override, if any.
    pub fn symbol_override(&self) -> Option<String> {
        let s = self.symbol.trim().to_ascii_uppercase();
        (!s.is_empty()).then_some(s)
    }

    /// Effective trading universe in declared order.
    ///
    /// Entries are normalized before deduplication; the first occurrence wins.
    pub fn effective_universe(&self) -> Vec<String> {
        match self.symbol_override() {
            Some(symbol) => vec![symbol],
            None => {
                let mut symbols: Vec<String> = Vec::with_capacity(self.universe.len());
                for symbol in self.universe.iter().map(|s| s.trim().to_ascii_uppercase()) {
                    if !symbols.contains(&symbol) {
                        symbols.push(symbol);
                    }
                }
                symbols
            }
        }
    }

    /// Apply a partial JSON object on top of this config.
    ///
    /// The result is validated; the receiver is never modified.
    pub fn merged(&self, patch: &Value) -> Result<Self> {
        let Some(fields) = patch.as_object() else {
            return Err(CoreError::InvalidConfig(
                "config update must be a JSON object".to_string(),
            ));
        };
        let mut current = serde_json::to_value(self)?;
        if let Some(obj) = current.as_object_mut() {
            for (key, value) in fields {
                obj.insert(key.clone(), value.clone());
            }
        }
        let next: BotConfig = serde_json::from_value(current)
            .map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        next.validate()?;
        Ok(next)
    }

    /// Field descriptions for operator tooling.
    pub fn schema() -> Value {
        let d = Self::default();
        json!({
            "mode": { "type": "enum", "values": ["paper", "demo", "real"], "default": d.mode },
            "symbol": { "type": "string", "default": "", "description": "Universe override; empty = auto" },
            "universe": { "type": "string[]", "default": d.universe },
            "enableTrading": { "type": "boolean", "default": d.enable_trading },
            "slPctDefault": { "type": "number", "min": 0, "max": 100, "exclusive": true, "default": d.sl_pct_default },
            "tradeOnlyCrab": { "type": "boolean", "default": d.trade_only_crab },
            "orderNotionalUsdt": { "type": "number", "min": 0, "exclusive": true, "default": d.order_notional_usdt },
            "maxOpenPositions": { "type": "integer", "min": 0, "default": d.max_open_positions },
            "maxVolatilityPct": { "type": "number", "min": 0, "default": d.max_volatility_pct },
            "rangeEdgePct": { "type": "number", "min": 0, "max": 50, "default": d.range_edge_pct },
            "minRangePct": { "type": "number", "min": 0, "default": d.min_range_pct },
        })
    }
}

/// Shared holder of the live [`BotConfig`].
#[derive(Debug, Default)]
pub struct ConfigStore {
    inner: RwLock<BotConfig>,
}

impl ConfigStore {
    /// Create a store; the initial config must itself be valid.
    pub fn new(initial: BotConfig) -> Result<Self> {
        initial.validate()?;
        Ok(Self {
            inner: RwLock::new(initial),
        })
    }

    /// Snapshot of the current configuration.
    pub fn get(&self) -> BotConfig {
        self.inner.read().clone()
    }

    /// Validate and apply a partial update atomically.
    ///
    /// On error the previous configuration stays in place.
    pub fn update(&self, patch: &Value) -> Result<BotConfig> {
        let mut guard = self.inner.write();
        match guard.merged(patch) {
            Ok(next) => {
                *guard = next.clone();
                info!(mode = %next.mode, symbol = %next.symbol, "Configuration updated");
                Ok(next)
            }
            Err(e) => {
                warn!(error = %e, "Configuration update rejected");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BotConfig::default().validate().is_ok());
    }

    #[test]
    fn test_trading_mode_parse() {
        assert_eq!(TradingMode::parse("paper"), Some(TradingMode::Paper));
        assert_eq!(TradingMode::parse(" REAL "), Some(TradingMode::Real));
        assert_eq!(TradingMode::parse("live"), None);
    }

    #[test]
    fn test_effective_universe_prefers_override() {
        let mut cfg = BotConfig::default();
        assert_eq!(cfg.effective_universe().len(), 3);

        cfg.symbol = "  xrpusdt ".to_string();
        assert_eq!(cfg.effective_universe(), vec!["XRPUSDT".to_string()]);
    }

    #[test]
    fn test_effective_universe_drops_case_duplicates() {
        let cfg = BotConfig {
            universe: vec![
                "BTCUSDT".to_string(),
                "ethusdt".to_string(),
                " btcusdt".to_string(),
                "ETHUSDT".to_string(),
            ],
            ..BotConfig::default()
        };
        assert_eq!(
            cfg.effective_universe(),
            vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]
        );
    }

    #[test]
    fn test_update_applies_partial_patch() {
        let store = ConfigStore::new(BotConfig::default()).unwrap();
        let updated = store
            .update(&json!({ "mode": "demo", "enableTrading": true }))
            .unwrap();

        assert_eq!(updated.mode, "demo");
        assert!(updated.enable_trading);
        assert_eq!(store.get().universe, BotConfig::default().universe);
    }

    #[test]
    fn test_unknown_mode_string_is_accepted() {
        let store = ConfigStore::new(BotConfig::default()).unwrap();
        assert!(store.update(&json!({ "mode": "yolo" })).is_ok());
        assert_eq!(store.get().mode, "yolo");
    }

    #[test]
    fn test_rejected_update_keeps_previous_config() {
        let store = ConfigStore::new(BotConfig::default()).unwrap();
        store.update(&json!({ "symbol": "BTCUSDT" })).unwrap();

        let err = store.update(&json!({ "slPctDefault": 150, "symbol": "ETHUSDT" }));
        assert!(matches!(err, Err(CoreError::InvalidConfig(_))));
        assert_eq!(store.get().symbol, "BTCUSDT");
        assert_eq!(store.get().sl_pct_default, default_sl_pct());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let store = ConfigStore::new(BotConfig::default()).unwrap();
        assert!(store.update(&json!({ "leverage": 100 })).is_err());
    }

    #[test]
    fn test_non_object_patch_rejected() {
        let store = ConfigStore::new(BotConfig::default()).unwrap();
        assert!(store.update(&json!(["mode", "real"])).is_err());
        assert_eq!(store.get().mode, "paper");
    }
}
