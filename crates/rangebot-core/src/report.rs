//! Observer-facing records: decision explain, status summary, market snapshot.

use serde::{Deserialize, Serialize};

use crate::execution::{Candidate, Sizing};
use crate::market::Candle;
use crate::order::Side;
use crate::Price;

/// Reason recorded when the engine is not running.
pub const REASON_BOT_STOPPED: &str = "botStopped";

/// Gate values that fed a decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gates {
    pub enable_trading: bool,
    pub exchange_env: String,
    #[serde(default)]
    pub can_enter: Option<bool>,
    #[serde(default)]
    pub regime: Option<String>,
}

/// Compact candidate entry for the explain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSummary {
    pub symbol: String,
    pub side: Side,
    pub score: Option<f64>,
}

impl From<&Candidate> for CandidateSummary {
    fn from(c: &Candidate) -> Self {
        Self {
            symbol: c.symbol.clone(),
            side: c.side,
            score: c.score,
        }
    }
}

/// Most recent qualifying signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalSummary {
    pub symbol: String,
    pub side: Side,
    pub why: String,
}

/// Immutable per-cycle explanation of trade eligibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionExplain {
    pub can_trade: bool,
    pub reasons_blocked: Vec<String>,
    pub candidates_top: Vec<CandidateSummary>,
    pub last_signal: Option<SignalSummary>,
    pub sizing: Option<Sizing>,
    pub last_decision_time: Option<i64>,
    pub mode: String,
    pub gates: Gates,
}

impl DecisionExplain {
    /// Record published while the engine is stopped.
    pub fn stopped(mode: impl Into<String>, gates: Gates, at: Option<i64>) -> Self {
        Self {
            can_trade: false,
            reasons_blocked: vec![REASON_BOT_STOPPED.to_string()],
            candidates_top: Vec::new(),
            last_signal: None,
            sizing: None,
            last_decision_time: at,
            mode: mode.into(),
            gates,
        }
    }
}

/// Status summary published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub running: bool,
    pub trading_mode: String,
    pub enable_trading: bool,
    pub exchange_env: String,
    /// Universe override, or "auto".
    pub symbol: String,
    pub symbols: usize,
    pub candidates: usize,
    pub positions: usize,
    pub last_signal_time: Option<i64>,
    pub last_decision_time: Option<i64>,
    pub gates: Gates,
    pub can_trade: bool,
    pub reasons_blocked: Vec<String>,
}

/// Candle triple for the market snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeframes {
    pub m5: Option<Candle>,
    pub m15: Option<Candle>,
    pub h1: Option<Candle>,
}

/// Read-only view of one symbol's market state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current: Option<Price>,
    pub timeframes: Timeframes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_explain() {
        let explain = DecisionExplain::stopped("paper", Gates::default(), Some(1));
        assert!(!explain.can_trade);
        assert_eq!(explain.reasons_blocked, vec!["botStopped".to_string()]);

        let json = serde_json::to_value(&explain).unwrap();
        assert_eq!(json["canTrade"], false);
        assert_eq!(json["lastDecisionTime"], 1);
        assert!(json["lastSignal"].is_null());
    }
}
