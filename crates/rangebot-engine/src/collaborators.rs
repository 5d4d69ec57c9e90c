//! Contracts the decision cycle consumes.
//!
//! Risk rules, regime classification, feature math and candidate selection
//! are pluggable. The engine calls each once per cycle (risk, regime) or
//! once per symbol (features, evaluator) and treats the results as inputs.

use rangebot_core::{BotConfig, Candidate, Price};
use rangebot_executor::{BoxFuture, ExecutorResult, RestClient};
use rangebot_feed::{MarketStore, SymbolState};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::error::EngineResult;

/// Market regime label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Regime {
    /// Ranging, sideways market.
    Crab,
    Bull,
    Bear,
    Unknown,
}

impl Regime {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crab => "CRAB",
            Self::Bull => "BULL",
            Self::Bear => "BEAR",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the risk gate, taken once per cycle.
pub struct RiskContext<'a> {
    pub config: &'a BotConfig,
    pub open_positions: usize,
    pub market: &'a MarketStore,
    pub universe: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RiskDecision {
    pub can_enter: bool,
    pub reasons: Vec<String>,
}

impl RiskDecision {
    pub fn allow() -> Self {
        Self {
            can_enter: true,
            reasons: Vec::new(),
        }
    }

    pub fn block(reasons: Vec<String>) -> Self {
        Self {
            can_enter: false,
            reasons,
        }
    }
}

/// Per-symbol inputs for the candidate evaluator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Features {
    pub symbol: String,
    pub last_price: Price,
    pub range_high: Option<Price>,
    pub range_low: Option<Price>,
    /// Range width as percent of the last price.
    pub range_pct: Option<f64>,
    /// 0.0 at the range low, 1.0 at the range high.
    pub position_in_range: Option<f64>,
    pub delta_slope: Decimal,
    pub volatility_pct: Option<Decimal>,
    /// Short minus long liquidation notional.
    pub liq_imbalance: Decimal,
}

pub trait RiskGate: Send + Sync {
    fn evaluate(&self, ctx: &RiskContext<'_>) -> RiskDecision;
}

pub trait RegimeClassifier: Send + Sync {
    fn classify(&self, market: &MarketStore, universe: &[String]) -> Regime;
}

pub trait FeatureCalculator: Send + Sync {
    fn compute(&self, state: &SymbolState) -> Features;
}

/// Produces at most one candidate per symbol per call.
///
/// Errors and panics are caught by the engine and attributed to the symbol.
pub trait CandidateEvaluator: Send + Sync {
    fn evaluate(
        &self,
        symbol: &str,
        features: &Features,
        config: &BotConfig,
    ) -> EngineResult<Option<Candidate>>;
}

/// Raw instruments-info entries for the catalog.
pub trait InstrumentSource: Send + Sync {
    fn fetch(&self) -> BoxFuture<'_, ExecutorResult<Vec<Value>>>;
}

impl InstrumentSource for RestClient {
    fn fetch(&self) -> BoxFuture<'_, ExecutorResult<Vec<Value>>> {
        Box::pin(self.fetch_instruments())
    }
}

/// Fixed instrument list, for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticInstruments(pub Vec<Value>);

impl InstrumentSource for StaticInstruments {
    fn fetch(&self) -> BoxFuture<'_, ExecutorResult<Vec<Value>>> {
        let items = self.0.clone();
        Box::pin(async move { Ok(items) })
    }
}
