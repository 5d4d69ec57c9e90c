//! Default collaborators: threshold risk gate, volatility regime, candle
//! range features and a range-edge evaluator.

use rangebot_core::{BotConfig, Candidate, Candle, Side};
use rangebot_feed::{MarketStore, SymbolState};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::collaborators::{
    CandidateEvaluator, FeatureCalculator, Features, Regime, RegimeClassifier, RiskContext,
    RiskDecision, RiskGate,
};
use crate::error::EngineResult;

/// Average absolute 24h change below which the market counts as ranging.
pub const CRAB_MAX_VOLATILITY_PCT: f64 = 3.0;

/// Candle intervals tried for the trading range, first match wins.
const RANGE_INTERVALS: [&str; 3] = ["15", "60", "5"];

/// Blocks entries at the position cap or when the universe is too volatile.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThresholdRiskGate;

impl RiskGate for ThresholdRiskGate {
    fn evaluate(&self, ctx: &RiskContext<'_>) -> RiskDecision {
        let mut reasons = Vec::new();
        if ctx.open_positions >= ctx.config.max_open_positions {
            reasons.push(format!(
                "maxOpenPositions:{}/{}",
                ctx.open_positions, ctx.config.max_open_positions
            ));
        }
        if let Some(vol) = average_volatility(ctx.market, ctx.universe) {
            if vol > ctx.config.max_volatility_pct {
                reasons.push(format!("volatilityTooHigh:{vol:.2}"));
            }
        }
        if reasons.is_empty() {
            RiskDecision::allow()
        } else {
            RiskDecision::block(reasons)
        }
    }
}

fn average_volatility(market: &MarketStore, universe: &[String]) -> Option<f64> {
    let samples: Vec<f64> = universe
        .iter()
        .filter_map(|s| market.get(s)?.volatility_pct?.to_f64())
        .collect();
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Calm universe is CRAB; otherwise the sign of aggregate trade delta
/// decides BULL or BEAR.
#[derive(Debug, Default, Clone, Copy)]
pub struct VolatilityRegime;

impl RegimeClassifier for VolatilityRegime {
    fn classify(&self, market: &MarketStore, universe: &[String]) -> Regime {
        let Some(vol) = average_volatility(market, universe) else {
            return Regime::Unknown;
        };
        if vol < CRAB_MAX_VOLATILITY_PCT {
            return Regime::Crab;
        }
        let delta: Decimal = universe
            .iter()
            .filter_map(|s| market.get(s).map(|st| st.delta_slope))
            .sum();
        if delta.is_sign_negative() {
            Regime::Bear
        } else {
            Regime::Bull
        }
    }
}

/// Features from the latest candle range and flow counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeFeatures;

fn range_candle(state: &SymbolState) -> Option<Candle> {
    RANGE_INTERVALS
        .iter()
        .filter_map(|i| state.candle(i))
        .find(|c| c.range().is_positive())
}

impl FeatureCalculator for RangeFeatures {
    fn compute(&self, state: &SymbolState) -> Features {
        let last_price = state.last_price.unwrap_or_default();
        let candle = range_candle(state);
        let (range_pct, position_in_range) = match candle {
            Some(c) if last_price.is_positive() => {
                let width = c.range().to_f64();
                let pos = (last_price.to_f64() - c.low.to_f64()) / width;
                (
                    Some(width / last_price.to_f64() * 100.0),
                    Some(pos.clamp(0.0, 1.0)),
                )
            }
            _ => (None, None),
        };
        Features {
            symbol: state.symbol.clone(),
            last_price,
            range_high: candle.map(|c| c.high),
            range_low: candle.map(|c| c.low),
            range_pct,
            position_in_range,
            delta_slope: state.delta_slope,
            volatility_pct: state.volatility_pct,
            liq_imbalance: state
                .liq_short_notional
                .saturating_sub(state.liq_long_notional),
        }
    }
}

/// Buys near the range low and sells near the range high.
///
/// "Near" means within `range_edge_pct` of the range width from the edge.
/// Ranges narrower than `min_range_pct` of price are ignored.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeEdgeEvaluator;

impl CandidateEvaluator for RangeEdgeEvaluator {
    fn evaluate(
        &self,
        symbol: &str,
        features: &Features,
        config: &BotConfig,
    ) -> EngineResult<Option<Candidate>> {
        let (Some(range_pct), Some(pos)) = (features.range_pct, features.position_in_range) else {
            return Ok(None);
        };
        if range_pct < config.min_range_pct {
            return Ok(None);
        }

        let edge = (config.range_edge_pct / 100.0).clamp(0.0, 0.5);
        if edge <= 0.0 {
            return Ok(None);
        }
        let (side, rationale, distance) = if pos <= edge {
            (Side::Buy, "nearSupport", pos)
        } else if pos >= 1.0 - edge {
            (Side::Sell, "nearResistance", 1.0 - pos)
        } else {
            return Ok(None);
        };

        Ok(Some(Candidate {
            symbol: symbol.to_string(),
            side,
            rationale: rationale.to_string(),
            score: Some(1.0 - distance / edge),
        }))
    }
}
