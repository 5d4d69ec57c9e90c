//! Decision cycle for the range trading bot.
//!
//! `DecisionEngine` evaluates the trading universe on a fixed interval
//! against pluggable collaborators (risk gate, regime classifier, feature
//! calculator, candidate evaluator) and dispatches qualifying candidates.

pub mod collaborators;
pub mod engine;
pub mod error;
pub mod explain;
pub mod strategy;

pub use collaborators::{
    CandidateEvaluator, FeatureCalculator, Features, InstrumentSource, Regime, RegimeClassifier,
    RiskContext, RiskDecision, RiskGate, StaticInstruments,
};
pub use engine::{Collaborators, DecisionEngine, EngineSettings};
pub use error::{EngineError, EngineResult};
pub use explain::{ExplainBuilder, TOP_CANDIDATES};
pub use strategy::{RangeEdgeEvaluator, RangeFeatures, ThresholdRiskGate, VolatilityRegime};
