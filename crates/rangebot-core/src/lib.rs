//! Core domain types for the range trading bot.
//!
//! This crate provides the types every other crate speaks:
//! - `Price`, `Size`: precision-safe numerics
//! - `OrderRequest`, `IdempotencyKey`: order legs and their dedup keys
//! - `InstrumentSpec`: lot/tick constraints used for quantization
//! - `BotConfig`, `ConfigStore`: live operator configuration
//! - `EventBus`, `BotEvent`: in-process publish/subscribe

pub mod config;
pub mod decimal;
pub mod error;
pub mod events;
pub mod execution;
pub mod market;
pub mod order;
pub mod report;

pub use config::{BotConfig, ConfigStore, TradingMode};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use events::{
    now_ms, BotEvent, EventBus, EventEnvelope, Subscription, TOPIC_MARKET_PRICES,
    TOPIC_RANGE_METRICS,
};
pub use execution::{
    Candidate, ExecutionEvent, ExecutionResult, ExecutionStatus, OpenOrder, OrderAck, Position,
    Sizing,
};
pub use market::{Candle, InstrumentSpec};
pub use order::{IdempotencyKey, LegPurpose, OrderKind, OrderRequest, Side};
pub use report::{
    CandidateSummary, DecisionExplain, Gates, MarketSnapshot, SignalSummary, StatusSummary,
    Timeframes, REASON_BOT_STOPPED,
};
