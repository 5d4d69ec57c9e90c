//! Market data feed for the range trading bot.
//!
//! Normalizes tagged public stream messages (tickers, trades,
//! liquidations, candles) into one `SymbolState` per symbol held in a
//! `MarketStore`.

pub mod error;
pub mod feed;
pub mod market_state;
pub mod parser;

pub use error::{FeedError, FeedResult};
pub use feed::{MarketFeed, PriceTick};
pub use market_state::{MarketStore, SymbolState, TRADE_WINDOW};
pub use parser::{
    parse_message, topics_for, LiquidationPrint, MarketEvent, Topic, TopicKind, TradePrint,
    CANDLE_INTERVALS,
};
