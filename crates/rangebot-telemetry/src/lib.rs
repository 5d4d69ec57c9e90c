//! Prometheus metrics and structured logging for the range trading bot.
//!
//! - Prometheus metrics for stream channels, decision cycles, order
//!   placement and the RPC endpoint
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{encode_text, Metrics};
