//! Order execution for the range trading bot.
//!
//! - `ExecutionGateway`: backend contract with capability flags
//! - `PaperGateway`, `RestGateway`, `LiveGateway`: simulated, signed REST
//!   and trade-stream backends
//! - `ModeRouter`: picks the backend named by live configuration
//! - `OrderDispatcher`: bracket placement with idempotency keys

pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod instruments;
pub mod live;
pub mod paper;
pub mod rest;
pub mod router;

pub use dispatcher::OrderDispatcher;
pub use error::{ExecutorError, ExecutorResult};
pub use gateway::{BoxFuture, Capabilities, EmergencyStopSummary, ExecutionGateway, MockGateway};
pub use instruments::{is_linear_usdt_perpetual, InstrumentCache};
pub use live::LiveGateway;
pub use paper::PaperGateway;
pub use rest::{order_payload, RestClient, RestGateway};
pub use router::{EmergencyStopOutcome, ModeRouter, Route};
