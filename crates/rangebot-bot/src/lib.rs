//! Range trading bot application.
//!
//! Wires the market feed, execution backends, decision engine and RPC
//! endpoint together and exposes the operator operation table.

pub mod app;
pub mod config;
pub mod error;
pub mod service;

pub use app::Application;
pub use config::{AppConfig, ExchangeEnv};
pub use error::{AppError, AppResult};
pub use service::BotService;
