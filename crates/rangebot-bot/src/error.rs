//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] rangebot_core::CoreError),

    #[error("Executor error: {0}")]
    Executor(#[from] rangebot_executor::ExecutorError),

    #[error("Engine error: {0}")]
    Engine(#[from] rangebot_engine::EngineError),

    #[error("RPC error: {0}")]
    Rpc(#[from] rangebot_rpc::RpcError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] rangebot_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
