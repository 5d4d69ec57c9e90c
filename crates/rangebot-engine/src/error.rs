//! Engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Evaluator failed for {symbol}: {message}")]
    Evaluator { symbol: String, message: String },

    #[error(transparent)]
    Executor(#[from] rangebot_executor::ExecutorError),

    #[error(transparent)]
    Config(#[from] rangebot_core::CoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;
