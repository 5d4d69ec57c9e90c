//! Executor error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Missing credentials for signed request")]
    MissingCredentials,

    /// Backend failure tagged with the mode that produced it.
    #[error("mode={mode}: {message}")]
    Mode { mode: String, message: String },

    #[error(transparent)]
    Ws(#[from] rangebot_ws::WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ExecutorError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;
