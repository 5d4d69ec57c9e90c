//! RPC error types.

use thiserror::Error;

use crate::protocol::{RpcErrorBody, CODE_RPC_ERROR};

/// Failure of a server-side operation. Always answered with `RPC_ERROR`.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Handler(String),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    pub fn to_body(&self) -> RpcErrorBody {
        RpcErrorBody::new(CODE_RPC_ERROR, self.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Failure of a client call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcClientError {
    #[error("WS queue overflow; request dropped")]
    QueueOverflow,

    #[error("WS client disconnected")]
    Disconnected,

    #[error("{code}: {message}")]
    Remote { code: String, message: String },

    #[error("Encode error: {0}")]
    Encode(String),
}

pub type RpcClientResult<T> = Result<T, RpcClientError>;
