//! Duplex RPC channel between the bot and its operators.
//!
//! - `server`: WebSocket endpoint dispatching requests to an [`RpcHandler`]
//!   and forwarding bot events to every connection
//! - `client`: reconnecting client with a bounded outbound queue
//! - `protocol`: request/response/event frames

pub mod client;
pub mod error;
pub mod protocol;
pub mod queue;
pub mod server;

pub use client::{ClientState, ConnectionStatus, RpcClient, RpcClientConfig, RpcEvent};
pub use error::{RpcClientError, RpcClientResult, RpcError, RpcResult};
pub use protocol::{classify_inbound, Frame, Inbound, RpcErrorBody, CODE_BAD_JSON, CODE_RPC_ERROR};
pub use queue::{OutboundQueue, QueuedFrame, DEFAULT_QUEUE_CAPACITY};
pub use server::{
    create_router, respond, run, serve, BoxFuture, ConnectionGuard, ConnectionLimiter,
    RpcHandler, RpcServerConfig, RpcState, ServerInfo,
};
