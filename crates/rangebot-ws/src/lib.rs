//! WebSocket stream clients for the range trading bot.
//!
//! Provides:
//! - `StreamChannel`: reconnecting channel with exponential backoff and
//!   jitter, topic replay on every open, and a periodic heartbeat
//! - `TradeChannel`: authenticated channel with request/response correlation
//! - `Credentials`: HMAC-SHA256 request signing

pub mod auth;
pub mod backoff;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;
pub mod trade;

pub use auth::{AuthState, Credentials};
pub use backoff::Backoff;
pub use connection::{ConnectionState, StreamChannel, StreamConfig};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatManager;
pub use message::{ControlFrame, OpResponse, StreamMessage};
pub use subscription::{SubscriptionManager, MAX_TOPICS_PER_FRAME};
pub use trade::{TradeChannel, TradeChannelConfig};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider. Call once before opening connections.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
