//! Signed handshake for authenticated stream channels.

use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

use crate::error::{WsError, WsResult};

type HmacSha256 = Hmac<Sha256>;

/// API key pair. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    api_secret: Zeroizing<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Zeroizing::new(api_secret.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }

    /// Hex HMAC-SHA256 of `payload` under the API secret.
    pub fn sign(&self, payload: &str) -> WsResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| WsError::Auth(format!("failed to init signer: {e}")))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Signature for the realtime handshake: HMAC over `"GET/realtime" + expires`.
    pub fn sign_realtime(&self, expires_ms: i64) -> WsResult<String> {
        self.sign(&format!("GET/realtime{expires_ms}"))
    }

    /// Handshake frame `{op:"auth", args:[key, expires, signature]}`.
    pub fn auth_frame(&self, expires_ms: i64) -> WsResult<Value> {
        let signature = self.sign_realtime(expires_ms)?;
        Ok(json!({
            "op": "auth",
            "args": [self.api_key, expires_ms, signature],
        }))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Handshake progress for an authenticated channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// Channel has no credentials; open means ready.
    NotRequired,
    /// Not connected, or connected but handshake not yet sent.
    Unauthenticated,
    /// Handshake sent, waiting for acknowledgement.
    Pending,
    Authenticated,
    /// Venue refused the handshake. Retried only on the next reconnect.
    Rejected(String),
}

impl AuthState {
    /// Whether this state allows the channel to be treated as ready.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::NotRequired | Self::Authenticated)
    }
}
