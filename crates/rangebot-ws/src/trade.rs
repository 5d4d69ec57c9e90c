//! Authenticated trade channel.
//!
//! Wraps a credentialed [`StreamChannel`] and correlates `order.create`
//! requests with their responses by `reqId`.

use dashmap::DashMap;
use rangebot_core::now_ms;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::connection::{StreamChannel, StreamConfig};
use crate::error::{WsError, WsResult};
use crate::message::{OpResponse, StreamMessage};

/// Trade channel configuration.
#[derive(Debug, Clone)]
pub struct TradeChannelConfig {
    pub stream: StreamConfig,
    pub recv_window_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for TradeChannelConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                name: "trade".to_string(),
                ..Default::default()
            },
            recv_window_ms: 5_000,
            request_timeout_ms: 10_000,
        }
    }
}

type PendingMap = DashMap<String, oneshot::Sender<OpResponse>>;

pub struct TradeChannel {
    stream: StreamChannel,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    recv_window_ms: u64,
    request_timeout: Duration,
}

impl TradeChannel {
    /// Create the channel and its response pump. Does not connect.
    pub fn spawn(config: TradeChannelConfig) -> Arc<Self> {
        let (message_tx, message_rx) = mpsc::channel(256);
        let pending: Arc<PendingMap> = Arc::new(DashMap::new());
        tokio::spawn(pump_responses(message_rx, pending.clone()));

        Arc::new(Self {
            stream: StreamChannel::new(config.stream, message_tx),
            pending,
            next_id: AtomicU64::new(0),
            recv_window_ms: config.recv_window_ms,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    pub fn stream(&self) -> &StreamChannel {
        &self.stream
    }

    pub fn connect(&self) -> bool {
        self.stream.connect()
    }

    pub fn close(&self) {
        self.stream.close();
        self.pending.clear();
    }

    pub fn is_ready(&self) -> bool {
        self.stream.is_ready()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Submit an order and wait for the venue's response.
    ///
    /// Fails fast with [`WsError::NotReady`] unless the channel is open and
    /// authenticated.
    pub async fn create_order(&self, order: Value) -> WsResult<Value> {
        if !self.stream.is_ready() {
            return Err(WsError::NotReady(format!(
                "trade channel {} (auth {:?})",
                self.stream.state().as_str(),
                self.stream.auth_state()
            )));
        }

        let req_id = format!("rb-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let frame = json!({
            "reqId": req_id,
            "header": {
                "X-BAPI-TIMESTAMP": now_ms().to_string(),
                "X-BAPI-RECV-WINDOW": self.recv_window_ms.to_string(),
            },
            "op": "order.create",
            "args": [order],
        });

        let (tx, rx) = oneshot::channel();
        self.pending.insert(req_id.clone(), tx);
        if let Err(e) = self.stream.send_json(&frame) {
            self.pending.remove(&req_id);
            return Err(e);
        }
        debug!(%req_id, "Order request sent");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) if resp.is_success() => Ok(resp.data),
            Ok(Ok(resp)) => Err(WsError::Rejected {
                code: resp.ret_code.unwrap_or(-1),
                message: resp.ret_msg.unwrap_or_else(|| "order rejected".to_string()),
            }),
            Ok(Err(_)) => Err(WsError::ConnectionFailed(
                "trade channel closed before response".to_string(),
            )),
            Err(_) => {
                self.pending.remove(&req_id);
                warn!(%req_id, "Order request timed out");
                Err(WsError::Timeout(self.request_timeout.as_millis() as u64))
            }
        }
    }
}

async fn pump_responses(mut rx: mpsc::Receiver<StreamMessage>, pending: Arc<PendingMap>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            StreamMessage::Op(resp) => {
                let Some(req_id) = resp.req_id.clone() else {
                    trace!(op = %resp.op, "Trade op without reqId");
                    continue;
                };
                match pending.remove(&req_id) {
                    Some((_, tx)) => {
                        let _ = tx.send(resp);
                    }
                    None => debug!(%req_id, "Response for unknown request"),
                }
            }
            other => trace!(?other, "Ignoring trade channel frame"),
        }
    }
    debug!("Trade response pump exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_order_requires_ready() {
        let channel = TradeChannel::spawn(TradeChannelConfig::default());
        let err = channel.create_order(json!({"symbol": "BTCUSDT"})).await;
        assert!(matches!(err, Err(WsError::NotReady(_))));
        assert_eq!(channel.pending_count(), 0);
    }
}
