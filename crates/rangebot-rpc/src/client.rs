//! Reconnecting RPC client.
//!
//! Requests made while the connection is down are held in a bounded
//! [`OutboundQueue`] and flushed in order once connected. Responses are
//! matched to callers by request id only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rangebot_ws::Backoff;
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{RpcClientError, RpcClientResult};
use crate::protocol::{Frame, RpcErrorBody, CODE_RPC_ERROR};
use crate::queue::{OutboundQueue, QueuedFrame, DEFAULT_QUEUE_CAPACITY};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Responder = oneshot::Sender<RpcClientResult<Value>>;

#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    pub url: String,
    pub queue_capacity: usize,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_jitter_ms: u64,
    /// Reconnect after drops, and connect on demand when a call is made.
    pub auto_reconnect: bool,
}

impl RpcClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8787/ws".to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            backoff_jitter_ms: 350,
            auto_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Observable client state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientState {
    pub status: ConnectionStatus,
    pub url: String,
    pub attempt: u32,
    pub next_delay_ms: Option<u64>,
    pub last_error: Option<String>,
    pub auto_reconnect_enabled: bool,
}

/// Event frame received from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEvent {
    pub topic: String,
    pub payload: Value,
}

struct Inner {
    queue: OutboundQueue,
    pending: HashMap<u64, Responder>,
    /// Set only while connected and the queue has been flushed.
    writer: Option<mpsc::UnboundedSender<QueuedFrame>>,
    driver: Option<CancellationToken>,
    auto_reconnect: bool,
}

impl Inner {
    fn reject(&mut self, frame: &QueuedFrame, error: RpcClientError) {
        if let Some(tx) = frame.pending_id.and_then(|id| self.pending.remove(&id)) {
            let _ = tx.send(Err(error));
        }
    }
}

pub struct RpcClient {
    config: RpcClientConfig,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    state: watch::Sender<ClientState>,
    events: broadcast::Sender<RpcEvent>,
}

impl RpcClient {
    pub fn new(config: RpcClientConfig) -> Arc<Self> {
        let (state, _) = watch::channel(ClientState {
            status: ConnectionStatus::Disconnected,
            url: config.url.clone(),
            attempt: 0,
            next_delay_ms: None,
            last_error: None,
            auto_reconnect_enabled: config.auto_reconnect,
        });
        let (events, _) = broadcast::channel(1024);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                queue: OutboundQueue::new(config.queue_capacity),
                pending: HashMap::new(),
                writer: None,
                driver: None,
                auto_reconnect: config.auto_reconnect,
            }),
            config,
            next_id: AtomicU64::new(1),
            state,
            events,
        })
    }

    pub fn state(&self) -> ClientState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RpcEvent> {
        self.events.subscribe()
    }

    pub fn queued(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Start the connection driver and enable auto-reconnect.
    pub fn connect(self: &Arc<Self>) {
        let token = {
            let mut inner = self.inner.lock();
            inner.auto_reconnect = true;
            if inner.driver.is_some() {
                return;
            }
            let token = CancellationToken::new();
            inner.driver = Some(token.clone());
            token
        };
        self.state.send_modify(|s| s.auto_reconnect_enabled = true);
        let client = Arc::clone(self);
        tokio::spawn(async move { client.run(token).await });
    }

    /// Close the connection, cancel reconnects and fail every outstanding request.
    pub fn disconnect(&self) {
        let rejected = {
            let mut inner = self.inner.lock();
            inner.auto_reconnect = false;
            if let Some(token) = inner.driver.take() {
                token.cancel();
            }
            inner.writer = None;
            inner.queue.clear();
            inner.pending.drain().map(|(_, tx)| tx).collect::<Vec<_>>()
        };
        let count = rejected.len();
        for tx in rejected {
            let _ = tx.send(Err(RpcClientError::Disconnected));
        }
        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Disconnected;
            s.attempt = 0;
            s.next_delay_ms = None;
            s.auto_reconnect_enabled = false;
        });
        info!(url = %self.config.url, rejected = count, "RPC client disconnected");
    }

    /// Send a request and wait for its response.
    pub async fn call(self: &Arc<Self>, method: &str, params: Value) -> RpcClientResult<Value> {
        self.request(method, params)
            .await
            .unwrap_or(Err(RpcClientError::Disconnected))
    }

    /// Send a request; the receiver resolves with the response.
    ///
    /// Enqueues synchronously, so requests issued back to back keep their order.
    pub fn request(
        self: &Arc<Self>,
        method: &str,
        params: Value,
    ) -> oneshot::Receiver<RpcClientResult<Value>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let frame = QueuedFrame {
            text: Frame::request(id, method, params).to_text(),
            pending_id: Some(id),
        };

        let should_connect = {
            let mut inner = self.inner.lock();
            inner.pending.insert(id, tx);
            let unsent = match inner.writer.as_ref() {
                Some(writer) => writer.send(frame).err().map(|e| e.0),
                None => Some(frame),
            };
            if let Some(frame) = unsent {
                inner.writer = None;
                if let Some(evicted) = inner.queue.push(frame) {
                    warn!(
                        capacity = inner.queue.capacity(),
                        "RPC queue overflow, dropping oldest request"
                    );
                    inner.reject(&evicted, RpcClientError::QueueOverflow);
                }
            }
            inner.driver.is_none() && inner.auto_reconnect
        };
        if should_connect {
            self.connect();
        }
        rx
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = Backoff::new(
            self.config.backoff_base_ms,
            self.config.backoff_max_ms,
            self.config.backoff_jitter_ms,
        );
        let mut status = ConnectionStatus::Connecting;

        loop {
            self.state.send_modify(|s| {
                s.status = status;
                s.next_delay_ms = None;
            });
            let connected = tokio::select! {
                _ = cancel.cancelled() => return,
                result = connect_async(self.config.url.as_str()) => result,
            };
            let reason = match connected {
                Ok((ws, _)) => {
                    backoff.reset();
                    info!(url = %self.config.url, "RPC client connected");
                    self.session(ws, &cancel).await
                }
                Err(e) => e.to_string(),
            };
            if cancel.is_cancelled() {
                return;
            }

            {
                let mut inner = self.inner.lock();
                if !inner.auto_reconnect {
                    inner.driver = None;
                    drop(inner);
                    self.state.send_modify(|s| {
                        s.status = ConnectionStatus::Disconnected;
                        s.last_error = Some(reason);
                    });
                    return;
                }
            }

            let delay = backoff.next_delay();
            warn!(
                url = %self.config.url,
                error = %reason,
                attempt = backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "RPC connection lost, reconnecting"
            );
            self.state.send_modify(|s| {
                s.status = ConnectionStatus::Reconnecting;
                s.attempt = backoff.attempt();
                s.next_delay_ms = Some(delay.as_millis() as u64);
                s.last_error = Some(reason);
            });
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            status = ConnectionStatus::Reconnecting;
        }
    }

    /// Flush the queue, then pump frames both ways until the socket drops.
    /// Returns the reason the session ended.
    async fn session(&self, ws: WsStream, cancel: &CancellationToken) -> String {
        let (mut sink, mut stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedFrame>();

        loop {
            let next = {
                let mut inner = self.inner.lock();
                if cancel.is_cancelled() {
                    return "cancelled".to_string();
                }
                let next = inner.queue.pop();
                if next.is_none() {
                    inner.writer = Some(tx.clone());
                }
                next
            };
            let Some(frame) = next else { break };
            if let Err(e) = sink.send(Message::Text(frame.text.clone())).await {
                self.requeue(cancel, vec![frame]);
                return e.to_string();
            }
        }
        drop(tx);

        self.state.send_modify(|s| {
            s.status = ConnectionStatus::Connected;
            s.attempt = 0;
            s.next_delay_ms = None;
            s.last_error = None;
        });

        let mut unsent = Vec::new();
        let reason = loop {
            tokio::select! {
                _ = cancel.cancelled() => break "cancelled".to_string(),
                outbound = rx.recv() => match outbound {
                    Some(frame) => {
                        if let Err(e) = sink.send(Message::Text(frame.text.clone())).await {
                            unsent.push(frame);
                            break e.to_string();
                        }
                    }
                    None => break "writer closed".to_string(),
                },
                inbound = stream.next() => match inbound {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Close(_))) | None => break "connection closed".to_string(),
                    Some(Err(e)) => break e.to_string(),
                    Some(Ok(_)) => {}
                },
            }
        };

        rx.close();
        while let Ok(frame) = rx.try_recv() {
            unsent.push(frame);
        }
        self.requeue(cancel, unsent);
        reason
    }

    fn requeue(&self, cancel: &CancellationToken, frames: Vec<QueuedFrame>) {
        let mut inner = self.inner.lock();
        if cancel.is_cancelled() {
            return;
        }
        inner.writer = None;
        if frames.is_empty() {
            return;
        }
        debug!(count = frames.len(), "Requeueing unsent RPC frames");
        for frame in inner.queue.requeue_front(frames) {
            inner.reject(&frame, RpcClientError::QueueOverflow);
        }
    }

    fn handle_text(&self, text: &str) {
        let frame = match serde_json::from_str::<Frame>(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed RPC frame");
                return;
            }
        };
        match frame {
            Frame::Response {
                id,
                ok,
                result,
                error,
            } => {
                let responder = id.as_u64().and_then(|id| self.inner.lock().pending.remove(&id));
                let Some(tx) = responder else {
                    debug!(id = %id, "Discarding response for unknown request");
                    return;
                };
                let outcome = if ok {
                    Ok(result.unwrap_or(Value::Null))
                } else {
                    let body = error
                        .unwrap_or_else(|| RpcErrorBody::new(CODE_RPC_ERROR, "RPC request failed"));
                    Err(RpcClientError::Remote {
                        code: body.code,
                        message: body.message,
                    })
                };
                let _ = tx.send(outcome);
            }
            Frame::Event { topic, payload } => {
                let _ = self.events.send(RpcEvent { topic, payload });
            }
            Frame::Request { .. } => {}
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(token) = self.inner.get_mut().driver.take() {
            token.cancel();
        }
    }
}
