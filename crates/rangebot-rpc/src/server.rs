//! RPC server: WebSocket endpoint plus a small HTTP surface, using axum.

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{FutureExt, SinkExt, StreamExt};
use rangebot_core::{now_ms, EventBus};
use rangebot_telemetry::{encode_text, Metrics};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::error::{RpcError, RpcResult};
use crate::protocol::{classify_inbound, Frame, Inbound, RpcErrorBody, CODE_BAD_JSON, CODE_RPC_ERROR};

/// Responses buffered per connection while the socket writer is busy.
const REPLY_CAPACITY: usize = 64;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Operation table behind the endpoint.
pub trait RpcHandler: Send + Sync {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, RpcResult<Value>>;
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket path.
    #[serde(default = "default_path")]
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Static facts reported by the HTTP surface.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub version: String,
    pub mode: String,
    pub env: String,
}

pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

/// Holds one connection slot until dropped.
pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct RpcState {
    handler: Arc<dyn RpcHandler>,
    events: EventBus,
    limiter: Arc<ConnectionLimiter>,
    config: RpcServerConfig,
    info: ServerInfo,
    started: Instant,
}

impl RpcState {
    pub fn new(
        config: RpcServerConfig,
        info: ServerInfo,
        handler: Arc<dyn RpcHandler>,
        events: EventBus,
    ) -> Self {
        Self {
            handler,
            events,
            limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
            info,
            started: Instant::now(),
        }
    }

    pub fn connections(&self) -> usize {
        self.limiter.current_count()
    }
}

pub fn create_router(state: RpcState) -> Router {
    let ws_path = state.config.path.clone();
    Router::new()
        .route("/healthz", get(healthz))
        .route("/version", get(version))
        .route("/ws-info", get(ws_info))
        .route("/metrics", get(metrics))
        .route(&ws_path, get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, state: RpcState) -> RpcResult<()> {
    let addr = listener.local_addr()?;
    info!(%addr, path = %state.config.path, "RPC server listening");
    axum::serve(listener, create_router(state)).await?;
    Ok(())
}

/// Bind from config and serve.
pub async fn run(state: RpcState) -> RpcResult<()> {
    let addr: SocketAddr = format!("{}:{}", state.config.host, state.config.port)
        .parse()
        .map_err(|e| RpcError::Handler(format!("invalid listen address: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state).await
}

async fn healthz(State(state): State<RpcState>) -> Json<Value> {
    let uptime = (state.started.elapsed().as_secs_f64() * 10.0).round() / 10.0;
    Json(json!({ "ok": true, "version": state.info.version, "uptimeSec": uptime }))
}

async fn version(State(state): State<RpcState>) -> Json<Value> {
    Json(json!({ "version": state.info.version, "mode": state.info.mode }))
}

async fn ws_info(State(state): State<RpcState>) -> Json<Value> {
    Json(json!({
        "wsPath": state.config.path,
        "httpPort": state.config.port,
        "env": state.info.env,
        "now": now_ms(),
    }))
}

async fn metrics() -> Response {
    match encode_text() {
        Ok(body) => body.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn ws_handler(State(state): State<RpcState>, ws: WebSocketUpgrade) -> Response {
    let Some(guard) = state.limiter.try_acquire() else {
        warn!(
            current = state.limiter.current_count(),
            max = state.config.max_connections,
            "RPC connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };
    ws.on_upgrade(move |socket| handle_connection(socket, state, guard))
}

async fn handle_connection(socket: WebSocket, state: RpcState, _guard: ConnectionGuard) {
    Metrics::rpc_connection_opened();
    info!(connections = state.limiter.current_count(), "RPC client connected");

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.events.subscribe();
    // Requests run on their own tasks; responses come back in completion order.
    let (reply_tx, mut replies) = mpsc::channel::<Frame>(REPLY_CAPACITY);

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let handler = state.handler.clone();
                    let reply_tx = reply_tx.clone();
                    tokio::spawn(async move {
                        if let Some(frame) = respond(handler.as_ref(), text.as_str()).await {
                            if reply_tx.send(frame).await.is_err() {
                                debug!("Connection closed before response was sent");
                            }
                        }
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "RPC receive error");
                    break;
                }
                Some(Ok(_)) => {}
            },
            Some(frame) = replies.recv() => {
                if sender.send(Message::Text(frame.to_text().into())).await.is_err() {
                    debug!("Failed to send response, client disconnected");
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(envelope) => {
                    let frame = Frame::event(envelope.topic(), envelope.payload());
                    if sender.send(Message::Text(frame.to_text().into())).await.is_err() {
                        debug!("Failed to send event, client disconnected");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "RPC client lagged behind event stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    Metrics::rpc_connection_closed();
    info!(
        connections = state.limiter.current_count().saturating_sub(1),
        "RPC client disconnected"
    );
}

/// Turn one inbound text frame into the response to send, if any.
///
/// Handler errors and panics become `RPC_ERROR` responses.
pub async fn respond(handler: &dyn RpcHandler, text: &str) -> Option<Frame> {
    let (id, method, params) = match classify_inbound(text) {
        Inbound::Request { id, method, params } => (id, method, params),
        Inbound::BadJson => {
            Metrics::rpc_error(CODE_BAD_JSON);
            return Some(Frame::fail(
                Value::Null,
                RpcErrorBody::new(CODE_BAD_JSON, "Invalid JSON"),
            ));
        }
        Inbound::Ignored => return None,
    };

    Metrics::rpc_request(&method);
    let outcome = AssertUnwindSafe(handler.call(&method, params))
        .catch_unwind()
        .await;
    let frame = match outcome {
        Ok(Ok(result)) => Frame::ok(id, result),
        Ok(Err(e)) => {
            warn!(method = %method, error = %e, "RPC handler failed");
            Metrics::rpc_error(CODE_RPC_ERROR);
            Frame::fail(id, e.to_body())
        }
        Err(_) => {
            warn!(method = %method, "RPC handler panicked");
            Metrics::rpc_error(CODE_RPC_ERROR);
            Frame::fail(id, RpcErrorBody::new(CODE_RPC_ERROR, "internal handler failure"))
        }
    };
    Some(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Echo;

    impl RpcHandler for Echo {
        fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, RpcResult<Value>> {
            Box::pin(async move {
                match method {
                    "ping" => Ok(json!({ "pong": true })),
                    "echo" => Ok(params),
                    "boom" => panic!("handler exploded"),
                    "fail" => Err(RpcError::Handler("nope".into())),
                    other => Err(RpcError::UnknownMethod(other.to_string())),
                }
            })
        }
    }

    fn state() -> RpcState {
        RpcState::new(
            RpcServerConfig::default(),
            ServerInfo {
                version: "1.0.0".into(),
                mode: "paper".into(),
                env: "test".into(),
            },
            Arc::new(Echo),
            EventBus::new(16),
        )
    }

    async fn get_json(path: &str) -> Value {
        let response = create_router(state())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_respond_ok_and_unknown_method() {
        let ok = respond(&Echo, r#"{"type":"request","id":1,"method":"ping","params":{}}"#)
            .await
            .unwrap();
        assert_eq!(ok, Frame::ok(json!(1), json!({ "pong": true })));

        let unknown = respond(&Echo, r#"{"type":"request","id":2,"method":"nope"}"#)
            .await
            .unwrap();
        let Frame::Response { ok, error, .. } = unknown else {
            panic!("expected response");
        };
        assert!(!ok);
        let error = error.unwrap();
        assert_eq!(error.code, CODE_RPC_ERROR);
        assert_eq!(error.message, "Unknown method: nope");
    }

    #[tokio::test]
    async fn test_respond_bad_json_and_ignored() {
        let bad = respond(&Echo, "{oops").await.unwrap();
        assert_eq!(
            bad,
            Frame::fail(Value::Null, RpcErrorBody::new(CODE_BAD_JSON, "Invalid JSON"))
        );
        assert!(respond(&Echo, r#"{"type":"event","topic":"x","payload":{}}"#)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_respond_contains_panics() {
        let frame = respond(&Echo, r#"{"type":"request","id":"a","method":"boom"}"#)
            .await
            .unwrap();
        let Frame::Response { id, ok, .. } = frame else {
            panic!("expected response");
        };
        assert_eq!(id, json!("a"));
        assert!(!ok);
    }

    #[tokio::test]
    async fn test_http_surface() {
        let health = get_json("/healthz").await;
        assert_eq!(health["ok"], true);
        assert_eq!(health["version"], "1.0.0");

        let version = get_json("/version").await;
        assert_eq!(version, json!({ "version": "1.0.0", "mode": "paper" }));

        let info = get_json("/ws-info").await;
        assert_eq!(info["wsPath"], "/ws");
        assert_eq!(info["httpPort"], 8787);
    }

    #[test]
    fn test_connection_limiter() {
        let limiter = Arc::new(ConnectionLimiter::new(1));
        let guard = limiter.try_acquire().unwrap();
        assert!(limiter.try_acquire().is_none());
        drop(guard);
        assert_eq!(limiter.current_count(), 0);
        assert!(limiter.try_acquire().is_some());
    }
}
