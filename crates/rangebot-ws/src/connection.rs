//! Reconnecting stream channel.
//!
//! A [`StreamChannel`] owns one background run loop that connects, replays
//! the tracked topic set, optionally authenticates, pumps frames, and on
//! any transport failure sleeps for a backoff delay before reconnecting.
//! Because the run loop is the only place a reconnect sleep happens, a
//! channel never has more than one reconnect pending.

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rangebot_core::now_ms;
use rangebot_telemetry::Metrics;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthState, Credentials};
use crate::backoff::Backoff;
use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{ControlFrame, StreamMessage};
use crate::subscription::{SubscriptionManager, MAX_TOPICS_PER_FRAME};

/// Stream channel configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Label used in logs and metrics (e.g. "public", "trade").
    pub name: String,
    pub url: String,
    pub heartbeat_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub reconnect_jitter_ms: u64,
    /// When set, the channel sends a signed handshake on every open.
    pub credentials: Option<Credentials>,
    /// How far in the future the handshake expiry is set.
    pub auth_expiry_ms: i64,
    /// When set, `connect()` only logs this once and stays disconnected.
    pub disabled_reason: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "stream".to_string(),
            url: String::new(),
            heartbeat_interval_ms: 20_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_jitter_ms: 300,
            credentials: None,
            auth_expiry_ms: 10_000,
            disabled_reason: None,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
        }
    }
}

struct RunHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    config: StreamConfig,
    state: RwLock<ConnectionState>,
    auth: RwLock<AuthState>,
    subscriptions: SubscriptionManager,
    heartbeat: HeartbeatManager,
    backoff: Mutex<Backoff>,
    message_tx: mpsc::Sender<StreamMessage>,
    outbound_tx: mpsc::UnboundedSender<String>,
    outbound_rx: TokioMutex<mpsc::UnboundedReceiver<String>>,
    /// Bumped on every connect; stale run loops may not touch state.
    generation: AtomicU64,
    disabled_warned: AtomicBool,
}

impl Shared {
    fn is_current(&self, gen: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == gen
    }

    fn set_state(&self, gen: u64, state: ConnectionState) {
        if !self.is_current(gen) {
            return;
        }
        *self.state.write() = state;
        Metrics::stream_state(&self.config.name, state.as_str());
    }

    fn initial_auth(&self) -> AuthState {
        if self.config.credentials.is_some() {
            AuthState::Unauthenticated
        } else {
            AuthState::NotRequired
        }
    }

    fn on_disconnected(&self, gen: u64) {
        if !self.is_current(gen) {
            return;
        }
        let mut auth = self.auth.write();
        if !matches!(*auth, AuthState::Rejected(_)) {
            *auth = self.initial_auth();
        }
    }

    async fn handle_text(&self, text: &str) {
        let msg = match StreamMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(channel = %self.config.name, error = %e, "Dropping malformed frame");
                Metrics::stream_frame_dropped(&self.config.name);
                return;
            }
        };

        if let StreamMessage::Op(resp) = &msg {
            if resp.is_heartbeat() {
                debug!(channel = %self.config.name, "Heartbeat acknowledged");
                return;
            }
            if resp.op == "auth" {
                if resp.is_success() {
                    *self.auth.write() = AuthState::Authenticated;
                    info!(channel = %self.config.name, "Stream authenticated");
                } else {
                    let reason = resp
                        .ret_msg
                        .clone()
                        .filter(|m| !m.is_empty())
                        .unwrap_or_else(|| "auth rejected".to_string());
                    warn!(channel = %self.config.name, %reason, "Stream handshake rejected");
                    *self.auth.write() = AuthState::Rejected(reason);
                }
            }
        }

        if self.message_tx.send(msg).await.is_err() {
            debug!(channel = %self.config.name, "Message receiver dropped");
        }
    }
}

/// Reconnecting WebSocket channel with topic replay, heartbeat and
/// optional authenticated handshake.
pub struct StreamChannel {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
}

impl StreamChannel {
    /// Create a channel. Parsed inbound frames are forwarded to `message_tx`.
    pub fn new(config: StreamConfig, message_tx: mpsc::Sender<StreamMessage>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let backoff = Backoff::new(
            config.reconnect_base_delay_ms,
            config.reconnect_max_delay_ms,
            config.reconnect_jitter_ms,
        );
        let auth = if config.credentials.is_some() {
            AuthState::Unauthenticated
        } else {
            AuthState::NotRequired
        };
        Self {
            shared: Arc::new(Shared {
                heartbeat: HeartbeatManager::new(config.heartbeat_interval_ms),
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                auth: RwLock::new(auth),
                subscriptions: SubscriptionManager::new(),
                backoff: Mutex::new(backoff),
                message_tx,
                outbound_tx,
                outbound_rx: TokioMutex::new(outbound_rx),
                generation: AtomicU64::new(0),
                disabled_warned: AtomicBool::new(false),
            }),
            run: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn auth_state(&self) -> AuthState {
        self.shared.auth.read().clone()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Open and, for authenticated channels, acknowledged by the venue.
    pub fn is_ready(&self) -> bool {
        self.is_open() && self.shared.auth.read().is_satisfied()
    }

    /// Whether a run loop is alive (connecting, open, or waiting to reconnect).
    pub fn is_active(&self) -> bool {
        self.run
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished() && !h.token.is_cancelled())
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn reconnect_attempt(&self) -> u32 {
        self.shared.backoff.lock().attempt()
    }

    pub fn topics(&self) -> Vec<String> {
        self.shared.subscriptions.topics()
    }

    pub fn is_disabled(&self) -> bool {
        self.shared.config.disabled_reason.is_some()
    }

    /// Start the run loop. Returns `false` when it was already running or
    /// the channel is disabled.
    pub fn connect(&self) -> bool {
        if let Some(reason) = &self.shared.config.disabled_reason {
            if !self.shared.disabled_warned.swap(true, Ordering::SeqCst) {
                warn!(channel = %self.shared.config.name, %reason, "Stream channel disabled");
            }
            return false;
        }

        let mut run = self.run.lock();
        if run
            .as_ref()
            .is_some_and(|h| !h.task.is_finished() && !h.token.is_cancelled())
        {
            debug!(channel = %self.shared.config.name, "connect() ignored, already active");
            return false;
        }

        let gen = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.set_state(gen, ConnectionState::Connecting);
        let token = CancellationToken::new();
        let task = tokio::spawn(run_loop(self.shared.clone(), token.clone(), gen));
        *run = Some(RunHandle { token, task });
        true
    }

    /// Close the connection and disable reconnects until `connect()` is
    /// called again.
    pub fn close(&self) {
        let handle = self.run.lock().take();
        if let Some(handle) = handle {
            info!(channel = %self.shared.config.name, "Stream close requested");
            handle.token.cancel();
        }
        let gen = self.shared.generation.load(Ordering::SeqCst);
        self.shared.set_state(gen, ConnectionState::Disconnected);
        *self.shared.auth.write() = self.shared.initial_auth();
    }

    /// Track topics and subscribe immediately if open. Topics added while
    /// not open are sent on the next successful open.
    pub fn subscribe<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let added = self.shared.subscriptions.add(topics);
        if added.is_empty() || !self.is_open() {
            return;
        }
        for chunk in added.chunks(MAX_TOPICS_PER_FRAME) {
            self.enqueue_frame(ControlFrame::subscribe(chunk.to_vec()));
        }
    }

    /// Stop tracking topics and unsubscribe if open.
    pub fn unsubscribe<I, S>(&self, topics: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let removed = self.shared.subscriptions.remove(topics);
        if removed.is_empty() || !self.is_open() {
            return;
        }
        for chunk in removed.chunks(MAX_TOPICS_PER_FRAME) {
            self.enqueue_frame(ControlFrame::unsubscribe(chunk.to_vec()));
        }
    }

    /// Send an arbitrary JSON frame on the open connection.
    pub fn send_json(&self, frame: &Value) -> WsResult<()> {
        if !self.is_open() {
            return Err(WsError::NotReady(format!(
                "{} channel is {}",
                self.shared.config.name,
                self.state().as_str()
            )));
        }
        self.shared
            .outbound_tx
            .send(frame.to_string())
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }

    fn enqueue_frame(&self, frame: ControlFrame) {
        match frame.to_text() {
            Ok(text) => {
                if self.shared.outbound_tx.send(text).is_err() {
                    warn!(channel = %self.shared.config.name, "Outbound queue closed");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode control frame"),
        }
    }
}

impl Drop for StreamChannel {
    fn drop(&mut self) {
        if let Some(handle) = self.run.get_mut().take() {
            handle.token.cancel();
        }
    }
}

async fn run_loop(shared: Arc<Shared>, token: CancellationToken, gen: u64) {
    let name = shared.config.name.clone();
    loop {
        if token.is_cancelled() {
            break;
        }
        shared.set_state(gen, ConnectionState::Connecting);

        match try_connect(&shared, &token, gen).await {
            Ok(()) => info!(channel = %name, "Stream connection closed"),
            Err(e) => warn!(channel = %name, error = %e, "Stream connection error"),
        }
        shared.on_disconnected(gen);

        if token.is_cancelled() {
            break;
        }

        shared.set_state(gen, ConnectionState::Reconnecting);
        let (delay, attempt) = {
            let mut backoff = shared.backoff.lock();
            let delay = backoff.next_delay();
            (delay, backoff.attempt())
        };
        Metrics::stream_reconnect(&name);
        warn!(channel = %name, attempt, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = token.cancelled() => break,
        }
    }
    shared.set_state(gen, ConnectionState::Disconnected);
    debug!(channel = %name, "Stream run loop exited");
}

async fn try_connect(shared: &Shared, token: &CancellationToken, gen: u64) -> WsResult<()> {
    let config = &shared.config;
    info!(channel = %config.name, url = %config.url, "Connecting stream");

    let (ws_stream, _response) = tokio::select! {
        result = connect_async_tls_with_config(config.url.as_str(), None, true, None) => result?,
        () = token.cancelled() => return Ok(()),
    };
    let (mut write, mut read) = ws_stream.split();

    let mut outbound = shared.outbound_rx.lock().await;
    while let Ok(stale) = outbound.try_recv() {
        debug!(channel = %config.name, frame = %stale, "Discarding frame queued before open");
    }

    shared.backoff.lock().reset();
    shared.set_state(gen, ConnectionState::Open);
    info!(channel = %config.name, "Stream connected");

    if let Some(creds) = &config.credentials {
        let expires = now_ms() + config.auth_expiry_ms;
        let frame = creds.auth_frame(expires)?;
        *shared.auth.write() = AuthState::Pending;
        write.send(Message::Text(frame.to_string())).await?;
        debug!(channel = %config.name, "Handshake sent");
    }

    let batches = shared.subscriptions.replay_batches();
    if !batches.is_empty() {
        info!(channel = %config.name, topics = shared.subscriptions.len(), "Replaying subscriptions");
    }
    for batch in batches {
        write
            .send(Message::Text(ControlFrame::subscribe(batch).to_text()?))
            .await?;
    }

    let mut ticker = shared.heartbeat.ticker();
    loop {
        tokio::select! {
            biased;

            () = token.cancelled() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(error = %e, "Failed to send close frame");
                }
                return Ok(());
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.handle_text(&text).await,
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame
                            .map(|f| (f.code.into(), f.reason.to_string()))
                            .unwrap_or((1000, "Normal close".to_string()));
                        warn!(channel = %config.name, code, %reason, "Stream closed by server");
                        return Err(WsError::ConnectionClosed { code, reason });
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        warn!(channel = %config.name, "Stream ended");
                        return Ok(());
                    }
                    _ => {}
                }
            }

            Some(text) = outbound.recv() => {
                write.send(Message::Text(text)).await?;
            }

            _ = ticker.tick() => {
                write.send(Message::Text(ControlFrame::ping().to_text()?)).await?;
                debug!(channel = %config.name, "Heartbeat ping sent");
            }
        }
    }
}
