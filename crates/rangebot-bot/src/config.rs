//! Application configuration.
//!
//! Loaded from a TOML file. Venue URLs are derived from the exchange
//! environment unless overridden; API credentials are read from the
//! environment variables named in the `credentials` section.

use std::path::Path;
use std::time::Duration;

use rangebot_core::BotConfig;
use rangebot_engine::EngineSettings;
use rangebot_rpc::RpcServerConfig;
use rangebot_ws::{Credentials, StreamConfig, TradeChannelConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};

/// Venue environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeEnv {
    #[default]
    Demo,
    Testnet,
    Mainnet,
}

impl ExchangeEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Demo => "demo",
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }

    pub fn rest_url(&self) -> &'static str {
        match self {
            Self::Demo => "https://api-demo.bybit.com",
            Self::Testnet => "https://api-testnet.bybit.com",
            Self::Mainnet => "https://api.bybit.com",
        }
    }

    /// Public market data. The demo environment reads mainnet data.
    pub fn public_ws_url(&self) -> &'static str {
        match self {
            Self::Demo | Self::Mainnet => "wss://stream.bybit.com/v5/public/linear",
            Self::Testnet => "wss://stream-testnet.bybit.com/v5/public/linear",
        }
    }

    pub fn trade_ws_url(&self) -> &'static str {
        match self {
            Self::Demo => "wss://stream-demo.bybit.com/v5/trade",
            Self::Testnet => "wss://stream-testnet.bybit.com/v5/trade",
            Self::Mainnet => "wss://stream.bybit.com/v5/trade",
        }
    }

    /// The venue does not serve the trade stream on demo accounts.
    pub fn supports_trade_stream(&self) -> bool {
        !matches!(self, Self::Demo)
    }
}

/// Venue endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub env: ExchangeEnv,
    /// Overrides the derived REST base URL.
    #[serde(default)]
    pub rest_url: Option<String>,
    #[serde(default)]
    pub public_ws_url: Option<String>,
    #[serde(default)]
    pub trade_ws_url: Option<String>,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
}

fn default_recv_window_ms() -> u64 {
    5_000
}

impl ExchangeConfig {
    pub fn rest_url(&self) -> String {
        self.rest_url
            .clone()
            .unwrap_or_else(|| self.env.rest_url().to_string())
    }

    pub fn public_ws_url(&self) -> String {
        self.public_ws_url
            .clone()
            .unwrap_or_else(|| self.env.public_ws_url().to_string())
    }

    pub fn trade_ws_url(&self) -> String {
        self.trade_ws_url
            .clone()
            .unwrap_or_else(|| self.env.trade_ws_url().to_string())
    }
}

/// Names of the environment variables holding the API key pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
}

fn default_api_key_env() -> String {
    "BYBIT_API_KEY".to_string()
}

fn default_api_secret_env() -> String {
    "BYBIT_API_SECRET".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            api_secret_env: default_api_secret_env(),
        }
    }
}

impl CredentialsConfig {
    /// Read the key pair. `None` when either variable is unset or empty.
    pub fn load(&self) -> Option<Credentials> {
        let key = std::env::var(&self.api_key_env).ok()?;
        let secret = std::env::var(&self.api_secret_env).ok()?;
        let credentials = Credentials::new(key.trim(), secret.trim());
        credentials.is_complete().then_some(credentials)
    }
}

/// Stream channel timing shared by the public and trade streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,
    #[serde(default = "default_auth_expiry_ms")]
    pub auth_expiry_ms: i64,
    /// Order request timeout on the trade stream.
    #[serde(default = "default_trade_request_timeout_ms")]
    pub trade_request_timeout_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    20_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

fn default_reconnect_jitter_ms() -> u64 {
    300
}

fn default_auth_expiry_ms() -> i64 {
    10_000
}

fn default_trade_request_timeout_ms() -> u64 {
    10_000
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            auth_expiry_ms: default_auth_expiry_ms(),
            trade_request_timeout_ms: default_trade_request_timeout_ms(),
        }
    }
}

/// Decision loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    #[serde(default = "default_universe_refresh_interval_ms")]
    pub universe_refresh_interval_ms: u64,
    #[serde(default = "default_price_publish_interval_ms")]
    pub price_publish_interval_ms: u64,
    /// Symbols published on the price topic.
    #[serde(default = "default_price_symbols")]
    pub price_symbols: Vec<String>,
    /// Buffered events per subscriber before it starts lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_cycle_interval_ms() -> u64 {
    5_000
}

fn default_universe_refresh_interval_ms() -> u64 {
    15 * 60 * 1_000
}

fn default_price_publish_interval_ms() -> u64 {
    500
}

fn default_price_symbols() -> Vec<String> {
    vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()]
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            universe_refresh_interval_ms: default_universe_refresh_interval_ms(),
            price_publish_interval_ms: default_price_publish_interval_ms(),
            price_symbols: default_price_symbols(),
            event_capacity: default_event_capacity(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment label reported by `/ws-info`.
    #[serde(default = "default_env_label")]
    pub env: String,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub rpc: RpcServerConfig,
    /// Initial live configuration.
    #[serde(default)]
    pub trading: BotConfig,
}

fn default_env_label() -> String {
    "development".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            env: default_env_label(),
            exchange: ExchangeConfig::default(),
            credentials: CredentialsConfig::default(),
            stream: StreamSettings::default(),
            engine: EngineConfig::default(),
            rpc: RpcServerConfig::default(),
            trading: BotConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, falling back to defaults when the file is missing.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            warn!(path = %path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        self.trading.validate()?;
        if self.engine.cycle_interval_ms == 0 {
            return Err(AppError::Config("engine.cycle_interval_ms must be > 0".into()));
        }
        if self.engine.price_publish_interval_ms == 0 {
            return Err(AppError::Config(
                "engine.price_publish_interval_ms must be > 0".into(),
            ));
        }
        if !self.rpc.path.starts_with('/') {
            return Err(AppError::Config(format!(
                "rpc.path must start with '/': {}",
                self.rpc.path
            )));
        }
        Ok(())
    }

    fn stream_config(&self, name: &str, url: String) -> StreamConfig {
        StreamConfig {
            name: name.to_string(),
            url,
            heartbeat_interval_ms: self.stream.heartbeat_interval_ms,
            reconnect_base_delay_ms: self.stream.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.stream.reconnect_max_delay_ms,
            reconnect_jitter_ms: self.stream.reconnect_jitter_ms,
            credentials: None,
            auth_expiry_ms: self.stream.auth_expiry_ms,
            disabled_reason: None,
        }
    }

    pub fn public_stream(&self) -> StreamConfig {
        self.stream_config("public", self.exchange.public_ws_url())
    }

    /// Trade stream config; disabled on environments without a trade stream.
    pub fn trade_channel(&self, credentials: Option<Credentials>) -> TradeChannelConfig {
        let env = self.exchange.env;
        let mut stream = self.stream_config("trade", self.exchange.trade_ws_url());
        stream.credentials = credentials;
        if !env.supports_trade_stream() {
            stream.disabled_reason = Some(format!(
                "trade stream is not available on the {} environment",
                env.as_str()
            ));
        }
        TradeChannelConfig {
            stream,
            recv_window_ms: self.exchange.recv_window_ms,
            request_timeout_ms: self.stream.trade_request_timeout_ms,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cycle_interval: Duration::from_millis(self.engine.cycle_interval_ms),
            universe_refresh_interval: Duration::from_millis(
                self.engine.universe_refresh_interval_ms.max(1),
            ),
            price_publish_interval: Duration::from_millis(self.engine.price_publish_interval_ms),
            price_symbols: self.engine.price_symbols.clone(),
            exchange_env: self.exchange.env.as_str().to_string(),
        }
    }
}
