//! Main application orchestration.
//!
//! Builds the component graph:
//! - public market feed and shared market store
//! - simulated, REST and trade-stream execution backends behind the mode router
//! - decision engine
//! - RPC endpoint exposing the operator operation table

use std::sync::Arc;

use rangebot_core::{ConfigStore, EventBus, TradingMode};
use rangebot_engine::{Collaborators, DecisionEngine, InstrumentSource};
use rangebot_executor::{
    ExecutionGateway, InstrumentCache, LiveGateway, ModeRouter, OrderDispatcher, PaperGateway,
    RestClient, RestGateway,
};
use rangebot_feed::{MarketFeed, MarketStore};
use rangebot_rpc::{RpcState, ServerInfo};
use rangebot_ws::TradeChannel;
use tokio::net::TcpListener;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::service::BotService;

pub struct Application {
    config: AppConfig,
    engine: Arc<DecisionEngine>,
    feed: Arc<MarketFeed>,
    trade: Arc<TradeChannel>,
    events: EventBus,
}

impl Application {
    /// Build with the venue REST catalog as the instrument source.
    /// Must run inside a tokio runtime.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let credentials = config.credentials.load();
        if credentials.is_none() {
            warn!(
                key_var = %config.credentials.api_key_env,
                "API credentials not set; signed backends will reject orders"
            );
        }
        let rest = Arc::new(RestClient::new(
            config.exchange.rest_url(),
            credentials,
            config.exchange.recv_window_ms,
        )?);
        Self::with_instruments(config, rest.clone(), rest)
    }

    /// Build with an explicit instrument source.
    pub fn with_instruments(
        config: AppConfig,
        rest: Arc<RestClient>,
        instruments_source: Arc<dyn InstrumentSource>,
    ) -> AppResult<Self> {
        config.validate()?;
        let session = Uuid::new_v4().simple().to_string()[..8].to_string();
        info!(
            session = %session,
            exchange_env = config.exchange.env.as_str(),
            mode = %config.trading.mode,
            "Building application"
        );

        let events = EventBus::new(config.engine.event_capacity);
        let store_config = Arc::new(ConfigStore::new(config.trading.clone())?);

        let market = Arc::new(MarketStore::new());
        let feed = MarketFeed::spawn(config.public_stream(), market);

        let trade_credentials = config.credentials.load();
        let trade = TradeChannel::spawn(config.trade_channel(trade_credentials));

        let paper: Arc<dyn ExecutionGateway> = Arc::new(PaperGateway::new());
        let demo: Arc<dyn ExecutionGateway> =
            Arc::new(RestGateway::new(rest.clone(), TradingMode::Demo));
        let real: Arc<dyn ExecutionGateway> = Arc::new(LiveGateway::new(
            trade.clone(),
            RestGateway::new(rest, TradingMode::Real),
        ));
        let router = ModeRouter::new(store_config.clone(), paper, vec![demo, real], events.clone());

        let dispatcher = Arc::new(OrderDispatcher::new(
            router,
            Arc::new(InstrumentCache::new()),
            events.clone(),
            session,
        ));
        let engine = DecisionEngine::new(
            store_config,
            feed.clone(),
            dispatcher,
            instruments_source,
            Collaborators::default(),
            events.clone(),
            config.engine_settings(),
        );

        Ok(Self {
            config,
            engine,
            feed,
            trade,
            events,
        })
    }

    pub fn engine(&self) -> &Arc<DecisionEngine> {
        &self.engine
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn rpc_state(&self) -> RpcState {
        RpcState::new(
            self.config.rpc.clone(),
            ServerInfo {
                version: env!("CARGO_PKG_VERSION").to_string(),
                mode: self.config.trading.mode.clone(),
                env: self.config.env.clone(),
            },
            Arc::new(BotService::new(self.engine.clone())),
            self.events.clone(),
        )
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> AppResult<()> {
        let addr = format!("{}:{}", self.config.rpc.host, self.config.rpc.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::Config(format!("Failed to bind {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on `listener` until Ctrl-C, then stop the engine and streams.
    pub async fn serve(self, listener: TcpListener) -> AppResult<()> {
        let server = rangebot_rpc::serve(listener, self.rpc_state());
        tokio::select! {
            result = server => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
        }
        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.engine.stop().await;
        self.feed.close();
        self.trade.close();
        info!("Application stopped");
    }
}
