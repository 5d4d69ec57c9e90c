//! Decision engine.
//!
//! Runs the fixed-interval cycle: snapshot configuration, compute risk and
//! regime once, evaluate each universe symbol in declared order, dispatch
//! qualifying candidates and publish the explain record. Also owns the
//! universe refresh and price publish loops.

use parking_lot::{Mutex, RwLock};
use rangebot_core::{
    now_ms, BotConfig, BotEvent, Candidate, ConfigStore, DecisionExplain, EventBus, Gates,
    MarketSnapshot, OpenOrder, Position, StatusSummary, REASON_BOT_STOPPED,
};
use rangebot_executor::{EmergencyStopOutcome, OrderDispatcher};
use rangebot_feed::MarketFeed;
use rangebot_telemetry::Metrics;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborators::{
    CandidateEvaluator, FeatureCalculator, InstrumentSource, Regime, RegimeClassifier,
    RiskContext, RiskGate,
};
use crate::error::{EngineError, EngineResult};
use crate::explain::{ExplainBuilder, REASON_RISK_BLOCKED, REASON_TRADING_DISABLED};
use crate::strategy::{RangeEdgeEvaluator, RangeFeatures, ThresholdRiskGate, VolatilityRegime};

/// Loop timing and environment labels.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cycle_interval: Duration,
    pub universe_refresh_interval: Duration,
    pub price_publish_interval: Duration,
    /// Symbols published on the price topic. They are subscribed alongside
    /// the universe.
    pub price_symbols: Vec<String>,
    /// Venue environment label reported in gates and status.
    pub exchange_env: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(5),
            universe_refresh_interval: Duration::from_secs(15 * 60),
            price_publish_interval: Duration::from_millis(500),
            price_symbols: vec!["BTCUSDT".into(), "ETHUSDT".into(), "SOLUSDT".into()],
            exchange_env: "demo".into(),
        }
    }
}

/// Pluggable cycle inputs.
#[derive(Clone)]
pub struct Collaborators {
    pub risk: Arc<dyn RiskGate>,
    pub regime: Arc<dyn RegimeClassifier>,
    pub features: Arc<dyn FeatureCalculator>,
    pub evaluator: Arc<dyn CandidateEvaluator>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            risk: Arc::new(ThresholdRiskGate),
            regime: Arc::new(VolatilityRegime),
            features: Arc::new(RangeFeatures),
            evaluator: Arc::new(RangeEdgeEvaluator),
        }
    }
}

#[derive(Debug)]
struct EngineState {
    universe: Vec<String>,
    candidates: Vec<Candidate>,
    explain: DecisionExplain,
    positions: usize,
    last_signal_time: Option<i64>,
}

/// Clears the in-cycle flag however the cycle ends.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct DecisionEngine {
    config: Arc<ConfigStore>,
    feed: Arc<MarketFeed>,
    dispatcher: Arc<OrderDispatcher>,
    instruments_source: Arc<dyn InstrumentSource>,
    collaborators: Collaborators,
    events: EventBus,
    settings: EngineSettings,
    state: RwLock<EngineState>,
    running: AtomicBool,
    in_cycle: AtomicBool,
    cycle_seq: AtomicU64,
    loops: Mutex<Option<CancellationToken>>,
}

impl DecisionEngine {
    /// Build the engine and start forwarding ticker prices to the simulated
    /// backend. Does not start cycling.
    pub fn new(
        config: Arc<ConfigStore>,
        feed: Arc<MarketFeed>,
        dispatcher: Arc<OrderDispatcher>,
        instruments_source: Arc<dyn InstrumentSource>,
        collaborators: Collaborators,
        events: EventBus,
        settings: EngineSettings,
    ) -> Arc<Self> {
        let gates = Gates {
            enable_trading: config.get().enable_trading,
            exchange_env: settings.exchange_env.clone(),
            can_enter: None,
            regime: None,
        };
        let mode = dispatcher.router().resolve_mode();
        let engine = Arc::new(Self {
            state: RwLock::new(EngineState {
                universe: config.get().effective_universe(),
                candidates: Vec::new(),
                explain: DecisionExplain::stopped(mode.as_str(), gates, None),
                positions: 0,
                last_signal_time: None,
            }),
            config,
            feed,
            dispatcher,
            instruments_source,
            collaborators,
            events,
            settings,
            running: AtomicBool::new(false),
            in_cycle: AtomicBool::new(false),
            cycle_seq: AtomicU64::new(0),
            loops: Mutex::new(None),
        });

        let mut ticks = engine.feed.subscribe_ticks();
        let router = engine.dispatcher.router().clone();
        tokio::spawn(async move {
            loop {
                match ticks.recv().await {
                    Ok(tick) => router.on_tick(&tick.symbol, tick.price),
                    Err(RecvError::Lagged(n)) => debug!(skipped = n, "Tick forwarder lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        });

        engine
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Refresh the catalog, connect market data, load the universe and start
    /// the cycle, universe and price loops. A no-op when already running.
    pub async fn start(self: &Arc<Self>) -> StatusSummary {
        if self.running.swap(true, Ordering::AcqRel) {
            debug!("Engine already running");
            return self.status();
        }
        Metrics::bot_running(true);

        if let Err(e) = self.refresh_instruments().await {
            warn!(error = %e, "Instrument refresh failed, keeping cached catalog");
        }
        self.feed.connect();
        self.refresh_universe().await;

        let token = CancellationToken::new();
        self.spawn_loops(token.clone());
        if let Some(previous) = self.loops.lock().replace(token) {
            previous.cancel();
        }

        info!(
            cycle_ms = self.settings.cycle_interval.as_millis() as u64,
            "Bot started and cycle initialized"
        );
        self.events
            .publish(BotEvent::log("Bot started and cycle initialized"));
        self.publish_status().await;
        self.status()
    }

    /// Stop future cycles. An order already in flight is not aborted.
    pub async fn stop(&self) -> StatusSummary {
        if let Some(token) = self.loops.lock().take() {
            token.cancel();
        }
        self.running.store(false, Ordering::Release);
        Metrics::bot_running(false);

        let config = self.config.get();
        let mode = self.dispatcher.router().resolve_mode();
        let gates = Gates {
            enable_trading: config.enable_trading,
            exchange_env: self.settings.exchange_env.clone(),
            ..Default::default()
        };
        {
            let mut state = self.state.write();
            state.explain = DecisionExplain::stopped(mode.as_str(), gates, Some(now_ms()));
            state.candidates.clear();
        }
        info!("Bot stopped");
        self.publish_status().await;
        self.status()
    }

    /// Stop, then emergency-stop every backend and report per-mode results.
    pub async fn emergency_stop(
        &self,
        close_positions: bool,
    ) -> BTreeMap<String, EmergencyStopOutcome> {
        self.stop().await;
        let outcomes = self
            .dispatcher
            .router()
            .emergency_stop(close_positions)
            .await;
        self.events.publish(BotEvent::Log {
            message: "Emergency stop executed".to_string(),
            details: serde_json::to_value(&outcomes).ok(),
        });
        outcomes
    }

    fn spawn_loops(self: &Arc<Self>, token: CancellationToken) {
        let engine = self.clone();
        let cancel = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.settings.cycle_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // Each cycle runs on its own task; the overlap guard
                        // skips ticks that land while one is still running.
                        let engine = engine.clone();
                        tokio::spawn(async move { engine.run_cycle().await });
                    }
                }
            }
            debug!("Cycle loop exited");
        });

        let engine = self.clone();
        let cancel = token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.settings.universe_refresh_interval);
            // First tick fires immediately and start() already refreshed.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => { engine.refresh_universe().await; }
                }
            }
        });

        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.settings.price_publish_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => engine.publish_prices(),
                }
            }
        });
    }

    /// Run one cycle unless stopped or another cycle is still in flight.
    /// Returns the new explain record when a cycle ran.
    pub async fn run_cycle(&self) -> Option<DecisionExplain> {
        if !self.is_running() {
            return None;
        }
        if self
            .in_cycle
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Previous cycle still running, skipping");
            Metrics::cycle_skipped();
            return None;
        }
        let _guard = CycleGuard(&self.in_cycle);

        let started = Instant::now();
        let explain = self.cycle().await;
        Metrics::cycle_completed(started.elapsed().as_secs_f64() * 1000.0);
        for reason in &explain.reasons_blocked {
            Metrics::cycle_blocked(reason);
        }
        Some(explain)
    }

    async fn cycle(&self) -> DecisionExplain {
        let config = self.config.get();
        let cycle = self.cycle_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let router = self.dispatcher.router();
        let mode = router.resolve_mode();
        let universe = self.state.read().universe.clone();
        let store = self.feed.store();

        let positions = match router.positions().await {
            Ok(p) => p.len(),
            Err(e) => {
                warn!(error = %e, "Position query failed, using last count");
                self.state.read().positions
            }
        };
        let risk = self.collaborators.risk.evaluate(&RiskContext {
            config: &config,
            open_positions: positions,
            market: store,
            universe: &universe,
        });
        let regime = self.collaborators.regime.classify(store, &universe);
        let gates = Gates {
            enable_trading: config.enable_trading,
            exchange_env: self.settings.exchange_env.clone(),
            can_enter: Some(risk.can_enter),
            regime: Some(regime.as_str().to_string()),
        };

        let mut builder = ExplainBuilder::new();
        for symbol in &universe {
            let Some(price) = store.last_price(symbol) else {
                builder.block(format!("noMarketData:{symbol}"));
                continue;
            };
            let Some(state) = store.get(symbol) else {
                builder.block(format!("noMarketData:{symbol}"));
                continue;
            };

            let features = self.collaborators.features.compute(&state);
            let candidate = match self.evaluate(symbol, &features, &config) {
                Ok(Some(c)) => c,
                Ok(None) => continue,
                Err(e) => {
                    warn!(%symbol, error = %e, "Candidate evaluation failed");
                    builder.block(format!("evaluatorError:{symbol}"));
                    continue;
                }
            };

            builder.candidate(candidate.clone());
            self.events.publish(BotEvent::Plan {
                symbol: symbol.clone(),
                candidate: candidate.clone(),
                regime: regime.as_str().to_string(),
                can_enter: risk.can_enter,
            });

            if let Some(reason) = blocking_reason(&config, risk.can_enter, regime) {
                builder.block(reason);
                if !risk.can_enter {
                    for r in &risk.reasons {
                        builder.block(r.clone());
                    }
                }
                continue;
            }

            if !self.is_running() {
                debug!(%symbol, cycle, "Engine stopped mid-cycle, skipping dispatch");
                builder.block(REASON_BOT_STOPPED);
                break;
            }
            let result = self
                .dispatcher
                .dispatch(&candidate, price, &config, cycle)
                .await;
            builder.sizing(result.sizing.clone());
            if let Some(reason) = result.reason.filter(|_| !result.ok) {
                builder.block(reason);
            }
        }

        let now = now_ms();
        let signalled = builder.has_signal();
        let (explain, candidates) = builder.build(mode.as_str(), gates, now);

        {
            // stop() clears the running flag before writing its own record,
            // so checking under the lock keeps that record in place.
            let mut state = self.state.write();
            if !self.is_running() {
                debug!(cycle, "Engine stopped mid-cycle, keeping stopped record");
                return state.explain.clone();
            }
            state.candidates = candidates.clone();
            state.explain = explain.clone();
            state.positions = positions;
            if signalled {
                state.last_signal_time = Some(now);
            }
        }
        self.events.publish(BotEvent::Candidates { candidates });
        debug!(
            cycle,
            can_trade = explain.can_trade,
            reasons = ?explain.reasons_blocked,
            "Cycle complete"
        );
        self.events.publish(BotEvent::Explain(explain.clone()));
        self.events.publish(BotEvent::Status(self.status()));
        explain
    }

    /// Call the evaluator, turning a panic into an error for this symbol.
    fn evaluate(
        &self,
        symbol: &str,
        features: &crate::collaborators::Features,
        config: &BotConfig,
    ) -> EngineResult<Option<Candidate>> {
        let evaluator = &self.collaborators.evaluator;
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            evaluator.evaluate(symbol, features, config)
        }))
        .unwrap_or_else(|_| {
            Err(EngineError::Evaluator {
                symbol: symbol.to_string(),
                message: "evaluator panicked".to_string(),
            })
        })
    }

    /// Re-read the universe from configuration and subscribe its topics.
    pub async fn refresh_universe(&self) -> Vec<String> {
        let universe = self.config.get().effective_universe();
        let watched: BTreeSet<&str> = universe
            .iter()
            .chain(self.settings.price_symbols.iter())
            .map(String::as_str)
            .collect();
        self.feed.watch(watched);
        Metrics::universe_size(universe.len());
        self.state.write().universe = universe.clone();
        info!(symbols = universe.len(), "Universe refreshed");
        self.publish_status().await;
        universe
    }

    /// Reload the instrument catalog from the source.
    pub async fn refresh_instruments(&self) -> EngineResult<usize> {
        let items = self.instruments_source.fetch().await?;
        let stored = self.dispatcher.instruments().load(&items);
        info!(fetched = items.len(), stored, "Instrument catalog refreshed");
        Ok(stored)
    }

    fn publish_prices(&self) {
        let prices = self
            .feed
            .store()
            .prices(self.settings.price_symbols.iter().map(String::as_str));
        self.events.publish(BotEvent::Prices { prices });
    }

    /// Refresh the position count from the active backend and publish status.
    pub async fn publish_status(&self) {
        match self.dispatcher.router().positions().await {
            Ok(p) => self.state.write().positions = p.len(),
            Err(e) => debug!(error = %e, "Position count unavailable"),
        }
        self.events.publish(BotEvent::Status(self.status()));
    }

    pub fn status(&self) -> StatusSummary {
        let config = self.config.get();
        let state = self.state.read();
        StatusSummary {
            running: self.is_running(),
            trading_mode: config.mode.clone(),
            enable_trading: config.enable_trading,
            exchange_env: self.settings.exchange_env.clone(),
            symbol: config.symbol_override().unwrap_or_else(|| "auto".to_string()),
            symbols: state.universe.len(),
            candidates: state.candidates.len(),
            positions: state.positions,
            last_signal_time: state.last_signal_time,
            last_decision_time: state.explain.last_decision_time,
            gates: state.explain.gates.clone(),
            can_trade: state.explain.can_trade,
            reasons_blocked: state.explain.reasons_blocked.clone(),
        }
    }

    /// Apply a configuration patch, then refresh the universe.
    pub async fn set_config(&self, patch: &Value) -> EngineResult<BotConfig> {
        let next = self.config.update(patch)?;
        self.refresh_universe().await;
        Ok(next)
    }

    pub fn universe(&self) -> Vec<String> {
        self.state.read().universe.clone()
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.state.read().candidates.clone()
    }

    pub fn explain(&self) -> DecisionExplain {
        self.state.read().explain.clone()
    }

    /// Snapshot for `symbol`, defaulting to the first universe entry.
    pub fn market_snapshot(&self, symbol: Option<&str>) -> Option<MarketSnapshot> {
        let symbol = match symbol.map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => s.to_uppercase(),
            None => self.state.read().universe.first()?.clone(),
        };
        Some(self.feed.store().snapshot(&symbol))
    }

    /// Sorted linear USDT perpetual symbols, loading the catalog if empty.
    pub async fn available_symbols(&self) -> EngineResult<Vec<String>> {
        let instruments = self.dispatcher.instruments();
        if instruments.is_empty() {
            self.refresh_instruments().await?;
        }
        Ok(instruments.symbols())
    }

    pub async fn positions(&self) -> EngineResult<Vec<Position>> {
        Ok(self.dispatcher.router().positions().await?)
    }

    pub async fn open_orders(&self) -> EngineResult<Vec<OpenOrder>> {
        Ok(self.dispatcher.router().open_orders().await?)
    }

    /// Configuration JSON schema.
    pub fn config_schema(&self) -> Value {
        json!({ "schema": BotConfig::schema() })
    }
}

impl Drop for DecisionEngine {
    fn drop(&mut self) {
        if let Some(token) = self.loops.lock().take() {
            token.cancel();
        }
    }
}

/// First gate that stops a qualifying candidate from being dispatched.
fn blocking_reason(config: &BotConfig, can_enter: bool, regime: Regime) -> Option<String> {
    if !config.enable_trading {
        return Some(REASON_TRADING_DISABLED.to_string());
    }
    if !can_enter {
        return Some(REASON_RISK_BLOCKED.to_string());
    }
    if config.trade_only_crab && regime != Regime::Crab {
        return Some(format!("regime={regime}"));
    }
    None
}
