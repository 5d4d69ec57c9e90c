//! Decision cycle tests against mock backends and a disabled market stream.

use rangebot_core::{
    BotConfig, BotEvent, Candidate, ConfigStore, EventBus, OpenOrder, OrderAck, OrderKind,
    OrderRequest, Position, Price, TradingMode,
};
use rangebot_engine::{
    CandidateEvaluator, Collaborators, DecisionEngine, EngineError, EngineResult, EngineSettings,
    Features, RangeEdgeEvaluator, StaticInstruments,
};
use rangebot_executor::{
    BoxFuture, Capabilities, ExecutionGateway, ExecutorResult, InstrumentCache, MockGateway,
    ModeRouter, OrderDispatcher,
};
use rangebot_feed::{parse_message, MarketFeed, MarketStore};
use rangebot_ws::StreamConfig;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

fn instruments() -> StaticInstruments {
    let spec = |symbol: &str| {
        json!({
            "symbol": symbol,
            "contractType": "LinearPerpetual",
            "settleCoin": "USDT",
            "lotSizeFilter": {"minOrderQty": "0.001", "qtyStep": "0.001"},
            "priceFilter": {"tickSize": "0.1"}
        })
    };
    StaticInstruments(vec![spec("ETHUSDT"), spec("BTCUSDT"), spec("BTC-PERP")])
}

struct Harness {
    engine: Arc<DecisionEngine>,
    store: Arc<MarketStore>,
    events: EventBus,
}

fn harness(
    config: BotConfig,
    gateway: Arc<dyn ExecutionGateway>,
    evaluator: Arc<dyn CandidateEvaluator>,
) -> Harness {
    let config = Arc::new(ConfigStore::new(config).unwrap());
    let events = EventBus::default();
    let store = Arc::new(MarketStore::new());
    let feed = MarketFeed::spawn(
        StreamConfig {
            name: "public".into(),
            disabled_reason: Some("offline test".into()),
            ..Default::default()
        },
        store.clone(),
    );
    let router = ModeRouter::new(config.clone(), gateway, vec![], events.clone());
    let dispatcher = Arc::new(OrderDispatcher::new(
        router,
        Arc::new(InstrumentCache::new()),
        events.clone(),
        "test",
    ));
    let engine = DecisionEngine::new(
        config,
        feed,
        dispatcher,
        Arc::new(instruments()),
        Collaborators {
            evaluator,
            ..Default::default()
        },
        events.clone(),
        EngineSettings {
            cycle_interval: Duration::from_secs(3600),
            price_symbols: vec!["BTCUSDT".into()],
            exchange_env: "demo".into(),
            ..Default::default()
        },
    );
    Harness {
        engine,
        store,
        events,
    }
}

/// Price near the bottom of a 1000-wide range in a calm market.
fn seed_near_support(store: &MarketStore, symbol: &str) {
    let apply = |topic: String, data: serde_json::Value| {
        store.apply(&parse_message(&topic, &data).unwrap());
    };
    apply(
        format!("tickers.{symbol}"),
        json!({"lastPrice": "30100", "price24hPcnt": "0.01"}),
    );
    apply(
        format!("kline.15.{symbol}"),
        json!([{"high": "31000", "low": "30000", "close": "30100"}]),
    );
}

fn config(universe: &[&str], enable_trading: bool) -> BotConfig {
    BotConfig {
        universe: universe.iter().map(|s| s.to_string()).collect(),
        enable_trading,
        ..Default::default()
    }
}

async fn start_and_settle(engine: &Arc<DecisionEngine>) {
    engine.start().await;
    // The cycle loop fires once immediately; wait for it to finish.
    tokio::time::timeout(Duration::from_secs(2), async {
        while engine.explain().reasons_blocked == vec!["botStopped".to_string()] {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_missing_market_data_blocks_every_symbol() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(
        config(&["BTCUSDT", "ETHUSDT"], true),
        gw.clone(),
        Arc::new(RangeEdgeEvaluator),
    );
    start_and_settle(&h.engine).await;

    let explain = h.engine.run_cycle().await.unwrap();
    assert!(!explain.can_trade);
    assert_eq!(
        explain.reasons_blocked,
        vec!["noMarketData:BTCUSDT", "noMarketData:ETHUSDT", "noCandidates"]
    );
    assert!(gw.placed().is_empty());
}

#[tokio::test]
async fn test_disabled_trading_records_candidate_without_dispatch() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(config(&["BTCUSDT"], false), gw.clone(), Arc::new(RangeEdgeEvaluator));
    seed_near_support(&h.store, "BTCUSDT");
    start_and_settle(&h.engine).await;
    let mut sub = h.events.subscribe();

    let explain = h.engine.run_cycle().await.unwrap();

    assert_eq!(explain.reasons_blocked, vec!["ENABLE_TRADING=0"]);
    assert_eq!(explain.candidates_top.len(), 1);
    assert_eq!(explain.last_signal.as_ref().unwrap().why, "nearSupport");
    assert_eq!(explain.gates.regime.as_deref(), Some("CRAB"));
    assert!(gw.placed().is_empty());

    let mut saw_plan = false;
    while let Ok(envelope) = sub.try_recv() {
        if let BotEvent::Plan { symbol, .. } = envelope.event {
            assert_eq!(symbol, "BTCUSDT");
            saw_plan = true;
        }
    }
    assert!(saw_plan);
}

#[tokio::test]
async fn test_enabled_trading_dispatches_one_bracket_per_symbol() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(config(&["BTCUSDT"], true), gw.clone(), Arc::new(RangeEdgeEvaluator));
    seed_near_support(&h.store, "BTCUSDT");
    start_and_settle(&h.engine).await;
    let before = gw.placed().len();

    let explain = h.engine.run_cycle().await.unwrap();

    assert!(explain.can_trade, "{:?}", explain.reasons_blocked);
    assert!(explain.sizing.is_some());
    let placed = &gw.placed()[before..];
    assert_eq!(placed.len(), 2);
    assert_eq!(placed[0].kind, OrderKind::Market);
    assert_eq!(placed[1].kind, OrderKind::Stop);
    assert!(placed[0].idempotency_key.as_str().ends_with("-BTCUSDT-B-entry1"));

    let status = h.engine.status();
    assert!(status.running);
    assert_eq!(status.symbol, "auto");
    assert_eq!(status.candidates, 1);
    assert!(status.last_signal_time.is_some());
}

#[tokio::test]
async fn test_case_duplicate_universe_dispatches_once() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(
        config(&["BTCUSDT", "btcusdt"], true),
        gw.clone(),
        Arc::new(RangeEdgeEvaluator),
    );
    seed_near_support(&h.store, "BTCUSDT");
    start_and_settle(&h.engine).await;
    assert_eq!(h.engine.universe(), vec!["BTCUSDT"]);
    let before = gw.placed().len();

    h.engine.run_cycle().await.unwrap();

    let entries: Vec<_> = gw.placed()[before..]
        .iter()
        .filter(|o| o.kind == OrderKind::Market)
        .map(|o| o.idempotency_key.as_str().to_string())
        .collect();
    assert_eq!(entries.len(), 1, "{entries:?}");
}

#[tokio::test]
async fn test_regime_mismatch_blocks_dispatch() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(config(&["BTCUSDT"], true), gw.clone(), Arc::new(RangeEdgeEvaluator));
    seed_near_support(&h.store, "BTCUSDT");
    h.store.apply(
        &parse_message("tickers.BTCUSDT", &json!({"price24hPcnt": "0.05"})).unwrap(),
    );
    start_and_settle(&h.engine).await;

    let explain = h.engine.run_cycle().await.unwrap();
    assert_eq!(explain.reasons_blocked, vec!["regime=BULL"]);
    assert!(gw.placed().is_empty());
}

/// Panics for BTCUSDT, always buys anything else.
struct FlakyEvaluator;

impl CandidateEvaluator for FlakyEvaluator {
    fn evaluate(
        &self,
        symbol: &str,
        _features: &Features,
        _config: &BotConfig,
    ) -> EngineResult<Option<Candidate>> {
        match symbol {
            "BTCUSDT" => panic!("indicator blew up"),
            "SOLUSDT" => Err(EngineError::Evaluator {
                symbol: symbol.into(),
                message: "bad input".into(),
            }),
            _ => Ok(Some(Candidate {
                symbol: symbol.into(),
                side: rangebot_core::Side::Buy,
                rationale: String::new(),
                score: None,
            })),
        }
    }
}

#[tokio::test]
async fn test_evaluator_failure_is_isolated_to_symbol() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(
        config(&["BTCUSDT", "SOLUSDT", "ETHUSDT"], false),
        gw.clone(),
        Arc::new(FlakyEvaluator),
    );
    for s in ["BTCUSDT", "SOLUSDT", "ETHUSDT"] {
        seed_near_support(&h.store, s);
    }
    start_and_settle(&h.engine).await;

    let explain = h.engine.run_cycle().await.unwrap();
    assert_eq!(
        explain.reasons_blocked,
        vec![
            "evaluatorError:BTCUSDT",
            "evaluatorError:SOLUSDT",
            "ENABLE_TRADING=0"
        ]
    );
    let signal = explain.last_signal.unwrap();
    assert_eq!(signal.symbol, "ETHUSDT");
    assert_eq!(signal.why, "candidateMatched");
}

/// Paper backend whose position query takes a while.
struct SlowGateway {
    position_calls: AtomicUsize,
}

impl ExecutionGateway for SlowGateway {
    fn mode(&self) -> TradingMode {
        TradingMode::Paper
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            positions: true,
            ..Default::default()
        }
    }

    fn place_order<'a>(
        &'a self,
        _order: &'a OrderRequest,
        _price_hint: Price,
    ) -> BoxFuture<'a, ExecutorResult<OrderAck>> {
        Box::pin(async { Err(rangebot_executor::ExecutorError::Unsupported("placeOrder")) })
    }

    fn positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<Position>>> {
        Box::pin(async move {
            self.position_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(Vec::new())
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<OpenOrder>>> {
        Box::pin(async { Ok(Vec::new()) })
    }
}

#[tokio::test]
async fn test_overlapping_cycle_is_skipped() {
    let gw = Arc::new(SlowGateway {
        position_calls: AtomicUsize::new(0),
    });
    let h = harness(config(&["BTCUSDT"], false), gw, Arc::new(RangeEdgeEvaluator));
    start_and_settle(&h.engine).await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let (first, second) = tokio::join!(h.engine.run_cycle(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.engine.run_cycle().await
    });
    assert!(first.is_some());
    assert!(second.is_none());

    // Guard is released once the first cycle finishes.
    assert!(h.engine.run_cycle().await.is_some());
}

#[tokio::test]
async fn test_stop_blocks_cycles_and_reports_bot_stopped() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(config(&["BTCUSDT"], true), gw, Arc::new(RangeEdgeEvaluator));
    start_and_settle(&h.engine).await;

    let status = h.engine.stop().await;
    assert!(!status.running);
    assert!(!status.can_trade);
    assert_eq!(status.reasons_blocked, vec!["botStopped"]);
    assert!(status.last_decision_time.is_some());
    assert!(h.engine.run_cycle().await.is_none());
}

/// Holds the next entry order until released.
struct GatedGateway {
    inner: MockGateway,
    armed: AtomicBool,
    entered: Notify,
    release: Notify,
}

impl GatedGateway {
    fn new() -> Self {
        Self {
            inner: MockGateway::new(TradingMode::Paper),
            armed: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

impl ExecutionGateway for GatedGateway {
    fn mode(&self) -> TradingMode {
        TradingMode::Paper
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn place_order<'a>(
        &'a self,
        order: &'a OrderRequest,
        price_hint: Price,
    ) -> BoxFuture<'a, ExecutorResult<OrderAck>> {
        Box::pin(async move {
            if order.kind == OrderKind::Market && self.armed.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.place_order(order, price_hint).await
        })
    }

    fn positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<Position>>> {
        self.inner.positions()
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<OpenOrder>>> {
        self.inner.open_orders()
    }

    fn emergency_stop(
        &self,
        close_positions: bool,
    ) -> BoxFuture<'_, ExecutorResult<rangebot_executor::EmergencyStopSummary>> {
        self.inner.emergency_stop(close_positions)
    }
}

#[tokio::test]
async fn test_stop_during_cycle_halts_remaining_dispatches() {
    let gw = Arc::new(GatedGateway::new());
    let h = harness(
        config(&["BTCUSDT", "ETHUSDT"], true),
        gw.clone(),
        Arc::new(RangeEdgeEvaluator),
    );
    seed_near_support(&h.store, "BTCUSDT");
    seed_near_support(&h.store, "ETHUSDT");
    start_and_settle(&h.engine).await;
    let before = gw.inner.placed().len();

    gw.armed.store(true, Ordering::SeqCst);
    let engine = h.engine.clone();
    let cycle = tokio::spawn(async move { engine.run_cycle().await });
    tokio::time::timeout(Duration::from_secs(2), gw.entered.notified())
        .await
        .unwrap();

    let outcomes = h.engine.emergency_stop(true).await;
    assert!(outcomes["paper"].ok);
    gw.release.notify_one();
    let explain = cycle.await.unwrap().unwrap();

    // The bracket in flight completes; nothing else is sent.
    let placed: Vec<_> = gw.inner.placed()[before..]
        .iter()
        .map(|o| format!("{}:{:?}", o.symbol, o.kind))
        .collect();
    assert_eq!(placed, vec!["BTCUSDT:Market", "BTCUSDT:Stop"]);

    assert!(!h.engine.is_running());
    assert!(!explain.can_trade);
    assert_eq!(explain.reasons_blocked, vec!["botStopped"]);
    let current = h.engine.explain();
    assert!(!current.can_trade);
    assert_eq!(current.reasons_blocked, vec!["botStopped"]);
}

#[tokio::test]
async fn test_emergency_stop_reports_every_backend() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(config(&["BTCUSDT"], true), gw.clone(), Arc::new(RangeEdgeEvaluator));
    start_and_settle(&h.engine).await;
    let mut sub = h.events.subscribe();

    let outcomes = h.engine.emergency_stop(true).await;

    assert!(!h.engine.is_running());
    assert!(outcomes["paper"].ok);
    assert_eq!(gw.emergency_calls(), 1);
    let mut logged = false;
    while let Ok(envelope) = sub.try_recv() {
        if let BotEvent::Log { message, details } = envelope.event {
            if message == "Emergency stop executed" {
                assert!(details.unwrap()["paper"]["ok"].as_bool().unwrap());
                logged = true;
            }
        }
    }
    assert!(logged);
}

#[tokio::test]
async fn test_snapshot_catalog_and_config() {
    let gw = Arc::new(MockGateway::new(TradingMode::Paper));
    let h = harness(
        config(&["BTCUSDT", "ETHUSDT"], false),
        gw,
        Arc::new(RangeEdgeEvaluator),
    );
    seed_near_support(&h.store, "BTCUSDT");

    let snap = h.engine.market_snapshot(None).unwrap();
    assert_eq!(snap.symbol, "BTCUSDT");
    assert_eq!(snap.current, Some(Price::new(dec!(30100))));
    assert!(snap.timeframes.m15.is_some());
    assert_eq!(h.engine.market_snapshot(Some("ethusdt")).unwrap().symbol, "ETHUSDT");

    assert_eq!(
        h.engine.available_symbols().await.unwrap(),
        vec!["BTCUSDT", "ETHUSDT"]
    );

    let err = h.engine.set_config(&json!({"slPctDefault": "-1"})).await;
    assert!(err.is_err());
    assert_eq!(h.engine.config().get().sl_pct_default, dec!(0.5));

    h.engine.set_config(&json!({"symbol": " solusdt "})).await.unwrap();
    assert_eq!(h.engine.universe(), vec!["SOLUSDT"]);
    assert_eq!(h.engine.status().symbol, "SOLUSDT");
}
