//! Mode router.
//!
//! Holds one backend per [`TradingMode`] and sends every call to the backend
//! named by the live configuration. A mode that is unknown or has no
//! registered backend resolves to the simulated one, so a bad mode string
//! can never reach a venue.

use rangebot_core::{
    BotEvent, ConfigStore, EventBus, OpenOrder, OrderAck, OrderRequest, Position, Price,
    TradingMode,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::gateway::ExecutionGateway;

/// Per-mode result of an emergency stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyStopOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled_orders: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_positions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One backend resolved from the configuration at a point in time.
///
/// Every leg placed through the same route lands on the same backend, even
/// if the configured mode changes in between.
#[derive(Clone)]
pub struct Route {
    gateway: Arc<dyn ExecutionGateway>,
}

impl Route {
    pub fn mode(&self) -> TradingMode {
        self.gateway.mode()
    }

    /// Place one leg. Failures carry the mode.
    pub async fn place_order(
        &self,
        order: &OrderRequest,
        price_hint: Price,
    ) -> ExecutorResult<OrderAck> {
        let mode = self.mode();
        self.gateway.prepare();
        info!(
            %mode,
            symbol = %order.symbol,
            side = %order.side,
            kind = %order.kind,
            qty = %order.qty,
            key = %order.idempotency_key,
            "Placing order"
        );
        self.gateway
            .place_order(order, price_hint)
            .await
            .map_err(|e| wrap(mode, e))
    }
}

pub struct ModeRouter {
    config: Arc<ConfigStore>,
    paper: Arc<dyn ExecutionGateway>,
    gateways: HashMap<TradingMode, Arc<dyn ExecutionGateway>>,
}

impl ModeRouter {
    /// Register `paper` plus any other backends and start forwarding their
    /// execution events, tagged with their mode, onto `events`.
    pub fn new(
        config: Arc<ConfigStore>,
        paper: Arc<dyn ExecutionGateway>,
        others: Vec<Arc<dyn ExecutionGateway>>,
        events: EventBus,
    ) -> Arc<Self> {
        let mut gateways: HashMap<TradingMode, Arc<dyn ExecutionGateway>> = HashMap::new();
        gateways.insert(TradingMode::Paper, paper.clone());
        for gateway in others {
            gateways.insert(gateway.mode(), gateway);
        }

        for (mode, gateway) in &gateways {
            if let Some(rx) = gateway.subscribe_events() {
                tokio::spawn(forward_events(*mode, rx, events.clone()));
            }
        }

        Arc::new(Self {
            config,
            paper,
            gateways,
        })
    }

    /// Mode the next call will use.
    pub fn resolve_mode(&self) -> TradingMode {
        let requested = self.config.get().mode;
        match TradingMode::parse(&requested) {
            Some(mode) if self.gateways.contains_key(&mode) => mode,
            Some(mode) => {
                debug!(%mode, "No backend registered, using paper");
                TradingMode::Paper
            }
            None => {
                debug!(mode = %requested, "Unknown mode, using paper");
                TradingMode::Paper
            }
        }
    }

    pub fn active_gateway(&self) -> Arc<dyn ExecutionGateway> {
        self.gateway(self.resolve_mode())
    }

    fn gateway(&self, mode: TradingMode) -> Arc<dyn ExecutionGateway> {
        self.gateways
            .get(&mode)
            .cloned()
            .unwrap_or_else(|| self.paper.clone())
    }

    pub fn registered_modes(&self) -> Vec<TradingMode> {
        let mut modes: Vec<_> = self.gateways.keys().copied().collect();
        modes.sort();
        modes
    }

    /// Pin the active backend for a sequence of placements.
    pub fn route(&self) -> Route {
        Route {
            gateway: self.active_gateway(),
        }
    }

    /// Place one leg on the active backend. Failures carry the mode.
    pub async fn place_order(
        &self,
        order: &OrderRequest,
        price_hint: Price,
    ) -> ExecutorResult<OrderAck> {
        self.route().place_order(order, price_hint).await
    }

    /// Cancel on the active backend. `None` when the backend cannot cancel.
    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> ExecutorResult<Option<()>> {
        let gateway = self.active_gateway();
        if !gateway.capabilities().cancel_order {
            return Ok(None);
        }
        let mode = gateway.mode();
        gateway
            .cancel_order(symbol, order_id)
            .await
            .map(Some)
            .map_err(|e| wrap(mode, e))
    }

    /// Positions on the active backend; empty when unsupported.
    pub async fn positions(&self) -> ExecutorResult<Vec<Position>> {
        let gateway = self.active_gateway();
        if !gateway.capabilities().positions {
            return Ok(Vec::new());
        }
        let mode = gateway.mode();
        gateway.positions().await.map_err(|e| wrap(mode, e))
    }

    /// Open orders on the active backend; empty when unsupported.
    pub async fn open_orders(&self) -> ExecutorResult<Vec<OpenOrder>> {
        let gateway = self.active_gateway();
        if !gateway.capabilities().open_orders {
            return Ok(Vec::new());
        }
        let mode = gateway.mode();
        gateway.open_orders().await.map_err(|e| wrap(mode, e))
    }

    /// Emergency stop on every backend that supports it. One failure does
    /// not stop the others.
    pub async fn emergency_stop(
        &self,
        close_positions: bool,
    ) -> BTreeMap<String, EmergencyStopOutcome> {
        let mut modes: Vec<_> = self.gateways.iter().collect();
        modes.sort_by_key(|(mode, _)| **mode);

        let mut outcomes = BTreeMap::new();
        for (mode, gateway) in modes {
            if !gateway.capabilities().emergency_stop {
                continue;
            }
            let outcome = match gateway.emergency_stop(close_positions).await {
                Ok(summary) => EmergencyStopOutcome {
                    ok: true,
                    cancelled_orders: Some(summary.cancelled_orders),
                    closed_positions: Some(summary.closed_positions),
                    error: None,
                },
                Err(e) => {
                    error!(%mode, error = %e, "Emergency stop failed");
                    EmergencyStopOutcome {
                        ok: false,
                        cancelled_orders: None,
                        closed_positions: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            outcomes.insert(mode.as_str().to_string(), outcome);
        }
        warn!(close_positions, modes = outcomes.len(), "Emergency stop executed");
        outcomes
    }

    /// Ticks always go to the simulated backend, whatever the active mode.
    pub fn on_tick(&self, symbol: &str, price: Price) {
        self.paper.on_tick(symbol, price);
    }
}

fn wrap(mode: TradingMode, e: ExecutorError) -> ExecutorError {
    match e {
        ExecutorError::Mode { .. } => e,
        other => ExecutorError::Mode {
            mode: mode.as_str().to_string(),
            message: other.to_string(),
        },
    }
}

async fn forward_events(
    mode: TradingMode,
    mut rx: tokio::sync::broadcast::Receiver<rangebot_core::ExecutionEvent>,
    events: EventBus,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                events.publish(BotEvent::Execution(event.tagged(mode.as_str())));
            }
            Err(RecvError::Lagged(n)) => warn!(%mode, skipped = n, "Execution events lagged"),
            Err(RecvError::Closed) => break,
        }
    }
    debug!(%mode, "Execution event forwarder exited");
}
