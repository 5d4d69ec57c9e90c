//! Execution backend contract.
//!
//! Every backend must place orders. Cancelling, position and open-order
//! queries, emergency stop and execution notifications are optional and
//! advertised through [`Capabilities`]; callers check the flag instead of
//! probing the method.

use parking_lot::Mutex;
use rangebot_core::{
    ExecutionEvent, ExecutionStatus, OpenOrder, OrderAck, OrderKind, OrderRequest, Position, Price,
    TradingMode,
};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

use crate::error::{ExecutorError, ExecutorResult};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Optional capabilities of a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    pub cancel_order: bool,
    pub positions: bool,
    pub open_orders: bool,
    pub emergency_stop: bool,
    pub execution_events: bool,
}

impl Capabilities {
    pub const ALL: Self = Self {
        cancel_order: true,
        positions: true,
        open_orders: true,
        emergency_stop: true,
        execution_events: true,
    };
}

/// What a backend did during an emergency stop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyStopSummary {
    pub cancelled_orders: usize,
    pub closed_positions: usize,
}

/// Uniform interface over simulated, REST and stream-backed backends.
pub trait ExecutionGateway: Send + Sync {
    fn mode(&self) -> TradingMode;

    fn capabilities(&self) -> Capabilities;

    /// Submit one order leg. `price_hint` is the last observed market price.
    fn place_order<'a>(
        &'a self,
        order: &'a OrderRequest,
        price_hint: Price,
    ) -> BoxFuture<'a, ExecutorResult<OrderAck>>;

    /// Backend-specific preconditions run before each placement.
    fn prepare(&self) {}

    fn cancel_order<'a>(
        &'a self,
        _symbol: &'a str,
        _order_id: &'a str,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(async { Err(ExecutorError::Unsupported("cancelOrder")) })
    }

    fn positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<Position>>> {
        Box::pin(async { Err(ExecutorError::Unsupported("getPositions")) })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<OpenOrder>>> {
        Box::pin(async { Err(ExecutorError::Unsupported("getOpenOrders")) })
    }

    fn emergency_stop(
        &self,
        _close_positions: bool,
    ) -> BoxFuture<'_, ExecutorResult<EmergencyStopSummary>> {
        Box::pin(async { Err(ExecutorError::Unsupported("emergencyStop")) })
    }

    /// Execution and fill notifications, when supported.
    fn subscribe_events(&self) -> Option<broadcast::Receiver<ExecutionEvent>> {
        None
    }

    /// Market price update, used by backends that simulate triggers.
    fn on_tick(&self, _symbol: &str, _price: Price) {}
}

/// Scriptable gateway for tests.
#[derive(Debug)]
pub struct MockGateway {
    mode: TradingMode,
    capabilities: Capabilities,
    placed: Mutex<Vec<OrderRequest>>,
    fail_kind: Mutex<Option<(OrderKind, String)>>,
    fail_emergency: Mutex<Option<String>>,
    emergency_calls: AtomicUsize,
    ticks: Mutex<Vec<(String, Price)>>,
    prepared: AtomicUsize,
    events: broadcast::Sender<ExecutionEvent>,
}

impl MockGateway {
    pub fn new(mode: TradingMode) -> Self {
        Self::with_capabilities(mode, Capabilities::ALL)
    }

    pub fn with_capabilities(mode: TradingMode, capabilities: Capabilities) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            mode,
            capabilities,
            placed: Mutex::new(Vec::new()),
            fail_kind: Mutex::new(None),
            fail_emergency: Mutex::new(None),
            emergency_calls: AtomicUsize::new(0),
            ticks: Mutex::new(Vec::new()),
            prepared: AtomicUsize::new(0),
            events,
        }
    }

    /// Fail every order of `kind` with `message`.
    pub fn fail_orders_of_kind(&self, kind: OrderKind, message: impl Into<String>) {
        *self.fail_kind.lock() = Some((kind, message.into()));
    }

    pub fn fail_emergency_stop(&self, message: impl Into<String>) {
        *self.fail_emergency.lock() = Some(message.into());
    }

    /// Orders received, including ones that were failed.
    pub fn placed(&self) -> Vec<OrderRequest> {
        self.placed.lock().clone()
    }

    pub fn emergency_calls(&self) -> usize {
        self.emergency_calls.load(Ordering::SeqCst)
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> Vec<(String, Price)> {
        self.ticks.lock().clone()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.events.send(event);
    }
}

impl ExecutionGateway for MockGateway {
    fn mode(&self) -> TradingMode {
        self.mode
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn prepare(&self) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }

    fn place_order<'a>(
        &'a self,
        order: &'a OrderRequest,
        _price_hint: Price,
    ) -> BoxFuture<'a, ExecutorResult<OrderAck>> {
        Box::pin(async move {
            let count = {
                let mut placed = self.placed.lock();
                placed.push(order.clone());
                placed.len()
            };
            if let Some((kind, message)) = self.fail_kind.lock().clone() {
                if kind == order.kind {
                    return Err(ExecutorError::OrderRejected(message));
                }
            }
            Ok(OrderAck {
                order_id: format!("mock-{count}"),
                idempotency_key: order.idempotency_key.clone(),
                status: ExecutionStatus::Accepted,
            })
        })
    }

    fn positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<Position>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<OpenOrder>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn emergency_stop(
        &self,
        _close_positions: bool,
    ) -> BoxFuture<'_, ExecutorResult<EmergencyStopSummary>> {
        Box::pin(async move {
            self.emergency_calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_emergency.lock().clone() {
                Some(message) => Err(ExecutorError::ConnectionError(message)),
                None => Ok(EmergencyStopSummary::default()),
            }
        })
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<ExecutionEvent>> {
        self.capabilities
            .execution_events
            .then(|| self.events.subscribe())
    }

    fn on_tick(&self, symbol: &str, price: Price) {
        self.ticks.lock().push((symbol.to_string(), price));
    }
}
