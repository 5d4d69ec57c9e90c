//! Simulated execution backend.
//!
//! Market orders fill immediately at the order price (or the price hint).
//! Stop orders rest per symbol and trigger on ticks: a sell stop fires when
//! the price falls to or below its trigger, a buy stop when it rises to or
//! above it. Positions are netted per symbol.

use parking_lot::Mutex;
use rangebot_core::{
    ExecutionEvent, ExecutionStatus, IdempotencyKey, OpenOrder, OrderAck, OrderKind, OrderRequest,
    Position, Price, Side, Size, TradingMode,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::{ExecutorError, ExecutorResult};
use crate::gateway::{BoxFuture, Capabilities, EmergencyStopSummary, ExecutionGateway};

#[derive(Debug, Default)]
struct PaperBook {
    positions: HashMap<String, Position>,
    resting: Vec<OpenOrder>,
    acks: HashMap<IdempotencyKey, OrderAck>,
    last_prices: HashMap<String, Price>,
    next_id: u64,
}

impl PaperBook {
    fn next_order_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }

    /// Apply a fill to the symbol's net position.
    fn apply_fill(&mut self, symbol: &str, side: Side, qty: Size, price: Price, reduce_only: bool) {
        let Some(pos) = self.positions.get_mut(symbol) else {
            if !reduce_only {
                self.positions.insert(
                    symbol.to_string(),
                    Position {
                        symbol: symbol.to_string(),
                        side,
                        qty,
                        entry_price: price,
                    },
                );
            }
            return;
        };

        if pos.side == side {
            if reduce_only {
                return;
            }
            let total = pos.qty + qty;
            let cost = pos.qty.notional(pos.entry_price) + qty.notional(price);
            pos.entry_price = Price::new(cost / total.inner());
            pos.qty = total;
        } else if qty < pos.qty {
            pos.qty = pos.qty - qty;
        } else if qty == pos.qty || reduce_only {
            self.positions.remove(symbol);
        } else {
            pos.side = side;
            pos.qty = qty - pos.qty;
            pos.entry_price = price;
        }
    }

    fn triggered(&self, symbol: &str, price: Price) -> Vec<String> {
        self.resting
            .iter()
            .filter(|o| o.symbol == symbol)
            .filter(|o| match (o.side, o.stop_price) {
                (Side::Sell, Some(stop)) => price <= stop,
                (Side::Buy, Some(stop)) => price >= stop,
                _ => false,
            })
            .map(|o| o.order_id.clone())
            .collect()
    }
}

pub struct PaperGateway {
    book: Mutex<PaperBook>,
    events: broadcast::Sender<ExecutionEvent>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            book: Mutex::new(PaperBook::default()),
            events,
        }
    }

    fn emit(&self, event: ExecutionEvent) {
        let _ = self.events.send(event);
    }

    fn fill_event(order_id: &str, symbol: &str, side: Side, qty: Size, price: Price) -> ExecutionEvent {
        ExecutionEvent {
            mode: None,
            status: ExecutionStatus::Filled,
            order_id: order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
            price: Some(price),
            idempotency_key: None,
        }
    }

    fn place(&self, order: &OrderRequest, price_hint: Price) -> ExecutorResult<OrderAck> {
        if order.qty.is_zero() {
            return Err(ExecutorError::OrderRejected("qty must be positive".to_string()));
        }

        let mut events = Vec::new();
        let ack = {
            let mut book = self.book.lock();
            if let Some(ack) = book.acks.get(&order.idempotency_key) {
                debug!(key = %order.idempotency_key, "Duplicate paper order ignored");
                return Ok(ack.clone());
            }

            let order_id = book.next_order_id();
            let status = match order.kind {
                OrderKind::Market => {
                    let price = order.price.unwrap_or(price_hint);
                    if !price.is_positive() {
                        return Err(ExecutorError::OrderRejected(format!(
                            "no fill price for {}",
                            order.symbol
                        )));
                    }
                    book.apply_fill(&order.symbol, order.side, order.qty, price, order.reduce_only);
                    let mut event =
                        Self::fill_event(&order_id, &order.symbol, order.side, order.qty, price);
                    event.idempotency_key = Some(order.idempotency_key.clone());
                    events.push(event);
                    ExecutionStatus::Filled
                }
                OrderKind::Stop | OrderKind::Limit => {
                    let trigger = order.stop_price.or(order.price).ok_or_else(|| {
                        ExecutorError::OrderRejected("resting order needs a price".to_string())
                    })?;
                    book.resting.push(OpenOrder {
                        order_id: order_id.clone(),
                        symbol: order.symbol.clone(),
                        side: order.side,
                        kind: order.kind,
                        qty: order.qty,
                        price: order.price,
                        stop_price: Some(trigger),
                        reduce_only: order.reduce_only,
                        idempotency_key: Some(order.idempotency_key.clone()),
                    });
                    events.push(ExecutionEvent {
                        mode: None,
                        status: ExecutionStatus::Accepted,
                        order_id: order_id.clone(),
                        symbol: order.symbol.clone(),
                        side: order.side,
                        qty: order.qty,
                        price: Some(trigger),
                        idempotency_key: Some(order.idempotency_key.clone()),
                    });
                    ExecutionStatus::Accepted
                }
            };

            let ack = OrderAck {
                order_id,
                idempotency_key: order.idempotency_key.clone(),
                status,
            };
            book.acks.insert(order.idempotency_key.clone(), ack.clone());
            ack
        };

        info!(
            symbol = %order.symbol,
            side = %order.side,
            kind = %order.kind,
            qty = %order.qty,
            order_id = %ack.order_id,
            "Paper order placed"
        );
        for event in events {
            self.emit(event);
        }
        Ok(ack)
    }

    /// Trigger resting stops for `symbol` at `price`.
    pub fn handle_tick(&self, symbol: &str, price: Price) {
        if !price.is_positive() {
            return;
        }
        let mut events = Vec::new();
        {
            let mut book = self.book.lock();
            book.last_prices.insert(symbol.to_string(), price);
            for order_id in book.triggered(symbol, price) {
                let Some(pos) = book.resting.iter().position(|o| o.order_id == order_id) else {
                    continue;
                };
                let order = book.resting.remove(pos);
                book.apply_fill(&order.symbol, order.side, order.qty, price, order.reduce_only);

                let mut triggered =
                    Self::fill_event(&order.order_id, &order.symbol, order.side, order.qty, price);
                triggered.status = ExecutionStatus::Triggered;
                triggered.idempotency_key = order.idempotency_key.clone();
                let mut filled = triggered.clone();
                filled.status = ExecutionStatus::Filled;
                events.push(triggered);
                events.push(filled);
            }
        }
        for event in events {
            info!(symbol, order_id = %event.order_id, status = ?event.status, "Paper stop triggered");
            self.emit(event);
        }
    }

    fn cancel(&self, symbol: &str, order_id: &str) -> ExecutorResult<()> {
        let order = {
            let mut book = self.book.lock();
            let pos = book
                .resting
                .iter()
                .position(|o| o.symbol == symbol && o.order_id == order_id)
                .ok_or_else(|| ExecutorError::OrderNotFound(order_id.to_string()))?;
            book.resting.remove(pos)
        };
        self.emit(ExecutionEvent {
            mode: None,
            status: ExecutionStatus::Cancelled,
            order_id: order.order_id,
            symbol: order.symbol,
            side: order.side,
            qty: order.qty,
            price: order.stop_price,
            idempotency_key: order.idempotency_key,
        });
        Ok(())
    }

    fn flatten(&self, close_positions: bool) -> EmergencyStopSummary {
        let mut book = self.book.lock();
        let cancelled_orders = book.resting.len();
        book.resting.clear();

        let mut closed_positions = 0;
        if close_positions {
            let positions: Vec<Position> = book.positions.drain().map(|(_, p)| p).collect();
            closed_positions = positions.len();
            for pos in positions {
                let exit = book
                    .last_prices
                    .get(&pos.symbol)
                    .copied()
                    .unwrap_or(pos.entry_price);
                let pnl = match pos.side {
                    Side::Buy => (exit.inner() - pos.entry_price.inner()) * pos.qty.inner(),
                    Side::Sell => (pos.entry_price.inner() - exit.inner()) * pos.qty.inner(),
                };
                info!(symbol = %pos.symbol, exit = %exit, pnl = %pnl.round_dp(4), "Paper position closed");
            }
        }
        EmergencyStopSummary {
            cancelled_orders,
            closed_positions,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.book.lock().positions.get(symbol).cloned()
    }

    /// Unrealized PnL across positions at the last seen prices.
    pub fn unrealized_pnl(&self) -> Decimal {
        let book = self.book.lock();
        book.positions
            .values()
            .filter_map(|p| {
                let mark = book.last_prices.get(&p.symbol)?;
                let diff = mark.inner() - p.entry_price.inner();
                Some(match p.side {
                    Side::Buy => diff * p.qty.inner(),
                    Side::Sell => -diff * p.qty.inner(),
                })
            })
            .sum()
    }
}

impl ExecutionGateway for PaperGateway {
    fn mode(&self) -> TradingMode {
        TradingMode::Paper
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn place_order<'a>(
        &'a self,
        order: &'a OrderRequest,
        price_hint: Price,
    ) -> BoxFuture<'a, ExecutorResult<OrderAck>> {
        Box::pin(async move { self.place(order, price_hint) })
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: &'a str,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(async move { self.cancel(symbol, order_id) })
    }

    fn positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<Position>>> {
        Box::pin(async move {
            let mut positions: Vec<Position> =
                self.book.lock().positions.values().cloned().collect();
            positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
            Ok(positions)
        })
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<OpenOrder>>> {
        Box::pin(async move { Ok(self.book.lock().resting.clone()) })
    }

    fn emergency_stop(
        &self,
        close_positions: bool,
    ) -> BoxFuture<'_, ExecutorResult<EmergencyStopSummary>> {
        Box::pin(async move { Ok(self.flatten(close_positions)) })
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<ExecutionEvent>> {
        Some(self.events.subscribe())
    }

    fn on_tick(&self, symbol: &str, price: Price) {
        self.handle_tick(symbol, price);
    }
}
