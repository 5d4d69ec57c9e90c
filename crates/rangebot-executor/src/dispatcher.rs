//! Bracket order dispatch.
//!
//! Turns one candidate into an entry leg and a reduce-only protective stop.
//! Every outcome, placed or not, is returned as an [`ExecutionResult`]; no
//! error leaves this module.

use rangebot_core::{
    BotConfig, BotEvent, Candidate, EventBus, ExecutionResult, IdempotencyKey, LegPurpose,
    OrderRequest, Price, Side, Sizing,
};
use rangebot_telemetry::Metrics;
use std::sync::Arc;
use tracing::{error, info};

use crate::instruments::InstrumentCache;
use crate::router::ModeRouter;

pub struct OrderDispatcher {
    router: Arc<ModeRouter>,
    instruments: Arc<InstrumentCache>,
    events: EventBus,
    session: String,
}

impl OrderDispatcher {
    /// `session` prefixes every idempotency key so restarts never collide.
    pub fn new(
        router: Arc<ModeRouter>,
        instruments: Arc<InstrumentCache>,
        events: EventBus,
        session: impl Into<String>,
    ) -> Self {
        Self {
            router,
            instruments,
            events,
            session: session.into(),
        }
    }

    pub fn router(&self) -> &Arc<ModeRouter> {
        &self.router
    }

    pub fn instruments(&self) -> &Arc<InstrumentCache> {
        &self.instruments
    }

    fn key(&self, cycle: u64, symbol: &str, side: Side, purpose: LegPurpose) -> IdempotencyKey {
        IdempotencyKey::for_leg(&self.session, cycle, symbol, side, purpose)
    }

    /// Size, quantize and place the bracket for `candidate` at `last_price`.
    pub async fn dispatch(
        &self,
        candidate: &Candidate,
        last_price: Price,
        config: &BotConfig,
        cycle: u64,
    ) -> ExecutionResult {
        let symbol = candidate.symbol.as_str();
        let Some(spec) = self.instruments.get(symbol) else {
            return ExecutionResult::blocked(format!("noInstrument:{symbol}"), None);
        };

        let qty = spec.qty_for_notional(config.order_notional_usdt, last_price);
        let sizing = Sizing {
            notional: config.order_notional_usdt,
            qty,
            min_qty: spec.min_qty,
            qty_step: spec.qty_step,
        };
        if !spec.accepts_qty(qty) {
            info!(symbol, %qty, min_qty = %spec.min_qty, "Quantity below instrument minimum");
            return ExecutionResult::blocked(format!("qtyTooSmall:{symbol}"), Some(sizing));
        }

        let route = self.router.route();
        let mode = route.mode();
        let entry_price = spec.quantize_price(last_price);
        let entry = OrderRequest::market(
            symbol,
            candidate.side,
            qty,
            entry_price,
            self.key(cycle, symbol, candidate.side, LegPurpose::Entry1),
        );
        if let Err(e) = route.place_order(&entry, last_price).await {
            Metrics::order_failed(mode.as_str(), LegPurpose::Entry1.tag());
            return self.failed(symbol, e.to_string(), sizing);
        }
        Metrics::order_placed(mode.as_str(), LegPurpose::Entry1.tag());

        let offset = match candidate.side {
            Side::Buy => -config.sl_pct_default,
            Side::Sell => config.sl_pct_default,
        };
        let stop_side = candidate.side.opposite();
        let stop = OrderRequest::protective_stop(
            symbol,
            stop_side,
            qty,
            spec.quantize_price(entry_price.offset_pct(offset)),
            self.key(cycle, symbol, stop_side, LegPurpose::StopLoss),
        );
        if let Err(e) = route.place_order(&stop, last_price).await {
            Metrics::order_failed(mode.as_str(), LegPurpose::StopLoss.tag());
            return self.failed(symbol, e.to_string(), sizing);
        }
        Metrics::order_placed(mode.as_str(), LegPurpose::StopLoss.tag());

        info!(
            %mode,
            symbol,
            side = %candidate.side,
            %qty,
            entry = %entry_price,
            stop = ?stop.stop_price,
            "Bracket placed"
        );
        ExecutionResult::placed(sizing)
    }

    fn failed(&self, symbol: &str, message: String, sizing: Sizing) -> ExecutionResult {
        error!(symbol, error = %message, "Order placement failed");
        self.events
            .publish(BotEvent::error(format!("orderPlacementFailed:{symbol}:{message}")));
        ExecutionResult::blocked(format!("executionError:{message}"), Some(sizing))
    }
}
