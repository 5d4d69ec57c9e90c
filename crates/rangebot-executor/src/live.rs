//! Real-money backend: order entry over the authenticated trade channel,
//! with signed REST for queries and as the placement fallback.

use rangebot_core::{
    ExecutionEvent, OpenOrder, OrderAck, OrderRequest, Position, Price, TradingMode,
};
use rangebot_ws::TradeChannel;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::error::ExecutorResult;
use crate::gateway::{BoxFuture, Capabilities, EmergencyStopSummary, ExecutionGateway};
use crate::rest::{accepted_event, ack_from_result, order_payload, RestGateway};

pub struct LiveGateway {
    trade: Arc<TradeChannel>,
    rest: RestGateway,
}

impl LiveGateway {
    pub fn new(trade: Arc<TradeChannel>, rest: RestGateway) -> Self {
        Self { trade, rest }
    }

    pub fn trade_channel(&self) -> &Arc<TradeChannel> {
        &self.trade
    }

    async fn place(&self, order: &OrderRequest) -> ExecutorResult<OrderAck> {
        if !self.trade.is_ready() {
            warn!(
                symbol = %order.symbol,
                state = self.trade.stream().state().as_str(),
                "Trade channel not ready, placing over REST"
            );
            return self.rest.create(order).await;
        }

        let result = self.trade.create_order(order_payload(order)).await?;
        let ack = ack_from_result(&result, order);
        info!(
            symbol = %order.symbol,
            order_id = %ack.order_id,
            key = %order.idempotency_key,
            "Stream order accepted"
        );
        self.rest.publish(accepted_event(&ack, order));
        Ok(ack)
    }
}

impl ExecutionGateway for LiveGateway {
    fn mode(&self) -> TradingMode {
        TradingMode::Real
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    /// Open the trade channel if nothing is running yet.
    fn prepare(&self) {
        let stream = self.trade.stream();
        if !stream.is_active() && !stream.is_disabled() && self.trade.connect() {
            info!("Trade channel connecting before placement");
        }
    }

    fn place_order<'a>(
        &'a self,
        order: &'a OrderRequest,
        _price_hint: Price,
    ) -> BoxFuture<'a, ExecutorResult<OrderAck>> {
        Box::pin(self.place(order))
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: &'a str,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(self.rest.cancel(symbol, order_id))
    }

    fn positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<Position>>> {
        Box::pin(self.rest.fetch_positions())
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<OpenOrder>>> {
        Box::pin(self.rest.fetch_open_orders())
    }

    fn emergency_stop(
        &self,
        close_positions: bool,
    ) -> BoxFuture<'_, ExecutorResult<EmergencyStopSummary>> {
        Box::pin(self.rest.flatten(close_positions))
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<ExecutionEvent>> {
        self.rest.subscribe_events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutorError;
    use crate::rest::RestClient;
    use rangebot_core::{IdempotencyKey, Side, Size};
    use rangebot_ws::{StreamConfig, TradeChannelConfig};
    use rust_decimal_macros::dec;

    fn gateway(disabled: bool) -> LiveGateway {
        let trade = TradeChannel::spawn(TradeChannelConfig {
            stream: StreamConfig {
                name: "trade".into(),
                url: "ws://127.0.0.1:1".into(),
                disabled_reason: disabled.then(|| "no credentials".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let client = Arc::new(RestClient::new("http://127.0.0.1:1", None, 5000).unwrap());
        LiveGateway::new(trade, RestGateway::new(client, TradingMode::Real))
    }

    #[tokio::test]
    async fn test_prepare_skips_disabled_channel() {
        let gw = gateway(true);
        gw.prepare();
        assert!(!gw.trade_channel().stream().is_active());
    }

    #[tokio::test]
    async fn test_prepare_connects_idle_channel() {
        let gw = gateway(false);
        gw.prepare();
        assert!(gw.trade_channel().stream().is_active());
        gw.trade_channel().close();
    }

    #[tokio::test]
    async fn test_not_ready_falls_back_to_rest() {
        let gw = gateway(false);
        let order = OrderRequest::market(
            "BTCUSDT",
            Side::Buy,
            Size::new(dec!(0.01)),
            Price::new(dec!(30000)),
            IdempotencyKey::from_string("k1".into()),
        );
        // REST has no credentials, so the fallback is what fails.
        let err = gw.place_order(&order, Price::ZERO).await.unwrap_err();
        assert!(matches!(err, ExecutorError::MissingCredentials));
    }
}
