//! Market feed task.
//!
//! Owns the public [`StreamChannel`], turns its topic pushes into
//! [`MarketEvent`]s, applies them to the [`MarketStore`] and fans ticker
//! prices out to tick subscribers.

use rangebot_core::Price;
use rangebot_ws::{StreamChannel, StreamConfig, StreamMessage};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::market_state::MarketStore;
use crate::parser::{parse_message, topics_for, MarketEvent};

/// Last traded price observed on a ticker push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTick {
    pub symbol: String,
    pub price: Price,
}

pub struct MarketFeed {
    channel: StreamChannel,
    store: Arc<MarketStore>,
    ticks_tx: broadcast::Sender<PriceTick>,
}

impl MarketFeed {
    /// Build the feed and start its message pump. Does not connect.
    pub fn spawn(config: StreamConfig, store: Arc<MarketStore>) -> Arc<Self> {
        let (message_tx, message_rx) = mpsc::channel(1024);
        let (ticks_tx, _) = broadcast::channel(1024);
        tokio::spawn(pump(message_rx, store.clone(), ticks_tx.clone()));

        Arc::new(Self {
            channel: StreamChannel::new(config, message_tx),
            store,
            ticks_tx,
        })
    }

    pub fn connect(&self) -> bool {
        self.channel.connect()
    }

    pub fn close(&self) {
        self.channel.close();
    }

    pub fn channel(&self) -> &StreamChannel {
        &self.channel
    }

    pub fn store(&self) -> &Arc<MarketStore> {
        &self.store
    }

    /// Subscribe all market topics for `symbols`. Already-watched symbols
    /// are no-ops.
    pub fn watch<'a>(&self, symbols: impl IntoIterator<Item = &'a str>) {
        let topics: Vec<String> = symbols.into_iter().flat_map(topics_for).collect();
        let before = self.channel.topics().len();
        self.channel.subscribe(topics);
        let added = self.channel.topics().len() - before;
        if added > 0 {
            info!(topics = added, "Watching new market topics");
        }
    }

    /// Receive `(symbol, lastPrice)` for every ticker that carries a price.
    pub fn subscribe_ticks(&self) -> broadcast::Receiver<PriceTick> {
        self.ticks_tx.subscribe()
    }
}

impl Drop for MarketFeed {
    fn drop(&mut self) {
        self.channel.close();
    }
}

async fn pump(
    mut rx: mpsc::Receiver<StreamMessage>,
    store: Arc<MarketStore>,
    ticks_tx: broadcast::Sender<PriceTick>,
) {
    while let Some(msg) = rx.recv().await {
        let StreamMessage::Data { topic, data, .. } = msg else {
            continue;
        };
        handle_data(&store, &ticks_tx, &topic, &data);
    }
    debug!("Market feed pump exited");
}

fn handle_data(
    store: &MarketStore,
    ticks_tx: &broadcast::Sender<PriceTick>,
    topic: &str,
    data: &serde_json::Value,
) {
    let event = match parse_message(topic, data) {
        Ok(event) => event,
        Err(e) => {
            debug!(%topic, error = %e, "Skipping market message");
            return;
        }
    };
    store.apply(&event);

    if let MarketEvent::Ticker {
        symbol,
        last_price: Some(price),
        ..
    } = &event
    {
        // No receivers is fine.
        let _ = ticks_tx.send(PriceTick {
            symbol: symbol.clone(),
            price: *price,
        });
    }
}
