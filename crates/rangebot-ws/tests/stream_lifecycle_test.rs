//! Stream channel lifecycle tests against a local mock server.

mod common;
use common::{wait_until, MockStreamServer};

use rangebot_ws::{
    AuthState, ConnectionState, Credentials, StreamChannel, StreamConfig, StreamMessage,
    TradeChannel, TradeChannelConfig, WsError,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

fn fast_config(url: String) -> StreamConfig {
    StreamConfig {
        name: "test".to_string(),
        url,
        reconnect_base_delay_ms: 50,
        reconnect_max_delay_ms: 200,
        reconnect_jitter_ms: 10,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_topics_tracked_before_open_are_replayed() {
    let server = MockStreamServer::start().await;
    let (tx, _rx) = mpsc::channel(64);
    let channel = StreamChannel::new(fast_config(server.url()), tx);

    channel.subscribe(["tickers.BTCUSDT", "publicTrade.BTCUSDT"]);
    assert!(channel.connect());

    let replayed = wait_until(Duration::from_secs(2), || async {
        !server.received_ops("subscribe").await.is_empty()
    })
    .await;
    assert!(replayed, "subscribe frame should arrive after open");

    let frames = server.received_ops("subscribe").await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0]["args"], json!(["tickers.BTCUSDT", "publicTrade.BTCUSDT"]));
    assert_eq!(channel.state(), ConnectionState::Open);

    channel.close();
    server.shutdown();
}

#[tokio::test]
async fn test_subscribe_while_open_sends_only_new_topics() {
    let server = MockStreamServer::start().await;
    let (tx, _rx) = mpsc::channel(64);
    let channel = StreamChannel::new(fast_config(server.url()), tx);
    channel.connect();
    assert!(wait_until(Duration::from_secs(2), || async { channel.is_open() }).await);

    channel.subscribe(["kline.5.ETHUSDT"]);
    channel.subscribe(["kline.5.ETHUSDT", "kline.15.ETHUSDT"]);

    assert!(
        wait_until(Duration::from_secs(2), || async {
            server.received_ops("subscribe").await.len() == 2
        })
        .await
    );
    let frames = server.received_ops("subscribe").await;
    assert_eq!(frames[0]["args"], json!(["kline.5.ETHUSDT"]));
    assert_eq!(frames[1]["args"], json!(["kline.15.ETHUSDT"]));

    channel.close();
    server.shutdown();
}

#[tokio::test]
async fn test_reconnect_after_drop_replays_topics() {
    let server = MockStreamServer::start().await;
    let (tx, _rx) = mpsc::channel(64);
    let channel = StreamChannel::new(fast_config(server.url()), tx);
    channel.subscribe(["tickers.SOLUSDT"]);
    channel.connect();
    assert!(wait_until(Duration::from_secs(2), || async { server.connection_count() == 1 }).await);
    assert!(
        wait_until(Duration::from_secs(2), || async {
            server.received_ops("subscribe").await.len() == 1
        })
        .await
    );

    server.drop_clients();

    assert!(
        wait_until(Duration::from_secs(3), || async {
            server.connection_count() == 2 && server.received_ops("subscribe").await.len() == 2
        })
        .await,
        "channel should reconnect and replay"
    );
    assert!(wait_until(Duration::from_secs(2), || async { channel.is_open() }).await);
    assert_eq!(channel.reconnect_attempt(), 0);

    channel.close();
    server.shutdown();
}

#[tokio::test]
async fn test_data_forwarded_and_heartbeat_replies_consumed() {
    let server = MockStreamServer::start().await;
    let (tx, mut rx) = mpsc::channel(64);
    let config = StreamConfig {
        heartbeat_interval_ms: 100,
        ..fast_config(server.url())
    };
    let channel = StreamChannel::new(config, tx);
    channel.connect();
    assert!(wait_until(Duration::from_secs(2), || async { channel.is_open() }).await);

    // Let at least one ping/pong round trip happen before pushing data.
    assert!(
        wait_until(Duration::from_secs(2), || async {
            !server.received_ops("ping").await.is_empty()
        })
        .await
    );
    server.push(json!({"topic": "tickers.BTCUSDT", "ts": 1, "data": {"lastPrice": "30000"}}));

    let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("data within timeout")
        .expect("channel open");
    match msg {
        StreamMessage::Data { topic, data, .. } => {
            assert_eq!(topic, "tickers.BTCUSDT");
            assert_eq!(data["lastPrice"], "30000");
        }
        other => panic!("heartbeat reply leaked to consumer: {other:?}"),
    }

    channel.close();
    server.shutdown();
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let server = MockStreamServer::start().await;
    let (tx, _rx) = mpsc::channel(64);
    let channel = StreamChannel::new(fast_config(server.url()), tx);

    assert!(channel.connect());
    assert!(!channel.connect());
    assert!(wait_until(Duration::from_secs(2), || async { channel.is_open() }).await);
    assert!(!channel.connect());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.connection_count(), 1);

    channel.close();
    server.shutdown();
}

#[tokio::test]
async fn test_unreachable_server_keeps_single_reconnect_loop() {
    // Bind then drop to get a port nothing listens on.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let (tx, _rx) = mpsc::channel(64);
    let channel = StreamChannel::new(fast_config(format!("ws://127.0.0.1:{port}")), tx);

    assert!(channel.connect());
    assert!(
        wait_until(Duration::from_secs(2), || async { channel.reconnect_attempt() >= 2 }).await
    );
    assert!(!channel.connect(), "reconnect already pending");
    assert_ne!(channel.state(), ConnectionState::Open);

    channel.close();
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert!(!channel.is_active());
}

#[tokio::test]
async fn test_close_stops_reconnects() {
    let server = MockStreamServer::start().await;
    let (tx, _rx) = mpsc::channel(64);
    let channel = StreamChannel::new(fast_config(server.url()), tx);
    channel.connect();
    assert!(wait_until(Duration::from_secs(2), || async { channel.is_open() }).await);

    channel.close();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.connection_count(), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    server.shutdown();
}

#[tokio::test]
async fn test_authenticated_channel_ready_after_ack() {
    let server = MockStreamServer::start().await;
    let (tx, _rx) = mpsc::channel(64);
    let config = StreamConfig {
        credentials: Some(Credentials::new("test-key", "test-secret")),
        ..fast_config(server.url())
    };
    let channel = StreamChannel::new(config, tx);
    channel.connect();

    assert!(wait_until(Duration::from_secs(2), || async { channel.is_ready() }).await);
    let auth = server.received_ops("auth").await;
    assert_eq!(auth.len(), 1);
    assert_eq!(auth[0]["args"][0], "test-key");

    channel.close();
    server.shutdown();
}

#[tokio::test]
async fn test_rejected_handshake_is_not_ready() {
    let server = MockStreamServer::start().await;
    server.reject_auth();
    let (tx, _rx) = mpsc::channel(64);
    let config = StreamConfig {
        credentials: Some(Credentials::new("test-key", "wrong")),
        ..fast_config(server.url())
    };
    let channel = StreamChannel::new(config, tx);
    channel.connect();

    assert!(
        wait_until(Duration::from_secs(2), || async {
            matches!(channel.auth_state(), AuthState::Rejected(_))
        })
        .await
    );
    assert!(channel.is_open());
    assert!(!channel.is_ready());

    channel.close();
    server.shutdown();
}

#[tokio::test]
async fn test_trade_channel_order_round_trip() {
    let server = MockStreamServer::start().await;
    let channel = TradeChannel::spawn(TradeChannelConfig {
        stream: StreamConfig {
            name: "trade".to_string(),
            credentials: Some(Credentials::new("test-key", "test-secret")),
            ..fast_config(server.url())
        },
        ..Default::default()
    });

    let early = channel.create_order(json!({"symbol": "BTCUSDT"})).await;
    assert!(matches!(early, Err(WsError::NotReady(_))));

    channel.connect();
    assert!(wait_until(Duration::from_secs(2), || async { channel.is_ready() }).await);

    let data = channel
        .create_order(json!({"symbol": "BTCUSDT", "side": "Buy", "orderLinkId": "k-1"}))
        .await
        .expect("order accepted");
    assert_eq!(data["orderId"], "mock-order-1");
    assert_eq!(data["orderLinkId"], "k-1");
    assert_eq!(channel.pending_count(), 0);

    let sent = server.received_ops("order.create").await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0]["header"]["X-BAPI-TIMESTAMP"].is_string());

    channel.close();
    server.shutdown();
}
