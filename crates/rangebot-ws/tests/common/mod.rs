//! Mock stream server for integration tests.
//!
//! Accepts connections, records every text frame, answers `ping`, `auth`
//! and `order.create`, and can push frames to or drop all live clients.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Clone, Debug)]
enum Control {
    Push(String),
    Drop,
}

pub struct MockStreamServer {
    addr: SocketAddr,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    accept_auth: Arc<AtomicBool>,
    control_tx: broadcast::Sender<Control>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl MockStreamServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU32::new(0));
        let accept_auth = Arc::new(AtomicBool::new(true));
        let (control_tx, _) = broadcast::channel(64);

        let accept_task = {
            let messages = messages.clone();
            let connections = connections.clone();
            let accept_auth = accept_auth.clone();
            let control_tx = control_tx.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    tokio::spawn(handle_connection(
                        stream,
                        messages.clone(),
                        connections.clone(),
                        accept_auth.clone(),
                        control_tx.subscribe(),
                    ));
                }
            })
        };

        Self {
            addr,
            messages,
            connections,
            accept_auth,
            control_tx,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn connection_count(&self) -> u32 {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn reject_auth(&self) {
        self.accept_auth.store(false, Ordering::SeqCst);
    }

    pub async fn received(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }

    /// Received frames parsed as JSON with the given `op`.
    pub async fn received_ops(&self, op: &str) -> Vec<Value> {
        self.received()
            .await
            .iter()
            .filter_map(|m| serde_json::from_str::<Value>(m).ok())
            .filter(|v| v["op"] == op)
            .collect()
    }

    pub fn push(&self, frame: Value) {
        let _ = self.control_tx.send(Control::Push(frame.to_string()));
    }

    pub fn drop_clients(&self) {
        let _ = self.control_tx.send(Control::Drop);
    }

    pub fn shutdown(self) {
        self.accept_task.abort();
        let _ = self.control_tx.send(Control::Drop);
    }
}

async fn handle_connection(
    stream: TcpStream,
    messages: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicU32>,
    accept_auth: Arc<AtomicBool>,
    mut control_rx: broadcast::Receiver<Control>,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    connections.fetch_add(1, Ordering::SeqCst);
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            msg = read.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => continue,
                };
                messages.lock().await.push(text.clone());

                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let reply = match frame["op"].as_str() {
                    Some("ping") => Some(json!({"op": "ping", "success": true, "ret_msg": "pong"})),
                    Some("auth") => {
                        let ok = accept_auth.load(Ordering::SeqCst);
                        Some(json!({
                            "op": "auth",
                            "success": ok,
                            "ret_msg": if ok { "" } else { "invalid signature" },
                        }))
                    }
                    Some("order.create") => Some(json!({
                        "reqId": frame["reqId"],
                        "retCode": 0,
                        "retMsg": "OK",
                        "op": "order.create",
                        "data": {"orderId": "mock-order-1", "orderLinkId": frame["args"][0]["orderLinkId"]},
                    })),
                    _ => None,
                };
                if let Some(reply) = reply {
                    let _ = write.send(Message::Text(reply.to_string())).await;
                }
            }
            ctl = control_rx.recv() => match ctl {
                Ok(Control::Push(text)) => {
                    let _ = write.send(Message::Text(text)).await;
                }
                Ok(Control::Drop) | Err(_) => break,
            },
        }
    }
}

/// Poll `cond` every 20ms until it holds or `within` elapses.
pub async fn wait_until<F, Fut>(within: Duration, mut cond: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(within, async {
        loop {
            if cond().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}
