//! Signed REST backend.
//!
//! Requests carry `X-BAPI-API-KEY`, `X-BAPI-TIMESTAMP`,
//! `X-BAPI-RECV-WINDOW` and `X-BAPI-SIGN`, where the signature is the hex
//! HMAC-SHA256 of `timestamp + apiKey + recvWindow + payload` and payload is
//! the query string (GET) or the exact JSON body (POST).

use rangebot_core::{
    now_ms, ExecutionEvent, ExecutionStatus, IdempotencyKey, OpenOrder, OrderAck, OrderKind,
    OrderRequest, Position, Price, Side, Size, TradingMode,
};
use rangebot_ws::Credentials;
use reqwest::{Client, RequestBuilder};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::gateway::{BoxFuture, Capabilities, EmergencyStopSummary, ExecutionGateway};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const INSTRUMENTS_PAGE_LIMIT: u32 = 1000;

/// Low-level signed HTTP client.
pub struct RestClient {
    http: Client,
    base_url: String,
    credentials: Option<Credentials>,
    recv_window_ms: u64,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        recv_window_ms: u64,
    ) -> ExecutorResult<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ExecutorError::Http(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials: credentials.filter(Credentials::is_complete),
            recv_window_ms,
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Request signature for `payload` at `timestamp`.
    pub fn signature(&self, timestamp: i64, payload: &str) -> ExecutorResult<String> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(ExecutorError::MissingCredentials)?;
        Ok(creds.sign(&format!(
            "{timestamp}{}{}{payload}",
            creds.api_key, self.recv_window_ms
        ))?)
    }

    fn signed(&self, builder: RequestBuilder, payload: &str) -> ExecutorResult<RequestBuilder> {
        let creds = self
            .credentials
            .as_ref()
            .ok_or(ExecutorError::MissingCredentials)?;
        let timestamp = now_ms();
        let signature = self.signature(timestamp, payload)?;
        Ok(builder
            .header("X-BAPI-API-KEY", creds.api_key.as_str())
            .header("X-BAPI-TIMESTAMP", timestamp.to_string())
            .header("X-BAPI-RECV-WINDOW", self.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature))
    }

    fn url(&self, path: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{query}", self.base_url)
        }
    }

    pub async fn get_public(&self, path: &str, query: &str) -> ExecutorResult<Value> {
        self.send(self.http.get(self.url(path, query))).await
    }

    pub async fn get_signed(&self, path: &str, query: &str) -> ExecutorResult<Value> {
        let builder = self.signed(self.http.get(self.url(path, query)), query)?;
        self.send(builder).await
    }

    pub async fn post_signed(&self, path: &str, body: &Value) -> ExecutorResult<Value> {
        let payload = serde_json::to_string(body)?;
        let builder = self
            .http
            .post(self.url(path, ""))
            .header("Content-Type", "application/json");
        let builder = self.signed(builder, &payload)?.body(payload);
        self.send(builder).await
    }

    /// Send and unwrap the `{retCode, retMsg, result}` envelope.
    async fn send(&self, builder: RequestBuilder) -> ExecutorResult<Value> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Http(format!("HTTP {status}: {body}")));
        }
        let body: Value = response.json().await?;
        unwrap_envelope(body)
    }

    /// Every linear instrument, following pagination cursors.
    pub async fn fetch_instruments(&self) -> ExecutorResult<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = String::new();
        loop {
            let mut query = format!("category=linear&limit={INSTRUMENTS_PAGE_LIMIT}");
            if !cursor.is_empty() {
                query.push_str(&format!("&cursor={cursor}"));
            }
            let result = self
                .get_public("/v5/market/instruments-info", &query)
                .await?;
            if let Some(list) = result.get("list").and_then(Value::as_array) {
                items.extend(list.iter().cloned());
            }
            cursor = result
                .get("nextPageCursor")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if cursor.is_empty() {
                break;
            }
        }
        debug!(count = items.len(), "Instruments fetched");
        Ok(items)
    }
}

fn unwrap_envelope(body: Value) -> ExecutorResult<Value> {
    let code = body.get("retCode").and_then(Value::as_i64).unwrap_or(0);
    if code != 0 {
        return Err(ExecutorError::Api {
            code,
            message: body
                .get("retMsg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(body.get("result").cloned().unwrap_or(Value::Null))
}

/// Venue order body for one leg.
pub fn order_payload(order: &OrderRequest) -> Value {
    let mut body = json!({
        "category": "linear",
        "symbol": order.symbol,
        "side": order.side.as_str(),
        "orderType": if order.kind == OrderKind::Limit { "Limit" } else { "Market" },
        "qty": order.qty.to_string(),
        "orderLinkId": order.idempotency_key.as_str(),
    });
    if order.reduce_only {
        body["reduceOnly"] = json!(true);
    }
    if order.kind == OrderKind::Limit {
        if let Some(price) = order.price {
            body["price"] = json!(price.to_string());
        }
    }
    if order.kind == OrderKind::Stop {
        if let Some(trigger) = order.stop_price {
            body["triggerPrice"] = json!(trigger.to_string());
            // 1: triggers when price rises to trigger, 2: when it falls.
            body["triggerDirection"] = json!(match order.side {
                Side::Buy => 1,
                Side::Sell => 2,
            });
            body["triggerBy"] = json!("LastPrice");
        }
    }
    body
}

/// Order id from a create-order result.
pub(crate) fn ack_from_result(result: &Value, order: &OrderRequest) -> OrderAck {
    OrderAck {
        order_id: result
            .get("orderId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        idempotency_key: order.idempotency_key.clone(),
        status: ExecutionStatus::Accepted,
    }
}

pub(crate) fn accepted_event(ack: &OrderAck, order: &OrderRequest) -> ExecutionEvent {
    ExecutionEvent {
        mode: None,
        status: ExecutionStatus::Accepted,
        order_id: ack.order_id.clone(),
        symbol: order.symbol.clone(),
        side: order.side,
        qty: order.qty,
        price: order.stop_price.or(order.price),
        idempotency_key: Some(order.idempotency_key.clone()),
    }
}

fn dec_field(v: &Value, key: &str) -> Option<Decimal> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Decimal::from_str(s).ok(),
        Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
        _ => None,
    }
}

fn str_field<'a>(v: &'a Value, key: &str) -> &'a str {
    v.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn list(result: &Value) -> &[Value] {
    result
        .get("list")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn parse_positions(result: &Value) -> Vec<Position> {
    list(result)
        .iter()
        .filter_map(|p| {
            let qty = dec_field(p, "size").filter(|q| !q.is_zero())?;
            let side = str_field(p, "side");
            if side.is_empty() {
                return None;
            }
            Some(Position {
                symbol: str_field(p, "symbol").to_string(),
                side: Side::from_venue(side),
                qty: Size::new(qty),
                entry_price: Price::new(dec_field(p, "avgPrice").unwrap_or_default()),
            })
        })
        .collect()
}

fn parse_open_orders(result: &Value) -> Vec<OpenOrder> {
    list(result)
        .iter()
        .map(|o| {
            let trigger = dec_field(o, "triggerPrice")
                .filter(|d| !d.is_zero())
                .map(Price::new);
            let kind = if trigger.is_some() {
                OrderKind::Stop
            } else if str_field(o, "orderType") == "Limit" {
                OrderKind::Limit
            } else {
                OrderKind::Market
            };
            let link = str_field(o, "orderLinkId");
            OpenOrder {
                order_id: str_field(o, "orderId").to_string(),
                symbol: str_field(o, "symbol").to_string(),
                side: Side::from_venue(str_field(o, "side")),
                kind,
                qty: Size::new(dec_field(o, "qty").unwrap_or_default()),
                price: dec_field(o, "price").filter(|d| !d.is_zero()).map(Price::new),
                stop_price: trigger,
                reduce_only: o.get("reduceOnly").and_then(Value::as_bool).unwrap_or(false),
                idempotency_key: (!link.is_empty())
                    .then(|| IdempotencyKey::from_string(link.to_string())),
            }
        })
        .collect()
}

/// Execution backend over signed REST.
pub struct RestGateway {
    client: Arc<RestClient>,
    mode: TradingMode,
    events: broadcast::Sender<ExecutionEvent>,
}

impl RestGateway {
    pub fn new(client: Arc<RestClient>, mode: TradingMode) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            client,
            mode,
            events,
        }
    }

    pub fn client(&self) -> &Arc<RestClient> {
        &self.client
    }

    /// Create an order, emit its acceptance and return the ack.
    pub async fn create(&self, order: &OrderRequest) -> ExecutorResult<OrderAck> {
        let result = self
            .client
            .post_signed("/v5/order/create", &order_payload(order))
            .await?;
        let ack = ack_from_result(&result, order);
        info!(
            mode = %self.mode,
            symbol = %order.symbol,
            order_id = %ack.order_id,
            key = %order.idempotency_key,
            "REST order accepted"
        );
        self.publish(accepted_event(&ack, order));
        Ok(ack)
    }

    pub(crate) fn publish(&self, event: ExecutionEvent) {
        let _ = self.events.send(event);
    }

    pub async fn fetch_positions(&self) -> ExecutorResult<Vec<Position>> {
        let result = self
            .client
            .get_signed("/v5/position/list", "category=linear&settleCoin=USDT")
            .await?;
        Ok(parse_positions(&result))
    }

    pub async fn fetch_open_orders(&self) -> ExecutorResult<Vec<OpenOrder>> {
        let result = self
            .client
            .get_signed("/v5/order/realtime", "category=linear&settleCoin=USDT")
            .await?;
        Ok(parse_open_orders(&result))
    }

    pub async fn cancel(&self, symbol: &str, order_id: &str) -> ExecutorResult<()> {
        self.client
            .post_signed(
                "/v5/order/cancel",
                &json!({"category": "linear", "symbol": symbol, "orderId": order_id}),
            )
            .await?;
        Ok(())
    }

    /// Cancel everything, then optionally close positions with reduce-only
    /// market orders. Individual close failures are logged and skipped.
    pub async fn flatten(&self, close_positions: bool) -> ExecutorResult<EmergencyStopSummary> {
        let result = self
            .client
            .post_signed(
                "/v5/order/cancel-all",
                &json!({"category": "linear", "settleCoin": "USDT"}),
            )
            .await?;
        let mut summary = EmergencyStopSummary {
            cancelled_orders: list(&result).len(),
            closed_positions: 0,
        };

        if close_positions {
            let stamp = now_ms();
            for pos in self.fetch_positions().await? {
                let mut close = OrderRequest::market(
                    pos.symbol.clone(),
                    pos.side.opposite(),
                    pos.qty,
                    pos.entry_price,
                    IdempotencyKey::from_string(format!("es-{stamp}-{}", pos.symbol)),
                );
                close.reduce_only = true;
                match self.create(&close).await {
                    Ok(_) => summary.closed_positions += 1,
                    Err(e) => warn!(symbol = %pos.symbol, error = %e, "Emergency close failed"),
                }
            }
        }
        Ok(summary)
    }
}

impl ExecutionGateway for RestGateway {
    fn mode(&self) -> TradingMode {
        self.mode
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    fn place_order<'a>(
        &'a self,
        order: &'a OrderRequest,
        _price_hint: Price,
    ) -> BoxFuture<'a, ExecutorResult<OrderAck>> {
        Box::pin(self.create(order))
    }

    fn cancel_order<'a>(
        &'a self,
        symbol: &'a str,
        order_id: &'a str,
    ) -> BoxFuture<'a, ExecutorResult<()>> {
        Box::pin(self.cancel(symbol, order_id))
    }

    fn positions(&self) -> BoxFuture<'_, ExecutorResult<Vec<Position>>> {
        Box::pin(self.fetch_positions())
    }

    fn open_orders(&self) -> BoxFuture<'_, ExecutorResult<Vec<OpenOrder>>> {
        Box::pin(self.fetch_open_orders())
    }

    fn emergency_stop(
        &self,
        close_positions: bool,
    ) -> BoxFuture<'_, ExecutorResult<EmergencyStopSummary>> {
        Box::pin(self.flatten(close_positions))
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<ExecutionEvent>> {
        Some(self.events.subscribe())
    }
}
