//! Operator operation table served over RPC.

use std::sync::Arc;

use rangebot_engine::DecisionEngine;
use rangebot_rpc::{BoxFuture, RpcError, RpcHandler, RpcResult};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

pub struct BotService {
    engine: Arc<DecisionEngine>,
}

impl BotService {
    pub fn new(engine: Arc<DecisionEngine>) -> Self {
        Self { engine }
    }

    async fn dispatch(&self, method: &str, params: Value) -> RpcResult<Value> {
        let engine = &self.engine;
        match method {
            "ping" => Ok(json!({ "pong": true })),
            "getConfigSchema" => Ok(engine.config_schema()),
            "getConfig" => to_json(engine.config().get()),
            "setConfig" => match engine.set_config(&params).await {
                Ok(updated) => to_json(updated),
                Err(e) => {
                    warn!(error = %e, "setConfig rejected");
                    Err(handler_error(e))
                }
            },
            "botStart" => to_json(engine.start().await),
            "botStop" => to_json(engine.stop().await),
            "emergencyStop" => {
                let close_positions = params
                    .get("closePositions")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                info!(close_positions, "Emergency stop requested");
                to_json(engine.emergency_stop(close_positions).await)
            }
            "getStatus" => to_json(engine.status()),
            "getUniverse" => to_json(engine.universe()),
            "getCandidates" => to_json(engine.candidates()),
            "getDecisionExplain" => to_json(engine.explain()),
            "getAvailableSymbols" => to_json(engine.available_symbols().await.map_err(handler_error)?),
            "getMarketSnapshot" => {
                let symbol = params.get("symbol").and_then(Value::as_str);
                to_json(engine.market_snapshot(symbol))
            }
            "getPositions" => to_json(engine.positions().await.map_err(handler_error)?),
            "getOpenOrders" => to_json(engine.open_orders().await.map_err(handler_error)?),
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }
}

impl RpcHandler for BotService {
    fn call<'a>(&'a self, method: &'a str, params: Value) -> BoxFuture<'a, RpcResult<Value>> {
        Box::pin(self.dispatch(method, params))
    }
}

fn to_json<T: Serialize>(value: T) -> RpcResult<Value> {
    serde_json::to_value(value).map_err(|e| RpcError::Handler(format!("encode failed: {e}")))
}

fn handler_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::Handler(e.to_string())
}
