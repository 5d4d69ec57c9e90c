//! Wire frames.
//!
//! ```text
//! {"type":"request",  "id":1, "method":"getStatus", "params":{}}
//! {"type":"response", "id":1, "ok":true,  "result":{...}}
//! {"type":"response", "id":1, "ok":false, "error":{"code":"RPC_ERROR","message":"..."}}
//! {"type":"event",    "topic":"rangeMetrics", "payload":{...}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CODE_BAD_JSON: &str = "BAD_JSON";
pub const CODE_RPC_ERROR: &str = "RPC_ERROR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl RpcErrorBody {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    Request {
        id: Value,
        method: String,
        #[serde(default)]
        params: Value,
    },
    Response {
        id: Value,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<RpcErrorBody>,
    },
    Event {
        topic: String,
        payload: Value,
    },
}

impl Frame {
    pub fn request(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self::Request {
            id: Value::from(id),
            method: method.into(),
            params,
        }
    }

    pub fn ok(id: Value, result: Value) -> Self {
        Self::Response {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(id: Value, error: RpcErrorBody) -> Self {
        Self::Response {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn event(topic: impl Into<String>, payload: Value) -> Self {
        Self::Event {
            topic: topic.into(),
            payload,
        }
    }

    pub fn to_text(&self) -> String {
        // Frames hold only JSON values and strings.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// What the server should do with one inbound text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request {
        id: Value,
        method: String,
        params: Value,
    },
    /// Unparseable; answer with `BAD_JSON` and a null id.
    BadJson,
    /// Valid JSON that is not a request.
    Ignored,
}

pub fn classify_inbound(text: &str) -> Inbound {
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Inbound::BadJson;
    };
    if value.get("type").and_then(Value::as_str) != Some("request") {
        return Inbound::Ignored;
    }
    match serde_json::from_value::<Frame>(value) {
        Ok(Frame::Request { id, method, params }) => Inbound::Request {
            id,
            method,
            params: if params.is_null() {
                Value::Object(Default::default())
            } else {
                params
            },
        },
        _ => Inbound::BadJson,
    }
}
