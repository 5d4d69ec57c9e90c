//! Stream wire messages.
//!
//! Outbound control frames are `{op, args}` objects. Inbound frames are
//! either topic data (`{topic, data, ts?}`) or operation responses
//! (`{op, success?, retCode?, retMsg?/ret_msg?, reqId?}`).

use serde::Serialize;
use serde_json::Value;

use crate::error::{WsError, WsResult};

/// Outbound control frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ControlFrame {
    pub op: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ControlFrame {
    pub fn subscribe(topics: Vec<String>) -> Self {
        Self {
            op: "subscribe",
            args: topics,
        }
    }

    pub fn unsubscribe(topics: Vec<String>) -> Self {
        Self {
            op: "unsubscribe",
            args: topics,
        }
    }

    pub fn ping() -> Self {
        Self {
            op: "ping",
            args: Vec::new(),
        }
    }

    pub fn to_text(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Acknowledgement or result of an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OpResponse {
    pub op: String,
    pub success: Option<bool>,
    pub ret_code: Option<i64>,
    pub ret_msg: Option<String>,
    pub req_id: Option<String>,
    pub data: Value,
}

impl OpResponse {
    /// Positive acknowledgement: explicit `success` wins, else `retCode == 0`.
    pub fn is_success(&self) -> bool {
        match (self.success, self.ret_code) {
            (Some(flag), _) => flag,
            (None, Some(code)) => code == 0,
            (None, None) => false,
        }
    }

    /// Heartbeat replies are consumed by the channel and never forwarded.
    pub fn is_heartbeat(&self) -> bool {
        matches!(self.op.as_str(), "ping" | "pong")
    }
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// Topic data push.
    Data {
        topic: String,
        data: Value,
        ts: Option<i64>,
    },
    /// Response to an `op` request.
    Op(OpResponse),
    /// Valid JSON that matched neither shape.
    Other(Value),
}

impl StreamMessage {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> WsResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(WsError::ParseError(format!(
                "expected JSON object, got {}",
                type_name(&value)
            )));
        }
        Ok(Self::classify(value))
    }

    fn classify(mut value: Value) -> Self {
        if let Some(topic) = value.get("topic").and_then(Value::as_str).map(str::to_string) {
            let ts = value.get("ts").and_then(Value::as_i64);
            let data = value.get_mut("data").map(Value::take).unwrap_or(Value::Null);
            return Self::Data { topic, data, ts };
        }

        if let Some(op) = value.get("op").and_then(Value::as_str).map(str::to_string) {
            let ret_msg = value
                .get("retMsg")
                .or_else(|| value.get("ret_msg"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let req_id = value.get("reqId").and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            return Self::Op(OpResponse {
                op,
                success: value.get("success").and_then(Value::as_bool),
                ret_code: value.get("retCode").and_then(Value::as_i64),
                ret_msg,
                req_id,
                data: value.get_mut("data").map(Value::take).unwrap_or(Value::Null),
            });
        }

        Self::Other(value)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_frames() {
        let sub = ControlFrame::subscribe(vec!["tickers.BTCUSDT".into()]);
        assert_eq!(
            sub.to_text().unwrap(),
            r#"{"op":"subscribe","args":["tickers.BTCUSDT"]}"#
        );
        assert_eq!(ControlFrame::ping().to_text().unwrap(), r#"{"op":"ping"}"#);
    }

    #[test]
    fn test_parse_topic_data() {
        let msg = StreamMessage::parse(
            r#"{"topic":"tickers.BTCUSDT","type":"snapshot","ts":1700000000000,"data":{"lastPrice":"30000"}}"#,
        )
        .unwrap();

        match msg {
            StreamMessage::Data { topic, data, ts } => {
                assert_eq!(topic, "tickers.BTCUSDT");
                assert_eq!(data["lastPrice"], "30000");
                assert_eq!(ts, Some(1_700_000_000_000));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_auth_ack() {
        let msg = StreamMessage::parse(r#"{"op":"auth","success":true,"ret_msg":"","conn_id":"x"}"#)
            .unwrap();
        let StreamMessage::Op(resp) = msg else {
            panic!("expected op response");
        };
        assert_eq!(resp.op, "auth");
        assert!(resp.is_success());
        assert!(!resp.is_heartbeat());
    }

    #[test]
    fn test_parse_order_response_with_ret_code() {
        let msg = StreamMessage::parse(
            r#"{"reqId":"rb-1","retCode":10001,"retMsg":"params error","op":"order.create","data":{}}"#,
        )
        .unwrap();
        let StreamMessage::Op(resp) = msg else {
            panic!("expected op response");
        };
        assert_eq!(resp.req_id.as_deref(), Some("rb-1"));
        assert!(!resp.is_success());
        assert_eq!(resp.ret_msg.as_deref(), Some("params error"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(StreamMessage::parse("not json").is_err());
        assert!(StreamMessage::parse("[1,2,3]").is_err());
    }

    #[test]
    fn test_pong_is_heartbeat() {
        let StreamMessage::Op(resp) =
            StreamMessage::parse(r#"{"success":true,"ret_msg":"pong","op":"ping"}"#).unwrap()
        else {
            panic!("expected op response");
        };
        assert!(resp.is_heartbeat());
    }
}
