//! JSON-RPC 2.0 Types
//!
//! Envelope types for the invocation service. The service speaks plain
//! JSON-RPC 2.0 over HTTP POST; notifications are accepted and ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorData;

/// JSON-RPC version marker - always "2.0".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JsonRpcVersion;

impl Serialize for JsonRpcVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str("2.0")
    }
}

impl<'de> Deserialize<'de> for JsonRpcVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == "2.0" {
            Ok(JsonRpcVersion)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected JSON-RPC version '2.0', got '{}'",
                s
            )))
        }
    }
}

/// Request ID - a string or an integer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// An incoming message. Requests carry an id, notifications don't.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcMessage {
    pub jsonrpc: JsonRpcVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcMessage {
    /// Build a request with params.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: Some(id.into()),
            method: method.into(),
            params: Some(params),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A successful response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse<T = Value> {
    pub jsonrpc: JsonRpcVersion,
    pub id: RequestId,
    pub result: T,
}

impl<T> JsonRpcResponse<T> {
    pub fn success(id: impl Into<RequestId>, result: T) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id: id.into(),
            result,
        }
    }
}

/// An error response. `id` is null when the request could not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    pub jsonrpc: JsonRpcVersion,
    pub id: Option<RequestId>,
    pub error: ErrorData,
}

impl JsonRpcErrorResponse {
    pub fn new(id: Option<RequestId>, error: ErrorData) -> Self {
        Self {
            jsonrpc: JsonRpcVersion,
            id,
            error,
        }
    }
}

/// Either half of a reply, as seen by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcReply {
    Error(JsonRpcErrorResponse),
    Success(JsonRpcResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_rejects_other_values() {
        let bad = json!({"jsonrpc": "1.0", "id": 1, "method": "ping"});
        assert!(serde_json::from_value::<JsonRpcMessage>(bad).is_err());
    }

    #[test]
    fn request_without_id_is_notification() {
        let msg: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "ping"})).unwrap();
        assert!(msg.is_notification());
        assert!(msg.params.is_none());
    }

    #[test]
    fn request_id_accepts_strings_and_numbers() {
        let n: RequestId = serde_json::from_str("7").unwrap();
        let s: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(n, RequestId::Number(7));
        assert_eq!(s.to_string(), "abc");
    }

    #[test]
    fn reply_distinguishes_error_from_success() {
        let err: JsonRpcReply = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap();
        assert!(matches!(err, JsonRpcReply::Error(_)));

        let ok: JsonRpcReply = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"status": "ok"}
        }))
        .unwrap();
        match ok {
            JsonRpcReply::Success(resp) => assert_eq!(resp.result["status"], "ok"),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn parse_failure_reply_has_null_id() {
        let resp = JsonRpcErrorResponse::new(None, ErrorData::parse_error("bad json"));
        let v = serde_json::to_value(&resp).unwrap();
        assert!(v["id"].is_null());
        assert_eq!(v["error"]["code"], -32700);
    }
}
