//! Wire types for JSON-RPC 2.0, shared by the transport and the dispatcher.
//!
//! Requests are decoded from POST bodies; responses are encoded once, as
//! single-line frames, and pushed through the owning session's SSE channel.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Standard JSON-RPC 2.0 error codes plus the application codes this server uses.
pub mod code {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON is not a valid request object, or the session id is missing/unknown.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal error, disconnected client, send timeout, unknown tool, policy denial.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Client has not completed `initialize` on this session.
    pub const NOT_INITIALIZED: i32 = -32000;
}

/// A decoded request frame. `params` defaults to null for parameterless
/// methods; a missing `id` marks a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Version tag from the client; the transport rejects anything but "2.0".
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Whether the client declared the protocol version this server speaks.
    pub fn version_ok(&self) -> bool {
        self.jsonrpc == JsonRpcResponse::VERSION
    }

    /// Notifications carry no id and never get a response frame.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// An outbound response frame: exactly one of `result` or `error` is set,
/// and absent halves never appear on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// Error half of a response frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            result: Option<Value>,
            #[serde(default)]
            error: Option<JsonRpcError>,
            #[serde(default)]
            id: Option<Value>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: raw.result,
            error: raw.error,
            id: raw.id,
        })
    }
}

impl JsonRpcResponse {
    /// Protocol version constant.
    pub const VERSION: &'static str = "2.0";

    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError::new(code, message)),
            id,
        }
    }

    /// Serialize to a single-line JSON string suitable for an SSE data field.
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            // A response we built ourselves always serializes; keep the
            // fallback total anyway.
            r#"{"jsonrpc":"2.0","error":{"code":-32603,"message":"serialization failure"}}"#
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_decoding() {
        let request: JsonRpcRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"get_logs"}}"#,
        )
        .unwrap();

        assert!(request.version_ok());
        assert!(!request.is_notification());
        assert_eq!(request.method, "tools/call");
        assert_eq!(request.params["name"], "get_logs");
        assert_eq!(request.id, Some(json!(7)));
    }

    #[test]
    fn params_default_to_null() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(request.params.is_null());
    }

    #[test]
    fn missing_id_marks_a_notification() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(request.is_notification());
    }

    #[test]
    fn wrong_version_is_detected() {
        let request: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#).unwrap();
        assert!(!request.version_ok());
    }

    #[test]
    fn requests_without_a_method_do_not_decode() {
        assert!(serde_json::from_str::<JsonRpcRequest>(r#"{"jsonrpc":"2.0","id":1}"#).is_err());
        assert!(serde_json::from_str::<JsonRpcRequest>("[]").is_err());
    }

    #[test]
    fn frame_shape_success() {
        let frame = JsonRpcResponse::success(Some(json!("a")), json!({"ok": true})).to_frame();
        let decoded: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(
            decoded,
            json!({"jsonrpc": "2.0", "id": "a", "result": {"ok": true}})
        );
        assert!(decoded.get("error").is_none());
    }

    #[test]
    fn frame_shape_error() {
        let frame =
            JsonRpcResponse::error(Some(json!(2)), code::NOT_INITIALIZED, "Client not initialized")
                .to_frame();
        let decoded: Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(
            decoded,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "error": {"code": -32000, "message": "Client not initialized"}
            })
        );
        assert!(decoded.get("result").is_none());
    }

    #[test]
    fn frames_stay_on_one_line() {
        let frame = JsonRpcResponse::success(Some(json!(0)), json!({"text": "a\nb"})).to_frame();
        assert!(!frame.contains('\n'));
    }

    #[test]
    fn null_id_round_trips() {
        let frame = JsonRpcResponse::error(None, code::PARSE_ERROR, "Parse error").to_frame();
        let decoded: Value = serde_json::from_str(&frame).unwrap();
        assert!(decoded.get("id").is_none());
    }
}
