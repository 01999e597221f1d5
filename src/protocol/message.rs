//! JSON-RPC 2.0 message types.
//!
//! Outbound messages are built through [`WireRequest`]; inbound responses are
//! decoded into [`WireResponse`]. Success vs failure of a response is decided
//! by the presence of an explicit `error` object, never by truthiness of the
//! `result` field - a legitimately falsy result (`0`, `""`, `false`) is a
//! success.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version sent with every outbound message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method name of the progress-reporting extension notification.
pub const PROGRESS_METHOD: &str = "progress";

/// Method name of the cancellation extension notification.
pub const CANCEL_METHOD: &str = "cancel";

/// An outbound JSON-RPC request or notification.
///
/// Notifications carry no `id` and expect no response. Batches are plain JSON
/// arrays of these, serialized with [`WireRequest::batch_to_json`].
#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    /// Always [`JSONRPC_VERSION`].
    pub jsonrpc: &'static str,
    /// Name of the remote method to invoke.
    pub method: String,
    /// Normalized parameters; omitted from the wire when `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Correlation id; omitted for notifications.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl WireRequest {
    /// Build a request with a correlation id.
    pub fn call(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params: normalize_params(params),
            id: Some(id),
        }
    }

    /// Build an id-less notification.
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.to_string(),
            params: normalize_params(params),
            id: None,
        }
    }

    /// Serialize this message to its wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Serialize a batch of requests into a single wire frame (a JSON array).
    pub fn batch_to_json(requests: &[WireRequest]) -> serde_json::Result<String> {
        serde_json::to_string(requests)
    }
}

/// Normalize user-supplied params before serialization.
///
/// Arrays and objects pass through unchanged. A bare scalar is wrapped into a
/// single-element array - a deliberate compatibility behavior some peers rely
/// on. `None` and JSON `null` both mean "no params" and the field is omitted.
pub(crate) fn normalize_params(params: Option<Value>) -> Option<Value> {
    match params {
        None | Some(Value::Null) => None,
        Some(value @ (Value::Array(_) | Value::Object(_))) => Some(value),
        Some(scalar) => Some(Value::Array(vec![scalar])),
    }
}

/// A peer-reported request failure, e.g. `-32601 Method not found`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {}", self.code, self.message)
    }
}

/// An inbound JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct WireResponse {
    /// Correlation id echoed by the peer.
    #[serde(default)]
    pub id: Option<Value>,
    /// Result payload; may legitimately be absent or `null`.
    #[serde(default)]
    pub result: Option<Value>,
    /// Error object; its presence alone marks the response as failed.
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

impl WireResponse {
    /// Split into the per-call outcome: `Err` iff an error object is present.
    pub fn into_outcome(self) -> Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// One entry of a resolved batch: per-item result or peer-reported error.
pub type BatchReply = Result<Value, ErrorObject>;

/// An out-of-band progress update for a long-running call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressEvent {
    /// Id of the request this update belongs to.
    pub id: u64,
    /// Description of the operation currently running.
    pub operation: String,
    /// Completion amount as reported by the peer.
    pub amount: f64,
}
