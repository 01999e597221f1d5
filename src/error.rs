//! Error types for wsrpc-client.

use thiserror::Error;

use crate::protocol::ErrorObject;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum WsRpcError {
    /// I/O error (runtime construction, background thread spawn).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport error.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Peer reported a failure for this request.
    #[error("request failed: {0}")]
    Request(ErrorObject),

    /// No response arrived within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection dropped while the call was pending.
    #[error("connection lost")]
    ConnectionLost,

    /// The call was cancelled locally.
    #[error("request cancelled")]
    Cancelled,

    /// A blocking call was made from inside an async context.
    #[error("blocking call invoked from inside an async context")]
    AmbiguousEnvironment,

    /// The request was rejected before being sent (e.g. empty batch).
    #[error("invalid request: {0}")]
    Validation(String),
}

/// Result type alias using WsRpcError.
pub type Result<T> = std::result::Result<T, WsRpcError>;

/// Collapse "already closed" transport errors into [`WsRpcError::ConnectionLost`].
///
/// Sending on a closed socket is a lifecycle event for the pending call, not
/// a transport fault.
pub(crate) fn map_ws_error(e: tokio_tungstenite::tungstenite::Error) -> WsRpcError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => WsRpcError::ConnectionLost,
        other => WsRpcError::Transport(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_error_display() {
        let err = WsRpcError::Request(ErrorObject {
            code: -32601,
            message: "Method not found".to_string(),
        });
        let text = err.to_string();
        assert!(text.contains("-32601"));
        assert!(text.contains("Method not found"));
    }

    #[test]
    fn test_closed_transport_maps_to_connection_lost() {
        use tokio_tungstenite::tungstenite::Error as WsError;

        assert!(matches!(
            map_ws_error(WsError::ConnectionClosed),
            WsRpcError::ConnectionLost
        ));
        assert!(matches!(
            map_ws_error(WsError::AlreadyClosed),
            WsRpcError::ConnectionLost
        ));
    }
}
