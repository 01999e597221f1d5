//! Inbound-frame classification.
//!
//! Predicates in this module decide which pending call (if any) a decoded
//! inbound frame belongs to. They run synchronously inside the read loop and
//! must stay cheap: matching is by correlation id only, full decoding happens
//! once a frame has matched.

use serde_json::Value;

use crate::error::{Result, WsRpcError};
use crate::protocol::{BatchReply, ProgressEvent, WireResponse, PROGRESS_METHOD};

/// True if `value` is the response to the request with the given id.
pub(crate) fn is_response_for(value: &Value, id: u64) -> bool {
    value.get("id").and_then(Value::as_u64) == Some(id)
}

/// True if `value` is a batch response whose id set is exactly `ids`.
pub(crate) fn is_batch_for(value: &Value, ids: &[u64]) -> bool {
    let Some(items) = value.as_array() else {
        return false;
    };
    if items.len() != ids.len() {
        return false;
    }

    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        match item.get("id").and_then(Value::as_u64) {
            Some(id) => seen.push(id),
            None => return false,
        }
    }
    seen.sort_unstable();

    let mut expected = ids.to_vec();
    expected.sort_unstable();

    seen == expected
}

/// True if `value` is a progress notification targeting the given request id.
pub(crate) fn is_progress_for(value: &Value, id: u64) -> bool {
    value.get("method").and_then(Value::as_str) == Some(PROGRESS_METHOD)
        && value
            .get("params")
            .and_then(|params| params.get("id"))
            .and_then(Value::as_u64)
            == Some(id)
}

/// Decode a matched progress notification into a [`ProgressEvent`].
///
/// Returns `None` when the params do not carry the expected shape; such
/// frames are dropped, consistent with the demultiplexer's treatment of
/// malformed input.
pub(crate) fn parse_progress(value: &Value) -> Option<ProgressEvent> {
    let params = value.get("params")?;
    serde_json::from_value(params.clone()).ok()
}

/// Decode a matched single response into the call outcome.
pub(crate) fn parse_response(value: Value) -> Result<Value> {
    let response: WireResponse = serde_json::from_value(value)?;
    response.into_outcome().map_err(WsRpcError::Request)
}

/// Decode a matched batch response into per-item replies, in peer order.
pub(crate) fn parse_batch(value: Value) -> Result<Vec<BatchReply>> {
    let items: Vec<WireResponse> = serde_json::from_value(value)?;
    Ok(items.into_iter().map(WireResponse::into_outcome).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_response_match_by_id() {
        let response = json!({"jsonrpc": "2.0", "result": 4, "id": 3});
        assert!(is_response_for(&response, 3));
        assert!(!is_response_for(&response, 4));
    }

    #[test]
    fn test_notification_never_matches_response() {
        let notification = json!({"jsonrpc": "2.0", "method": "progress", "params": {"id": 3}});
        assert!(!is_response_for(&notification, 3));
    }

    #[test]
    fn test_batch_match_exact_id_set() {
        let batch = json!([
            {"jsonrpc": "2.0", "result": 8, "id": 2},
            {"jsonrpc": "2.0", "result": 4, "id": 1},
        ]);

        // Order of the peer's array does not matter, the id set does.
        assert!(is_batch_for(&batch, &[1, 2]));
        assert!(is_batch_for(&batch, &[2, 1]));
        assert!(!is_batch_for(&batch, &[1, 2, 3]));
        assert!(!is_batch_for(&batch, &[1, 3]));
        assert!(!is_batch_for(&batch, &[1]));
    }

    #[test]
    fn test_batch_match_rejects_non_arrays_and_idless_items() {
        assert!(!is_batch_for(&json!({"id": 1}), &[1]));
        assert!(!is_batch_for(&json!([{"jsonrpc": "2.0", "result": 1}]), &[1]));
    }

    #[test]
    fn test_progress_match() {
        let progress = json!({
            "jsonrpc": "2.0",
            "method": "progress",
            "params": {"id": 7, "operation": "loading", "amount": 0.5}
        });

        assert!(is_progress_for(&progress, 7));
        assert!(!is_progress_for(&progress, 8));

        let other = json!({"jsonrpc": "2.0", "method": "other", "params": {"id": 7}});
        assert!(!is_progress_for(&other, 7));
    }

    #[test]
    fn test_parse_progress() {
        let progress = json!({
            "jsonrpc": "2.0",
            "method": "progress",
            "params": {"id": 7, "operation": "loading", "amount": 0.25}
        });

        let event = parse_progress(&progress).unwrap();
        assert_eq!(event.operation, "loading");
        assert_eq!(event.amount, 0.25);

        let malformed = json!({"method": "progress", "params": {"id": 7}});
        assert!(parse_progress(&malformed).is_none());
    }

    #[test]
    fn test_parse_response_outcomes() {
        let ok = parse_response(json!({"jsonrpc": "2.0", "result": 4, "id": 1})).unwrap();
        assert_eq!(ok, json!(4));

        let err = parse_response(json!({
            "jsonrpc": "2.0",
            "error": {"code": -32601, "message": "Method not found"},
            "id": 1
        }))
        .unwrap_err();
        assert!(matches!(err, WsRpcError::Request(e) if e.code == -32601));
    }

    #[test]
    fn test_parse_batch_keeps_peer_order() {
        let replies = parse_batch(json!([
            {"jsonrpc": "2.0", "result": 8, "id": 2},
            {"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": 1},
        ]))
        .unwrap();

        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], Ok(json!(8)));
        assert_eq!(replies[1].as_ref().unwrap_err().code, -32601);
    }
}
