//! WebSocket connection setup.

use futures::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{map_ws_error, Result, WsRpcError};

/// The established duplex WebSocket connection.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half after splitting.
pub type WsSink = SplitSink<WsStream, Message>;

/// Read half after splitting.
pub type WsSource = SplitStream<WsStream>;

const WS: &str = "ws://";
const WSS: &str = "wss://";
const HTTP: &str = "http://";
const HTTPS: &str = "https://";

/// Rewrite an address to a WebSocket URL.
///
/// `http(s)://` becomes `ws(s)://`; a bare `host:port` defaults to `ws://`.
/// Addresses already carrying a WebSocket scheme pass through unchanged.
pub fn normalize_ws_url(url: &str) -> String {
    if url.starts_with(WS) || url.starts_with(WSS) {
        url.to_string()
    } else if let Some(rest) = url.strip_prefix(HTTP) {
        format!("{WS}{rest}")
    } else if let Some(rest) = url.strip_prefix(HTTPS) {
        format!("{WSS}{rest}")
    } else {
        format!("{WS}{url}")
    }
}

/// Open a WebSocket connection to `url`, optionally offering a subprotocol.
pub async fn establish(url: &str, subprotocol: Option<&str>) -> Result<WsStream> {
    let parsed =
        Url::parse(url).map_err(|e| WsRpcError::Validation(format!("invalid URL {url:?}: {e}")))?;

    let mut request = parsed.as_str().into_client_request()?;
    if let Some(protocol) = subprotocol {
        let value = HeaderValue::from_str(protocol).map_err(|_| {
            WsRpcError::Validation(format!("invalid subprotocol {protocol:?}"))
        })?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    let (stream, _response) = connect_async(request).await.map_err(map_ws_error)?;
    tracing::debug!(%url, "websocket connection established");
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_urls_pass_through() {
        assert_eq!(normalize_ws_url("ws://host:8200"), "ws://host:8200");
        assert_eq!(normalize_ws_url("wss://host:8200"), "wss://host:8200");
    }

    #[test]
    fn test_http_rewritten_to_ws() {
        assert_eq!(normalize_ws_url("http://host:8200"), "ws://host:8200");
        assert_eq!(normalize_ws_url("https://host:8200"), "wss://host:8200");
    }

    #[test]
    fn test_bare_address_defaults_to_ws() {
        assert_eq!(normalize_ws_url("host:8200"), "ws://host:8200");
        assert_eq!(normalize_ws_url("localhost"), "ws://localhost");
    }

    #[tokio::test]
    async fn test_establish_rejects_invalid_url() {
        let result = establish("ws://", None).await;
        assert!(matches!(result, Err(WsRpcError::Validation(_))));
    }
}
