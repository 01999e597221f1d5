//! Async client: connection lifecycle, request correlation, cancellation.
//!
//! The [`Client`] owns one lazily established WebSocket connection, a
//! per-instance id counter, and the demultiplexer fanning inbound frames out
//! to pending calls. Issue order for every tracked call is fixed: normalize
//! params, allocate the id, register the completion slot and its first-match
//! filter, *then* send - a response can never race past the bookkeeping.
//!
//! # Example
//!
//! ```ignore
//! use wsrpc_client::Client;
//!
//! # async fn run() -> wsrpc_client::Result<()> {
//! let client = Client::new("localhost:8200");
//! let doubled = client.request("double", Some(serde_json::json!([2]))).await?;
//! assert_eq!(doubled, serde_json::json!(4));
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::call::{CallHandle, CompletionSlot};
use crate::demux::{lock, Demux, FirstMatch};
use crate::error::{map_ws_error, Result, WsRpcError};
use crate::protocol::inbound;
use crate::protocol::{BatchReply, ProgressEvent, WireRequest, CANCEL_METHOD};
use crate::transport::{establish, normalize_ws_url, WsSink};

type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync + 'static>;

/// Configuration for [`Client`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// WebSocket subprotocol offered during the handshake, if any.
    pub subprotocol: Option<String>,
}

/// One entry of an outbound batch request.
#[derive(Debug, Clone)]
pub struct BatchEntry {
    method: String,
    params: Option<Value>,
}

impl BatchEntry {
    /// Describe one method invocation to include in a batch.
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Async JSON-RPC client over a persistent WebSocket connection.
///
/// Cheap to clone; clones share the connection, the id counter and all
/// pending-call state.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    url: String,
    config: ClientConfig,
    next_id: AtomicU64,
    connection: StdMutex<Option<Arc<Connection>>>,
    /// Serializes establishment so concurrent connect callers produce at
    /// most one transport.
    connect_gate: AsyncMutex<()>,
}

struct Connection {
    sink: AsyncMutex<WsSink>,
    demux: Arc<Demux>,
    open: Arc<AtomicBool>,
}

impl Connection {
    async fn establish(url: &str, config: &ClientConfig) -> Result<Arc<Self>> {
        let stream = establish(url, config.subprotocol.as_deref()).await?;
        let (sink, source) = stream.split();

        let demux = Demux::new();
        let open = Arc::new(AtomicBool::new(true));

        let connection = Arc::new(Self {
            sink: AsyncMutex::new(sink),
            demux: demux.clone(),
            open: open.clone(),
        });

        // The one read loop for this connection, shared by all subscribers.
        tokio::spawn(async move {
            demux.pump(source).await;
            open.store(false, Ordering::Release);
            tracing::debug!("read loop finished, connection marked closed");
        });

        Ok(connection)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::text(text)).await.map_err(map_ws_error)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::Release);
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!("close handshake failed: {e}");
        }
    }
}

impl Client {
    /// Create a client for the given address. The address is normalized to a
    /// WebSocket URL; no connection is established until the first operation
    /// that needs one.
    pub fn new(url: &str) -> Self {
        Self::with_config(url, ClientConfig::default())
    }

    /// Create a client with explicit configuration.
    pub fn with_config(url: &str, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                url: normalize_ws_url(url),
                config,
                next_id: AtomicU64::new(0),
                connection: StdMutex::new(None),
                connect_gate: AsyncMutex::new(()),
            }),
        }
    }

    /// The normalized address of the remote peer.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether the underlying transport is currently open.
    pub fn connected(&self) -> bool {
        self.inner
            .current_connection()
            .is_some_and(|c| c.is_open())
    }

    /// Establish the connection. Idempotent: a no-op when already connected.
    pub async fn connect(&self) -> Result<()> {
        self.inner.ensure_connected().await.map(|_| ())
    }

    /// Close the connection. Idempotent: a no-op when not connected.
    ///
    /// Calls still pending settle as connection-lost once the read loop
    /// observes stream end.
    pub async fn disconnect(&self) -> Result<()> {
        let connection = lock(&self.inner.connection).take();
        if let Some(connection) = connection {
            if connection.is_open() {
                connection.close().await;
            }
        }
        Ok(())
    }

    /// Invoke a remote method without expecting a response.
    ///
    /// "Sent" is the only success signal; nothing is tracked.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let connection = self.inner.ensure_connected().await?;
        let text = WireRequest::notification(method, params).to_json()?;
        connection.send_text(text).await
    }

    /// Invoke a remote method and wait for its response.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.call(method, params).await?.wait().await
    }

    /// Invoke a remote method, waiting at most `timeout` for the response.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        self.call(method, params).await?.wait_timeout(timeout).await
    }

    /// Invoke a remote method and return a handle to the in-flight call.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<CallHandle> {
        self.issue(method, params, None).await
    }

    /// Invoke a remote method, routing matching `progress` notifications to
    /// `on_progress` until the call settles.
    pub async fn call_with_progress<F>(
        &self,
        method: &str,
        params: Option<Value>,
        on_progress: F,
    ) -> Result<CallHandle>
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.issue(method, params, Some(Box::new(on_progress))).await
    }

    /// Send several requests in one frame and return a handle resolving to
    /// per-item replies in peer response order.
    ///
    /// Rejects an empty batch with [`WsRpcError::Validation`].
    pub async fn batch(&self, entries: Vec<BatchEntry>) -> Result<CallHandle<Vec<BatchReply>>> {
        if entries.is_empty() {
            return Err(WsRpcError::Validation(
                "empty batch request not allowed".to_string(),
            ));
        }

        let connection = self.inner.ensure_connected().await?;

        let mut requests = Vec::with_capacity(entries.len());
        let mut ids = Vec::with_capacity(entries.len());
        for entry in entries {
            let id = self.inner.next_id();
            ids.push(id);
            requests.push(WireRequest::call(id, &entry.method, entry.params));
        }
        let text = WireRequest::batch_to_json(&requests)?;

        let (slot, receiver) = CompletionSlot::new();
        let deliver_slot = slot.clone();
        let match_ids = ids.clone();
        let subscription = connection.demux.subscribe_first_match(
            move |value| inbound::is_batch_for(value, &match_ids),
            move |matched| {
                let outcome = match matched {
                    FirstMatch::Frame(value) => inbound::parse_batch(value),
                    FirstMatch::StreamEnd => Err(WsRpcError::ConnectionLost),
                };
                deliver_slot.settle(outcome);
            },
        );
        slot.attach(subscription);

        connection.send_text(text).await?;
        Ok(CallHandle::new(ids, slot, receiver, self.inner.clone()))
    }

    /// Send a batch and wait for its replies.
    pub async fn batch_request(&self, entries: Vec<BatchEntry>) -> Result<Vec<BatchReply>> {
        self.batch(entries).await?.wait().await
    }

    /// Send a batch, waiting at most `timeout` for the replies.
    pub async fn batch_request_with_timeout(
        &self,
        entries: Vec<BatchEntry>,
        timeout: Duration,
    ) -> Result<Vec<BatchReply>> {
        self.batch(entries).await?.wait_timeout(timeout).await
    }

    async fn issue(
        &self,
        method: &str,
        params: Option<Value>,
        on_progress: Option<ProgressCallback>,
    ) -> Result<CallHandle> {
        let connection = self.inner.ensure_connected().await?;

        let id = self.inner.next_id();
        let text = WireRequest::call(id, method, params).to_json()?;

        let (slot, receiver) = CompletionSlot::new();

        let deliver_slot = slot.clone();
        let subscription = connection.demux.subscribe_first_match(
            move |value| inbound::is_response_for(value, id),
            move |matched| {
                let outcome = match matched {
                    FirstMatch::Frame(value) => inbound::parse_response(value),
                    FirstMatch::StreamEnd => Err(WsRpcError::ConnectionLost),
                };
                deliver_slot.settle(outcome);
            },
        );
        slot.attach(subscription);

        if let Some(callback) = on_progress {
            let subscription = connection.demux.subscribe_each(
                move |value| inbound::is_progress_for(value, id),
                move |value| {
                    if let Some(event) = inbound::parse_progress(value) {
                        callback(event);
                    }
                },
            );
            slot.attach(subscription);
        }

        connection.send_text(text).await?;
        Ok(CallHandle::new(vec![id], slot, receiver, self.inner.clone()))
    }
}

impl ClientInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn current_connection(&self) -> Option<Arc<Connection>> {
        lock(&self.connection).clone()
    }

    async fn ensure_connected(&self) -> Result<Arc<Connection>> {
        if let Some(connection) = self.current_connection() {
            if connection.is_open() {
                return Ok(connection);
            }
        }

        let _gate = self.connect_gate.lock().await;
        if let Some(connection) = self.current_connection() {
            if connection.is_open() {
                return Ok(connection);
            }
        }

        let connection = Connection::establish(&self.url, &self.config).await?;
        *lock(&self.connection) = Some(connection.clone());
        Ok(connection)
    }

    /// Cancellation bridge, wire side: best-effort `cancel` notification on
    /// the currently open connection. Never reconnects, never raises.
    pub(crate) async fn send_cancel(&self, id: u64) {
        let Some(connection) = self.current_connection() else {
            return;
        };
        if !connection.is_open() {
            return;
        }

        let notification = WireRequest::notification(CANCEL_METHOD, Some(json!({ "id": id })));
        match notification.to_json() {
            Ok(text) => {
                if let Err(e) = connection.send_text(text).await {
                    tracing::debug!(id, "cancel notification dropped: {e}");
                }
            }
            Err(e) => tracing::debug!(id, "cancel notification not serializable: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalized_on_construction() {
        assert_eq!(Client::new("localhost:8200").url(), "ws://localhost:8200");
        assert_eq!(Client::new("http://host").url(), "ws://host");
        assert_eq!(Client::new("https://host").url(), "wss://host");
    }

    #[test]
    fn test_ids_monotonic_from_zero() {
        let client = Client::new("localhost:8200");
        assert_eq!(client.inner.next_id(), 0);
        assert_eq!(client.inner.next_id(), 1);
        assert_eq!(client.inner.next_id(), 2);
    }

    #[test]
    fn test_clones_share_id_counter() {
        let client = Client::new("localhost:8200");
        let clone = client.clone();
        assert_eq!(client.inner.next_id(), 0);
        assert_eq!(clone.inner.next_id(), 1);
    }

    #[test]
    fn test_not_connected_initially() {
        let client = Client::new("localhost:8200");
        assert!(!client.connected());
    }

    #[tokio::test]
    async fn test_empty_batch_rejected_before_connecting() {
        // Unroutable address: validation must fail before any connect attempt.
        let client = Client::new("localhost:0");
        let result = client.batch(Vec::new()).await;
        assert!(matches!(result, Err(WsRpcError::Validation(_))));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let client = Client::new("localhost:8200");
        client.disconnect().await.unwrap();
        assert!(!client.connected());
    }
}
