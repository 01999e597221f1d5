//! Blocking client facade.
//!
//! [`SyncClient`] gives synchronous semantics on top of the async engine
//! without risking a deadlock against a caller-owned runtime. The execution
//! mode is selected once, at construction:
//!
//! - **direct** - no async runtime was running when the client was created.
//!   The client owns a current-thread runtime and drives it to completion
//!   for each blocking call. A nesting guard rejects calls made from inside
//!   an async context with [`WsRpcError::AmbiguousEnvironment`] instead of
//!   deadlocking.
//! - **threaded** - an ambient runtime was already running. The client hosts
//!   a private runtime on a dedicated background thread and every blocking
//!   operation is spawned there, with the calling thread parked on a channel
//!   until the result arrives. The engine's mutable state lives entirely on
//!   that thread; cross-thread safety comes from isolation, not locking.

use std::future::Future;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tokio::runtime::{Builder, Handle, Runtime};

use crate::client::{BatchEntry, Client, ClientConfig};
use crate::error::{Result, WsRpcError};
use crate::protocol::BatchReply;

/// Default response timeout for blocking requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Blocking JSON-RPC client over a persistent WebSocket connection.
pub struct SyncClient {
    client: Client,
    mode: Mode,
}

enum Mode {
    /// The client owns this runtime and drives it per call.
    Direct(Runtime),
    /// A private runtime on a dedicated background thread.
    Threaded(BackgroundRuntime),
}

struct BackgroundRuntime {
    handle: Handle,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl BackgroundRuntime {
    fn spawn() -> Result<Self> {
        let (handle_tx, handle_rx) = mpsc::channel::<std::io::Result<Handle>>();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("wsrpc-sync".to_string())
            .spawn(move || {
                let runtime = match Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e));
                        return;
                    }
                };
                let _ = handle_tx.send(Ok(runtime.handle().clone()));
                // Park here driving the runtime until the client is dropped.
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })?;

        let handle = handle_rx
            .recv()
            .map_err(|_| {
                WsRpcError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "sync bridge thread exited during startup",
                ))
            })??;

        Ok(Self {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl SyncClient {
    /// Create a blocking client for the given address.
    ///
    /// The execution mode is fixed here: threaded when called from inside a
    /// running async runtime, direct otherwise.
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, ClientConfig::default())
    }

    /// Create a blocking client with explicit configuration.
    pub fn with_config(url: &str, config: ClientConfig) -> Result<Self> {
        let mode = if Handle::try_current().is_ok() {
            Mode::Threaded(BackgroundRuntime::spawn()?)
        } else {
            Mode::Direct(Builder::new_current_thread().enable_all().build()?)
        };

        Ok(Self {
            client: Client::with_config(url, config),
            mode,
        })
    }

    /// The normalized address of the remote peer.
    pub fn url(&self) -> &str {
        self.client.url()
    }

    /// Whether the underlying transport is currently open.
    pub fn connected(&self) -> bool {
        self.client.connected()
    }

    /// Establish the connection. Idempotent.
    pub fn connect(&self) -> Result<()> {
        let client = self.client.clone();
        self.run(async move { client.connect().await })
    }

    /// Close the connection. Idempotent.
    pub fn disconnect(&self) -> Result<()> {
        let client = self.client.clone();
        self.run(async move { client.disconnect().await })
    }

    /// Invoke a remote method without expecting a response.
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let client = self.client.clone();
        let method = method.to_string();
        self.run(async move { client.notify(&method, params).await })
    }

    /// Invoke a remote method and block for its response, at most
    /// [`DEFAULT_REQUEST_TIMEOUT`] long.
    pub fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Invoke a remote method and block for its response.
    pub fn request_with_timeout(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let client = self.client.clone();
        let method = method.to_string();
        self.run(async move { client.request_with_timeout(&method, params, timeout).await })
    }

    /// Send a batch and block for its replies, at most
    /// [`DEFAULT_REQUEST_TIMEOUT`] long.
    pub fn batch_request(&self, entries: Vec<BatchEntry>) -> Result<Vec<BatchReply>> {
        self.batch_request_with_timeout(entries, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Send a batch and block for its replies.
    pub fn batch_request_with_timeout(
        &self,
        entries: Vec<BatchEntry>,
        timeout: Duration,
    ) -> Result<Vec<BatchReply>> {
        let client = self.client.clone();
        self.run(async move { client.batch_request_with_timeout(entries, timeout).await })
    }

    fn run<T, F>(&self, future: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        match &self.mode {
            Mode::Direct(runtime) => {
                // Nesting guard: block_on from inside an async context would
                // deadlock or panic; fail fast instead.
                if Handle::try_current().is_ok() {
                    return Err(WsRpcError::AmbiguousEnvironment);
                }
                runtime.block_on(future)
            }
            Mode::Threaded(background) => {
                let (tx, rx) = mpsc::channel();
                background.handle.spawn(async move {
                    let _ = tx.send(future.await);
                });
                rx.recv().map_err(|_| {
                    WsRpcError::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "sync bridge runtime terminated",
                    ))
                })?
            }
        }
    }
}
