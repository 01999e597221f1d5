//! # wsrpc-client
//!
//! Async and blocking JSON-RPC 2.0 client over a persistent WebSocket
//! connection, extended with progress reporting and cooperative
//! cancellation.
//!
//! ## Architecture
//!
//! - **Demultiplexer**: one read loop per connection fans decoded inbound
//!   frames out to pending calls (first-match correlation) and progress
//!   callbacks (continuous subscriptions).
//! - **Correlator**: per-client monotonically increasing ids; completion
//!   slots registered before the request is sent; exactly one terminal
//!   settlement per call.
//! - **Cancellation**: local settlement first, best-effort `cancel`
//!   notification to the peer second.
//! - **Sync bridge**: [`SyncClient`] hosts the engine on an owned or
//!   dedicated-thread runtime so blocking callers never deadlock a
//!   caller-owned scheduler.
//!
//! ## Example
//!
//! ```ignore
//! use wsrpc_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> wsrpc_client::Result<()> {
//!     let client = Client::new("localhost:8200");
//!     let result = client.request("double", Some(serde_json::json!([2]))).await?;
//!     assert_eq!(result, serde_json::json!(4));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod protocol;
pub mod transport;

mod call;
mod client;
mod demux;
mod sync;

pub use call::CallHandle;
pub use client::{BatchEntry, Client, ClientConfig};
pub use error::{Result, WsRpcError};
pub use protocol::{BatchReply, ErrorObject, ProgressEvent};
pub use sync::{SyncClient, DEFAULT_REQUEST_TIMEOUT};
