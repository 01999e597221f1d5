//! Protocol module - JSON-RPC 2.0 message types and inbound classification.
//!
//! This module covers both directions of the wire protocol:
//!
//! - [`WireRequest`] - outbound requests, notifications and batches
//! - [`WireResponse`] / [`ErrorObject`] - inbound responses
//! - [`inbound`] - predicates matching inbound frames to pending calls
//!
//! One JSON document per transport frame. The protocol carries two
//! extensions on top of plain JSON-RPC 2.0: `progress` notifications
//! reporting partial completion of a long-running call, and `cancel`
//! notifications requesting best-effort abort of server-side work.

mod message;

pub(crate) mod inbound;

pub use message::{
    BatchReply, ErrorObject, ProgressEvent, WireRequest, WireResponse, CANCEL_METHOD,
    JSONRPC_VERSION, PROGRESS_METHOD,
};
