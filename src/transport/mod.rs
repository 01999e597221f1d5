//! Transport module - WebSocket establishment and address normalization.
//!
//! The engine consumes the transport through a narrow surface: connect,
//! split into sink/stream halves, send, and iterate received frames.
//! Everything WebSocket-specific lives behind this module.

mod ws;

pub use ws::{establish, normalize_ws_url, WsSink, WsSource, WsStream};
