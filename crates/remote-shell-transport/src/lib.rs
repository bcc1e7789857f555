//! Transport layer for remote shell clients.
//!
//! Provides:
//! - Wire protocol (JSON, tagged by `type`, correlated by `request_id`)
//! - Dispatch of client messages onto a `ShellEngine`
//! - WebSocket transport (feature: websocket)

pub mod dispatch;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use dispatch::dispatch;
pub use protocol::{ClientMessage, ClientRequest, ServerMessage, ServerReply, TransportError};
