//! Core building blocks for remote shell sessions.
//!
//! This crate provides:
//! - Identifiers (`ShellId`, `CommandId`, `BackendHandle`, `SessionKind`)
//! - The command/signal vocabulary and receive result types
//! - The wire codec (base64 framing and chunked compression)
//! - The backend gateway traits and `PluginRequest`

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod request;
pub mod state;
pub mod traits;

pub use config::EngineConfig;
pub use context::ShellDeclaration;
pub use error::{BackendError, ErrorKind, ShellError};
pub use ids::{BackendHandle, CommandId, SessionKind, ShellId};
pub use request::PluginRequest;
pub use state::{BackendOutput, CommandLine, CommandState, ReceiveResult, SignalCode, StreamChunk};
pub use traits::{Backend, CompletionSink};
