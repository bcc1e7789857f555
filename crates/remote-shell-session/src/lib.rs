//! Shell session registry and streaming data plane.
//!
//! Provides:
//! - `ShellEngine` - Create shells, run commands, move stream data
//! - `Registry` - Live shells keyed by id; also the backend completion sink

pub mod command;
pub mod engine;
mod gateway;
pub mod registry;
pub mod shell;

#[cfg(test)]
mod testing;

pub use command::StreamState;
pub use engine::{ShellEngine, StreamInput};
pub use registry::Registry;
pub use shell::{ShellInfo, ShellSession};
