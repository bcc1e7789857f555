//! Execution backends for remote shell sessions.
//!
//! Provides:
//! - An echo backend that accepts everything and relies on the Send/Receive
//!   handoff
//! - A process backend running each command as a child process group
//! - Command line building utilities

pub mod command;
pub mod echo;
pub mod process;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use echo::EchoBackend;
pub use process::{ProcessBackend, ProcessConfig};
