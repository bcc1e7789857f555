//! Command state, signal codes and receive results.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::CommandId;

const COMMAND_STATE_RUNNING: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running";
const COMMAND_STATE_DONE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";
const SIGNAL_PREFIX: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/";

/// Command state reported with every receive result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandState {
    /// The command is still producing or accepting data.
    Running,
    /// The command has finished.
    Done,
}

impl CommandState {
    /// The Shell resource URI for this state.
    #[must_use]
    pub const fn uri(self) -> &'static str {
        match self {
            Self::Running => COMMAND_STATE_RUNNING,
            Self::Done => COMMAND_STATE_DONE,
        }
    }
}

impl fmt::Display for CommandState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.uri())
    }
}

/// Signal sent to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SignalCode {
    /// Terminate the command. This is what clients send when they are done.
    Terminate,
    /// Ctrl+C.
    CtrlC,
    /// Ctrl+Break.
    CtrlBreak,
    /// Any other signal URI, passed through to the backend untouched.
    Other(String),
}

impl SignalCode {
    /// Parse a signal from either its full URI or its short name.
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code.strip_prefix(SIGNAL_PREFIX).unwrap_or(code) {
            "terminate" => Self::Terminate,
            "ctrl_c" => Self::CtrlC,
            "ctrl_break" => Self::CtrlBreak,
            _ => Self::Other(code.to_owned()),
        }
    }

    /// The full signal URI.
    #[must_use]
    pub fn uri(&self) -> String {
        match self {
            Self::Terminate => format!("{SIGNAL_PREFIX}terminate"),
            Self::CtrlC => format!("{SIGNAL_PREFIX}ctrl_c"),
            Self::CtrlBreak => format!("{SIGNAL_PREFIX}ctrl_break"),
            Self::Other(uri) => uri.clone(),
        }
    }

    /// Whether the signal asks for the command to be torn down.
    #[must_use]
    pub const fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }
}

impl From<String> for SignalCode {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SignalCode> for String {
    fn from(value: SignalCode) -> Self {
        value.uri()
    }
}

impl fmt::Display for SignalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Command line handed to the backend when a command is invoked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandLine {
    /// Program or command text.
    pub command: String,
    /// Extra arguments.
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl CommandLine {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: Vec::new(),
        }
    }

    /// Append arguments.
    #[must_use]
    pub fn args<I>(mut self, args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.arguments.extend(args.into_iter().map(Into::into));
        self
    }
}

/// One stream entry of a receive result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Stream name, e.g. `stdout`.
    pub name: String,
    /// Command the stream belongs to.
    pub command_id: CommandId,
    /// Whether this is the last chunk of the stream.
    #[serde(default)]
    pub end_of_stream: bool,
    /// Wire-encoded payload (base64, compressed first when the shell is).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Result delivered to a pending Receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveResult {
    pub command_id: CommandId,
    pub command_state: CommandState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub streams: Vec<StreamChunk>,
}

/// Raw output reported by a backend for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOutput {
    pub stream: String,
    pub data: Bytes,
    pub end_of_stream: bool,
    pub command_state: CommandState,
    pub exit_code: Option<i32>,
}

impl BackendOutput {
    /// A chunk of data on a still running command.
    #[must_use]
    pub fn data(stream: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            stream: stream.into(),
            data: data.into(),
            end_of_stream: false,
            command_state: CommandState::Running,
            exit_code: None,
        }
    }

    /// Final, empty chunk marking the command as finished.
    #[must_use]
    pub fn finished(stream: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            stream: stream.into(),
            data: Bytes::new(),
            end_of_stream: true,
            command_state: CommandState::Done,
            exit_code,
        }
    }
}
