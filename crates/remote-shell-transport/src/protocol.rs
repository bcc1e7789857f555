//! Wire protocol for client-server communication.
//!
//! Every client message carries a `request_id` that is echoed on its reply.
//! Replies to different requests may arrive in any order: a `receive` stays
//! open until data shows up while later requests are answered right away.

use remote_shell_core::{
    CommandId, CommandLine, CommandState, ErrorKind, ReceiveResult, ShellDeclaration, ShellError,
    ShellId, SignalCode, StreamChunk,
};
use remote_shell_session::{ShellInfo, StreamInput};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid message: {0}")]
    InvalidMessage(#[source] serde_json::Error),
    #[error("Failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Create a shell.
    CreateShell {
        output_streams: Option<String>,
        #[serde(default)]
        input_streams: Option<String>,
        #[serde(default)]
        compressed: bool,
    },
    /// Delete a shell.
    DeleteShell { shell_id: ShellId },
    /// Inspect a shell.
    GetShell { shell_id: ShellId },
    /// List all shells.
    EnumerateShells,
    /// Change a shell's declaration.
    ModifyShell {
        shell_id: ShellId,
        #[serde(default)]
        output_streams: Option<String>,
    },
    /// Reconnect to a shell.
    Connect { shell_id: ShellId },
    /// Start a command on a shell.
    InvokeCommand {
        shell_id: ShellId,
        command: String,
        #[serde(default)]
        arguments: Vec<String>,
    },
    /// Stream input to a command.
    Send {
        shell_id: ShellId,
        #[serde(default)]
        command_id: Option<CommandId>,
        stream: String,
        #[serde(default)]
        data: Option<String>,
        #[serde(default)]
        end_of_stream: bool,
    },
    /// Wait for command output.
    Receive {
        shell_id: ShellId,
        #[serde(default)]
        command_id: Option<CommandId>,
    },
    /// Signal a command.
    Signal {
        shell_id: ShellId,
        #[serde(default)]
        command_id: Option<CommandId>,
        code: SignalCode,
    },
    /// Ping for keepalive.
    Ping,
}

impl ClientMessage {
    /// Shell declaration of a `create_shell` or `modify_shell` message.
    #[must_use]
    pub fn declaration(&self) -> Option<ShellDeclaration> {
        match self {
            Self::CreateShell {
                output_streams,
                input_streams,
                compressed,
            } => Some(ShellDeclaration {
                output_streams: output_streams.clone(),
                input_streams: input_streams.clone(),
                is_compressed: *compressed,
            }),
            Self::ModifyShell { output_streams, .. } => Some(ShellDeclaration {
                output_streams: output_streams.clone(),
                ..ShellDeclaration::default()
            }),
            _ => None,
        }
    }

    /// Command line of an `invoke_command` message.
    #[must_use]
    pub fn command_line(&self) -> Option<CommandLine> {
        if let Self::InvokeCommand {
            command, arguments, ..
        } = self
        {
            Some(CommandLine::new(command.clone()).args(arguments.iter().cloned()))
        } else {
            None
        }
    }

    /// Stream input of a `send` message.
    #[must_use]
    pub fn stream_input(&self) -> Option<StreamInput> {
        if let Self::Send {
            command_id,
            stream,
            data,
            end_of_stream,
            ..
        } = self
        {
            Some(StreamInput {
                command_id: command_id.clone(),
                stream: stream.clone(),
                data: data.clone(),
                end_of_stream: *end_of_stream,
            })
        } else {
            None
        }
    }
}

/// A client message with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub message: ClientMessage,
}

impl ClientRequest {
    /// Parse a request from JSON text.
    ///
    /// # Errors
    /// Returns error if the text is not a valid client message.
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        serde_json::from_str(text).map_err(TransportError::InvalidMessage)
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Shell created and accepted by the backend.
    ShellCreated { shell: ShellInfo },
    /// Shell deleted.
    ShellDeleted { shell_id: ShellId },
    /// One shell.
    Shell { shell: ShellInfo },
    /// All shells.
    Shells { shells: Vec<ShellInfo> },
    /// Command started.
    CommandStarted {
        shell_id: ShellId,
        command_id: CommandId,
    },
    /// Input accepted.
    SendComplete {
        shell_id: ShellId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_id: Option<CommandId>,
    },
    /// Output for a pending receive.
    ReceiveComplete {
        shell_id: ShellId,
        command_id: CommandId,
        command_state: CommandState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        streams: Vec<StreamChunk>,
    },
    /// Command signalled and detached.
    SignalComplete {
        shell_id: ShellId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        command_id: Option<CommandId>,
    },
    /// Error message.
    Error { kind: ErrorKind, message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Reply carrying a receive result.
    #[must_use]
    pub fn receive_complete(shell_id: ShellId, result: ReceiveResult) -> Self {
        Self::ReceiveComplete {
            shell_id,
            command_id: result.command_id,
            command_state: result.command_state,
            exit_code: result.exit_code,
            streams: result.streams,
        }
    }

    /// Error reply for a failed operation.
    #[must_use]
    pub fn error(err: &ShellError) -> Self {
        Self::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// A server message with the id of the request it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub message: ServerMessage,
}

impl ServerReply {
    #[must_use]
    pub const fn new(request_id: Option<String>, message: ServerMessage) -> Self {
        Self {
            request_id,
            message,
        }
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(TransportError::Serialize)
    }
}
