//! Maps client messages onto shell engine operations.

use remote_shell_core::{Backend, ShellError};
use remote_shell_session::ShellEngine;
use tracing::debug;

use crate::protocol::{ClientMessage, ServerMessage};

/// Run one client message against `engine` and build its reply.
///
/// Errors become [`ServerMessage::Error`] replies; every message gets
/// exactly one reply.
pub async fn dispatch<B>(engine: &ShellEngine<B>, message: ClientMessage) -> ServerMessage
where
    B: Backend,
{
    match run(engine, message).await {
        Ok(reply) => reply,
        Err(err) => {
            debug!(kind = ?err.kind(), error = %err, "Request failed");
            ServerMessage::error(&err)
        }
    }
}

async fn run<B>(engine: &ShellEngine<B>, message: ClientMessage) -> Result<ServerMessage, ShellError>
where
    B: Backend,
{
    let declaration = message.declaration();
    let command_line = message.command_line();
    let stream_input = message.stream_input();

    match message {
        ClientMessage::CreateShell { .. } => {
            let shell = engine
                .create_shell(declaration.unwrap_or_default())
                .await?;
            Ok(ServerMessage::ShellCreated { shell })
        }
        ClientMessage::DeleteShell { shell_id } => {
            engine.delete_shell(&shell_id).await?;
            Ok(ServerMessage::ShellDeleted { shell_id })
        }
        ClientMessage::GetShell { shell_id } => Ok(ServerMessage::Shell {
            shell: engine.get_shell(&shell_id)?,
        }),
        ClientMessage::EnumerateShells => Ok(ServerMessage::Shells {
            shells: engine.list_shells(),
        }),
        ClientMessage::ModifyShell { shell_id, .. } => {
            let shell = engine.modify_shell(&shell_id, &declaration.unwrap_or_default())?;
            Ok(ServerMessage::Shell { shell })
        }
        ClientMessage::Connect { shell_id } => {
            engine.connect(&shell_id)?;
            Ok(ServerMessage::Shell {
                shell: engine.get_shell(&shell_id)?,
            })
        }
        ClientMessage::InvokeCommand { shell_id, .. } => {
            let command_id = engine
                .invoke_command(&shell_id, command_line.unwrap_or_default())
                .await?;
            Ok(ServerMessage::CommandStarted {
                shell_id,
                command_id,
            })
        }
        ClientMessage::Send {
            shell_id,
            command_id,
            ..
        } => {
            engine
                .send(&shell_id, stream_input.unwrap_or_default())
                .await?;
            Ok(ServerMessage::SendComplete {
                shell_id,
                command_id,
            })
        }
        ClientMessage::Receive {
            shell_id,
            command_id,
        } => {
            let result = engine.receive(&shell_id, command_id.as_ref()).await?;
            Ok(ServerMessage::receive_complete(shell_id, result))
        }
        ClientMessage::Signal {
            shell_id,
            command_id,
            code,
        } => {
            engine
                .signal(&shell_id, command_id.as_ref(), &code)
                .await?;
            Ok(ServerMessage::SignalComplete {
                shell_id,
                command_id,
            })
        }
        ClientMessage::Ping => Ok(ServerMessage::Pong),
    }
}
