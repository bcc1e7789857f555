//! Backend completions: acceptance, rejection and streamed output.

use async_trait::async_trait;
use remote_shell_core::{
    BackendError, BackendHandle, BackendOutput, CompletionSink, ReceiveResult, SessionKind,
    ShellError, StreamChunk, codec::encode_payload,
};
use tracing::{debug, warn};

use crate::Registry;

fn already_completed(kind: &SessionKind) -> ShellError {
    ShellError::AlreadyExists(format!("{kind} was already completed"))
}

#[async_trait]
impl CompletionSink for Registry {
    fn report_context(&self, kind: &SessionKind, handle: BackendHandle) -> Result<(), ShellError> {
        let shell = self
            .find(kind.shell_id())
            .ok_or_else(|| ShellError::NotFound(format!("shell {}", kind.shell_id())))?;

        match kind {
            SessionKind::Shell { shell_id } => {
                let accept = {
                    let mut state = shell.lock();
                    let accept = state
                        .pending_accept
                        .take()
                        .ok_or_else(|| already_completed(kind))?;
                    state.backend_handle = Some(handle);
                    accept
                };

                if accept.send(Ok(handle)).is_err() {
                    warn!(%shell_id, "Shell creator went away, unwinding shell");
                    self.remove(shell_id);
                    return Err(ShellError::Failed(format!(
                        "caller for shell {shell_id} is gone"
                    )));
                }
                debug!(%shell_id, %handle, "Backend accepted shell");
            }
            SessionKind::Command {
                shell_id,
                command_id,
            } => {
                let mut state = shell.lock();
                let command = state.command_matching_mut(command_id)?;
                let accept = command
                    .accept(handle)
                    .ok_or_else(|| already_completed(kind))?;

                if accept.send(Ok(handle)).is_err() {
                    warn!(%shell_id, %command_id, "Command invoker went away, detaching command");
                    state.command = None;
                    return Err(ShellError::Failed(format!(
                        "caller for command {command_id} is gone"
                    )));
                }
                debug!(%shell_id, %command_id, %handle, "Backend accepted command");
            }
        }
        Ok(())
    }

    fn operation_complete(&self, kind: &SessionKind, error: BackendError) -> Result<(), ShellError> {
        let shell = self
            .find(kind.shell_id())
            .ok_or_else(|| ShellError::NotFound(format!("shell {}", kind.shell_id())))?;

        let accept = match kind {
            SessionKind::Shell { shell_id } => {
                let accept = shell
                    .lock()
                    .pending_accept
                    .take()
                    .ok_or_else(|| already_completed(kind))?;
                // Unplumb before replying so the failed shell is never
                // visible to a later find.
                self.remove(shell_id);
                accept
            }
            SessionKind::Command { command_id, .. } => {
                let mut state = shell.lock();
                let accept = state
                    .command_matching_mut(command_id)?
                    .take_accept()
                    .ok_or_else(|| already_completed(kind))?;
                state.command = None;
                accept
            }
        };

        warn!(%kind, %error, "Backend rejected request");
        // The caller may have gone away already; the partial session is
        // unwound either way.
        let _ = accept.send(Err(ShellError::Backend(error)));
        Ok(())
    }

    async fn receive_result(
        &self,
        kind: &SessionKind,
        output: BackendOutput,
    ) -> Result<(), ShellError> {
        let command_id = kind.command_id().ok_or_else(|| {
            ShellError::NotSupported("output must be addressed to a command".to_string())
        })?;
        let shell = self
            .find(kind.shell_id())
            .ok_or_else(|| ShellError::NotFound(format!("shell {}", kind.shell_id())))?;

        let reply = loop {
            let mut ready = {
                let mut state = shell.lock();
                let command = state.command_matching_mut(command_id)?;
                if let Some(reply) = command.claim_receive() {
                    if output.end_of_stream {
                        command.mark_done(&output.stream);
                    }
                    break reply;
                }
                command.subscribe_ready()
            };
            // An error means the command was freed; the next pass reports it.
            let _ = ready.changed().await;
        };

        let data = if output.data.is_empty() {
            Ok(None)
        } else {
            encode_payload(&output.data, shell.is_compressed()).map(Some)
        };

        match data {
            Ok(data) => {
                let result = ReceiveResult {
                    command_id: command_id.clone(),
                    command_state: output.command_state,
                    exit_code: output.exit_code,
                    streams: vec![StreamChunk {
                        name: output.stream,
                        command_id: command_id.clone(),
                        end_of_stream: output.end_of_stream,
                        data,
                    }],
                };
                reply.send(Ok(result)).map_err(|_| {
                    ShellError::Failed(format!("receive on command {command_id} went away"))
                })
            }
            Err(err) => {
                let err = ShellError::from(err);
                let _ = reply.send(Err(err.clone()));
                Err(err)
            }
        }
    }
}
