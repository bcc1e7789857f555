//! Shell engine: lifecycle and data-plane operations.
//!
//! Every remote call maps to one method here. Calls that need the backend
//! (create, invoke, receive) suspend until the backend reports back through
//! the registry, which is the [`CompletionSink`] of every [`PluginRequest`]
//! this engine hands out.

use std::sync::Arc;

use bytes::Bytes;
use remote_shell_core::{
    Backend, CommandId, CommandLine, CommandState, CompletionSink, EngineConfig, PluginRequest,
    ReceiveResult, SessionKind, ShellDeclaration, ShellError, ShellId, SignalCode, StreamChunk,
    codec::{decode_payload, encode_payload},
};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{Registry, ShellInfo, ShellSession, shell::Released};

/// Input of a Send call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInput {
    /// Target command. Shell-level sends are not supported.
    #[serde(default)]
    pub command_id: Option<CommandId>,
    /// Inbound stream name, e.g. `stdin`.
    pub stream: String,
    /// Wire-encoded payload.
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub end_of_stream: bool,
}

impl StreamInput {
    /// Input for `command` on `stream` carrying an already encoded payload.
    #[must_use]
    pub fn new(command: CommandId, stream: impl Into<String>, data: Option<String>) -> Self {
        Self {
            command_id: Some(command),
            stream: stream.into(),
            data,
            end_of_stream: false,
        }
    }

    /// Mark this input as the last one on its stream.
    #[must_use]
    pub const fn end_of_stream(mut self) -> Self {
        self.end_of_stream = true;
        self
    }
}

/// The shell engine.
///
/// Explicitly constructed at startup and torn down with
/// [`shutdown`](Self::shutdown); there is no global state.
pub struct ShellEngine<B>
where
    B: Backend,
{
    registry: Arc<Registry>,
    backend: B,
}

impl<B> ShellEngine<B>
where
    B: Backend,
{
    /// Create an engine with the default configuration.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, EngineConfig::default())
    }

    /// Create an engine.
    #[must_use]
    pub fn with_config(backend: B, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new(config)),
            backend,
        }
    }

    /// The shell registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn request(&self, kind: SessionKind) -> PluginRequest {
        let sink: Arc<dyn CompletionSink> = self.registry.clone();
        PluginRequest::new(kind, sink)
    }

    fn find(&self, shell_id: &ShellId) -> Result<Arc<ShellSession>, ShellError> {
        self.registry
            .find(shell_id)
            .ok_or_else(|| ShellError::NotFound(format!("shell {shell_id}")))
    }

    /// Create a shell and wait for the backend to accept it.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for a declaration without output streams,
    /// `ResourceExhausted` at the shell limit, or the backend's failure.
    pub async fn create_shell(&self, declaration: ShellDeclaration) -> Result<ShellInfo, ShellError> {
        let (accept_tx, accept_rx) = oneshot::channel();
        let shell = self.registry.create(&declaration, accept_tx)?;
        let shell_id = shell.id().clone();

        let request = self.request(SessionKind::Shell {
            shell_id: shell_id.clone(),
        });
        if let Err(e) = self.backend.begin_shell(request).await {
            warn!(%shell_id, error = %e, "Failed to submit shell to backend");
            self.registry.remove(&shell_id);
            return Err(e.into());
        }

        match accept_rx.await {
            Ok(Ok(_)) => {
                info!(%shell_id, "Shell created");
                Ok(shell.info())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ShellError::Failed(format!(
                "shell {shell_id} was torn down before the backend accepted it"
            ))),
        }
    }

    /// Delete a shell.
    ///
    /// A command still attached is terminated in the backend before the
    /// shell itself is ended there.
    ///
    /// # Errors
    /// Returns `NotFound` if the shell does not exist.
    pub async fn delete_shell(&self, shell_id: &ShellId) -> Result<(), ShellError> {
        let released = self.registry.delete(shell_id)?;
        self.end_in_backend(shell_id, released).await;
        info!(%shell_id, "Shell deleted");
        Ok(())
    }

    /// Best-effort backend teardown of a shell already gone from the registry.
    async fn end_in_backend(&self, shell_id: &ShellId, released: Released) {
        let Some(shell_handle) = released.backend_handle else {
            return;
        };

        if let Some(command_handle) = released.command.as_ref().and_then(|c| c.backend_handle()) {
            if let Err(e) = self
                .backend
                .signal(shell_handle, command_handle, &SignalCode::Terminate)
                .await
            {
                warn!(%shell_id, error = %e, "Backend failed to terminate orphaned command");
            }
        }
        // Fails any pending Receive.
        drop(released.command);

        if let Err(e) = self.backend.end_shell(shell_handle).await {
            warn!(%shell_id, error = %e, "Backend failed to end shell");
        }
    }

    /// Inspect one shell.
    ///
    /// # Errors
    /// Returns `NotFound` if the shell does not exist.
    pub fn get_shell(&self, shell_id: &ShellId) -> Result<ShellInfo, ShellError> {
        Ok(self.find(shell_id)?.info())
    }

    /// Snapshot of all shells.
    #[must_use]
    pub fn list_shells(&self) -> Vec<ShellInfo> {
        self.registry.list()
    }

    /// Report every shell to `report`, stopping at its first error.
    ///
    /// # Errors
    /// Returns the first error produced by `report`.
    pub fn enumerate_shells<F, E>(&self, report: F) -> Result<usize, E>
    where
        F: FnMut(ShellInfo) -> Result<(), E>,
    {
        self.registry.enumerate(report)
    }

    /// Shells are immutable once created.
    ///
    /// # Errors
    /// Always returns `NotSupported`.
    pub fn modify_shell(
        &self,
        _shell_id: &ShellId,
        _declaration: &ShellDeclaration,
    ) -> Result<ShellInfo, ShellError> {
        Err(ShellError::NotSupported("shells cannot be modified".to_string()))
    }

    /// Reconnecting to a disconnected shell is not implemented.
    ///
    /// # Errors
    /// Always returns `NotSupported`.
    pub fn connect(&self, _shell_id: &ShellId) -> Result<(), ShellError> {
        Err(ShellError::NotSupported("connect".to_string()))
    }

    /// Attach a command to a shell and wait for the backend to start it.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown shell, `AlreadyExists` if the shell
    /// already has a command, or the backend's failure.
    pub async fn invoke_command(
        &self,
        shell_id: &ShellId,
        command_line: CommandLine,
    ) -> Result<CommandId, ShellError> {
        let shell = self.find(shell_id)?;
        let (accept_tx, accept_rx) = oneshot::channel();

        let (command_id, shell_handle) = {
            let mut state = shell.lock();
            if let Some(existing) = &state.command {
                return Err(ShellError::AlreadyExists(format!(
                    "shell {shell_id} already runs command {}",
                    existing.id()
                )));
            }
            let shell_handle = state.backend_handle.ok_or_else(|| {
                ShellError::Failed(format!("shell {shell_id} has not been accepted by the backend"))
            })?;

            let command = crate::command::CommandSession::new(
                CommandId::generate(),
                shell.output_streams(),
                accept_tx,
            );
            let command_id = command.id().clone();
            state.command = Some(command);
            (command_id, shell_handle)
        };

        let request = self.request(SessionKind::Command {
            shell_id: shell_id.clone(),
            command_id: command_id.clone(),
        });
        if let Err(e) = self
            .backend
            .begin_command(request, shell_handle, &command_line)
            .await
        {
            warn!(%shell_id, %command_id, error = %e, "Failed to submit command to backend");
            shell.detach_command(&command_id);
            return Err(e.into());
        }

        match accept_rx.await {
            Ok(Ok(_)) => {
                info!(%shell_id, %command_id, command = %command_line.command, "Command started");
                Ok(command_id)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ShellError::Failed(format!(
                "command {command_id} was torn down before the backend accepted it"
            ))),
        }
    }

    /// Deliver inbound stream data to a command.
    ///
    /// The data goes to the backend. If a Receive is pending on the command,
    /// it is completed with the same payload.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids, `NotSupported` without a command
    /// id, or `Failed` if the payload cannot be decoded or forwarded.
    pub async fn send(&self, shell_id: &ShellId, input: StreamInput) -> Result<(), ShellError> {
        let shell = self.find(shell_id)?;
        let command_id = input
            .command_id
            .clone()
            .ok_or_else(|| ShellError::NotSupported("shell-level send".to_string()))?;

        let (shell_handle, command_handle) = {
            let mut state = shell.lock();
            let shell_handle = state.backend_handle;
            let command = state.command_matching_mut(&command_id)?;
            match (shell_handle, command.backend_handle()) {
                (Some(shell_handle), Some(command_handle)) => (shell_handle, command_handle),
                _ => {
                    return Err(ShellError::NotFound(format!(
                        "command {command_id} has not been accepted by the backend"
                    )));
                }
            }
        };

        let decoded = input
            .data
            .as_deref()
            .map(|text| decode_payload(text, shell.is_compressed()).map(Bytes::from))
            .transpose()?;

        if let Some(bytes) = &decoded {
            self.backend
                .send(shell_handle, command_handle, &input.stream, bytes.clone())
                .await?;
        }
        if input.end_of_stream {
            self.backend
                .close_input(shell_handle, command_handle, &input.stream)
                .await?;
        }

        let claimed = {
            let mut state = shell.lock();
            let Ok(command) = state.command_matching_mut(&command_id) else {
                debug!(%shell_id, %command_id, "Command went away during send");
                return Ok(());
            };
            if input.end_of_stream && !command.mark_done(&input.stream) {
                debug!(%command_id, stream = %input.stream, "End of stream for undeclared stream");
            }
            command.claim_receive()
        };

        let Some(reply) = claimed else {
            debug!(%command_id, "No receive pending, send not echoed");
            return Ok(());
        };

        let command_state = if input.end_of_stream {
            CommandState::Done
        } else {
            CommandState::Running
        };
        let data = decoded
            .as_deref()
            .map(|bytes| encode_payload(bytes, shell.is_compressed()))
            .transpose();

        match data {
            Ok(data) => {
                let result = ReceiveResult {
                    command_id: command_id.clone(),
                    command_state,
                    exit_code: None,
                    streams: vec![StreamChunk {
                        name: input.stream,
                        command_id: command_id.clone(),
                        end_of_stream: input.end_of_stream,
                        data,
                    }],
                };
                if reply.send(Ok(result)).is_err() {
                    warn!(%command_id, "Receive went away before the send completed it");
                }
                Ok(())
            }
            Err(e) => {
                let err = ShellError::from(e);
                let _ = reply.send(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Wait for the next output of a command.
    ///
    /// Only one Receive may be outstanding per command. The call is completed
    /// by a Send, by backend output, or by a Signal.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids, `NotSupported` without a command
    /// id, `AlreadyExists` if a Receive is already pending, or `Failed` if
    /// the command disappears without completing it.
    pub async fn receive(
        &self,
        shell_id: &ShellId,
        command_id: Option<&CommandId>,
    ) -> Result<ReceiveResult, ShellError> {
        let shell = self.find(shell_id)?;
        let command_id =
            command_id.ok_or_else(|| ShellError::NotSupported("shell-level receive".to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let (ticket, shell_handle, command_handle) = {
            let mut state = shell.lock();
            let shell_handle = state.backend_handle;
            let command = state.command_matching_mut(command_id)?;
            let (Some(shell_handle), Some(command_handle)) = (shell_handle, command.backend_handle())
            else {
                return Err(ShellError::NotFound(format!(
                    "command {command_id} has not been accepted by the backend"
                )));
            };
            let ticket = command.install_receive(reply_tx)?;
            (ticket, shell_handle, command_handle)
        };
        debug!(%shell_id, %command_id, "Receive pending");

        let request = self.request(SessionKind::Command {
            shell_id: shell_id.clone(),
            command_id: command_id.clone(),
        });
        if let Err(e) = self
            .backend
            .request_receive(request, shell_handle, command_handle)
            .await
        {
            let reclaimed = shell
                .lock()
                .command_matching_mut(command_id)
                .ok()
                .and_then(|command| command.reclaim_receive(ticket));
            // If someone already claimed the slot they own the reply.
            if reclaimed.is_some() {
                return Err(e.into());
            }
            warn!(%command_id, error = %e, "Receive request failed after the slot was claimed");
        }

        let result = reply_rx.await.unwrap_or_else(|_| {
            Err(ShellError::Failed(format!(
                "command {command_id} went away before completing the receive"
            )))
        })?;
        debug!(
            %shell_id,
            %command_id,
            state = %result.command_state,
            streams = result.streams.len(),
            "Receive completed"
        );
        Ok(result)
    }

    /// Signal a command and tear it down.
    ///
    /// Without a command id the shell's only command is targeted. A pending
    /// Receive is completed with `Done`.
    ///
    /// # Errors
    /// Returns `NotFound` for an unknown shell, a mismatched command id, or a
    /// shell without a command.
    pub async fn signal(
        &self,
        shell_id: &ShellId,
        command_id: Option<&CommandId>,
        code: &SignalCode,
    ) -> Result<(), ShellError> {
        let shell = self.find(shell_id)?;

        let (mut command, shell_handle) = {
            let mut state = shell.lock();
            let matches = match (&state.command, command_id) {
                (None, _) => false,
                (Some(command), Some(id)) => command.id() == id,
                (Some(_), None) => true,
            };
            if !matches {
                return Err(ShellError::NotFound(format!(
                    "command {} on shell {shell_id}",
                    command_id.map_or("<any>", CommandId::as_str)
                )));
            }
            let shell_handle = state.backend_handle;
            match state.command.take() {
                Some(command) => (command, shell_handle),
                None => return Err(ShellError::NotFound(format!("command on shell {shell_id}"))),
            }
        };
        let command_id = command.id().clone();

        if let (Some(shell_handle), Some(command_handle)) = (shell_handle, command.backend_handle()) {
            if let Err(e) = self.backend.signal(shell_handle, command_handle, code).await {
                warn!(%command_id, %code, error = %e, "Backend failed to handle signal");
            }
        }

        if let Some(reply) = command.claim_receive() {
            let mut streams = Vec::new();
            if let Some(primary) = command.primary_stream_mut() {
                if !primary.done {
                    primary.done = true;
                    streams.push(StreamChunk {
                        name: primary.name.clone(),
                        command_id: command_id.clone(),
                        end_of_stream: true,
                        data: None,
                    });
                }
            }
            let result = ReceiveResult {
                command_id: command_id.clone(),
                command_state: CommandState::Done,
                exit_code: None,
                streams,
            };
            if reply.send(Ok(result)).is_err() {
                debug!(%command_id, "Receive went away before the signal completed it");
            }
        }

        info!(%shell_id, %command_id, %code, "Command signalled");
        Ok(())
    }

    /// Tear down the engine, freeing any shells still alive and ending
    /// them in the backend.
    ///
    /// Returns how many shells were still registered.
    pub async fn shutdown(&self) -> usize {
        let released = self.registry.clear();
        let remaining = released.len();
        for (shell_id, released) in released {
            self.end_in_backend(&shell_id, released).await;
        }
        if remaining > 0 {
            warn!(remaining, "Shut down with live shells, freed them");
        }
        remaining
    }
}
