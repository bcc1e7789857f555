//! Backend gateway traits.
//!
//! A [`Backend`] is the execution engine that actually runs commands. The
//! shell engine talks to it only through the requests below; every request
//! is fire-and-forget and the backend reports back through the
//! [`PluginRequest`] it was handed, which forwards to a [`CompletionSink`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    BackendError, BackendHandle, BackendOutput, CommandLine, PluginRequest, SessionKind,
    ShellError, SignalCode,
};

/// Receiver of backend completions, implemented by the session registry.
#[async_trait]
pub trait CompletionSink: Send + Sync {
    /// The backend accepted the shell or command and assigned it `handle`.
    ///
    /// # Errors
    /// Returns error if the session no longer exists, was already completed,
    /// or its caller has gone away.
    fn report_context(&self, kind: &SessionKind, handle: BackendHandle) -> Result<(), ShellError>;

    /// The backend rejected the shell or command.
    ///
    /// # Errors
    /// Returns error if the session no longer exists or was already completed.
    fn operation_complete(&self, kind: &SessionKind, error: BackendError) -> Result<(), ShellError>;

    /// Deliver command output, waiting until a Receive is pending.
    ///
    /// # Errors
    /// Returns `NotFound` once the command has been torn down.
    async fn receive_result(
        &self,
        kind: &SessionKind,
        output: BackendOutput,
    ) -> Result<(), ShellError>;
}

/// Execution backend.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Begin a backend session for a new shell.
    async fn begin_shell(&self, request: PluginRequest) -> Result<(), BackendError>;

    /// Start executing a command on an accepted shell.
    async fn begin_command(
        &self,
        request: PluginRequest,
        shell: BackendHandle,
        command_line: &CommandLine,
    ) -> Result<(), BackendError>;

    /// Forward decoded input bytes for `stream`.
    async fn send(
        &self,
        shell: BackendHandle,
        command: BackendHandle,
        stream: &str,
        data: Bytes,
    ) -> Result<(), BackendError>;

    /// Start delivering buffered output for a command.
    async fn request_receive(
        &self,
        request: PluginRequest,
        shell: BackendHandle,
        command: BackendHandle,
    ) -> Result<(), BackendError>;

    /// Forward a signal. The default ignores it.
    async fn signal(
        &self,
        _shell: BackendHandle,
        _command: BackendHandle,
        _code: &SignalCode,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    /// The client will send nothing more on `stream`. The default ignores it.
    async fn close_input(
        &self,
        _shell: BackendHandle,
        _command: BackendHandle,
        _stream: &str,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    /// The shell has been deleted. Any command it ran has already been
    /// signalled. The default ignores it.
    async fn end_shell(&self, _shell: BackendHandle) -> Result<(), BackendError> {
        Ok(())
    }
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn begin_shell(&self, request: PluginRequest) -> Result<(), BackendError> {
        (**self).begin_shell(request).await
    }

    async fn begin_command(
        &self,
        request: PluginRequest,
        shell: BackendHandle,
        command_line: &CommandLine,
    ) -> Result<(), BackendError> {
        (**self).begin_command(request, shell, command_line).await
    }

    async fn send(
        &self,
        shell: BackendHandle,
        command: BackendHandle,
        stream: &str,
        data: Bytes,
    ) -> Result<(), BackendError> {
        (**self).send(shell, command, stream, data).await
    }

    async fn request_receive(
        &self,
        request: PluginRequest,
        shell: BackendHandle,
        command: BackendHandle,
    ) -> Result<(), BackendError> {
        (**self).request_receive(request, shell, command).await
    }

    async fn signal(
        &self,
        shell: BackendHandle,
        command: BackendHandle,
        code: &SignalCode,
    ) -> Result<(), BackendError> {
        (**self).signal(shell, command, code).await
    }

    async fn close_input(
        &self,
        shell: BackendHandle,
        command: BackendHandle,
        stream: &str,
    ) -> Result<(), BackendError> {
        (**self).close_input(shell, command, stream).await
    }

    async fn end_shell(&self, shell: BackendHandle) -> Result<(), BackendError> {
        (**self).end_shell(shell).await
    }
}
