//! Echo backend.
//!
//! Accepts every shell and command straight away and discards input. Clients
//! see their own Send data through the Send/Receive handoff, which makes this
//! backend useful for exercising the data plane without running anything.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use remote_shell_core::{
    Backend, BackendError, BackendHandle, CommandLine, PluginRequest, SignalCode,
};
use tracing::debug;

/// Backend that accepts everything and runs nothing.
#[derive(Debug)]
pub struct EchoBackend {
    next_handle: AtomicU64,
}

impl EchoBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
        }
    }

    fn accept(&self, request: &PluginRequest) -> Result<(), BackendError> {
        let handle = BackendHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        request
            .report_context(handle)
            .map_err(|e| BackendError::Unavailable(e.to_string()))
    }
}

impl Default for EchoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for EchoBackend {
    async fn begin_shell(&self, request: PluginRequest) -> Result<(), BackendError> {
        self.accept(&request)
    }

    async fn begin_command(
        &self,
        request: PluginRequest,
        _shell: BackendHandle,
        command_line: &CommandLine,
    ) -> Result<(), BackendError> {
        debug!(command = %command_line.command, "Echo backend accepting command");
        self.accept(&request)
    }

    async fn send(
        &self,
        _shell: BackendHandle,
        command: BackendHandle,
        stream: &str,
        data: Bytes,
    ) -> Result<(), BackendError> {
        debug!(%command, stream, len = data.len(), "Echo backend discarding input");
        Ok(())
    }

    async fn request_receive(
        &self,
        _request: PluginRequest,
        _shell: BackendHandle,
        _command: BackendHandle,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    async fn signal(
        &self,
        _shell: BackendHandle,
        command: BackendHandle,
        code: &SignalCode,
    ) -> Result<(), BackendError> {
        debug!(%command, %code, "Echo backend ignoring signal");
        Ok(())
    }
}
