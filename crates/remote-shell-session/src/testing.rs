//! Scripted backend for engine tests.

use std::sync::{
    Mutex, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use remote_shell_core::{
    Backend, BackendError, BackendHandle, CommandLine, PluginRequest, SignalCode,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Accept,
    RejectShells,
    RejectCommands,
    HoldCommands,
    FailReceive,
}

#[derive(Default)]
struct Recorded {
    shells_begun: usize,
    commands: Vec<PluginRequest>,
    held: Vec<PluginRequest>,
    sent: Vec<(String, Vec<u8>)>,
    signals: Vec<SignalCode>,
    closed: Vec<String>,
    ended: Vec<BackendHandle>,
}

pub struct ScriptedBackend {
    script: Script,
    next_handle: AtomicU64,
    recorded: Mutex<Recorded>,
}

impl ScriptedBackend {
    fn new(script: Script) -> Self {
        Self {
            script,
            next_handle: AtomicU64::new(1),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn accepting() -> Self {
        Self::new(Script::Accept)
    }

    pub fn rejecting_shells() -> Self {
        Self::new(Script::RejectShells)
    }

    pub fn rejecting_commands() -> Self {
        Self::new(Script::RejectCommands)
    }

    /// Accepts shells but never answers command requests.
    pub fn holding_commands() -> Self {
        Self::new(Script::HoldCommands)
    }

    pub fn failing_receive() -> Self {
        Self::new(Script::FailReceive)
    }

    fn recorded(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self) -> BackendHandle {
        BackendHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    pub fn shells_begun(&self) -> usize {
        self.recorded().shells_begun
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.recorded().sent.clone()
    }

    pub fn signals(&self) -> Vec<SignalCode> {
        self.recorded().signals.clone()
    }

    /// Input streams the engine closed, in order.
    pub fn closed(&self) -> Vec<String> {
        self.recorded().closed.clone()
    }

    /// Shell handles the engine ended, in order.
    pub fn ended(&self) -> Vec<BackendHandle> {
        self.recorded().ended.clone()
    }

    /// Most recently accepted command request.
    pub fn last_command(&self) -> Option<PluginRequest> {
        self.recorded().commands.last().cloned()
    }

    /// Oldest command request still waiting for an answer.
    pub fn held_command(&self) -> Option<PluginRequest> {
        let mut recorded = self.recorded();
        if recorded.held.is_empty() {
            None
        } else {
            Some(recorded.held.remove(0))
        }
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn begin_shell(&self, request: PluginRequest) -> Result<(), BackendError> {
        self.recorded().shells_begun += 1;
        let reported = if self.script == Script::RejectShells {
            request.operation_complete(BackendError::Rejected("no shells today".into()))
        } else {
            request.report_context(self.handle())
        };
        reported.map_err(|e| BackendError::Unavailable(e.to_string()))
    }

    async fn begin_command(
        &self,
        request: PluginRequest,
        _shell: BackendHandle,
        _command_line: &CommandLine,
    ) -> Result<(), BackendError> {
        match self.script {
            Script::RejectCommands => request
                .operation_complete(BackendError::Rejected("command refused".into()))
                .map_err(|e| BackendError::Unavailable(e.to_string())),
            Script::HoldCommands => {
                self.recorded().held.push(request);
                Ok(())
            }
            _ => {
                request
                    .report_context(self.handle())
                    .map_err(|e| BackendError::Unavailable(e.to_string()))?;
                self.recorded().commands.push(request);
                Ok(())
            }
        }
    }

    async fn send(
        &self,
        _shell: BackendHandle,
        _command: BackendHandle,
        stream: &str,
        data: Bytes,
    ) -> Result<(), BackendError> {
        self.recorded().sent.push((stream.to_string(), data.to_vec()));
        Ok(())
    }

    async fn request_receive(
        &self,
        _request: PluginRequest,
        _shell: BackendHandle,
        _command: BackendHandle,
    ) -> Result<(), BackendError> {
        if self.script == Script::FailReceive {
            return Err(BackendError::Unavailable("receive queue closed".into()));
        }
        Ok(())
    }

    async fn signal(
        &self,
        _shell: BackendHandle,
        _command: BackendHandle,
        code: &SignalCode,
    ) -> Result<(), BackendError> {
        self.recorded().signals.push(code.clone());
        Ok(())
    }

    async fn close_input(
        &self,
        _shell: BackendHandle,
        _command: BackendHandle,
        stream: &str,
    ) -> Result<(), BackendError> {
        self.recorded().closed.push(stream.to_string());
        Ok(())
    }

    async fn end_shell(&self, shell: BackendHandle) -> Result<(), BackendError> {
        self.recorded().ended.push(shell);
        Ok(())
    }
}
