//! Shell session: declared streams, compression mode and the attached command.

use std::sync::{Mutex, MutexGuard, PoisonError};

use remote_shell_core::{BackendHandle, CommandId, ShellError, ShellId};
use serde::{Deserialize, Serialize};

use crate::command::{AcceptSender, CommandSession, StreamState};

/// Read-only view of a shell, as reported by Get/Enumerate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellInfo {
    pub shell_id: ShellId,
    pub output_streams: Vec<String>,
    pub input_streams: Vec<String>,
    pub is_compressed: bool,
    /// Whether the backend has accepted the shell.
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_id: Option<CommandId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command_streams: Vec<StreamState>,
}

/// Mutable part of a shell.
pub(crate) struct ShellState {
    pub(crate) backend_handle: Option<BackendHandle>,
    pub(crate) pending_accept: Option<AcceptSender>,
    pub(crate) command: Option<CommandSession>,
}

impl ShellState {
    /// The attached command, if its id is `id`.
    pub(crate) fn command_matching_mut(
        &mut self,
        id: &CommandId,
    ) -> Result<&mut CommandSession, ShellError> {
        self.command
            .as_mut()
            .filter(|command| command.id() == id)
            .ok_or_else(|| ShellError::NotFound(format!("command {id}")))
    }
}

/// One remote shell.
pub struct ShellSession {
    id: ShellId,
    output_streams: Vec<String>,
    input_streams: Vec<String>,
    is_compressed: bool,
    state: Mutex<ShellState>,
}

impl ShellSession {
    pub(crate) fn new(
        id: ShellId,
        output_streams: Vec<String>,
        input_streams: Vec<String>,
        is_compressed: bool,
        accept: AcceptSender,
    ) -> Self {
        Self {
            id,
            output_streams,
            input_streams,
            is_compressed,
            state: Mutex::new(ShellState {
                backend_handle: None,
                pending_accept: Some(accept),
                command: None,
            }),
        }
    }

    #[must_use]
    pub const fn id(&self) -> &ShellId {
        &self.id
    }

    /// Declared outbound stream names, in declaration order.
    #[must_use]
    pub fn output_streams(&self) -> &[String] {
        &self.output_streams
    }

    #[must_use]
    pub fn input_streams(&self) -> &[String] {
        &self.input_streams
    }

    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        self.is_compressed
    }

    /// Snapshot of the shell for remote inspection.
    #[must_use]
    pub fn info(&self) -> ShellInfo {
        let state = self.lock();
        ShellInfo {
            shell_id: self.id.clone(),
            output_streams: self.output_streams.clone(),
            input_streams: self.input_streams.clone(),
            is_compressed: self.is_compressed,
            accepted: state.backend_handle.is_some(),
            command_id: state.command.as_ref().map(|c| c.id().clone()),
            command_streams: state
                .command
                .as_ref()
                .map(|c| c.streams().to_vec())
                .unwrap_or_default(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ShellState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Detach the command if it is still the one identified by `id`.
    pub(crate) fn detach_command(&self, id: &CommandId) -> Option<CommandSession> {
        let mut state = self.lock();
        if state.command.as_ref().is_some_and(|c| c.id() == id) {
            state.command.take()
        } else {
            None
        }
    }

    /// Drop everything the shell owns, handing back what the backend still
    /// has to tear down.
    pub(crate) fn release(&self) -> Released {
        let mut state = self.lock();
        state.pending_accept = None;
        Released {
            backend_handle: state.backend_handle.take(),
            command: state.command.take(),
        }
    }
}

/// Backend resources left behind by a removed shell.
pub(crate) struct Released {
    pub(crate) backend_handle: Option<BackendHandle>,
    pub(crate) command: Option<CommandSession>,
}
