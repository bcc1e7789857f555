//! Backend request handle.

use std::{fmt, sync::Arc};

use crate::{BackendError, BackendHandle, BackendOutput, CompletionSink, SessionKind, ShellError};

/// A request handed to a backend, and its way to report back.
///
/// Cloning is cheap. Acceptance or rejection completes the waiting remote
/// call exactly once; later reports for the same request are refused.
#[derive(Clone)]
pub struct PluginRequest {
    kind: SessionKind,
    sink: Arc<dyn CompletionSink>,
}

impl PluginRequest {
    /// Create a request for `kind` reporting into `sink`.
    #[must_use]
    pub fn new(kind: SessionKind, sink: Arc<dyn CompletionSink>) -> Self {
        Self { kind, sink }
    }

    /// The session this request belongs to.
    #[must_use]
    pub const fn kind(&self) -> &SessionKind {
        &self.kind
    }

    /// Accept the request with a backend handle.
    ///
    /// # Errors
    /// Returns error if the request was already completed or its session is gone.
    pub fn report_context(&self, handle: BackendHandle) -> Result<(), ShellError> {
        self.sink.report_context(&self.kind, handle)
    }

    /// Reject the request.
    ///
    /// # Errors
    /// Returns error if the request was already completed or its session is gone.
    pub fn operation_complete(&self, error: BackendError) -> Result<(), ShellError> {
        self.sink.operation_complete(&self.kind, error)
    }

    /// Deliver command output to the next pending Receive.
    ///
    /// # Errors
    /// Returns `NotFound` once the command has been torn down.
    pub async fn receive_result(&self, output: BackendOutput) -> Result<(), ShellError> {
        self.sink.receive_result(&self.kind, output).await
    }
}

impl fmt::Debug for PluginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRequest")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
