//! Command session: one command attached to a shell.

use remote_shell_core::{BackendHandle, CommandId, ReceiveResult, ShellError};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};

pub(crate) type AcceptSender = oneshot::Sender<Result<BackendHandle, ShellError>>;
pub(crate) type ReceiveSender = oneshot::Sender<Result<ReceiveResult, ShellError>>;

/// Completion state of one outbound stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    pub name: String,
    pub done: bool,
}

struct PendingReceive {
    ticket: u64,
    reply: ReceiveSender,
}

/// A command attached to a shell.
///
/// Owned by its shell's state and only ever touched under the shell lock.
pub(crate) struct CommandSession {
    id: CommandId,
    streams: Vec<StreamState>,
    backend_handle: Option<BackendHandle>,
    pending_accept: Option<AcceptSender>,
    pending_receive: Option<PendingReceive>,
    next_ticket: u64,
    /// Bumped every time a Receive is installed; dropped with the command.
    receive_ready: watch::Sender<u64>,
}

impl CommandSession {
    pub(crate) fn new(id: CommandId, stream_names: &[String], accept: AcceptSender) -> Self {
        let (receive_ready, _) = watch::channel(0);
        Self {
            id,
            streams: stream_names
                .iter()
                .map(|name| StreamState {
                    name: name.clone(),
                    done: false,
                })
                .collect(),
            backend_handle: None,
            pending_accept: Some(accept),
            pending_receive: None,
            next_ticket: 0,
            receive_ready,
        }
    }

    pub(crate) const fn id(&self) -> &CommandId {
        &self.id
    }

    pub(crate) fn streams(&self) -> &[StreamState] {
        &self.streams
    }

    pub(crate) const fn backend_handle(&self) -> Option<BackendHandle> {
        self.backend_handle
    }

    /// Take the acceptance channel and store the backend handle.
    pub(crate) fn accept(&mut self, handle: BackendHandle) -> Option<AcceptSender> {
        let accept = self.pending_accept.take()?;
        self.backend_handle = Some(handle);
        Some(accept)
    }

    /// Take the acceptance channel for a rejection.
    pub(crate) fn take_accept(&mut self) -> Option<AcceptSender> {
        self.pending_accept.take()
    }

    /// Install the reply channel of a Receive in the single pending slot.
    ///
    /// A slot whose caller has already gone away is discarded first.
    pub(crate) fn install_receive(&mut self, reply: ReceiveSender) -> Result<u64, ShellError> {
        if self
            .pending_receive
            .as_ref()
            .is_some_and(|pending| !pending.reply.is_closed())
        {
            return Err(ShellError::AlreadyExists(format!(
                "a receive is already pending on command {}",
                self.id
            )));
        }

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending_receive = Some(PendingReceive { ticket, reply });
        self.receive_ready.send_modify(|generation| *generation = generation.wrapping_add(1));
        Ok(ticket)
    }

    /// Take and clear the pending Receive, skipping one whose caller is gone.
    pub(crate) fn claim_receive(&mut self) -> Option<ReceiveSender> {
        self.pending_receive
            .take()
            .map(|pending| pending.reply)
            .filter(|reply| !reply.is_closed())
    }

    /// Take the pending Receive back, but only if it is still the one
    /// identified by `ticket`.
    pub(crate) fn reclaim_receive(&mut self, ticket: u64) -> Option<ReceiveSender> {
        if self
            .pending_receive
            .as_ref()
            .is_some_and(|pending| pending.ticket == ticket)
        {
            self.pending_receive.take().map(|pending| pending.reply)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) const fn has_pending_receive(&self) -> bool {
        self.pending_receive.is_some()
    }

    /// Watch that changes whenever a Receive is installed.
    pub(crate) fn subscribe_ready(&self) -> watch::Receiver<u64> {
        self.receive_ready.subscribe()
    }

    /// Mark the first stream named `name` as done.
    ///
    /// Returns `false` if no outbound stream has that name.
    pub(crate) fn mark_done(&mut self, name: &str) -> bool {
        match self.streams.iter_mut().find(|stream| stream.name == name) {
            Some(stream) => {
                stream.done = true;
                true
            }
            None => false,
        }
    }

    /// The first declared outbound stream.
    pub(crate) fn primary_stream_mut(&mut self) -> Option<&mut StreamState> {
        self.streams.first_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command() -> (CommandSession, oneshot::Receiver<Result<BackendHandle, ShellError>>) {
        let (tx, rx) = oneshot::channel();
        let names = ["stdout".to_string(), "stderr".to_string()];
        (CommandSession::new(CommandId::generate(), &names, tx), rx)
    }

    #[test]
    fn test_streams_start_not_done() {
        let (cmd, _rx) = command();
        assert_eq!(cmd.streams().len(), 2);
        assert!(cmd.streams().iter().all(|s| !s.done));
    }

    #[test]
    fn test_mark_done_matches_name() {
        let (mut cmd, _rx) = command();
        assert!(cmd.mark_done("stderr"));
        assert!(!cmd.streams()[0].done);
        assert!(cmd.streams()[1].done);
        assert!(!cmd.mark_done("stdin"));
    }

    #[test]
    fn test_single_pending_receive() {
        let (mut cmd, _rx) = command();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();
        cmd.install_receive(tx1).unwrap();
        assert!(matches!(
            cmd.install_receive(tx2),
            Err(ShellError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_abandoned_receive_is_replaced() {
        let (mut cmd, _rx) = command();
        let (tx1, rx1) = oneshot::channel();
        cmd.install_receive(tx1).unwrap();
        drop(rx1);
        let (tx2, _rx2) = oneshot::channel();
        assert!(cmd.install_receive(tx2).is_ok());
    }

    #[test]
    fn test_claim_is_exactly_once() {
        let (mut cmd, _rx) = command();
        let (tx, _reply) = oneshot::channel();
        cmd.install_receive(tx).unwrap();
        assert!(cmd.claim_receive().is_some());
        assert!(cmd.claim_receive().is_none());
        assert!(!cmd.has_pending_receive());
    }

    #[test]
    fn test_reclaim_checks_ticket() {
        let (mut cmd, _rx) = command();
        let (tx1, _r1) = oneshot::channel();
        let first = cmd.install_receive(tx1).unwrap();
        cmd.claim_receive().unwrap();

        let (tx2, _r2) = oneshot::channel();
        cmd.install_receive(tx2).unwrap();
        assert!(cmd.reclaim_receive(first).is_none());
        assert!(cmd.has_pending_receive());
    }

    #[test]
    fn test_install_wakes_watchers() {
        let (mut cmd, _rx) = command();
        let mut ready = cmd.subscribe_ready();
        assert!(!ready.has_changed().unwrap());
        let (tx, _reply) = oneshot::channel();
        cmd.install_receive(tx).unwrap();
        assert!(ready.has_changed().unwrap());
    }

    #[test]
    fn test_accept_only_once() {
        let (mut cmd, _rx) = command();
        assert!(cmd.accept(BackendHandle::new(7)).is_some());
        assert_eq!(cmd.backend_handle(), Some(BackendHandle::new(7)));
        assert!(cmd.accept(BackendHandle::new(8)).is_none());
        assert_eq!(cmd.backend_handle(), Some(BackendHandle::new(7)));
    }
}
