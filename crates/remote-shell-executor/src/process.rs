//! Child-process backend.
//!
//! Every invoked command runs as its own process group. Send data is written
//! to the child's stdin and an end-of-stream on `stdin` closes the pipe.
//! Output from stdout and stderr is pumped into pending Receives, and a final
//! `Done` chunk carrying the exit code follows once the child has exited and
//! both pipes are drained. Any signal tears the group down.

use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    process::Stdio,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use command_group::{AsyncCommandGroup, AsyncGroupChild};
use remote_shell_core::{
    Backend, BackendError, BackendHandle, BackendOutput, CommandLine, ErrorKind, PluginRequest,
    ShellError, SignalCode,
};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, Command},
    sync::oneshot,
};
use tracing::{debug, info, warn};

use crate::command::CommandBuilder;

const fn default_read_buffer_size() -> usize {
    4096
}

/// Process backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Working directory of spawned commands. Inherited when unset.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Largest output chunk read from a pipe at once.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            working_dir: None,
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

type SharedStdin = Arc<tokio::sync::Mutex<Option<ChildStdin>>>;

struct RunningCommand {
    stdin: SharedStdin,
    /// Fired (or dropped) to kill the process group.
    kill: oneshot::Sender<()>,
}

type CommandTable = Arc<Mutex<HashMap<BackendHandle, RunningCommand>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backend running commands as local child processes.
pub struct ProcessBackend {
    config: ProcessConfig,
    next_handle: AtomicU64,
    shells: Mutex<HashSet<BackendHandle>>,
    commands: CommandTable,
}

impl ProcessBackend {
    #[must_use]
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            next_handle: AtomicU64::new(1),
            shells: Mutex::new(HashSet::new()),
            commands: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn next_handle(&self) -> BackendHandle {
        BackendHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Number of commands whose process group is still being supervised.
    #[must_use]
    pub fn running(&self) -> usize {
        lock(&self.commands).len()
    }

    async fn spawn(&self, command_line: &CommandLine) -> Result<AsyncGroupChild, BackendError> {
        let parts = CommandBuilder::from(command_line)
            .build()
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        let (executable, args) = parts
            .into_resolved()
            .await
            .map_err(|e| BackendError::Rejected(e.to_string()))?;

        let mut command = Command::new(&executable);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        debug!(executable = %executable.display(), ?args, "Spawning command");
        Ok(command.group_spawn()?)
    }
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new(ProcessConfig::default())
    }
}

/// Copy one pipe into Receives until it closes or the command goes away.
async fn pump<R>(
    request: PluginRequest,
    stream: &'static str,
    mut reader: R,
    buffer_size: usize,
) -> Result<(), ShellError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) => {
                warn!(kind = %request.kind(), stream, error = %e, "Failed to read command output");
                return Ok(());
            }
        };
        request
            .receive_result(BackendOutput::data(stream, Bytes::copy_from_slice(&buf[..n])))
            .await?;
    }
}

async fn supervise(
    request: PluginRequest,
    mut child: AsyncGroupChild,
    kill: oneshot::Receiver<()>,
    commands: CommandTable,
    handle: BackendHandle,
    buffer_size: usize,
) {
    let stdout = child.inner().stdout.take();
    let stderr = child.inner().stderr.take();
    let stdout = stdout.map(|pipe| tokio::spawn(pump(request.clone(), "stdout", pipe, buffer_size)));
    let stderr = stderr.map(|pipe| tokio::spawn(pump(request.clone(), "stderr", pipe, buffer_size)));

    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill => None,
    };
    let status = match exited {
        Some(status) => status,
        None => {
            if let Err(e) = child.start_kill() {
                warn!(%handle, error = %e, "Failed to kill process group");
            }
            child.wait().await
        }
    };
    let exit_code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(%handle, error = %e, "Failed to wait for command");
            None
        }
    };

    let mut detached = false;
    for pump in [stdout, stderr].into_iter().flatten() {
        match pump.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => detached = true,
            Ok(Err(e)) => warn!(%handle, error = %e, "Output delivery failed"),
            Err(e) => warn!(%handle, error = %e, "Output pump panicked"),
        }
    }

    if !detached {
        match request
            .receive_result(BackendOutput::finished("stdout", exit_code))
            .await
        {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(%handle, error = %e, "Failed to deliver command exit"),
        }
    }

    lock(&commands).remove(&handle);
    info!(%handle, ?exit_code, "Command exited");
}

#[async_trait]
impl Backend for ProcessBackend {
    async fn begin_shell(&self, request: PluginRequest) -> Result<(), BackendError> {
        let handle = self.next_handle();
        lock(&self.shells).insert(handle);

        if let Err(e) = request.report_context(handle) {
            lock(&self.shells).remove(&handle);
            return Err(BackendError::Unavailable(e.to_string()));
        }
        Ok(())
    }

    async fn begin_command(
        &self,
        request: PluginRequest,
        shell: BackendHandle,
        command_line: &CommandLine,
    ) -> Result<(), BackendError> {
        if !lock(&self.shells).contains(&shell) {
            return Err(BackendError::Rejected(format!("unknown shell handle {shell}")));
        }

        let mut child = match self.spawn(command_line).await {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command_line.command, error = %e, "Failed to start command");
                return request
                    .operation_complete(e)
                    .map_err(|e| BackendError::Unavailable(e.to_string()));
            }
        };

        let handle = self.next_handle();
        let stdin: SharedStdin = Arc::new(tokio::sync::Mutex::new(child.inner().stdin.take()));
        let (kill_tx, kill_rx) = oneshot::channel();
        lock(&self.commands).insert(
            handle,
            RunningCommand {
                stdin,
                kill: kill_tx,
            },
        );

        if let Err(e) = request.report_context(handle) {
            lock(&self.commands).remove(&handle);
            if let Err(kill_error) = child.start_kill() {
                warn!(%handle, error = %kill_error, "Failed to kill orphaned command");
            }
            return Err(BackendError::Unavailable(e.to_string()));
        }

        info!(%handle, command = %command_line.command, "Command started");
        tokio::spawn(supervise(
            request,
            child,
            kill_rx,
            Arc::clone(&self.commands),
            handle,
            self.config.read_buffer_size,
        ));
        Ok(())
    }

    async fn send(
        &self,
        _shell: BackendHandle,
        command: BackendHandle,
        stream: &str,
        data: Bytes,
    ) -> Result<(), BackendError> {
        if stream != "stdin" {
            return Err(BackendError::Rejected(format!("unknown input stream {stream}")));
        }
        let stdin = lock(&self.commands)
            .get(&command)
            .map(|running| Arc::clone(&running.stdin))
            .ok_or_else(|| BackendError::Rejected(format!("command {command} has exited")))?;

        let mut stdin = stdin.lock().await;
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| BackendError::Rejected(format!("stdin of {command} is closed")))?;
        pipe.write_all(&data).await?;
        pipe.flush().await?;
        debug!(%command, len = data.len(), "Wrote command input");
        Ok(())
    }

    async fn request_receive(
        &self,
        _request: PluginRequest,
        _shell: BackendHandle,
        command: BackendHandle,
    ) -> Result<(), BackendError> {
        // Output is pushed by the pumps; only refuse commands already gone.
        if lock(&self.commands).contains_key(&command) {
            Ok(())
        } else {
            Err(BackendError::Rejected(format!("command {command} has exited")))
        }
    }

    async fn signal(
        &self,
        _shell: BackendHandle,
        command: BackendHandle,
        code: &SignalCode,
    ) -> Result<(), BackendError> {
        // The session detaches the command on any signal, so the group goes
        // with it.
        let Some(running) = lock(&self.commands).remove(&command) else {
            debug!(%command, %code, "Signal for a command that already exited");
            return Ok(());
        };
        if !code.is_terminate() {
            debug!(%command, %code, "Treating signal as terminate");
        }
        let _ = running.kill.send(());
        info!(%command, %code, "Killing process group");
        Ok(())
    }

    async fn close_input(
        &self,
        _shell: BackendHandle,
        command: BackendHandle,
        stream: &str,
    ) -> Result<(), BackendError> {
        if stream != "stdin" {
            debug!(%command, stream, "Ignoring end of stream for a non-input stream");
            return Ok(());
        }
        let Some(stdin) = lock(&self.commands)
            .get(&command)
            .map(|running| Arc::clone(&running.stdin))
        else {
            debug!(%command, "End of input for a command that already exited");
            return Ok(());
        };

        if stdin.lock().await.take().is_some() {
            debug!(%command, "Closed command input");
        }
        Ok(())
    }

    async fn end_shell(&self, shell: BackendHandle) -> Result<(), BackendError> {
        if lock(&self.shells).remove(&shell) {
            debug!(%shell, "Shell ended");
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use remote_shell_core::{
        CommandId, CommandState, ReceiveResult, ShellDeclaration, ShellId,
        codec::{decode_payload, encode_payload},
    };
    use remote_shell_session::{ShellEngine, StreamInput};
    use tokio::time::timeout;

    use super::*;

    const WAIT: Duration = Duration::from_secs(10);

    type Engine = ShellEngine<Arc<ProcessBackend>>;

    async fn wait_until_idle(backend: &ProcessBackend) {
        timeout(WAIT, async {
            while backend.running() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn start(engine: &Engine, line: CommandLine) -> (ShellId, CommandId) {
        let shell = engine
            .create_shell(ShellDeclaration::new("stdout stderr"))
            .await
            .unwrap();
        let command_id = engine.invoke_command(&shell.shell_id, line).await.unwrap();
        (shell.shell_id, command_id)
    }

    async fn receive(engine: &Engine, shell_id: &ShellId, command_id: &CommandId) -> ReceiveResult {
        timeout(WAIT, engine.receive(shell_id, Some(command_id)))
            .await
            .unwrap()
            .unwrap()
    }

    /// Receive until `Done`, collecting stdout.
    async fn drain(
        engine: &Engine,
        shell_id: &ShellId,
        command_id: &CommandId,
    ) -> (Vec<u8>, ReceiveResult) {
        let mut stdout = Vec::new();
        loop {
            let result = receive(engine, shell_id, command_id).await;
            for chunk in &result.streams {
                if let (Some(data), "stdout") = (&chunk.data, chunk.name.as_str()) {
                    stdout.extend(decode_payload(data, false).unwrap());
                }
            }
            if result.command_state == CommandState::Done {
                return (stdout, result);
            }
        }
    }

    #[tokio::test]
    async fn test_output_and_exit_code() {
        let backend = Arc::new(ProcessBackend::default());
        let engine = ShellEngine::new(Arc::clone(&backend));
        let (shell_id, command_id) =
            start(&engine, CommandLine::new("sh").args(["-c", "echo hello; exit 3"])).await;

        let (stdout, last) = drain(&engine, &shell_id, &command_id).await;
        assert_eq!(stdout, b"hello\n");
        assert_eq!(last.exit_code, Some(3));
        assert!(last.streams[0].end_of_stream);

        engine
            .signal(&shell_id, Some(&command_id), &SignalCode::Terminate)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stdin_is_piped() {
        let backend = Arc::new(ProcessBackend::default());
        let engine = ShellEngine::new(Arc::clone(&backend));
        let (shell_id, command_id) = start(&engine, CommandLine::new("cat")).await;

        let input = StreamInput::new(
            command_id.clone(),
            "stdin",
            Some(encode_payload(b"ping\n", false).unwrap()),
        );
        engine.send(&shell_id, input).await.unwrap();

        let result = receive(&engine, &shell_id, &command_id).await;
        assert_eq!(result.command_state, CommandState::Running);
        let data = result.streams[0].data.as_deref().unwrap();
        assert_eq!(decode_payload(data, false).unwrap(), b"ping\n");

        engine
            .signal(&shell_id, None, &SignalCode::Terminate)
            .await
            .unwrap();
        wait_until_idle(&backend).await;
    }

    #[tokio::test]
    async fn test_end_of_stream_closes_stdin() {
        let backend = Arc::new(ProcessBackend::default());
        let engine = ShellEngine::new(Arc::clone(&backend));
        let (shell_id, command_id) = start(&engine, CommandLine::new("cat")).await;

        let input = StreamInput::new(
            command_id.clone(),
            "stdin",
            Some(encode_payload(b"last line\n", false).unwrap()),
        )
        .end_of_stream();
        engine.send(&shell_id, input).await.unwrap();

        let (stdout, last) = drain(&engine, &shell_id, &command_id).await;
        assert_eq!(stdout, b"last line\n");
        assert_eq!(last.exit_code, Some(0));
        wait_until_idle(&backend).await;
    }

    #[tokio::test]
    async fn test_delete_shell_kills_attached_command() {
        let backend = Arc::new(ProcessBackend::default());
        let engine = ShellEngine::new(Arc::clone(&backend));
        let (shell_id, _) = start(&engine, CommandLine::new("cat")).await;
        assert_eq!(backend.running(), 1);

        engine.delete_shell(&shell_id).await.unwrap();
        wait_until_idle(&backend).await;
        assert!(lock(&backend.shells).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_kills_running_commands() {
        let backend = Arc::new(ProcessBackend::default());
        let engine = ShellEngine::new(Arc::clone(&backend));
        start(&engine, CommandLine::new("cat")).await;
        start(&engine, CommandLine::new("sleep").args(["30"])).await;
        assert_eq!(backend.running(), 2);

        assert_eq!(engine.shutdown().await, 2);
        wait_until_idle(&backend).await;
        assert!(lock(&backend.shells).is_empty());
    }

    #[tokio::test]
    async fn test_missing_executable_is_rejected() {
        let engine = ShellEngine::new(Arc::new(ProcessBackend::default()));
        let shell = engine
            .create_shell(ShellDeclaration::new("stdout"))
            .await
            .unwrap();
        let err = engine
            .invoke_command(&shell.shell_id, CommandLine::new("no-such-binary-9731"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert_eq!(engine.get_shell(&shell.shell_id).unwrap().command_id, None);
    }

    #[tokio::test]
    async fn test_unknown_input_stream() {
        let backend = ProcessBackend::default();
        let handle = BackendHandle::new(1);
        let err = backend
            .send(handle, handle, "stderr", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Rejected(_)));
    }
}
