//! Child process handle.
//!
//! Spawns one agent process with all three standard streams piped:
//! - stdin stays with the handle for [`ChildProcess::write`].
//! - stdout and stderr are consumed by two reader tasks
//!   (see [`crate::chat::reader`]) that report to a [`StreamListener`].
//!
//! [`ChildProcess::terminate`] is the only cancellation primitive. It is
//! idempotent: the first call clears the listener slot, signals the
//! process and cancels the readers; later calls do nothing.
//!
//! A terminated child receives exactly one signal. Dropping the handle
//! afterwards leaves it to finish its SIGTERM handling and the runtime
//! reaps it. Only a handle dropped without `terminate` kills a child that
//! is still running.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chat::listener::{ListenerSlot, StreamListener, StreamSource};
use crate::chat::reader::{spawn_stream_reader, ReaderExit};
use crate::config::DEFAULT_READ_BUFFER_BYTES;
use crate::{AppError, Result};

/// Options applied when launching a child process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Working directory of the child; inherits ours when `None`.
    pub current_dir: Option<PathBuf>,
    /// Maximum bytes requested by a single stream read.
    pub read_buffer_bytes: usize,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            current_dir: None,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
        }
    }
}

/// Handle to one running (or exited) child process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    slot: Arc<ListenerSlot>,
    cancel: CancellationToken,
    readers: Vec<JoinHandle<ReaderExit>>,
}

impl ChildProcess {
    /// Launch `argv[0]` with arguments `argv[1..]` and start both readers.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn("empty command line")` when `argv` is empty.
    /// - `AppError::Spawn("failed to spawn …")` when the OS refuses to launch
    ///   the executable.
    /// - `AppError::Spawn("failed to capture …")` when a pipe is missing.
    pub fn start(
        argv: &[String],
        listener: Arc<dyn StreamListener>,
        config: &SpawnConfig,
    ) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| AppError::Spawn("empty command line".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = &config.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| AppError::Spawn(format!("failed to spawn {program}: {err}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture child stderr".into()))?;

        let pid = child.id();
        let slot = Arc::new(ListenerSlot::new(listener));
        let cancel = CancellationToken::new();

        let readers = vec![
            spawn_stream_reader(
                StreamSource::Stdout,
                stdout,
                Arc::clone(&slot),
                config.read_buffer_bytes,
                cancel.clone(),
            ),
            spawn_stream_reader(
                StreamSource::Stderr,
                stderr,
                Arc::clone(&slot),
                config.read_buffer_bytes,
                cancel.clone(),
            ),
        ];

        info!(?pid, program = program.as_str(), "child process started");

        Ok(Self {
            child,
            pid,
            stdin: Some(stdin),
            slot,
            cancel,
            readers,
        })
    }

    /// OS process id captured at spawn time.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Write `bytes` to the child's stdin and flush.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Write` if the handle was terminated, the process
    /// has exited, or the pipe rejects the write.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.slot.is_cleared() {
            return Err(AppError::Write("process has been terminated".into()));
        }

        if let Ok(Some(status)) = self.child.try_wait() {
            return Err(AppError::Write(format!("process has exited: {status}")));
        }

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AppError::Write("stdin is closed".into()))?;

        stdin.write_all(bytes).await.map_err(|err| {
            warn!(pid = ?self.pid, error = %err, "write to child stdin failed");
            AppError::Write(format!("write failed: {err}"))
        })?;
        stdin
            .flush()
            .await
            .map_err(|err| AppError::Write(format!("flush failed: {err}")))?;

        Ok(())
    }

    /// Signal the process to terminate. Only the first call has an effect.
    ///
    /// No listener callback is dispatched after the first call returns.
    pub fn terminate(&mut self) {
        if !self.slot.clear() {
            return;
        }

        self.cancel.cancel();
        self.stdin = None;

        if let Err(err) = send_terminate(&mut self.child) {
            warn!(pid = ?self.pid, error = %err, "failed to signal child process");
        } else {
            debug!(pid = ?self.pid, "termination signal sent");
        }
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.slot.is_cleared()
    }

    /// `true` while the process is still running. Never blocks.
    pub fn poll(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(err) => {
                warn!(pid = ?self.pid, error = %err, "failed to poll child process");
                false
            }
        }
    }

    /// Exit status once known, `None` while the process runs.
    ///
    /// A process killed by a signal on Unix reports the negated signal
    /// number.
    pub fn exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => exit_status_code(status),
            Ok(None) => None,
            Err(err) => {
                warn!(pid = ?self.pid, error = %err, "failed to poll child process");
                None
            }
        }
    }

    /// Wait for the process to exit and return its exit code.
    ///
    /// Closes stdin first so an agent that reads until EOF can finish.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if waiting on the process fails.
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        self.stdin = None;
        let status = self.child.wait().await?;
        Ok(exit_status_code(status))
    }

    /// Wait for both reader tasks to finish.
    pub async fn join_readers(&mut self) {
        for handle in self.readers.drain(..) {
            if let Err(err) = handle.await {
                warn!(pid = ?self.pid, error = %err, "reader task failed");
            }
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        self.cancel.cancel();
        if !self.slot.clear() {
            return;
        }

        if let Ok(None) = self.child.try_wait() {
            debug!(pid = ?self.pid, "handle dropped without terminate, killing child");
            if let Err(err) = self.child.start_kill() {
                warn!(pid = ?self.pid, error = %err, "failed to kill child process");
            }
        }
    }
}

#[cfg(unix)]
fn exit_status_code(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;

    status.code().or_else(|| status.signal().map(|sig| -sig))
}

#[cfg(not(unix))]
fn exit_status_code(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // `id()` is `None` once the child has been reaped.
    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}
