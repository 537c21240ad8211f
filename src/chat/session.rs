//! Line-oriented chat session.
//!
//! A [`ChatSession`] owns at most one [`ChildProcess`], the [`LineFramer`]
//! for its stdout, and the receiving end of the dispatch bridge. Reader
//! tasks never touch session state: they post onto the bridge, and the
//! owner drains it by awaiting [`ChatSession::pump`]. Every handler call
//! therefore happens in the owner's task, one at a time, in stream order.
//!
//! Lifecycle hooks on [`ChatHandler`]:
//!
//! | Hook               | Fires                                          |
//! |--------------------|------------------------------------------------|
//! | `handle_connect`   | once per successful `start`                    |
//! | `process_data`     | once per terminated stdout message             |
//! | `handle_stderr`    | once per stderr chunk (never framed)           |
//! | `handle_truncated` | at stdout EOF if unterminated text remains     |
//! | `handle_close`     | once, at stdout EOF                            |

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chat::bridge;
use crate::chat::framing::LineFramer;
use crate::chat::listener::{StreamEvent, StreamSource};
use crate::chat::process::{ChildProcess, SpawnConfig};
use crate::config::{GlobalConfig, DEFAULT_MAX_BUFFERED_BYTES, DEFAULT_READ_BUFFER_BYTES};
use crate::{AppError, Result};

/// Extension points of a chat session. Every method has a logging default.
pub trait ChatHandler: Send {
    /// A complete message (terminator stripped) arrived on stdout.
    fn process_data(&mut self, message: String) {
        debug!(len = message.len(), data = %message, "process_data");
    }

    /// The child process was started.
    fn handle_connect(&mut self) {
        debug!("handle_connect");
    }

    /// The child's stdout reached end-of-stream.
    fn handle_close(&mut self) {
        debug!("handle_close");
    }

    /// Diagnostic output from the child's stderr.
    fn handle_stderr(&mut self, text: &str) {
        debug!(text = %text.trim_end(), "handle_stderr");
    }

    /// Stdout ended while `residual` was still waiting for a terminator.
    fn handle_truncated(&mut self, residual: String) {
        warn!(
            len = residual.len(),
            residual = %residual,
            "session truncated: stdout closed before terminator"
        );
    }
}

/// [`ChatHandler`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ChatHandler for LoggingHandler {}

/// Tunables for a chat session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Working directory of the child; inherits ours when `None`.
    pub current_dir: Option<PathBuf>,
    /// Maximum bytes requested by a single stream read.
    pub read_buffer_bytes: usize,
    /// Bound of the reader-to-owner event channel.
    pub channel_capacity: usize,
    /// Unterminated text allowed to accumulate.
    pub max_buffered_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            current_dir: None,
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
            channel_capacity: 64,
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
        }
    }
}

impl From<&GlobalConfig> for SessionOptions {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            current_dir: None,
            read_buffer_bytes: config.read_buffer_bytes,
            channel_capacity: config.channel_capacity,
            max_buffered_bytes: config.max_buffered_bytes,
        }
    }
}

/// Terminator-framed conversation with one child process.
#[derive(Debug)]
pub struct ChatSession<H> {
    handler: H,
    terminator: String,
    options: SessionOptions,
    framer: Option<LineFramer>,
    process: Option<ChildProcess>,
    inbox: Option<mpsc::Receiver<StreamEvent>>,
    closed: bool,
}

impl<H: ChatHandler> ChatSession<H> {
    /// Create an idle session. Set a terminator before [`start`](Self::start).
    pub fn new(handler: H) -> Self {
        Self::with_options(handler, SessionOptions::default())
    }

    /// Create an idle session with explicit options.
    pub fn with_options(handler: H, options: SessionOptions) -> Self {
        Self {
            handler,
            terminator: String::new(),
            options,
            framer: None,
            process: None,
            inbox: None,
            closed: false,
        }
    }

    /// Set the message terminator. Takes effect for the next framer, i.e.
    /// the next `start` or the first `handle_read`.
    pub fn set_terminator(&mut self, terminator: impl Into<String>) {
        self.terminator = terminator.into();
    }

    /// Current terminator.
    #[must_use]
    pub fn terminator(&self) -> &str {
        &self.terminator
    }

    /// Shared access to the handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Exclusive access to the handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Whether a child process is associated with this session.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    /// Whether the child's stdout has reached end-of-stream.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The active child process, if any.
    pub fn process_mut(&mut self) -> Option<&mut ChildProcess> {
        self.process.as_mut()
    }

    /// Unterminated stdout text buffered so far.
    #[must_use]
    pub fn residual(&self) -> &str {
        self.framer.as_ref().map_or("", LineFramer::residual)
    }

    /// Launch `argv` and fire `handle_connect`.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyRunning` — a process is already associated.
    /// - `AppError::Config` — the terminator is empty; nothing is spawned.
    /// - `AppError::Spawn` — the process could not be launched.
    pub fn start(&mut self, argv: &[String]) -> Result<()> {
        if let Some(process) = &self.process {
            return Err(AppError::AlreadyRunning(format!(
                "session already owns process {:?}",
                process.pid()
            )));
        }

        let framer = self.new_framer()?;
        debug!(?argv, "start process");

        let (bridge, inbox) = bridge::channel(self.options.channel_capacity);
        let spawn = SpawnConfig {
            current_dir: self.options.current_dir.clone(),
            read_buffer_bytes: self.options.read_buffer_bytes,
        };
        let process = ChildProcess::start(argv, Arc::new(bridge), &spawn)?;

        self.framer = Some(framer);
        self.process = Some(process);
        self.inbox = Some(inbox);
        self.closed = false;
        self.handler.handle_connect();
        Ok(())
    }

    /// Terminate the child if it still runs and release the session.
    ///
    /// Undelivered reader output is discarded.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotRunning` if no process is associated.
    pub fn stop(&mut self) -> Result<()> {
        let mut process = self
            .process
            .take()
            .ok_or_else(|| AppError::NotRunning("chat session has no process".into()))?;

        if process.poll() {
            process.terminate();
        }
        info!(pid = ?process.pid(), "chat session stopped");
        drop(process);

        if let Some(mut inbox) = self.inbox.take() {
            inbox.close();
        }
        self.framer = None;
        Ok(())
    }

    /// Write `data` to the child's stdin as UTF-8.
    ///
    /// # Errors
    ///
    /// - `AppError::NotRunning` — no process is associated.
    /// - `AppError::Write` — the pipe is closed or the process has exited.
    pub async fn send(&mut self, data: &str) -> Result<()> {
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| AppError::NotRunning("chat session has no process".into()))?;
        process.write(data.as_bytes()).await
    }

    /// Alias of [`send`](Self::send).
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn push(&mut self, data: &str) -> Result<()> {
        self.send(data).await
    }

    /// Deliver the next reader event to the handler.
    ///
    /// Returns `false` when there is nothing left to deliver: no process is
    /// associated, or stdout has already closed.
    pub async fn pump(&mut self) -> bool {
        if self.closed {
            return false;
        }
        let Some(inbox) = self.inbox.as_mut() else {
            return false;
        };
        let Some(event) = inbox.recv().await else {
            return false;
        };
        self.handle_event(event);
        true
    }

    /// Pump until stdout closes or the session is released.
    pub async fn run_until_closed(&mut self) {
        while self.pump().await {}
    }

    /// Route one reader event.
    pub fn handle_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Data {
                source: StreamSource::Stdout,
                bytes,
            } => {
                if let Err(err) = self.handle_read(&bytes) {
                    warn!(error = %err, bytes = bytes.len(), "dropping stdout chunk");
                }
            }
            StreamEvent::Data {
                source: StreamSource::Stderr,
                bytes,
            } => {
                self.handler.handle_stderr(&String::from_utf8_lossy(&bytes));
            }
            StreamEvent::Finished {
                source: StreamSource::Stdout,
            } => self.handle_close(),
            StreamEvent::Finished {
                source: StreamSource::Stderr,
            } => {}
        }
    }

    /// Frame one stdout chunk and call `process_data` per completed message.
    ///
    /// Without a running process the framer is created on first use from
    /// the current terminator, so a session can frame data fed by hand.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` — no framer yet and the terminator is empty.
    /// - `AppError::Decode` — see [`LineFramer::handle_read`].
    pub fn handle_read(&mut self, bytes: &[u8]) -> Result<()> {
        let framer = match self.framer.take() {
            Some(framer) => framer,
            None => self.new_framer()?,
        };
        let framer = self.framer.insert(framer);
        let handler = &mut self.handler;
        framer.handle_read(bytes, |message| handler.process_data(message))
    }

    /// Stdout ended: report leftover text, then fire `handle_close`.
    pub fn handle_close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(residual) = self.framer.as_mut().and_then(LineFramer::take_residual) {
            self.handler.handle_truncated(residual);
        }
        self.handler.handle_close();
    }

    fn new_framer(&self) -> Result<LineFramer> {
        Ok(LineFramer::new(self.terminator.clone())?
            .with_max_buffered_bytes(self.options.max_buffered_bytes))
    }
}
