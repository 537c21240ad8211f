//! Command agent façade.
//!
//! [`CommandAgent`] owns at most one [`ChatSession`] talking to the
//! input-method agent program and exposes:
//! - lifecycle: [`start`](CommandAgent::start), [`stop`](CommandAgent::stop),
//!   [`restart`](CommandAgent::restart);
//! - outbound: [`push`](CommandAgent::push) for raw lines and
//!   [`execute`](CommandAgent::execute) for typed [`AgentCommand`]s;
//! - inbound: one callback slot set by
//!   [`register_callback`](CommandAgent::register_callback), fed from
//!   [`pump`](CommandAgent::pump).
//!
//! The agent is an ordinary value. Owners that need it in several places
//! pass a reference or wrap it themselves.

pub mod command;
pub mod event;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::chat::session::{ChatHandler, ChatSession, SessionOptions};
use crate::config::GlobalConfig;
use crate::{AppError, Result};

pub use command::AgentCommand;
pub use event::{dispatch, dispatch_line, parse_inbound_line, AgentEvent, EventHandler, Inbound};

/// Line terminator of the agent protocol, in both directions.
pub const AGENT_TERMINATOR: &str = "\n";

/// Inbound message callback.
pub type MessageCallback = Box<dyn FnMut(String) + Send>;

type CallbackSlot = Arc<Mutex<Option<MessageCallback>>>;

/// [`ChatHandler`] routing every framed message to the agent's callback.
pub struct AgentDelegate {
    callback: CallbackSlot,
}

impl ChatHandler for AgentDelegate {
    fn process_data(&mut self, message: String) {
        let mut slot = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_mut() {
            Some(callback) => callback(message),
            None => debug!(len = message.len(), "no callback registered, dropping message"),
        }
    }

    fn handle_connect(&mut self) {
        info!("agent connected");
    }

    fn handle_close(&mut self) {
        info!("agent stdout closed");
    }

    fn handle_stderr(&mut self, text: &str) {
        debug!(text = %text.trim_end(), "agent stderr");
    }
}

impl std::fmt::Debug for AgentDelegate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentDelegate").finish_non_exhaustive()
    }
}

/// Starts, feeds and stops the input-method agent process.
pub struct CommandAgent {
    config: GlobalConfig,
    chat: Option<ChatSession<AgentDelegate>>,
    callback: CallbackSlot,
    working_dir: Option<PathBuf>,
}

impl std::fmt::Debug for CommandAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandAgent")
            .field("config", &self.config)
            .field("running", &self.chat.is_some())
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl CommandAgent {
    /// Create a stopped agent.
    #[must_use]
    pub fn new(config: GlobalConfig) -> Self {
        Self {
            config,
            chat: None,
            callback: Arc::new(Mutex::new(None)),
            working_dir: None,
        }
    }

    /// Configuration the agent launches with.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Directory passed to the last [`start`](Self::start).
    #[must_use]
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Whether a session is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.chat.is_some()
    }

    /// Replace the inbound-message callback. Only the newest one is called.
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(String) + Send + 'static,
    {
        *self.callback.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(callback));
    }

    /// Launch the agent program found in `working_dir`. No-op when started.
    ///
    /// The session always frames on [`AGENT_TERMINATOR`]; the configured
    /// terminator only applies to raw chat sessions.
    ///
    /// # Errors
    ///
    /// - `AppError::Spawn` — the agent program could not be launched.
    pub fn start(&mut self, working_dir: impl AsRef<Path>) -> Result<()> {
        let working_dir = working_dir.as_ref();
        if self.chat.is_some() {
            debug!(dir = %working_dir.display(), "agent already started");
            return Ok(());
        }

        let options = SessionOptions {
            current_dir: Some(working_dir.to_path_buf()),
            ..SessionOptions::from(&self.config)
        };
        let delegate = AgentDelegate {
            callback: Arc::clone(&self.callback),
        };
        let mut chat = ChatSession::with_options(delegate, options);
        chat.set_terminator(AGENT_TERMINATOR);
        chat.start(&self.config.argv(working_dir))?;

        info!(dir = %working_dir.display(), "agent started");
        self.working_dir = Some(working_dir.to_path_buf());
        self.chat = Some(chat);
        Ok(())
    }

    /// Terminate the agent and drop the session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotRunning` if the agent is not started.
    pub fn stop(&mut self) -> Result<()> {
        let mut chat = self
            .chat
            .take()
            .ok_or_else(|| AppError::NotRunning("agent is not started".into()))?;
        chat.stop()
    }

    /// [`stop`](Self::stop) if running, then [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Propagates errors from `start`; `NotRunning` from `stop` is ignored.
    pub fn restart(&mut self, working_dir: impl AsRef<Path>) -> Result<()> {
        match self.stop() {
            Ok(()) | Err(AppError::NotRunning(_)) => {}
            Err(err) => return Err(err),
        }
        self.start(working_dir)
    }

    /// Write `data` verbatim to the agent's stdin.
    ///
    /// # Errors
    ///
    /// - `AppError::NotRunning` — the agent is not started.
    /// - `AppError::Write` — the pipe is closed.
    pub async fn push(&mut self, data: &str) -> Result<()> {
        debug!(data = ?data, "push");
        let chat = self
            .chat
            .as_mut()
            .ok_or_else(|| AppError::NotRunning("agent is not started".into()))?;
        chat.push(data).await
    }

    /// Alias of [`push`](Self::push).
    ///
    /// # Errors
    ///
    /// See [`push`](Self::push).
    pub async fn send(&mut self, data: &str) -> Result<()> {
        self.push(data).await
    }

    /// Render `command`, append the terminator and push it.
    ///
    /// # Errors
    ///
    /// See [`push`](Self::push).
    pub async fn execute(&mut self, command: &AgentCommand) -> Result<()> {
        let line = command.to_line(AGENT_TERMINATOR);
        self.push(&line).await
    }

    /// Push the bootstrap command sequence.
    ///
    /// # Errors
    ///
    /// See [`push`](Self::push).
    pub async fn setup(&mut self) -> Result<()> {
        for command in command::bootstrap() {
            self.execute(&command).await?;
        }
        Ok(())
    }

    /// Type `keys` into the default input context.
    ///
    /// # Errors
    ///
    /// See [`push`](Self::push).
    pub async fn feed_keys(&mut self, keys: &str) -> Result<()> {
        for command in command::key_sequence(keys) {
            self.execute(&command).await?;
        }
        Ok(())
    }

    /// Deliver the next reader event. `false` once nothing is left.
    pub async fn pump(&mut self) -> bool {
        match self.chat.as_mut() {
            Some(chat) => chat.pump().await,
            None => false,
        }
    }

    /// Pump until the agent's stdout closes or the agent is stopped.
    pub async fn run_until_closed(&mut self) {
        while self.pump().await {}
    }

    /// Exit code of the agent process, once it has exited.
    pub fn exit_code(&mut self) -> Option<i32> {
        self.chat
            .as_mut()
            .and_then(ChatSession::process_mut)
            .and_then(crate::chat::ChildProcess::exit_code)
    }
}
