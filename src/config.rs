//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{AppError, Result};

/// Chunk size used by the stream readers: 32 KiB.
pub const DEFAULT_READ_BUFFER_BYTES: usize = 32 * 1024;

/// Upper bound on unterminated text held by the framer: 1 MiB.
pub const DEFAULT_MAX_BUFFERED_BYTES: usize = 1_048_576;

fn default_agent_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_interpreter() -> String {
    "python".into()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-u".into()]
}

fn default_agent_script() -> String {
    "sublime-ibus-agent.py".into()
}

fn default_terminator() -> String {
    "\n".into()
}

fn default_read_buffer_bytes() -> usize {
    DEFAULT_READ_BUFFER_BYTES
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_buffered_bytes() -> usize {
    DEFAULT_MAX_BUFFERED_BYTES
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document yields a configuration
/// that launches `python -u sublime-ibus-agent.py` from the current directory.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the agent program; the child starts in it.
    #[serde(default = "default_agent_dir")]
    pub agent_dir: PathBuf,
    /// Program launched to host the agent script.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    /// Arguments placed between the interpreter and the script path.
    #[serde(default = "default_interpreter_args")]
    pub interpreter_args: Vec<String>,
    /// Agent script file name, resolved against the working directory.
    #[serde(default = "default_agent_script")]
    pub agent_script: String,
    /// Message terminator on both directions of the pipe.
    #[serde(default = "default_terminator")]
    pub terminator: String,
    /// Maximum bytes requested by a single stream read.
    #[serde(default = "default_read_buffer_bytes")]
    pub read_buffer_bytes: usize,
    /// Bound of the reader-to-owner event channel.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Unterminated text allowed to accumulate before it is discarded.
    #[serde(default = "default_max_buffered_bytes")]
    pub max_buffered_bytes: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent_dir: default_agent_dir(),
            interpreter: default_interpreter(),
            interpreter_args: default_interpreter_args(),
            agent_script: default_agent_script(),
            terminator: default_terminator(),
            read_buffer_bytes: default_read_buffer_bytes(),
            channel_capacity: default_channel_capacity(),
            max_buffered_bytes: default_max_buffered_bytes(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Command line used to launch the agent that lives in `working_dir`.
    #[must_use]
    pub fn argv(&self, working_dir: &Path) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.interpreter_args.len() + 2);
        argv.push(self.interpreter.clone());
        argv.extend(self.interpreter_args.iter().cloned());
        argv.push(
            working_dir
                .join(&self.agent_script)
                .to_string_lossy()
                .into_owned(),
        );
        argv
    }

    /// Check the invariants the chat layer relies on.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.terminator.is_empty() {
            return Err(AppError::Config("terminator must not be empty".into()));
        }

        if self.interpreter.trim().is_empty() {
            return Err(AppError::Config("interpreter must not be empty".into()));
        }

        if self.agent_script.trim().is_empty() {
            return Err(AppError::Config("agent_script must not be empty".into()));
        }

        if self.read_buffer_bytes == 0 {
            return Err(AppError::Config(
                "read_buffer_bytes must be greater than zero".into(),
            ));
        }

        if self.channel_capacity == 0 {
            return Err(AppError::Config(
                "channel_capacity must be greater than zero".into(),
            ));
        }

        if self.max_buffered_bytes == 0 {
            return Err(AppError::Config(
                "max_buffered_bytes must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
