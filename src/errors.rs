//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of the chat layer.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure (including an empty terminator).
    Config(String),
    /// The agent program could not be launched.
    Spawn(String),
    /// Writing to the child's stdin failed.
    Write(String),
    /// The operation needs an active session and there is none.
    NotRunning(String),
    /// A session was started while another one is still active.
    AlreadyRunning(String),
    /// Received bytes could not be decoded into a message.
    Decode(String),
    /// A framed message does not follow the inbound JSON protocol.
    Protocol(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Write(msg) => write!(f, "write: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::AlreadyRunning(msg) => write!(f, "already running: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
