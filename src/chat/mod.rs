//! Line-framed subprocess chat.
//!
//! This module spawns a long-lived child process and exchanges
//! terminator-delimited UTF-8 messages with it over its standard streams.
//!
//! Submodules:
//! - `listener`: callback contract between readers and the bridge.
//! - `process`: child process handle (spawn, write, terminate, poll).
//! - `reader`: per-stream background read loops.
//! - `bridge`: marshals reader callbacks onto the owner's context.
//! - `framing`: terminator scanning over arbitrarily split chunks.
//! - `session`: the chat session tying the pieces together.

pub mod bridge;
pub mod framing;
pub mod listener;
pub mod process;
pub mod reader;
pub mod session;

pub use framing::LineFramer;
pub use listener::{StreamEvent, StreamListener, StreamSource};
pub use process::ChildProcess;
pub use session::{ChatHandler, ChatSession, LoggingHandler, SessionOptions};
