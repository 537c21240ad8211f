#![forbid(unsafe_code)]

//! Line-framed subprocess chat between an editor and an input-method agent.
//!
//! - [`chat`] spawns the child, reads its streams on background tasks and
//!   frames stdout into terminator-delimited messages delivered on the
//!   owner's task.
//! - [`agent`] wraps a chat session into a start/stop/push façade with a
//!   single inbound callback, plus typed outbound commands and inbound
//!   event dispatch.

pub mod agent;
pub mod chat;
pub mod config;
pub mod errors;

pub use agent::CommandAgent;
pub use config::GlobalConfig;
pub use errors::{AppError, Result};
