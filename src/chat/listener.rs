//! Stream listener contract shared by the readers and the dispatch bridge.
//!
//! A [`ChildProcess`](crate::chat::process::ChildProcess) owns one
//! [`ListenerSlot`]. Both stream readers look the listener up through the
//! slot before every callback, so clearing the slot in `terminate()` stops
//! all further deliveries without racing a reader that is mid-dispatch on a
//! half-cleared reference.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use futures_util::future::BoxFuture;

/// Readable child stream a callback originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamSource {
    /// Response stream; framed into messages.
    Stdout,
    /// Diagnostic stream; never framed.
    Stderr,
}

impl Display for StreamSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// A listener callback reified as a value so it can cross a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty chunk read from `source`.
    Data {
        /// Stream the bytes were read from.
        source: StreamSource,
        /// Raw bytes exactly as returned by one read call.
        bytes: Bytes,
    },
    /// `source` reached end-of-stream.
    Finished {
        /// Stream that closed.
        source: StreamSource,
    },
}

/// Receiver of raw reader output.
///
/// Implementations are invoked from the reader tasks, never from the owner's
/// context. Each call completes before the reader issues its next read, so
/// events from one stream arrive in read order.
pub trait StreamListener: Send + Sync {
    /// A chunk of bytes was read from `source`.
    fn on_data(&self, source: StreamSource, bytes: Bytes) -> BoxFuture<'_, ()>;

    /// `source` reached end-of-stream. Only stdout reports this.
    fn on_finished(&self, source: StreamSource) -> BoxFuture<'_, ()>;
}

/// Guarded, clearable listener reference shared by the readers and the
/// process handle.
pub struct ListenerSlot {
    killed: AtomicBool,
    listener: Mutex<Option<Arc<dyn StreamListener>>>,
}

impl ListenerSlot {
    /// Create a slot holding `listener`.
    #[must_use]
    pub fn new(listener: Arc<dyn StreamListener>) -> Self {
        Self {
            killed: AtomicBool::new(false),
            listener: Mutex::new(Some(listener)),
        }
    }

    /// Current listener, or `None` once the slot has been cleared.
    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn StreamListener>> {
        if self.killed.load(Ordering::Acquire) {
            return None;
        }
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear the listener. Returns `true` only for the first call.
    pub fn clear(&self) -> bool {
        if self.killed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    /// Whether [`clear`](Self::clear) has been called.
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("killed", &self.is_cleared())
            .finish_non_exhaustive()
    }
}
