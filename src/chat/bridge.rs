//! Dispatch bridge between the reader tasks and the owning context.
//!
//! [`ChannelBridge`] re-posts every listener callback onto a bounded
//! [`mpsc`] channel whose single receiver is drained by the chat session in
//! the owner's task. Each reader awaits its `send` before reading again, so
//! per-stream order is the read order and nothing is coalesced.
//!
//! [`DirectListener`] is the degraded mode: callbacks run synchronously on
//! the reader task. Only suitable when the callback is itself thread-safe.

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use tokio::sync::mpsc;
use tracing::debug;

use crate::chat::listener::{StreamEvent, StreamListener, StreamSource};

/// Create a bridge and the receiver that drains it.
///
/// `capacity` bounds the number of undelivered callbacks; a full channel
/// applies back-pressure to the readers, which in turn stop draining the
/// child's pipes.
#[must_use]
pub fn channel(capacity: usize) -> (ChannelBridge, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelBridge { tx }, rx)
}

/// [`StreamListener`] that forwards callbacks onto a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelBridge {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelBridge {
    async fn post(&self, event: StreamEvent) {
        if self.tx.send(event).await.is_err() {
            debug!("bridge: receiver dropped, discarding stream event");
        }
    }
}

impl StreamListener for ChannelBridge {
    fn on_data(&self, source: StreamSource, bytes: Bytes) -> BoxFuture<'_, ()> {
        Box::pin(self.post(StreamEvent::Data { source, bytes }))
    }

    fn on_finished(&self, source: StreamSource) -> BoxFuture<'_, ()> {
        Box::pin(self.post(StreamEvent::Finished { source }))
    }
}

/// [`StreamListener`] that invokes `callback` directly on the reader task.
pub struct DirectListener<F> {
    callback: F,
}

impl<F> DirectListener<F>
where
    F: Fn(StreamEvent) + Send + Sync,
{
    /// Wrap `callback`.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> StreamListener for DirectListener<F>
where
    F: Fn(StreamEvent) + Send + Sync,
{
    fn on_data(&self, source: StreamSource, bytes: Bytes) -> BoxFuture<'_, ()> {
        (self.callback)(StreamEvent::Data { source, bytes });
        Box::pin(future::ready(()))
    }

    fn on_finished(&self, source: StreamSource) -> BoxFuture<'_, ()> {
        (self.callback)(StreamEvent::Finished { source });
        Box::pin(future::ready(()))
    }
}

impl<F> std::fmt::Debug for DirectListener<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectListener").finish_non_exhaustive()
    }
}
