//! Stream reader tasks.
//!
//! One reader runs per readable child stream. It performs bounded reads
//! (32 KiB by default) and forwards every non-empty chunk to the listener
//! currently held by the [`ListenerSlot`]. Chunk boundaries carry no
//! meaning; the framer downstream tolerates any split point.
//!
//! End-of-stream handling differs by source:
//!
//! | Source   | On EOF                                              |
//! |----------|-----------------------------------------------------|
//! | `stdout` | close the stream, then `on_finished` exactly once   |
//! | `stderr` | close the stream silently                           |
//!
//! A read error is treated like EOF after logging it.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::chat::listener::{ListenerSlot, StreamSource};

/// How a reader loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// The stream reached end-of-stream (or failed).
    Eof,
    /// The owning process handle cancelled the reader.
    Cancelled,
}

/// Read `stream` until EOF or cancellation, forwarding chunks to `slot`.
pub async fn run_stream_reader<R>(
    source: StreamSource,
    mut stream: R,
    slot: Arc<ListenerSlot>,
    read_buffer_bytes: usize,
    cancel: CancellationToken,
) -> ReaderExit
where
    R: AsyncRead + Unpin + Send,
{
    let mut buf = vec![0_u8; read_buffer_bytes.max(1)];

    let exit = loop {
        let read = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(%source, "reader: cancellation received, stopping");
                break ReaderExit::Cancelled;
            }

            read = stream.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                debug!(%source, "reader: EOF detected");
                break ReaderExit::Eof;
            }
            Ok(n) => {
                if let Some(listener) = slot.current() {
                    listener
                        .on_data(source, Bytes::copy_from_slice(&buf[..n]))
                        .await;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                warn!(%source, error = %err, "reader: read failed, treating as EOF");
                break ReaderExit::Eof;
            }
        }
    };

    drop(stream);

    if exit == ReaderExit::Eof && source == StreamSource::Stdout {
        if let Some(listener) = slot.current() {
            listener.on_finished(source).await;
        }
    }

    exit
}

/// Spawn [`run_stream_reader`] on the current tokio runtime.
#[must_use]
pub fn spawn_stream_reader<R>(
    source: StreamSource,
    stream: R,
    slot: Arc<ListenerSlot>,
    read_buffer_bytes: usize,
    cancel: CancellationToken,
) -> JoinHandle<ReaderExit>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(run_stream_reader(
        source,
        stream,
        slot,
        read_buffer_bytes,
        cancel,
    ))
}
