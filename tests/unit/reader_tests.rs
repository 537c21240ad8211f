//! Unit tests for the stream reader loop.
//!
//! Covers:
//! - chunks are bounded by the read buffer size and forwarded in order
//! - stdout EOF reports `on_finished` exactly once, after the last chunk
//! - stderr EOF is absorbed silently
//! - a cleared slot receives nothing
//! - cancellation stops a reader blocked on a silent stream

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use tokio_util::sync::CancellationToken;

use ime_bridge::chat::listener::ListenerSlot;
use ime_bridge::chat::reader::{run_stream_reader, ReaderExit};
use ime_bridge::chat::{StreamEvent, StreamListener, StreamSource};

#[derive(Default)]
struct Recording {
    events: Mutex<Vec<StreamEvent>>,
}

impl Recording {
    fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StreamListener for Recording {
    fn on_data(&self, source: StreamSource, bytes: Bytes) -> BoxFuture<'_, ()> {
        self.events
            .lock()
            .unwrap()
            .push(StreamEvent::Data { source, bytes });
        Box::pin(future::ready(()))
    }

    fn on_finished(&self, source: StreamSource) -> BoxFuture<'_, ()> {
        self.events
            .lock()
            .unwrap()
            .push(StreamEvent::Finished { source });
        Box::pin(future::ready(()))
    }
}

fn slot_for(recording: &Arc<Recording>) -> Arc<ListenerSlot> {
    let listener: Arc<dyn StreamListener> = Arc::clone(recording) as Arc<dyn StreamListener>;
    Arc::new(ListenerSlot::new(listener))
}

#[tokio::test]
async fn stdout_chunks_then_single_finished() {
    let recording = Arc::new(Recording::default());
    let slot = slot_for(&recording);
    let input: &[u8] = b"hello world";

    let exit = run_stream_reader(
        StreamSource::Stdout,
        input,
        slot,
        4,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(exit, ReaderExit::Eof);
    let events = recording.events();
    let (last, chunks) = events.split_last().unwrap();
    assert_eq!(
        *last,
        StreamEvent::Finished {
            source: StreamSource::Stdout
        }
    );

    let mut joined = Vec::new();
    for event in chunks {
        match event {
            StreamEvent::Data { source, bytes } => {
                assert_eq!(*source, StreamSource::Stdout);
                assert!(!bytes.is_empty() && bytes.len() <= 4);
                joined.extend_from_slice(bytes);
            }
            StreamEvent::Finished { .. } => panic!("finished reported twice"),
        }
    }
    assert_eq!(joined, input);
}

#[tokio::test]
async fn stderr_eof_is_absorbed() {
    let recording = Arc::new(Recording::default());
    let slot = slot_for(&recording);

    let exit = run_stream_reader(
        StreamSource::Stderr,
        &b"warning\n"[..],
        slot,
        1024,
        CancellationToken::new(),
    )
    .await;

    assert_eq!(exit, ReaderExit::Eof);
    assert_eq!(
        recording.events(),
        vec![StreamEvent::Data {
            source: StreamSource::Stderr,
            bytes: Bytes::from_static(b"warning\n"),
        }]
    );
}

#[tokio::test]
async fn cleared_slot_receives_nothing() {
    let recording = Arc::new(Recording::default());
    let slot = slot_for(&recording);
    slot.clear();

    run_stream_reader(
        StreamSource::Stdout,
        &b"ignored\n"[..],
        slot,
        1024,
        CancellationToken::new(),
    )
    .await;

    assert!(recording.events().is_empty());
}

#[tokio::test]
async fn cancellation_stops_blocked_reader() {
    let recording = Arc::new(Recording::default());
    let slot = slot_for(&recording);
    let cancel = CancellationToken::new();
    // Keep the write half alive so the read half never reaches EOF.
    let (_writer, reader) = tokio::io::duplex(64);

    let handle = tokio::spawn(run_stream_reader(
        StreamSource::Stdout,
        reader,
        slot,
        1024,
        cancel.clone(),
    ));
    cancel.cancel();

    let exit = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("reader must stop after cancellation")
        .unwrap();
    assert_eq!(exit, ReaderExit::Cancelled);
    assert!(recording.events().is_empty(), "no finish on cancellation");
}
