//! Unit tests for chat session framing and lifecycle guards, without a
//! child process.

use bytes::Bytes;

use ime_bridge::chat::{ChatHandler, ChatSession, StreamEvent, StreamSource};
use ime_bridge::AppError;

#[derive(Debug, Default)]
struct Recorder {
    messages: Vec<String>,
    stderr: Vec<String>,
    truncated: Vec<String>,
    connects: usize,
    closes: usize,
}

impl ChatHandler for Recorder {
    fn process_data(&mut self, message: String) {
        self.messages.push(message);
    }

    fn handle_connect(&mut self) {
        self.connects += 1;
    }

    fn handle_close(&mut self) {
        self.closes += 1;
    }

    fn handle_stderr(&mut self, text: &str) {
        self.stderr.push(text.to_owned());
    }

    fn handle_truncated(&mut self, residual: String) {
        self.truncated.push(residual);
    }
}

fn session() -> ChatSession<Recorder> {
    let mut session = ChatSession::new(Recorder::default());
    session.set_terminator("\n");
    session
}

fn stdout(bytes: &'static [u8]) -> StreamEvent {
    StreamEvent::Data {
        source: StreamSource::Stdout,
        bytes: Bytes::from_static(bytes),
    }
}

#[test]
fn handle_read_invokes_process_data_per_message() {
    let mut session = session();
    session.handle_read(b"ab").unwrap();
    session.handle_read(b"c\nde").unwrap();
    session.handle_read(b"f\n").unwrap();

    assert_eq!(session.handler().messages, vec!["abc", "def"]);
}

#[test]
fn handle_read_without_terminator_is_config_error() {
    let mut session = ChatSession::new(Recorder::default());
    let err = session.handle_read(b"abc\n").unwrap_err();
    assert!(matches!(err, AppError::Config(_)), "got: {err:?}");
    assert!(session.handler().messages.is_empty());
}

#[test]
fn framer_is_created_on_first_read_and_kept() {
    let mut session = ChatSession::new(Recorder::default());
    assert!(session.handle_read(b"lost").is_err());
    assert_eq!(session.residual(), "");

    session.set_terminator("|");
    session.handle_read(b"a|b").unwrap();
    assert_eq!(session.residual(), "b");

    session.handle_read(b"c|").unwrap();
    assert_eq!(session.handler().messages, vec!["a", "bc"]);
    assert_eq!(session.residual(), "");
}

#[test]
fn start_with_empty_terminator_fails_before_spawning() {
    let mut session = ChatSession::new(Recorder::default());
    let err = session
        .start(&["definitely-not-a-real-program-xyz".to_owned()])
        .unwrap_err();

    assert!(matches!(err, AppError::Config(_)), "got: {err:?}");
    assert!(!session.is_running());
    assert_eq!(session.handler().connects, 0);
}

#[test]
fn stop_without_start_is_not_running() {
    let mut session = session();
    let err = session.stop().unwrap_err();
    assert!(matches!(err, AppError::NotRunning(_)), "got: {err:?}");
}

#[tokio::test]
async fn send_without_start_is_not_running() {
    let mut session = session();
    let err = session.send("create_imcontext()\n").await.unwrap_err();
    assert!(matches!(err, AppError::NotRunning(_)), "got: {err:?}");

    let err = session.push("x\n").await.unwrap_err();
    assert!(matches!(err, AppError::NotRunning(_)), "got: {err:?}");
}

#[tokio::test]
async fn pump_without_start_returns_false() {
    let mut session = session();
    assert!(!session.pump().await);
}

#[test]
fn stderr_chunks_are_never_framed() {
    let mut session = session();
    session.handle_event(StreamEvent::Data {
        source: StreamSource::Stderr,
        bytes: Bytes::from_static(b"Traceback\nline 2\n"),
    });

    assert!(session.handler().messages.is_empty());
    assert_eq!(session.handler().stderr, vec!["Traceback\nline 2\n"]);
    assert_eq!(session.residual(), "");
}

#[test]
fn stdout_finished_reports_residual_then_closes_once() {
    let mut session = session();
    session.handle_event(stdout(b"done\npartial"));
    session.handle_event(StreamEvent::Finished {
        source: StreamSource::Stdout,
    });
    session.handle_event(StreamEvent::Finished {
        source: StreamSource::Stdout,
    });

    let handler = session.handler();
    assert_eq!(handler.messages, vec!["done"]);
    assert_eq!(handler.truncated, vec!["partial"]);
    assert_eq!(handler.closes, 1, "handle_close must fire exactly once");
    assert!(session.is_closed());
}

#[test]
fn stderr_finished_does_not_close_session() {
    let mut session = session();
    session.handle_event(StreamEvent::Finished {
        source: StreamSource::Stderr,
    });

    assert_eq!(session.handler().closes, 0);
    assert!(!session.is_closed());
}

#[test]
fn clean_close_reports_no_truncation() {
    let mut session = session();
    session.handle_event(stdout(b"a\nb\n"));
    session.handle_close();

    assert_eq!(session.handler().messages, vec!["a", "b"]);
    assert!(session.handler().truncated.is_empty());
    assert_eq!(session.handler().closes, 1);
}

#[test]
fn decode_error_is_absorbed_by_handle_event() {
    let mut session = session();
    session.handle_event(stdout(b"\xff\xfe\n"));
    session.handle_event(stdout(b"after\n"));

    assert_eq!(session.handler().messages, vec!["after"]);
}
