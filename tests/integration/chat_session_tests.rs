//! Integration tests for chat sessions driving real child processes.

use ime_bridge::chat::{ChatSession, SessionOptions};
use ime_bridge::AppError;

use super::test_helpers::{pump_until, sh, Recorder};

fn cat_session() -> ChatSession<Recorder> {
    let mut session = ChatSession::new(Recorder::default());
    session.set_terminator("\n");
    session.start(&["cat".to_owned()]).unwrap();
    session
}

#[tokio::test]
async fn echoed_lines_arrive_in_order() {
    let mut session = cat_session();
    assert_eq!(session.handler().connects, 1);

    let count = 300;
    for i in 0..count {
        session.send(&format!("line {i}\n")).await.unwrap();
    }
    pump_until(&mut session, |h| h.messages.len() >= count).await;

    let expected: Vec<String> = (0..count).map(|i| format!("line {i}")).collect();
    assert_eq!(session.handler().messages, expected);
    session.stop().unwrap();
}

#[tokio::test]
async fn small_read_buffer_still_frames_correctly() {
    let options = SessionOptions {
        read_buffer_bytes: 3,
        channel_capacity: 1,
        ..SessionOptions::default()
    };
    let mut session = ChatSession::with_options(Recorder::default(), options);
    session.set_terminator("\n");
    session.start(&["cat".to_owned()]).unwrap();

    session
        .push("{\"command\":\"ibus_commit_text_cb\",\"args\":[0,\"漢字\"]}\nsecond\n")
        .await
        .unwrap();
    pump_until(&mut session, |h| h.messages.len() >= 2).await;

    assert_eq!(
        session.handler().messages,
        vec![
            "{\"command\":\"ibus_commit_text_cb\",\"args\":[0,\"漢字\"]}",
            "second"
        ]
    );
    session.stop().unwrap();
}

#[tokio::test]
async fn second_start_fails_without_spawning() {
    let mut session = cat_session();
    let pid = session.process_mut().and_then(|p| p.pid());

    let err = session.start(&["cat".to_owned()]).unwrap_err();
    assert!(matches!(err, AppError::AlreadyRunning(_)), "got: {err:?}");
    assert_eq!(session.process_mut().and_then(|p| p.pid()), pid);
    assert_eq!(session.handler().connects, 1);

    session.stop().unwrap();
}

#[tokio::test]
async fn stop_releases_session_and_second_stop_fails() {
    let mut session = cat_session();
    session.stop().unwrap();

    assert!(!session.is_running());
    assert!(!session.pump().await);
    assert!(matches!(session.stop(), Err(AppError::NotRunning(_))));
    assert!(matches!(
        session.send("x\n").await,
        Err(AppError::NotRunning(_))
    ));
}

#[tokio::test]
async fn session_can_start_again_after_stop() {
    let mut session = cat_session();
    session.stop().unwrap();

    session.start(&["cat".to_owned()]).unwrap();
    assert_eq!(session.handler().connects, 2);
    session.send("again\n").await.unwrap();
    pump_until(&mut session, |h| !h.messages.is_empty()).await;
    assert_eq!(session.handler().messages, vec!["again"]);
    session.stop().unwrap();
}

#[tokio::test]
async fn child_exit_closes_session_and_reports_truncation() {
    let mut session = ChatSession::new(Recorder::default());
    session.set_terminator("\n");
    session.start(&sh("printf 'one\\ntwo\\npartial'")).unwrap();

    pump_until(&mut session, |h| h.closes == 1).await;
    session.run_until_closed().await;

    let handler = session.handler();
    assert_eq!(handler.messages, vec!["one", "two"]);
    assert_eq!(handler.truncated, vec!["partial"]);
    assert!(session.is_closed());
    assert!(!session.pump().await, "nothing is delivered after close");

    // The process already exited; stop only releases the session.
    session.stop().unwrap();
}

#[tokio::test]
async fn stderr_is_diagnostic_only() {
    let mut session = ChatSession::new(Recorder::default());
    session.set_terminator("\n");
    session
        .start(&sh("echo 'oops' >&2; sleep 0.2; echo hi"))
        .unwrap();

    pump_until(&mut session, |h| h.closes == 1).await;

    let handler = session.handler();
    assert_eq!(handler.messages, vec!["hi"]);
    assert!(handler.stderr.contains("oops"), "stderr: {:?}", handler.stderr);
    session.stop().unwrap();
}

#[tokio::test]
async fn custom_terminator_frames_child_output() {
    let mut session = ChatSession::new(Recorder::default());
    session.set_terminator("<EOM>");
    session
        .start(&sh("printf 'a<EO'; sleep 0.1; printf 'M>b\\nc<EOM>'"))
        .unwrap();

    pump_until(&mut session, |h| h.closes == 1).await;
    assert_eq!(session.handler().messages, vec!["a", "b\nc"]);
    session.stop().unwrap();
}

#[tokio::test]
async fn missing_program_is_spawn_error_and_session_stays_idle() {
    let mut session = ChatSession::new(Recorder::default());
    session.set_terminator("\n");
    let err = session
        .start(&["/nonexistent/ime-bridge-agent".to_owned()])
        .unwrap_err();

    assert!(matches!(err, AppError::Spawn(_)), "got: {err:?}");
    assert!(!session.is_running());
    assert_eq!(session.handler().connects, 0);
}
