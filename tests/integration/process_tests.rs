//! Integration tests for the child process handle.

use std::sync::{Arc, Mutex};

use ime_bridge::chat::bridge::DirectListener;
use ime_bridge::chat::process::{ChildProcess, SpawnConfig};
use ime_bridge::chat::{StreamEvent, StreamListener, StreamSource};
use ime_bridge::AppError;

use super::test_helpers::{sh, TIMEOUT};

fn recording_listener() -> (Arc<Mutex<Vec<StreamEvent>>>, Arc<dyn StreamListener>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let listener: Arc<dyn StreamListener> =
        Arc::new(DirectListener::new(move |event| sink.lock().unwrap().push(event)));
    (events, listener)
}

#[tokio::test]
async fn missing_executable_is_spawn_error() {
    let (_events, listener) = recording_listener();
    let err = ChildProcess::start(
        &["/nonexistent/ime-bridge-agent".to_owned()],
        listener,
        &SpawnConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(err, AppError::Spawn(_)), "got: {err:?}");
}

#[tokio::test]
async fn empty_argv_is_spawn_error() {
    let (_events, listener) = recording_listener();
    let err = ChildProcess::start(&[], listener, &SpawnConfig::default()).unwrap_err();
    assert!(matches!(err, AppError::Spawn(_)), "got: {err:?}");
}

#[tokio::test]
async fn exit_code_is_absent_while_running_and_known_after_exit() {
    let (events, listener) = recording_listener();
    let mut process = ChildProcess::start(&sh("read line; exit 3"), listener, &SpawnConfig::default())
        .unwrap();

    assert!(process.poll(), "process must be running before input");
    assert_eq!(process.exit_code(), None);

    process.write(b"go\n").await.unwrap();
    let code = tokio::time::timeout(TIMEOUT, process.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, Some(3));
    assert!(!process.poll());
    assert_eq!(process.exit_code(), Some(3));

    tokio::time::timeout(TIMEOUT, process.join_readers())
        .await
        .unwrap();
    let events = events.lock().unwrap();
    assert_eq!(
        *events,
        vec![StreamEvent::Finished {
            source: StreamSource::Stdout
        }],
        "stdout EOF must be reported once; stderr EOF is silent"
    );
}

#[tokio::test]
async fn write_after_exit_is_write_error() {
    let (_events, listener) = recording_listener();
    let mut process = ChildProcess::start(&sh("exit 0"), listener, &SpawnConfig::default()).unwrap();
    tokio::time::timeout(TIMEOUT, process.wait())
        .await
        .unwrap()
        .unwrap();

    let err = process.write(b"late\n").await.unwrap_err();
    assert!(matches!(err, AppError::Write(_)), "got: {err:?}");
}

#[tokio::test]
async fn terminate_is_idempotent_and_silences_listener() {
    let (events, listener) = recording_listener();
    let mut process = ChildProcess::start(&["cat".to_owned()], listener, &SpawnConfig::default())
        .unwrap();
    assert!(process.poll());

    process.terminate();
    process.terminate();
    assert!(process.is_terminated());

    let code = tokio::time::timeout(TIMEOUT, process.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(code, Some(-15), "cat must die from a single SIGTERM");

    tokio::time::timeout(TIMEOUT, process.join_readers())
        .await
        .unwrap();
    assert!(
        events.lock().unwrap().is_empty(),
        "no callback may be delivered after terminate"
    );

    let err = process.write(b"x\n").await.unwrap_err();
    assert!(matches!(err, AppError::Write(_)), "got: {err:?}");
}

#[tokio::test]
async fn stdout_and_stderr_are_both_forwarded() {
    let (events, listener) = recording_listener();
    let mut process = ChildProcess::start(
        &sh("printf out; printf err >&2"),
        listener,
        &SpawnConfig::default(),
    )
    .unwrap();
    tokio::time::timeout(TIMEOUT, process.wait())
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(TIMEOUT, process.join_readers())
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let collect = |wanted: StreamSource| -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Data { source, bytes } if *source == wanted => Some(bytes.to_vec()),
                _ => None,
            })
            .flatten()
            .collect()
    };
    assert_eq!(collect(StreamSource::Stdout), b"out");
    assert_eq!(collect(StreamSource::Stderr), b"err");
}

#[tokio::test]
async fn working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let (events, listener) = recording_listener();
    let config = SpawnConfig {
        current_dir: Some(dir.path().to_path_buf()),
        ..SpawnConfig::default()
    };
    let mut process = ChildProcess::start(&sh("pwd -P"), listener, &config).unwrap();
    tokio::time::timeout(TIMEOUT, process.wait())
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(TIMEOUT, process.join_readers())
        .await
        .unwrap();

    let stdout: Vec<u8> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Data {
                source: StreamSource::Stdout,
                bytes,
            } => Some(bytes.to_vec()),
            _ => None,
        })
        .flatten()
        .collect();
    let expected = dir.path().canonicalize().unwrap();
    assert_eq!(
        String::from_utf8(stdout).unwrap().trim_end(),
        expected.to_string_lossy()
    );
}

#[tokio::test]
async fn dropping_a_terminated_handle_sends_no_second_signal() {
    let dir = tempfile::tempdir().unwrap();
    let (events, listener) = recording_listener();
    let config = SpawnConfig {
        current_dir: Some(dir.path().to_path_buf()),
        ..SpawnConfig::default()
    };
    let mut process = ChildProcess::start(
        &sh("trap 'echo cleaned > done.txt; exit 0' TERM; echo ready; while :; do sleep 0.05; done"),
        listener,
        &config,
    )
    .unwrap();

    let ready = tokio::time::timeout(TIMEOUT, async {
        while events.lock().unwrap().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(ready.is_ok(), "child never reported ready");

    process.terminate();
    drop(process);

    let marker = dir.path().join("done.txt");
    let found = tokio::time::timeout(TIMEOUT, async {
        while !marker.exists() {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(found.is_ok(), "TERM handler did not run after drop");
}
