//! Smoke tests driving a real process through a PTY.
//!
//! A tiny `sh` loop stands in for `reduce`: it prints a prompt, echoes each command
//! back with a prefix, and prints the prompt again.

#![cfg(unix)]

use ami_adapters::{PromptSession, PtyConfig, PtyTransport, SessionConfig, SessionState};
use ami_proto::Error;
use std::time::Duration;

const FAKE_REDUCE: &str = r#"printf 'FAKE>'; while read -r line; do echo "got: $line"; printf 'FAKE>'; done"#;

fn sh_config(script: &str, cwd: &std::path::Path) -> PtyConfig {
    PtyConfig {
        program: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        cwd: Some(cwd.to_path_buf()),
        ..PtyConfig::default()
    }
}

fn session_config() -> SessionConfig {
    SessionConfig {
        prompt: "FAKE>".to_string(),
        startup_timeout: Duration::from_secs(5),
        idle_timeout: Some(Duration::from_secs(5)),
    }
}

#[tokio::test]
async fn test_round_trip_through_pty() {
    let dir = tempfile::tempdir().unwrap();
    let transport = PtyTransport::spawn(&sh_config(FAKE_REDUCE, dir.path())).unwrap();
    let mut session = PromptSession::start(transport, session_config()).await.unwrap();

    let block = session.send("list files").await.unwrap();
    assert!(block.contains("got: list files"), "unexpected block: {block:?}");
    assert_eq!(session.state(), SessionState::Ready);

    let block = session.send("file A-1.raw").await.unwrap();
    assert!(block.contains("got: file A-1.raw"), "unexpected block: {block:?}");

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_startup_error_when_tool_exits_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let transport = PtyTransport::spawn(&sh_config("echo 'reduce: not found'; exit 3", dir.path())).unwrap();
    let result = PromptSession::start(transport, session_config()).await;
    assert!(matches!(result, Err(Error::Startup(_))));
}

#[tokio::test]
async fn test_stall_when_tool_dies_mid_command() {
    let dir = tempfile::tempdir().unwrap();
    let transport =
        PtyTransport::spawn(&sh_config("printf 'FAKE>'; read -r line; exit 0", dir.path())).unwrap();
    let mut session = PromptSession::start(transport, session_config()).await.unwrap();

    let result = session.send("flag bad data").await;
    assert!(matches!(result, Err(Error::ProtocolStall { .. })));
    assert_eq!(session.state(), SessionState::Stalled);
}
