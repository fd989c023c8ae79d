//! The `sudolikeaboss` binary: stdout, stderr and exit status.

mod common;

use std::process::Output;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio::process::Command;

use common::{Behavior, MockHelper, PASSWORD, serve_websocket};
use sudolikeaboss::state;

async fn run_binary(temp: &TempDir, uri: &str, timeout: &str, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sudolikeaboss"))
        .args(args)
        .args(["--timeout", timeout])
        .env("XDG_CONFIG_HOME", temp.path().join("config"))
        .env("SUDOLIKEABOSS_STATE_DIRECTORY", temp.path().join("state"))
        .env("SUDOLIKEABOSS_WEBSOCKET_URI", uri)
        .env_remove("RUST_LOG")
        .output()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_password_is_the_only_stdout_line() {
    let temp = TempDir::new().unwrap();
    let identity = state::load_or_create(&temp.path().join("state")).unwrap();
    let addr = serve_websocket(MockHelper::new(&identity, Behavior::default())).await;

    let output = run_binary(&temp, &format!("ws://{addr}/4"), "10", &["-vv"]).await;

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8(output.stdout).unwrap(), format!("{PASSWORD}\n"));
}

#[tokio::test]
async fn test_timeout_exits_nonzero_without_output() {
    let temp = TempDir::new().unwrap();
    let identity = state::load_or_create(&temp.path().join("state")).unwrap();
    let behavior = Behavior {
        silent: true,
        ..Behavior::default()
    };
    let addr = serve_websocket(MockHelper::new(&identity, behavior)).await;

    let start = Instant::now();
    let output = run_binary(&temp, &format!("ws://{addr}/4"), "1", &[]).await;

    assert_eq!(output.status.code(), Some(124));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("timed out"));
    assert!(start.elapsed() < Duration::from_secs(6));
}

#[tokio::test]
async fn test_register_when_already_registered() {
    let temp = TempDir::new().unwrap();
    let identity = state::load_or_create(&temp.path().join("state")).unwrap();
    let addr = serve_websocket(MockHelper::new(&identity, Behavior::default())).await;

    let output = run_binary(&temp, &format!("ws://{addr}/4"), "10", &["register"]).await;

    assert!(output.status.success());
    assert!(output.stdout.is_empty());
    assert!(
        String::from_utf8_lossy(&output.stderr).contains("sudolikeaboss is already registered.")
    );
}

#[tokio::test]
async fn test_corrupt_state_fails() {
    let temp = TempDir::new().unwrap();
    let state_dir = temp.path().join("state");
    std::fs::create_dir_all(&state_dir).unwrap();
    std::fs::write(state_dir.join("state.json"), "not json").unwrap();

    let output = run_binary(&temp, "ws://127.0.0.1:9/4", "5", &[]).await;

    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty());
    assert!(String::from_utf8_lossy(&output.stderr).contains("corrupt"));
}
