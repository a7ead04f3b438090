//! Integration tests for the command line.
//!
//! None of these need a running Ollama server, a display or a tray. Startup
//! failures are provoked on purpose and must exit with status 255.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a Command for the oclip binary
fn oclip() -> Command {
    Command::cargo_bin("oclip").unwrap()
}

/// Command isolated from the user's config, with nothing to attach to.
fn isolated(dir: &TempDir) -> Command {
    let mut cmd = oclip();
    cmd.arg("--config")
        .arg(dir.path().join("oclip.conf"))
        .args(["--host", "http://127.0.0.1:9", "--no-tray", "--no-download"]);
    cmd
}

#[test]
fn test_help_command() {
    oclip()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Improve clipboard text"))
        .stdout(predicate::str::contains("--model"))
        .stdout(predicate::str::contains("--ollama-path"))
        .stdout(predicate::str::contains("--force-path"));
}

#[test]
fn test_version_command() {
    oclip()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("oclip"));
}

#[test]
fn test_unknown_flag_rejected() {
    oclip()
        .arg("--definitely-not-a-flag")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unexpected argument"));
}

#[test]
fn test_poll_interval_lower_bound() {
    oclip()
        .args(["--poll-interval-ms", "1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("poll-interval-ms"));
}

#[test]
fn test_force_path_without_path_fails() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .arg("--force-path")
        .assert()
        .code(255)
        .stderr(predicate::str::contains("--force-path requires --ollama-path"));
}

#[test]
fn test_missing_ollama_path_fails() {
    let dir = TempDir::new().unwrap();
    isolated(&dir)
        .arg("--ollama-path")
        .arg(dir.path().join("no-such-ollama"))
        .assert()
        .code(255)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_invalid_hotkey_in_config_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("oclip.conf"), "trigger_hotkey=ctrl+bogus\n").unwrap();

    isolated(&dir)
        .assert()
        .code(255)
        .stderr(predicate::str::contains("trigger_hotkey"));
}

#[test]
fn test_init_failure_leaves_config_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("oclip.conf");

    isolated(&dir)
        .args(["--force-path", "--model", "qwen2"])
        .assert()
        .code(255);

    // Settings are only written by a normal shutdown
    assert!(!path.exists());
}
