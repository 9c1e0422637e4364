use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

#[test]
fn test_cli_version() {
    let mut cmd = Command::cargo_bin("procwarden").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("procwarden"));
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("procwarden").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Process supervision daemon"))
        .stdout(predicate::str::contains("unprotect"));
}

#[test]
fn test_status_without_daemon_fails() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("missing.sock");
    let mut cmd = Command::cargo_bin("procwarden").unwrap();
    cmd.args(["status", "--socket"])
        .arg(&socket)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Daemon not running"));
}

#[test]
fn test_daemon_with_missing_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let mut cmd = Command::cargo_bin("procwarden").unwrap();
    cmd.current_dir(&temp_dir)
        .args(["daemon", "--config", "nope.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_daemon_with_invalid_config_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("procwarden.json");
    std::fs::write(
        &config,
        r#"{"services": [{"name": "web", "start": {"execute": "sleep"}, "retries": 0}]}"#,
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("procwarden").unwrap();
    cmd.args(["daemon", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config error"));
}

#[test]
fn test_restart_requires_name() {
    let mut cmd = Command::cargo_bin("procwarden").unwrap();
    cmd.arg("restart").assert().failure();
}
