//! CLI test cases for the `essay-worker` binary.

use std::process::Command;

use assert_cmd::prelude::*;

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("essay-worker").unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_config_check_with_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let output = cmd()
        .arg("--config-check")
        .arg("--db-path")
        .arg(dir.path().join("essay-pipeline.db"))
        .arg("--storage-root")
        .arg(dir.path().join("storage"))
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("poll_interval_ms"));
}

#[test]
fn test_rejects_a_nonzero_llm_temperature_via_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(&config_path, "[extractor]\nllm_temperature = 0.7\n").unwrap();

    let output = cmd()
        .arg("--config-check")
        .arg("--config")
        .arg(&config_path)
        .arg("--db-path")
        .arg(dir.path().join("essay-pipeline.db"))
        .arg("--storage-root")
        .arg(dir.path().join("storage"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("llm_temperature"));
}
