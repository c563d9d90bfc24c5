// The cargo_bin! macro requires build script setup that's overkill for simple tests.
#![allow(deprecated)]

use assert_cmd::cargo::cargo_bin;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn test_help_flag() {
    let output = Command::new(cargo_bin("wlsim"))
        .arg("--help")
        .output()
        .expect("failed to execute");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(stdout.contains("--time"));
    assert!(stdout.contains("--load"));
}

#[test]
fn test_demo_runs_and_reports() {
    let output = Command::new(cargo_bin("wlsim"))
        .args(["--time", "60000", "--log-level", "warn"])
        .output()
        .expect("failed to execute");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(predicate::str::contains("Game time: 60000 ms").eval(&stdout));
    assert!(predicate::str::is_match("Checksum: [0-9a-f]{16}").unwrap().eval(&stdout));
}

#[test]
fn test_verify_passes() {
    let output = Command::new(cargo_bin("wlsim"))
        .args(["--time", "90000", "--seed", "7", "--verify", "--log-level", "error"])
        .output()
        .expect("failed to execute");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Determinism check passed"));
}

#[test]
fn test_save_then_load_continues() {
    let dir = tempfile::tempdir().unwrap();
    let save = dir.path().join("game.json");

    let first = Command::new(cargo_bin("wlsim"))
        .args(["--time", "30000", "--log-level", "error", "--save"])
        .arg(&save)
        .output()
        .expect("failed to execute");
    assert!(first.status.success(), "stderr: {}", String::from_utf8_lossy(&first.stderr));
    assert!(save.exists());

    let second = Command::new(cargo_bin("wlsim"))
        .args(["--time", "30000", "--log-level", "error", "--load"])
        .arg(&save)
        .output()
        .expect("failed to execute");
    assert!(second.status.success(), "stderr: {}", String::from_utf8_lossy(&second.stderr));
    assert!(String::from_utf8_lossy(&second.stdout).contains("Game time: 60000 ms"));
}

#[test]
fn test_missing_savegame_is_reported() {
    let output = Command::new(cargo_bin("wlsim"))
        .args(["--load", "/nonexistent/game.json", "--time", "1"])
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("/nonexistent/game.json"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.json");
    std::fs::write(&config, r#"{ "flag_capacity": 0 }"#).unwrap();

    let output = Command::new(cargo_bin("wlsim"))
        .arg("--config")
        .arg(&config)
        .output()
        .expect("failed to execute");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("flag_capacity"));
}
