//! CLI Integration Tests
//!
//! These tests verify the wiring between the CLI and the core library.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use workoutlink_core::logging::read_workout_timeline;

// ============================================================================
// Test Utilities
// ============================================================================

fn cli_cmd() -> Command {
    Command::cargo_bin("workoutlink").expect("Failed to find workoutlink binary")
}

/// Write a peer config with throttling disabled
fn unthrottled_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("peer.json");
    std::fs::write(&path, r#"{"min_metrics_interval_ms": 0}"#).unwrap();
    path
}

// ============================================================================
// Simulate Command Tests
// ============================================================================

#[test]
fn test_simulate_ends_workout_after_reconnect() {
    let dir = TempDir::new().unwrap();

    cli_cmd()
        .arg("--config")
        .arg(unthrottled_config(&dir))
        .args(["simulate", "--samples", "2", "--sample-interval-ms", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("controller: start(37, 1)"))
        .stdout(predicate::str::contains("1 envelope(s) waiting in the queue"))
        .stdout(predicate::str::contains("delivered 1 queued envelope(s)"))
        .stdout(predicate::str::contains("phase: Ended"))
        .stdout(predicate::str::contains("samples received: 2"));
}

#[test]
fn test_simulate_throttles_with_default_config() {
    cli_cmd()
        .args(["simulate", "--samples", "3", "--sample-interval-ms", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("samples received: 1"));
}

#[test]
fn test_simulate_writes_one_log_file_per_peer() {
    let dir = TempDir::new().unwrap();
    let logs = dir.path().join("logs");

    let output = cli_cmd()
        .arg("-vv")
        .arg("--log-dir")
        .arg(&logs)
        .args(["simulate", "--samples", "1", "--sample-interval-ms", "0"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let workout_id = stdout
        .lines()
        .find_map(|line| line.strip_prefix("Workout "))
        .expect("report names the workout")
        .trim()
        .to_string();

    let names: Vec<String> = std::fs::read_dir(logs.join("raw"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.ends_with("_controller.jsonl")), "{:?}", names);
    assert!(names.iter().any(|n| n.ends_with("_sensor.jsonl")), "{:?}", names);

    let timeline = read_workout_timeline(&logs, &workout_id).unwrap();
    assert!(timeline
        .iter()
        .any(|e| e.instance == "sensor" && e.msg == "Publishing workout state"));
    assert!(timeline
        .iter()
        .any(|e| e.instance == "controller" && e.role.as_deref() == Some("controller")));
}

#[test]
fn test_simulate_rejects_bad_config() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("peer.json");
    std::fs::write(&path, r#"{"event_channel_capacity": 0}"#).unwrap();

    cli_cmd()
        .arg("--config")
        .arg(&path)
        .arg("simulate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

// ============================================================================
// Decode / Encode Command Tests
// ============================================================================

#[test]
fn test_decode_command_with_defaults() {
    cli_cmd()
        .args(["decode", r#"{"v":1,"kind":"command","payload":{"command":"start"}}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains("kind: command"))
        .stdout(predicate::str::contains("version: 1"))
        .stdout(predicate::str::contains("activity_type: 37"));
}

#[test]
fn test_decode_reports_workout_id() {
    cli_cmd()
        .args([
            "decode",
            r#"{"kind":"workoutState","payload":{"workoutID":"abc","state":"ended","timestamp":1.5}}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("version: 0"))
        .stdout(predicate::str::contains("workoutID: abc"));
}

#[test]
fn test_decode_rejects_unknown_kind() {
    cli_cmd()
        .args(["decode", r#"{"v":1,"kind":"rewind","payload":{}}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown message kind: rewind"));
}

#[test]
fn test_encode_command() {
    cli_cmd()
        .args(["encode", "command", r#"{"command":"end"}"#])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""kind":"command""#))
        .stdout(predicate::str::contains(r#""v":1"#))
        .stdout(predicate::str::contains(r#""activityType":37"#));
}

#[test]
fn test_encode_rejects_malformed_payload() {
    cli_cmd()
        .args(["encode", "liveMetrics", r#"{"heartRate":120}"#])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Malformed liveMetrics payload"));
}
