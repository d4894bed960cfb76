//! Config loading tests.
//!
//! Exercises the `fairshared` binary end to end: config files written
//! to a temp dir, flag overrides on top of them, validation errors, and
//! a short JSON run.

use std::io::Write;
use std::process::Command;

use fairshare_core::ClusterConfig;
use tempfile::NamedTempFile;

fn fairshared() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_fairshared"));
    cmd.env("RUST_LOG", "error");
    cmd
}

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ── Effective config ────────────────────────────────────────────

#[test]
fn config_file_values_are_applied() {
    let file = config_file(
        r#"
workers = 7
rounds = 2

[pools]
slots = 3
units = 40
"#,
    );

    let output = fairshared()
        .args(["config", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let effective = ClusterConfig::from_toml_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(effective.workers, 7);
    assert_eq!(effective.rounds, 2);
    assert_eq!(effective.pools.slots, 3);
    assert_eq!(effective.pools.units, 40);
    assert_eq!(effective.jobs.min_demand, 10);
}

#[test]
fn flags_override_config_file() {
    let file = config_file("workers = 7\n");

    let output = fairshared()
        .args(["config", "--workers", "3", "--units", "25", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());

    let effective = ClusterConfig::from_toml_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(effective.workers, 3);
    assert_eq!(effective.pools.units, 25);
}

#[test]
fn config_file_round_trips_through_core() {
    let file = config_file(
        r#"
[jobs]
min_demand = 2
max_demand = 4
seed = 11

[execution]
unit_millis = 5
"#,
    );
    let config = ClusterConfig::from_file(file.path()).unwrap();
    assert_eq!(config.demand_range(), 2..=4);
    assert_eq!(config.jobs.seed, Some(11));
    assert_eq!(config.execution.unit_millis, 5);
    config.validate().unwrap();
}

// ── Rejected configs ────────────────────────────────────────────

#[test]
fn zero_workers_fails_before_running() {
    let output = fairshared()
        .args(["run", "--workers", "0"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("at least one worker"));
}

#[test]
fn demand_without_pool_headroom_is_rejected() {
    let output = fairshared()
        .args(["config", "--units", "20"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no headroom"));
}

#[test]
fn malformed_file_is_reported() {
    let file = config_file("workers = \"many\"\n");
    let output = fairshared()
        .args(["config", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("invalid config"));
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let output = fairshared()
        .args(["config", "--config"])
        .arg(&path)
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("absent.toml"));
}

// ── Short run ───────────────────────────────────────────────────

#[test]
fn seeded_run_prints_json_report() {
    let file = config_file(
        r#"
workers = 3
rounds = 2

[jobs]
min_demand = 1
max_demand = 3
seed = 5

[execution]
unit_millis = 1
"#,
    );

    let output = fairshared()
        .args(["run", "--output", "json", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["coordinator"]["rounds"].as_array().unwrap().len(), 2);
    assert_eq!(report["workers"].as_array().unwrap().len(), 3);
}
