#![cfg(feature = "cli")]

use std::path::PathBuf;
use std::process::{Command, Output};

fn drtio(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_drtio"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("drtio should run")
}

fn json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON object")
}

fn temp_config(tag: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "drtio-{tag}-{}-{}.json",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::write(&path, contents).expect("config should be writable");
    path
}

#[test]
fn simulate_delivers_every_write_in_order() {
    let output = drtio(&["--format", "json", "simulate", "--writes", "12", "--channel", "7"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report = json(&output);
    assert_eq!(report["writes_submitted"], 12);
    assert_eq!(report["events_delivered"], 12);
    assert_eq!(report["in_order"], true);
    assert_eq!(report["master"]["link"], "ready");
    assert_eq!(report["master"]["counters"]["timeouts"], 0);
}

#[test]
fn simulate_with_random_phase_and_fixed_bridge() {
    let output = drtio(&[
        "--format", "json", "simulate", "--phase", "random", "--seed", "42", "--bridge",
        "fixed", "--delay", "3", "--writes", "4",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(json(&output)["events_delivered"], 4);
}

#[test]
fn echo_reports_rtt_summary() {
    let output = drtio(&["--format", "json", "echo", "--count", "3"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report = json(&output);
    assert_eq!(report["count"], 3);
    let min = report["rtt_min"].as_u64().expect("rtt_min");
    let max = report["rtt_max"].as_u64().expect("rtt_max");
    assert!(min > 0 && min <= max);
    assert!(max <= 2000);
}

#[test]
fn pretty_output_is_field_value_lines() {
    let output = drtio(&["--format", "pretty", "echo", "--count", "1"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.lines().any(|line| line.starts_with("rtt_min=")));
}

#[test]
fn config_file_is_loaded_and_overridden() {
    let path = temp_config(
        "cfg",
        r#"{"serial": {"latency": 2, "lock_cycles": 8}, "phase": "local_first"}"#,
    );
    let output = drtio(&[
        "--format",
        "json",
        "echo",
        "--count",
        "1",
        "--config",
        path.to_str().expect("utf-8 path"),
        "--latency",
        "30",
    ]);
    let _ = std::fs::remove_file(&path);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    // 30 symbols each way dominate the round trip.
    let rtt = json(&output)["rtt_min"].as_u64().expect("rtt_min");
    assert!(rtt >= 60, "rtt {rtt}");
}

#[test]
fn malformed_config_exits_60() {
    let path = temp_config("bad", "{ not json");
    let output = drtio(&["echo", "--config", path.to_str().expect("utf-8 path")]);
    let _ = std::fs::remove_file(&path);
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error: parse"));
}

#[test]
fn link_that_never_trains_exits_124() {
    let output = drtio(&["echo", "--latency", "50", "--max-wait", "20"]);
    assert_eq!(output.status.code(), Some(124));
}

#[test]
fn zero_channels_is_usage_error() {
    let output = drtio(&["simulate", "--channels", "0"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn version_prints_package_version() {
    let output = drtio(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("drtio {}", env!("CARGO_PKG_VERSION")));
}
