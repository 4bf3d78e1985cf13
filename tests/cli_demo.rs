//! CLI integration tests for the demo and file-driven modes.

use std::fs;
use std::process::Command;

fn value<'a>(stdout: &'a str, key: &str) -> &'a str {
    let prefix = format!("{key}=");
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .unwrap_or_else(|| panic!("{key} line missing from output:\n{stdout}"))
        .trim()
}

#[test]
fn demo_cli_finishes_every_fire() {
    let bin = env!("CARGO_BIN_EXE_firefleet");
    // Run the demo binary with default settings.
    let output = Command::new(bin)
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run demo binary");

    // Demo should exit cleanly.
    assert!(
        output.status.success(),
        "demo exited with non-zero status: {:?}",
        output.status
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("DEMO SUMMARY"), "demo summary missing from output");

    assert_eq!(value(&stdout, "finished"), "true");
    assert_eq!(value(&stdout, "submitted"), "6");
    assert_eq!(value(&stdout, "completed"), "6");
    // The demo injects each fault kind exactly once.
    assert_eq!(value(&stdout, "faults"), "ARRIVAL:1,NOZZLE:1,PACKET_LOSS:1");
}

#[test]
fn run_cli_reads_scenario_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let zones = dir.path().join("zones.csv");
    let events = dir.path().join("events.csv");
    fs::write(&zones, "Zone ID,Zone Start,Zone End\n1,(0;0),(100;100)\n2,(100;0),(200;100)\n").expect("write zones");
    fs::write(
        &events,
        "Time,Zone ID,Event type,Severity\n14:00:00,1,FIRE_DETECTED,Low\n14:00:01,2,DRONE_REQUEST,Moderate\n",
    )
    .expect("write events");

    let output = Command::new(env!("CARGO_BIN_EXE_firefleet"))
        .env("RUST_LOG", "warn")
        .args(["run", "--zones"])
        .arg(&zones)
        .arg("--events")
        .arg(&events)
        .args(["--drones", "2", "--tick-ms", "0", "--pacing-ms", "0"])
        .output()
        .expect("failed to run binary");

    assert!(output.status.success(), "run exited with {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("RUN SUMMARY"));
    assert_eq!(value(&stdout, "finished"), "true");
    assert_eq!(value(&stdout, "completed"), "2");
}

#[test]
fn run_cli_reports_missing_files() {
    let output = Command::new(env!("CARGO_BIN_EXE_firefleet"))
        .args(["run", "--zones", "/nonexistent/zones.csv", "--events", "/nonexistent/events.csv"])
        .output()
        .expect("failed to run binary");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("zones.csv"), "stderr was: {stderr}");
}
