use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

fn run_sim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_traffic_signal_sim"))
        .args(args)
        .env("RUST_LOG", "warn,traffic_signal_sim=info")
        .output()
        .expect("Failed to execute simulation")
}

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("traffic_signal_sim_{}_{}", std::process::id(), name))
}

/// Pull the number logged after `label`, handling the log prefix
fn logged_value(stderr: &str, label: &str) -> f64 {
    let line = stderr
        .lines()
        .find(|line| line.contains(label))
        .unwrap_or_else(|| panic!("Could not find '{}' line", label));
    let parts: Vec<&str> = line.split(label).collect();
    parts
        .get(1)
        .and_then(|s| s.split_whitespace().next())
        .and_then(|s| s.trim_end_matches('%').parse().ok())
        .unwrap_or_else(|| panic!("Could not parse value from line: {}", line))
}

/// Test that the simulation runs in headless mode without crashing
#[test]
fn test_headless_simulation_runs() {
    let report = temp_file("runs.json");
    let output = run_sim(&["--ticks", "200", "--report", report.to_str().unwrap()]);

    assert!(
        output.status.success(),
        "Simulation failed to run in headless mode. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("SIMULATION COMPLETE"),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
    let _ = fs::remove_file(report);
}

/// Test that simulation statistics are logged
#[test]
fn test_simulation_statistics_logged() {
    let report = temp_file("stats.json");
    let output = run_sim(&["--ticks", "300", "--report", report.to_str().unwrap()]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    for label in [
        "Vehicles spawned:",
        "Vehicles exited:",
        "Vehicles in system:",
        "Dropped spawns:",
        "Mean wait:",
        "Throughput:",
        "Exit rate:",
    ] {
        assert!(stderr.contains(label), "Missing '{}' statistic", label);
    }

    assert!(logged_value(&stderr, "Vehicles spawned:") > 0.0, "No vehicles were spawned");
    let _ = fs::remove_file(report);
}

/// The report file carries the documented fields and agrees with the log
#[test]
fn test_report_written_to_file() {
    let report = temp_file("report.json");
    let output = run_sim(&[
        "--ticks",
        "600",
        "--rows",
        "2",
        "--cols",
        "2",
        "--heuristic",
        "fixed-time",
        "--green",
        "30",
        "--yellow",
        "5",
        "--spawn-rate",
        "0.1",
        "--report",
        report.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let text = fs::read_to_string(&report).expect("report file missing");
    let json: serde_json::Value = serde_json::from_str(&text).expect("report is not JSON");
    for field in [
        "heuristic",
        "grid",
        "duration_ticks",
        "seed",
        "vehicles_spawned",
        "vehicles_exited",
        "vehicles_in_system",
        "dropped_spawns",
        "mean_wait_ticks",
        "mean_travel_ticks",
        "throughput",
        "mean_queue_length",
        "intersections",
    ] {
        assert!(json.get(field).is_some(), "report lacks '{}'", field);
    }
    assert_eq!(json["heuristic"], "fixed_time");
    assert_eq!(json["duration_ticks"], 600);
    assert_eq!(json["intersections"].as_array().map(Vec::len), Some(4));
    assert!(json.get("trips").is_none());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let exited = json["vehicles_exited"].as_f64().unwrap();
    assert!(exited > 0.0);
    assert_eq!(logged_value(&stderr, "Vehicles exited:"), exited);
    let _ = fs::remove_file(report);
}

/// Without --report the JSON goes to stdout and nothing else does
#[test]
fn test_report_on_stdout() {
    let output = run_sim(&["--ticks", "100", "--detailed", "--print-every", "50"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let json: serde_json::Value = serde_json::from_str(&stdout).expect("stdout is not a report");
    assert!(json["trips"].is_array());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("=== Signal Map (tick 50) ==="));
    assert!(stderr.contains("=== Traffic Simulation Summary ==="));
}

#[test]
fn test_config_file_is_used() {
    let config = temp_file("config.json");
    let report = temp_file("config_report.json");
    fs::write(
        &config,
        r#"{"rows": 1, "cols": 3, "seed": 9, "heuristic": {"kind": "wave_green", "axis": "east_west"}}"#,
    )
    .unwrap();

    let output = run_sim(&[
        "--config",
        config.to_str().unwrap(),
        "--ticks",
        "120",
        "--report",
        report.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["heuristic"], "wave_green");
    assert_eq!(json["grid"]["cols"], 3);
    assert_eq!(json["seed"], 9);
    let _ = fs::remove_file(config);
    let _ = fs::remove_file(report);
}

#[test]
fn test_invalid_grid_is_fatal() {
    let output = run_sim(&["--rows", "0", "--ticks", "10"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("invalid grid topology"),
        "unexpected stderr: {}",
        stderr
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    let output = run_sim(&["--spawn-rate", "1.5", "--ticks", "10"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("spawn_probability"), "unexpected stderr: {}", stderr);
}
