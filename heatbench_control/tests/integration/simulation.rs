//! End-to-end run on the simulation drivers, configured from files.

use heatbench_common::config::load_config;
use heatbench_common::telemetry::{Signal, TelemetryPoint};
use heatbench_control::{BenchDrivers, ControlLoop, StopReason};
use heatbench_hal::{DriverRegistry, create_sink};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tempfile::TempDir;

const BENCH_TOML: &str = r#"
board_config_dir = "cfg"

[[boards]]
id = "sim01"

[power]
driver = "simulation"
safety_limit = 1.2

[power.driver_config]
channels = 2
overcurrent_after = 6

[heater]
target_temperature = 31.0
settling_ticks = 2

[telemetry]
full_log_cadence = { ticks = 5 }
sink = { kind = "jsonl", path = "out/points.jsonl" }

[loop]
period = 0.001
board_boot_wait = 0.0
"#;

const BOARD_TOML: &str = r#"
heater_count = 3
heating_rate = 2.0
log_dir = "../logs"
"#;

fn write_bench(dir: &TempDir) -> std::path::PathBuf {
    fs::create_dir_all(dir.path().join("cfg")).unwrap();
    fs::write(dir.path().join("cfg/inspection_sim01.toml"), BOARD_TOML).unwrap();
    let path = dir.path().join("heatbench.toml");
    fs::write(&path, BENCH_TOML).unwrap();
    path
}

#[test]
fn simulated_run_logs_trips_and_stops_cleanly() {
    let dir = TempDir::new().unwrap();
    let config = load_config(&write_bench(&dir)).unwrap();

    let registry = DriverRegistry::with_builtin_drivers();
    let boards = config
        .boards
        .iter()
        .zip(config.board_config_paths())
        .map(|(b, path)| registry.create_board(&config.board_driver, &b.id, &path).unwrap())
        .collect();
    let drivers = BenchDrivers {
        power: registry.create_power_supply(&config.power).unwrap(),
        boards,
        sink: create_sink(&config.telemetry.sink).unwrap(),
    };

    let mut control =
        ControlLoop::start(&config, drivers, Arc::new(AtomicBool::new(true))).unwrap();
    let summary = control.run(Some(20)).unwrap();
    drop(control);

    assert_eq!(summary.reason, StopReason::TickLimit);
    assert_eq!(summary.stats.tick_count, 20);
    assert_eq!(summary.safety_trips, 1);
    assert!(summary.shutdown.is_clean());

    let content = fs::read_to_string(dir.path().join("out/points.jsonl")).unwrap();
    let points: Vec<TelemetryPoint> = content
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert!(!points.is_empty());
    assert!(points.iter().all(|p| p.board_id() == "sim01"));
    assert!(
        points
            .iter()
            .filter(|p| p.signal() == Signal::Current)
            .all(|p| p.value() <= 1.2)
    );

    let logs: Vec<_> = fs::read_dir(dir.path().join("logs"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert!(logs.iter().any(|name| name.starts_with("sim01_")));
}
