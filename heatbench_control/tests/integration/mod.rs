//! Shared bench fixture for the integration tests.

mod safety;
mod sequencing;
mod shutdown;
mod simulation;
mod startup;
mod telemetry;

use heatbench_common::config::{BenchConfig, parse_config};
use heatbench_common::hal::driver::BoardHandle;
use heatbench_common::hal::types::BoardLogLevel;
use heatbench_common::telemetry::Signal;
use heatbench_control::{BenchDrivers, ControlLoop};
use heatbench_hal::drivers::mock::{
    BoardScript, Command, Journal, MemorySink, PsuControl, RecordingPowerSupply, ScriptedBoard,
    SinkProbe,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub const HEATERS: usize = 4;

const BASE_CONFIG: &str = r#"
[[boards]]
id = "abc24"

[[boards]]
id = "abc25"

[power]
voltage = 12.0
current_limit = 1.5
safety_limit = 1.2

[heater]
target_temperature = 31.0
hysteresis = 1.5
settling_ticks = 0

[telemetry]
full_log_cadence = { ticks = 10 }
current_threshold = 0.05
voltage_threshold = 0.01
flush_threshold = 50

[loop]
period = 0.005
board_boot_wait = 0.0
"#;

/// Two boards, zero settling, no boot wait.
pub fn base_config() -> BenchConfig {
    parse_config(BASE_CONFIG).unwrap()
}

/// Test-side handles of the recording drivers.
pub struct Bench {
    pub journal: Journal,
    pub psu: PsuControl,
    pub boards: Vec<BoardScript>,
    pub sink: SinkProbe,
    pub running: Arc<AtomicBool>,
}

impl Bench {
    /// Values of `signal` written to the sink for `board`.
    pub fn written(&self, board: &str, signal: Signal) -> Vec<f64> {
        self.sink
            .points()
            .iter()
            .filter(|p| p.board_id() == board && p.signal() == signal)
            .map(|p| p.value())
            .collect()
    }

    /// Whether `board` got a log line at `level`.
    pub fn board_logged(&self, board: &str, level: BoardLogLevel) -> bool {
        self.journal.count(|c| {
            matches!(c, Command::BoardLog { board: b, level: l, .. } if b == board && *l == level)
        }) > 0
    }
}

/// Recording drivers for the boards of `config`.
pub fn drivers(config: &BenchConfig) -> (Bench, BenchDrivers) {
    let journal = Journal::default();
    let psu = RecordingPowerSupply::new(journal.clone());
    let sink = MemorySink::new(journal.clone());

    let mut scripts = Vec::new();
    let mut boards: Vec<Box<dyn BoardHandle>> = Vec::new();
    for entry in &config.boards {
        let board = ScriptedBoard::new(&entry.id, HEATERS, journal.clone());
        scripts.push(board.script());
        boards.push(Box::new(board));
    }

    let bench = Bench {
        journal,
        psu: psu.control(),
        boards: scripts,
        sink: sink.probe(),
        running: Arc::new(AtomicBool::new(true)),
    };
    let drivers = BenchDrivers {
        power: Box::new(psu),
        boards,
        sink: Box::new(sink),
    };
    (bench, drivers)
}

/// Started loop over recording drivers.
pub fn start(config: &BenchConfig) -> (ControlLoop, Bench) {
    let (bench, drivers) = drivers(config);
    let control = ControlLoop::start(config, drivers, bench.running.clone()).unwrap();
    (control, bench)
}
