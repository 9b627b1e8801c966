//! Tick benchmark: one control loop tick on simulation drivers.
//!
//! Measures the work between two sleeps (sampling, safety check, telemetry
//! batching, board poll and sequencer step) for one and two boards. The sink
//! discards points so only the loop itself is measured.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use heatbench_common::config::{BenchConfig, parse_config};
use heatbench_common::hal::driver::{BoardHandle, SinkError, TelemetrySink};
use heatbench_common::telemetry::TelemetryPoint;
use heatbench_control::{BenchDrivers, ControlLoop};
use heatbench_hal::drivers::simulation::{SimBoardConfig, SimulatedBoard, SimulatedPowerSupply};

/// Sink that only counts points.
struct NullSink(usize);

impl TelemetrySink for NullSink {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        self.0 += points.len();
        Ok(())
    }
}

fn bench_config(boards: usize) -> BenchConfig {
    let mut toml = String::new();
    for i in 0..boards {
        toml.push_str(&format!("[[boards]]\nid = \"sim{i:02}\"\n\n"));
    }
    toml.push_str(
        r#"
[power]

[heater]
target_temperature = 31.0
settling_ticks = 0

[loop]
board_boot_wait = 0.0
"#,
    );
    parse_config(&toml).unwrap()
}

fn start(boards: usize) -> ControlLoop {
    let config = bench_config(boards);
    let handles: Vec<Box<dyn BoardHandle>> = config
        .boards
        .iter()
        .map(|b| {
            Box::new(SimulatedBoard::new(&b.id, SimBoardConfig::default())) as Box<dyn BoardHandle>
        })
        .collect();
    let drivers = BenchDrivers {
        power: Box::new(SimulatedPowerSupply::new(3)),
        boards: handles,
        sink: Box::new(NullSink(0)),
    };
    ControlLoop::start(&config, drivers, Arc::new(AtomicBool::new(true))).unwrap()
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("tick");
    group.sample_size(200);

    for &boards in &[1usize, 2] {
        let mut control = start(boards);

        // Attach and arm the first heaters outside the measurement.
        for _ in 0..3 {
            control.tick().unwrap();
        }

        group.bench_with_input(BenchmarkId::new("boards", boards), &boards, |b, &_n| {
            b.iter(|| black_box(control.tick().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_tick);
criterion_main!(benches);
