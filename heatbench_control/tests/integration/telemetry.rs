//! Telemetry cadence, delta filtering and sink faults inside the loop.

use super::*;
use heatbench_common::hal::driver::SinkError;
use heatbench_control::LoopError;
use heatbench_control::telemetry::LogMode;

#[test]
fn full_tick_flushes_before_boards_are_polled() {
    let (mut control, bench) = start(&base_config());

    assert_eq!(control.tick().unwrap(), LogMode::Full);
    assert_eq!(bench.sink.batches(), vec![4]);

    let write = bench
        .journal
        .position(|c| matches!(c, Command::WritePoints { .. }))
        .unwrap();
    let poll = bench
        .journal
        .position(|c| matches!(c, Command::Poll { .. }))
        .unwrap();
    assert!(write < poll);
    assert_eq!(
        bench.journal.count(|c| matches!(c, Command::RollLogs { .. })),
        2
    );
}

#[test]
fn steady_readings_only_log_on_cadence() {
    let (mut control, bench) = start(&base_config());

    let modes: Vec<LogMode> = (0..11).map(|_| control.tick().unwrap()).collect();
    assert_eq!(modes[0], LogMode::Full);
    assert!(modes[1..10].iter().all(|m| *m == LogMode::Delta));
    assert_eq!(modes[10], LogMode::Full);
    assert_eq!(bench.sink.batches(), vec![4, 4]);
}

#[test]
fn significant_change_is_logged_in_delta_mode() {
    let (mut control, bench) = start(&base_config());
    control.tick().unwrap();

    // 4 % is below the 5 % current threshold.
    bench.psu.set_reading(1, 0.52, 12.0);
    control.tick().unwrap();
    assert_eq!(control.batcher().pending_len(), 0);

    // 0.52 → 0.6 is above it.
    bench.psu.set_reading(1, 0.6, 12.0);
    control.tick().unwrap();
    let pending: Vec<_> = control.batcher().pending().cloned().collect();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].board_id(), "abc24");
    assert_eq!(pending[0].signal(), Signal::Current);
    assert_eq!(pending[0].value(), 0.6);

    for _ in 3..11 {
        control.tick().unwrap();
    }
    assert_eq!(bench.sink.batches(), vec![4, 5]);
}

#[test]
fn flush_threshold_forces_delta_flush() {
    let mut config = base_config();
    config.telemetry.flush_threshold = 2;
    let (mut control, bench) = start(&config);
    control.tick().unwrap();

    bench.psu.set_reading(1, 0.8, 12.0);
    control.tick().unwrap();
    assert_eq!(control.batcher().pending_len(), 1);

    bench.psu.set_reading(2, 0.8, 12.0);
    control.tick().unwrap();
    assert_eq!(control.batcher().pending_len(), 0);
    assert_eq!(bench.sink.batches(), vec![4, 2]);
}

#[test]
fn unavailable_sink_keeps_points_for_next_flush() {
    let (mut control, bench) = start(&base_config());
    bench
        .sink
        .fail_once(SinkError::Unavailable("connection refused".into()));

    control.tick().unwrap();
    assert_eq!(control.fault_counts().sink, 1);
    assert_eq!(control.batcher().pending_len(), 4);
    assert!(bench.sink.batches().is_empty());

    for _ in 1..11 {
        control.tick().unwrap();
    }
    assert_eq!(bench.sink.batches(), vec![8]);
    assert_eq!(control.batcher().pending_len(), 0);
}

#[test]
fn bounded_buffer_drops_oldest_while_sink_is_down() {
    let mut config = base_config();
    config.telemetry.flush_threshold = 4;
    config.telemetry.max_buffered = 6;
    let (mut control, bench) = start(&config);
    bench.sink.fail_always(SinkError::Io("disk full".into()));

    control.tick().unwrap();
    for current in [0.7, 0.9] {
        bench.psu.set_reading(1, current, 12.0);
        bench.psu.set_reading(2, current, 12.0);
        control.tick().unwrap();
    }

    assert_eq!(control.batcher().pending_len(), 6);
    assert_eq!(control.batcher().dropped(), 2);
    assert_eq!(control.fault_counts().sink, 3);
    let oldest = control.batcher().pending().next().unwrap();
    assert_eq!(oldest.board_id(), "abc25");

    bench.sink.recover();
    control.tick().unwrap();
    assert_eq!(bench.sink.batches(), vec![6]);
}

#[test]
fn unencodable_point_is_fatal() {
    let (mut control, bench) = start(&base_config());
    bench
        .sink
        .fail_once(SinkError::Serialize("NaN field".into()));

    assert!(matches!(control.tick(), Err(LoopError::Fatal(_))));
}
