//! Safety interlock and supply faults inside the loop.

use super::*;
use heatbench_common::hal::driver::DriverError;
use heatbench_common::hal::types::BoardLogLevel;
use heatbench_common::hal::types::Reading;
use heatbench_control::{Fault, LoopError};

#[test]
fn overcurrent_switches_channel_off_before_logging() {
    let (mut control, bench) = start(&base_config());
    bench.psu.set_reading(1, 1.3, 12.0);

    control.tick().unwrap();

    assert!(!control.monitor().is_active(1));
    assert!(control.monitor().is_active(2));
    assert_eq!(control.monitor().trips(), 1);

    let off = bench
        .journal
        .position(|c| matches!(c, Command::SetOutput { channel: 1, on: false }))
        .unwrap();
    let write = bench
        .journal
        .position(|c| matches!(c, Command::WritePoints { .. }))
        .unwrap();
    assert!(off < write);

    assert!(bench.written("abc24", Signal::Current).is_empty());
    assert_eq!(bench.written("abc24", Signal::Voltage), vec![12.0]);
    assert_eq!(bench.written("abc25", Signal::Current), vec![0.5]);
    assert!(bench.board_logged("abc24", BoardLogLevel::Warning));
}

#[test]
fn tripped_channel_is_not_reactivated() {
    let (mut control, bench) = start(&base_config());
    bench.psu.set_reading(1, 1.3, 12.0);
    control.tick().unwrap();
    bench.psu.set_reading(1, 0.0, 0.0);

    for _ in 0..5 {
        control.tick().unwrap();
    }
    assert!(!bench.journal.channel_on(1));
    assert_eq!(control.monitor().trips(), 1);
}

#[test]
fn persistent_overcurrent_is_reported_once() {
    let (mut control, bench) = start(&base_config());
    bench.psu.set_reading(1, 1.3, 12.0);

    for _ in 0..5 {
        control.tick().unwrap();
    }
    assert_eq!(control.monitor().trips(), 1);
    let offs = bench
        .journal
        .count(|c| matches!(c, Command::SetOutput { channel: 1, on: false }));
    assert_eq!(offs, 1);
    let warnings = bench.journal.count(|c| {
        matches!(c, Command::BoardLog { board, level: BoardLogLevel::Warning, .. } if board == "abc24")
    });
    assert_eq!(warnings, 1);
    assert!(bench.written("abc24", Signal::Current).is_empty());
}

#[test]
fn current_at_limit_is_logged() {
    let (mut control, bench) = start(&base_config());
    bench.psu.set_reading(1, 1.2, 12.0);

    control.tick().unwrap();
    assert!(control.monitor().is_active(1));
    assert_eq!(bench.written("abc24", Signal::Current), vec![1.2]);
}

#[test]
fn measurement_timeout_is_recoverable() {
    let (mut control, bench) = start(&base_config());
    bench
        .psu
        .push_result(1, Err(DriverError::Timeout("no answer".into())));

    control.tick().unwrap();
    assert_eq!(control.fault_counts().power, 1);
    assert!(bench.written("abc24", Signal::Current).is_empty());
    assert_eq!(bench.written("abc25", Signal::Current), vec![0.5]);

    // Next tick reads normally; abc24 has no cached value, so it is emitted.
    control.tick().unwrap();
    assert_eq!(control.batcher().pending_len(), 2);
}

#[test]
fn lost_supply_is_fatal() {
    let (mut control, bench) = start(&base_config());
    bench.psu.push_result(
        2,
        Err(DriverError::Unavailable("connection reset".into())),
    );
    bench.psu.push_result(
        1,
        Ok(Reading {
            current: 0.4,
            voltage: 12.0,
        }),
    );

    match control.tick() {
        Err(LoopError::Fatal(Fault::Power { channel, .. })) => assert_eq!(channel, 2),
        other => panic!("expected fatal power fault, got {other:?}"),
    }
}
