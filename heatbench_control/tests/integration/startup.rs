//! Startup: power before boards, and clean unwinding on failure.

use super::*;
use heatbench_common::hal::driver::{BoardError, DriverError};
use heatbench_control::StartupError;
use heatbench_hal::drivers::mock::BoardOp;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

#[test]
fn channels_powered_before_boards_attach() {
    let (control, bench) = start(&base_config());

    let commands = bench.journal.commands();
    assert_eq!(
        commands[0],
        Command::Configure {
            channel: 1,
            voltage: 12.0,
            current_limit: 1.5,
            ocp: None,
        }
    );
    let last_on = bench
        .journal
        .last_position(|c| matches!(c, Command::SetOutput { on: true, .. }))
        .unwrap();
    let first_conn = bench
        .journal
        .position(|c| matches!(c, Command::FirstConn { .. }))
        .unwrap();
    assert!(last_on < first_conn);

    assert!(control.monitor().is_active(1));
    assert!(control.monitor().is_active(2));
    assert!(bench.journal.channel_on(1) && bench.journal.channel_on(2));
    for board in ["abc24", "abc25"] {
        let prepared = bench.journal.count(|c| {
            matches!(c, Command::PrepareHeaters { board: b, start: false } if b == board)
        });
        assert_eq!(prepared, 1);
    }
}

#[test]
fn board_count_must_match_config() {
    let config = base_config();
    let (bench, mut drivers) = drivers(&config);
    drivers.boards.pop();

    let result = ControlLoop::start(&config, drivers, bench.running.clone());
    assert!(matches!(result, Err(StartupError::Config(_))));
    assert!(bench.journal.commands().is_empty());
}

#[test]
fn failed_channel_setup_switches_off_and_closes() {
    let config = base_config();
    let (bench, drivers) = drivers(&config);
    bench
        .psu
        .fail_configure(2, DriverError::InvalidResponse("-113 undefined header".into()));

    let result = ControlLoop::start(&config, drivers, bench.running.clone());
    assert!(matches!(result, Err(StartupError::Connection(_))));
    assert!(!bench.journal.channel_on(1));
    assert!(bench.psu.is_closed());
    assert_eq!(
        bench.journal.count(|c| matches!(c, Command::FirstConn { .. })),
        0
    );
}

#[test]
fn failed_attach_stops_attached_boards_then_power() {
    let config = base_config();
    let (bench, drivers) = drivers(&config);
    bench.boards[1].fail_once(BoardOp::FirstConn, BoardError::Disconnected("no answer".into()));

    match ControlLoop::start(&config, drivers, bench.running.clone()) {
        Err(StartupError::Board { board_id, .. }) => assert_eq!(board_id, "abc25"),
        other => panic!("expected board startup error, got {other:?}"),
    }

    let stop_abc24 = bench
        .journal
        .position(|c| matches!(c, Command::StopBoard { board, .. } if board == "abc24"))
        .unwrap();
    let ch1_off = bench
        .journal
        .last_position(|c| matches!(c, Command::SetOutput { channel: 1, on: false }))
        .unwrap();
    assert!(stop_abc24 < ch1_off);
    assert_eq!(
        bench
            .journal
            .count(|c| matches!(c, Command::StopBoard { board, .. } if board == "abc25")),
        0
    );
    assert!(!bench.journal.channel_on(2));
    assert!(bench.psu.is_closed());
}

#[test]
fn boot_wait_observes_cancellation() {
    let mut config = base_config();
    config.cycle.board_boot_wait = 5.0;
    let (bench, drivers) = drivers(&config);
    bench.running.store(false, Ordering::SeqCst);

    let started = Instant::now();
    let result = ControlLoop::start(&config, drivers, bench.running.clone());
    assert!(matches!(result, Err(StartupError::Interrupted)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!bench.journal.channel_on(1));
    assert!(bench.psu.is_closed());
}
