//! Run termination and the ordered shutdown sequence.

use super::*;
use heatbench_common::hal::driver::{BoardError, DriverError};
use heatbench_control::StopReason;
use heatbench_control::shutdown::ShutdownStep;
use heatbench_hal::drivers::mock::BoardOp;

fn pos(bench: &Bench, pred: impl Fn(&Command) -> bool) -> usize {
    bench.journal.last_position(pred).unwrap()
}

#[test]
fn shutdown_runs_in_order() {
    let (mut control, bench) = start(&base_config());
    control.tick().unwrap();
    bench.psu.set_reading(1, 0.9, 12.0);
    control.tick().unwrap();
    assert_eq!(control.batcher().pending_len(), 1);

    let report = control.shutdown("Stopping inspection.");
    assert!(report.is_clean());

    let flush = pos(&bench, |c| matches!(c, Command::WritePoints { count: 1 }));
    let off_24 = pos(&bench, |c| matches!(c, Command::DeactivateAll { board } if board == "abc24"));
    let off_25 = pos(&bench, |c| matches!(c, Command::DeactivateAll { board } if board == "abc25"));
    let stop_24 = pos(&bench, |c| matches!(c, Command::StopBoard { board, .. } if board == "abc24"));
    let stop_25 = pos(&bench, |c| matches!(c, Command::StopBoard { board, .. } if board == "abc25"));
    let ch1 = pos(&bench, |c| matches!(c, Command::SetOutput { channel: 1, on: false }));
    let ch2 = pos(&bench, |c| matches!(c, Command::SetOutput { channel: 2, on: false }));
    let close = pos(&bench, |c| matches!(c, Command::ClosePsu));

    assert!(flush < off_24 && off_24 < off_25);
    assert!(off_25 < stop_24 && stop_24 < stop_25);
    assert!(stop_25 < ch1 && ch1 < ch2 && ch2 < close);
}

#[test]
fn shutdown_is_idempotent() {
    let (mut control, bench) = start(&base_config());
    control.tick().unwrap();
    control.shutdown("first");
    let recorded = bench.journal.commands().len();

    assert!(control.shutdown("second").is_clean());
    drop(control);
    assert_eq!(bench.journal.commands().len(), recorded);
    assert_eq!(
        bench.journal.count(|c| matches!(c, Command::ClosePsu)),
        1
    );
}

#[test]
fn drop_runs_shutdown() {
    let (mut control, bench) = start(&base_config());
    control.tick().unwrap();
    drop(control);

    assert!(bench.journal.active_heaters("abc24").is_empty());
    assert_eq!(
        bench.journal.count(|c| matches!(c, Command::StopBoard { .. })),
        2
    );
    assert!(!bench.journal.channel_on(1) && !bench.journal.channel_on(2));
    assert!(bench.psu.is_closed());
}

#[test]
fn failed_steps_do_not_skip_later_ones() {
    let (mut control, bench) = start(&base_config());
    control.tick().unwrap();
    bench.boards[0].fail_always(BoardOp::DeactivateAll, BoardError::Disconnected("gone".into()));
    bench.psu.fail_output(2, DriverError::Io("write failed".into()));

    let report = control.shutdown("Stopping inspection.");
    let failed: Vec<_> = report
        .failures()
        .iter()
        .map(|f| (f.step, f.target.as_str()))
        .collect();
    assert_eq!(
        failed,
        vec![
            (ShutdownStep::DeactivateHeaters, "abc24"),
            (ShutdownStep::DeactivateChannel, "CH2"),
        ]
    );
    assert_eq!(
        bench.journal.count(|c| matches!(c, Command::StopBoard { .. })),
        2
    );
    assert!(!bench.journal.channel_on(1));
    assert!(bench.psu.is_closed());
}

#[test]
fn run_stops_on_tick_limit() {
    let (mut control, bench) = start(&base_config());

    let summary = control.run(Some(5)).unwrap();
    assert_eq!(summary.reason, StopReason::TickLimit);
    assert_eq!(summary.stats.tick_count, 5);
    assert!(summary.shutdown.is_clean());
    assert!(bench.psu.is_closed());
}

#[test]
fn run_stops_when_interrupted() {
    let (mut control, bench) = start(&base_config());
    bench.boards[0].stop_running_after(3, bench.running.clone());

    let summary = control.run(None).unwrap();
    assert_eq!(summary.reason, StopReason::Interrupted);
    assert_eq!(summary.stats.tick_count, 3);
    let goodbye = bench.journal.count(|c| {
        matches!(c, Command::StopBoard { message, .. } if message == "Stopping inspection - interrupted.")
    });
    assert_eq!(goodbye, 2);
}
