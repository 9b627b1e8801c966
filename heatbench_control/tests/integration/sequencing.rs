//! Heater sequencing inside the loop.

use super::*;
use heatbench_common::hal::driver::BoardError;
use heatbench_common::hal::types::BoardLogLevel;
use heatbench_control::{Fault, LoopError};
use heatbench_hal::drivers::mock::BoardOp;

#[test]
fn heaters_warm_one_after_another() {
    let (mut control, bench) = start(&base_config());
    bench.boards[0].heat_active_by(1.0);

    // Armed on tick 1; 22 °C + 1 °C per poll reaches 29.5 °C on tick 9.
    for _ in 0..8 {
        control.tick().unwrap();
        assert!(bench.journal.active_heaters("abc24").len() <= 1);
        assert_eq!(control.sequencers()[0].active_heater(), Some(0));
    }
    control.tick().unwrap();
    assert_eq!(control.sequencers()[0].active_heater(), Some(1));
    assert_eq!(bench.journal.active_heaters("abc24"), vec![1]);

    let reset = bench.journal.position(|c| {
        matches!(c, Command::SetHeaterObjective { board, index: 0, value } if board == "abc24" && *value == 0.0)
    });
    let armed_next = bench.journal.position(|c| {
        matches!(c, Command::SetHeaterActive { board, index: 1, active: true } if board == "abc24")
    });
    assert!(reset.is_some() && reset < armed_next);
}

#[test]
fn settling_ticks_delay_first_heater() {
    let mut config = base_config();
    config.heater.settling_ticks = 3;
    let (mut control, bench) = start(&config);

    for _ in 0..3 {
        control.tick().unwrap();
        assert!(bench.journal.active_heaters("abc24").is_empty());
    }
    control.tick().unwrap();
    assert_eq!(bench.journal.active_heaters("abc24"), vec![0]);
}

#[test]
fn recoverable_board_fault_does_not_stall_other_board() {
    let (mut control, bench) = start(&base_config());
    bench.boards[1].fail_always(BoardOp::Poll, BoardError::SensorGlitch("bad crc".into()));

    for _ in 0..5 {
        control.tick().unwrap();
    }
    assert_eq!(control.sequencers()[0].active_heater(), Some(0));
    assert_eq!(control.sequencers()[1].active_heater(), None);
    assert_eq!(control.fault_counts().board, 5);
    assert!(bench.board_logged("abc25", BoardLogLevel::Warning));
    assert!(!bench.board_logged("abc24", BoardLogLevel::Warning));
}

#[test]
fn missing_reading_is_skipped() {
    let (mut control, bench) = start(&base_config());
    control.tick().unwrap();
    bench.boards[0].set_temp(0, f64::NAN);

    control.tick().unwrap();
    assert_eq!(control.fault_counts().board, 1);
    assert_eq!(control.sequencers()[0].active_heater(), Some(0));
}

#[test]
fn fatal_board_fault_stops_run_and_shuts_down() {
    let (mut control, bench) = start(&base_config());
    bench.boards[1].fail_once(BoardOp::Poll, BoardError::Disconnected("link down".into()));

    match control.run(Some(100)) {
        Err(LoopError::Fatal(Fault::Board { board_id, error })) => {
            assert_eq!(board_id, "abc25");
            assert!(matches!(error, BoardError::Disconnected(_)));
        }
        other => panic!("expected fatal board fault, got {other:?}"),
    }

    assert!(control.is_shut_down());
    assert!(bench.board_logged("abc25", BoardLogLevel::Error));
    assert!(bench.journal.active_heaters("abc24").is_empty());
    assert!(!bench.journal.channel_on(1) && !bench.journal.channel_on(2));
    assert!(bench.psu.is_closed());
}
