//! Recording drivers for tests.
//!
//! Every mock appends to a shared [`Journal`], so a test can assert on the
//! global order of instrument, board and sink calls. Behaviour is scripted
//! through cloneable control handles that stay with the test after the
//! driver itself has been moved into the code under test.

use heatbench_common::hal::driver::{
    BoardError, BoardHandle, DriverError, PowerSupply, SinkError, TelemetrySink,
};
use heatbench_common::hal::types::{BoardLogLevel, ChannelId, HeaterSnapshot, Reading};
use heatbench_common::telemetry::TelemetryPoint;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// `PowerSupply::configure`.
    Configure {
        /// Channel.
        channel: ChannelId,
        /// Voltage setpoint.
        voltage: f64,
        /// Current limit.
        current_limit: f64,
        /// OCP threshold.
        ocp: Option<f64>,
    },
    /// `PowerSupply::set_output`.
    SetOutput {
        /// Channel.
        channel: ChannelId,
        /// Requested state.
        on: bool,
    },
    /// `PowerSupply::measure`.
    Measure {
        /// Channel.
        channel: ChannelId,
    },
    /// `PowerSupply::close`.
    ClosePsu,
    /// `BoardHandle::first_conn`.
    FirstConn {
        /// Board id.
        board: String,
    },
    /// `BoardHandle::prepare_heaters`.
    PrepareHeaters {
        /// Board id.
        board: String,
        /// Start predefined heaters.
        start: bool,
    },
    /// `BoardHandle::poll`.
    Poll {
        /// Board id.
        board: String,
        /// Consume flag.
        consume: bool,
    },
    /// `BoardHandle::set_heater_active`.
    SetHeaterActive {
        /// Board id.
        board: String,
        /// Heater index.
        index: usize,
        /// Requested state.
        active: bool,
    },
    /// `BoardHandle::set_heater_objective`.
    SetHeaterObjective {
        /// Board id.
        board: String,
        /// Heater index.
        index: usize,
        /// Objective [°C].
        value: f64,
    },
    /// `BoardHandle::heaters_deactivate_all`.
    DeactivateAll {
        /// Board id.
        board: String,
    },
    /// `BoardHandle::check_newday_and_roll_logfiles`.
    RollLogs {
        /// Board id.
        board: String,
    },
    /// `BoardHandle::stop`.
    StopBoard {
        /// Board id.
        board: String,
        /// Goodbye message.
        message: String,
    },
    /// `BoardHandle::log`.
    BoardLog {
        /// Board id.
        board: String,
        /// Level.
        level: BoardLogLevel,
        /// Message.
        message: String,
    },
    /// `TelemetrySink::write_points`.
    WritePoints {
        /// Points in the batch.
        count: usize,
    },
}

/// Shared, ordered log of driver calls.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Command>>>);

impl Journal {
    /// Append a command.
    pub fn record(&self, command: Command) {
        self.0.lock().push(command);
    }

    /// Snapshot of all commands so far.
    pub fn commands(&self) -> Vec<Command> {
        self.0.lock().clone()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Index of the first command matching `pred`.
    pub fn position(&self, pred: impl Fn(&Command) -> bool) -> Option<usize> {
        self.0.lock().iter().position(pred)
    }

    /// Index of the last command matching `pred`.
    pub fn last_position(&self, pred: impl Fn(&Command) -> bool) -> Option<usize> {
        self.0.lock().iter().rposition(pred)
    }

    /// Number of commands matching `pred`.
    pub fn count(&self, pred: impl Fn(&Command) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }

    /// Heaters of `board` left switched on by the recorded commands.
    pub fn active_heaters(&self, board: &str) -> Vec<usize> {
        let mut active: Vec<usize> = Vec::new();
        for command in self.0.lock().iter() {
            match command {
                Command::SetHeaterActive {
                    board: b,
                    index,
                    active: on,
                } if b == board => {
                    active.retain(|i| i != index);
                    if *on {
                        active.push(*index);
                    }
                }
                Command::DeactivateAll { board: b } if b == board => active.clear(),
                _ => {}
            }
        }
        active.sort_unstable();
        active
    }

    /// Whether the recorded commands leave `channel` switched on.
    pub fn channel_on(&self, channel: ChannelId) -> bool {
        self.0
            .lock()
            .iter()
            .rev()
            .find_map(|c| match c {
                Command::SetOutput { channel: ch, on } if *ch == channel => Some(*on),
                _ => None,
            })
            .unwrap_or(false)
    }
}

// ─── Power supply ───────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PsuScript {
    steady: HashMap<ChannelId, Reading>,
    queued: HashMap<ChannelId, VecDeque<Result<Reading, DriverError>>>,
    configure_failures: HashMap<ChannelId, DriverError>,
    output_failures: HashMap<ChannelId, DriverError>,
    close_failure: Option<DriverError>,
    closed: bool,
}

/// Scripting handle of a [`RecordingPowerSupply`].
#[derive(Debug, Clone, Default)]
pub struct PsuControl(Arc<Mutex<PsuScript>>);

impl PsuControl {
    /// Reading returned on every measurement of `channel`.
    pub fn set_reading(&self, channel: ChannelId, current: f64, voltage: f64) {
        self.0
            .lock()
            .steady
            .insert(channel, Reading { current, voltage });
    }

    /// One-shot measurement result, served before the steady reading.
    pub fn push_result(&self, channel: ChannelId, result: Result<Reading, DriverError>) {
        self.0
            .lock()
            .queued
            .entry(channel)
            .or_default()
            .push_back(result);
    }

    /// Make every `configure` of `channel` fail.
    pub fn fail_configure(&self, channel: ChannelId, error: DriverError) {
        self.0.lock().configure_failures.insert(channel, error);
    }

    /// Make every `set_output` of `channel` fail.
    pub fn fail_output(&self, channel: ChannelId, error: DriverError) {
        self.0.lock().output_failures.insert(channel, error);
    }

    /// Undo [`fail_output`](Self::fail_output).
    pub fn restore_output(&self, channel: ChannelId) {
        self.0.lock().output_failures.remove(&channel);
    }

    /// Make `close` fail.
    pub fn fail_close(&self, error: DriverError) {
        self.0.lock().close_failure = Some(error);
    }

    /// Whether `close` succeeded.
    pub fn is_closed(&self) -> bool {
        self.0.lock().closed
    }
}

/// Power supply that records every call and serves scripted readings.
///
/// Unscripted channels read 0.5 A at 12 V.
#[derive(Debug)]
pub struct RecordingPowerSupply {
    journal: Journal,
    control: PsuControl,
}

impl RecordingPowerSupply {
    /// Create a supply recording into `journal`.
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            control: PsuControl::default(),
        }
    }

    /// Scripting handle.
    pub fn control(&self) -> PsuControl {
        self.control.clone()
    }
}

impl PowerSupply for RecordingPowerSupply {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn configure(
        &mut self,
        channel: ChannelId,
        voltage: f64,
        current_limit: f64,
        ocp: Option<f64>,
    ) -> Result<(), DriverError> {
        self.journal.record(Command::Configure {
            channel,
            voltage,
            current_limit,
            ocp,
        });
        match self.control.0.lock().configure_failures.get(&channel) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn set_output(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError> {
        if let Some(e) = self.control.0.lock().output_failures.get(&channel) {
            return Err(e.clone());
        }
        self.journal.record(Command::SetOutput { channel, on });
        Ok(())
    }

    fn measure(&mut self, channel: ChannelId) -> Result<Reading, DriverError> {
        self.journal.record(Command::Measure { channel });
        let mut script = self.control.0.lock();
        if let Some(result) = script.queued.get_mut(&channel).and_then(VecDeque::pop_front) {
            return result;
        }
        Ok(script.steady.get(&channel).copied().unwrap_or(Reading {
            current: 0.5,
            voltage: 12.0,
        }))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.journal.record(Command::ClosePsu);
        let mut script = self.control.0.lock();
        if let Some(e) = script.close_failure.clone() {
            return Err(e);
        }
        script.closed = true;
        Ok(())
    }
}

// ─── Board ──────────────────────────────────────────────────────────

/// Board operation that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardOp {
    /// `first_conn`.
    FirstConn,
    /// `prepare_heaters`.
    PrepareHeaters,
    /// `poll`.
    Poll,
    /// `set_heater_active`.
    SetHeaterActive,
    /// `set_heater_objective`.
    SetHeaterObjective,
    /// `heaters_deactivate_all`.
    DeactivateAll,
    /// `check_newday_and_roll_logfiles`.
    RollLogs,
    /// `stop`.
    Stop,
}

#[derive(Debug, Default)]
struct BoardScriptState {
    temps: Vec<f64>,
    heat_per_poll: f64,
    once: HashMap<BoardOp, VecDeque<BoardError>>,
    always: HashMap<BoardOp, BoardError>,
    polls: u64,
    stop_after: Option<(u64, Arc<AtomicBool>)>,
}

impl BoardScriptState {
    fn take_failure(&mut self, op: BoardOp) -> Result<(), BoardError> {
        if let Some(e) = self.once.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(e);
        }
        match self.always.get(&op) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

/// Scripting handle of a [`ScriptedBoard`].
#[derive(Debug, Clone, Default)]
pub struct BoardScript(Arc<Mutex<BoardScriptState>>);

impl BoardScript {
    /// Temperatures reported by the next polls.
    pub fn set_temps(&self, temps: Vec<f64>) {
        self.0.lock().temps = temps;
    }

    /// Set one heater's temperature.
    pub fn set_temp(&self, index: usize, temp: f64) {
        let mut state = self.0.lock();
        if index >= state.temps.len() {
            state.temps.resize(index + 1, f64::NAN);
        }
        state.temps[index] = temp;
    }

    /// Warm every active heater by `delta` on each poll.
    pub fn heat_active_by(&self, delta: f64) {
        self.0.lock().heat_per_poll = delta;
    }

    /// Fail the next call of `op` once.
    pub fn fail_once(&self, op: BoardOp, error: BoardError) {
        self.0.lock().once.entry(op).or_default().push_back(error);
    }

    /// Fail every call of `op`.
    pub fn fail_always(&self, op: BoardOp, error: BoardError) {
        self.0.lock().always.insert(op, error);
    }

    /// Clear the running flag after `polls` polls.
    pub fn stop_running_after(&self, polls: u64, running: Arc<AtomicBool>) {
        self.0.lock().stop_after = Some((polls, running));
    }

    /// Polls served so far.
    pub fn polls(&self) -> u64 {
        self.0.lock().polls
    }

    /// Current scripted temperature of a heater.
    pub fn temp(&self, index: usize) -> Option<f64> {
        self.0.lock().temps.get(index).copied()
    }
}

/// Board whose temperatures and failures are scripted by the test.
#[derive(Debug)]
pub struct ScriptedBoard {
    board_id: String,
    heater_count: usize,
    journal: Journal,
    script: BoardScript,
    active: Vec<bool>,
    snapshot: Option<HeaterSnapshot>,
}

impl ScriptedBoard {
    /// Create a board with `heater_count` heaters at 22 °C.
    pub fn new(board_id: &str, heater_count: usize, journal: Journal) -> Self {
        let script = BoardScript::default();
        script.set_temps(vec![22.0; heater_count]);
        Self {
            board_id: board_id.to_string(),
            heater_count,
            journal,
            script,
            active: vec![false; heater_count],
            snapshot: None,
        }
    }

    /// Scripting handle.
    pub fn script(&self) -> BoardScript {
        self.script.clone()
    }

    fn check(&self, op: BoardOp) -> Result<(), BoardError> {
        self.script.0.lock().take_failure(op)
    }

    fn check_index(&self, index: usize) -> Result<(), BoardError> {
        if index < self.heater_count {
            Ok(())
        } else {
            Err(BoardError::HeaterOutOfRange {
                index,
                count: self.heater_count,
            })
        }
    }
}

impl BoardHandle for ScriptedBoard {
    fn board_id(&self) -> &str {
        &self.board_id
    }

    fn heater_count(&self) -> usize {
        self.heater_count
    }

    fn first_conn(&mut self) -> Result<(), BoardError> {
        self.journal.record(Command::FirstConn {
            board: self.board_id.clone(),
        });
        self.check(BoardOp::FirstConn)
    }

    fn prepare_heaters(&mut self, start: bool) -> Result<(), BoardError> {
        self.journal.record(Command::PrepareHeaters {
            board: self.board_id.clone(),
            start,
        });
        self.check(BoardOp::PrepareHeaters)
    }

    fn poll(&mut self, consume: bool) -> Result<(), BoardError> {
        self.journal.record(Command::Poll {
            board: self.board_id.clone(),
            consume,
        });
        let mut state = self.script.0.lock();
        state.polls += 1;
        if let Some((after, running)) = &state.stop_after {
            if state.polls >= *after {
                running.store(false, Ordering::SeqCst);
            }
        }
        state.take_failure(BoardOp::Poll)?;

        let delta = state.heat_per_poll;
        for (temp, active) in state.temps.iter_mut().zip(&self.active) {
            if *active {
                *temp += delta;
            }
        }
        self.snapshot = Some(HeaterSnapshot::new(state.temps.clone()));
        Ok(())
    }

    fn last_heater_temps(&self) -> Option<&HeaterSnapshot> {
        self.snapshot.as_ref()
    }

    fn set_heater_active(&mut self, index: usize, active: bool) -> Result<(), BoardError> {
        self.check_index(index)?;
        self.check(BoardOp::SetHeaterActive)?;
        self.journal.record(Command::SetHeaterActive {
            board: self.board_id.clone(),
            index,
            active,
        });
        self.active[index] = active;
        Ok(())
    }

    fn set_heater_objective(&mut self, index: usize, value: f64) -> Result<(), BoardError> {
        self.check_index(index)?;
        self.check(BoardOp::SetHeaterObjective)?;
        self.journal.record(Command::SetHeaterObjective {
            board: self.board_id.clone(),
            index,
            value,
        });
        Ok(())
    }

    fn heaters_deactivate_all(&mut self) -> Result<(), BoardError> {
        self.check(BoardOp::DeactivateAll)?;
        self.journal.record(Command::DeactivateAll {
            board: self.board_id.clone(),
        });
        self.active.iter_mut().for_each(|a| *a = false);
        Ok(())
    }

    fn check_newday_and_roll_logfiles(&mut self) -> Result<(), BoardError> {
        self.journal.record(Command::RollLogs {
            board: self.board_id.clone(),
        });
        self.check(BoardOp::RollLogs)
    }

    fn stop(&mut self, message: &str) -> Result<(), BoardError> {
        self.journal.record(Command::StopBoard {
            board: self.board_id.clone(),
            message: message.to_string(),
        });
        self.check(BoardOp::Stop)
    }

    fn log(&mut self, message: &str, level: BoardLogLevel) {
        self.journal.record(Command::BoardLog {
            board: self.board_id.clone(),
            level,
            message: message.to_string(),
        });
    }
}

// ─── Sink ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SinkState {
    points: Vec<TelemetryPoint>,
    batches: Vec<usize>,
    once: VecDeque<SinkError>,
    always: Option<SinkError>,
}

/// Inspection and scripting handle of a [`MemorySink`].
#[derive(Debug, Clone, Default)]
pub struct SinkProbe(Arc<Mutex<SinkState>>);

impl SinkProbe {
    /// Every point written so far.
    pub fn points(&self) -> Vec<TelemetryPoint> {
        self.0.lock().points.clone()
    }

    /// Size of every successful batch.
    pub fn batches(&self) -> Vec<usize> {
        self.0.lock().batches.clone()
    }

    /// Fail the next write once.
    pub fn fail_once(&self, error: SinkError) {
        self.0.lock().once.push_back(error);
    }

    /// Fail every write until [`SinkProbe::recover`].
    pub fn fail_always(&self, error: SinkError) {
        self.0.lock().always = Some(error);
    }

    /// Stop failing writes.
    pub fn recover(&self) {
        let mut state = self.0.lock();
        state.always = None;
        state.once.clear();
    }
}

/// In-memory telemetry sink.
#[derive(Debug)]
pub struct MemorySink {
    journal: Journal,
    probe: SinkProbe,
}

impl MemorySink {
    /// Create a sink recording into `journal`.
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            probe: SinkProbe::default(),
        }
    }

    /// Inspection handle.
    pub fn probe(&self) -> SinkProbe {
        self.probe.clone()
    }
}

impl TelemetrySink for MemorySink {
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError> {
        let mut state = self.probe.0.lock();
        if let Some(e) = state.once.pop_front() {
            return Err(e);
        }
        if let Some(e) = state.always.clone() {
            return Err(e);
        }
        self.journal.record(Command::WritePoints {
            count: points.len(),
        });
        state.points.extend_from_slice(points);
        state.batches.push(points.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use heatbench_common::telemetry::Signal;

    #[test]
    fn journal_tracks_active_heaters() {
        let journal = Journal::default();
        let mut board = ScriptedBoard::new("b", 4, journal.clone());
        board.set_heater_active(0, true).unwrap();
        board.set_heater_active(0, false).unwrap();
        board.set_heater_active(2, true).unwrap();
        assert_eq!(journal.active_heaters("b"), vec![2]);
        board.heaters_deactivate_all().unwrap();
        assert!(journal.active_heaters("b").is_empty());
    }

    #[test]
    fn scripted_board_heats_active_heater() {
        let mut board = ScriptedBoard::new("b", 2, Journal::default());
        let script = board.script();
        script.heat_active_by(1.0);
        board.set_heater_active(1, true).unwrap();
        board.poll(false).unwrap();
        board.poll(false).unwrap();
        let snap = board.last_heater_temps().unwrap();
        assert_eq!(snap.avg_temp(0), Some(22.0));
        assert_eq!(snap.avg_temp(1), Some(24.0));
        assert_eq!(script.polls(), 2);
    }

    #[test]
    fn one_shot_board_failure() {
        let mut board = ScriptedBoard::new("b", 2, Journal::default());
        board
            .script()
            .fail_once(BoardOp::Poll, BoardError::SensorGlitch("crc".into()));
        assert!(board.poll(false).is_err());
        assert!(board.poll(false).is_ok());
    }

    #[test]
    fn stop_flag_cleared_after_polls() {
        let running = Arc::new(AtomicBool::new(true));
        let mut board = ScriptedBoard::new("b", 1, Journal::default());
        board.script().stop_running_after(2, running.clone());
        board.poll(true).unwrap();
        assert!(running.load(Ordering::SeqCst));
        board.poll(true).unwrap();
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn psu_serves_queued_then_steady() {
        let journal = Journal::default();
        let mut psu = RecordingPowerSupply::new(journal.clone());
        let control = psu.control();
        control.set_reading(1, 0.9, 11.99);
        control.push_result(1, Err(DriverError::Timeout("slow".into())));
        assert!(psu.measure(1).is_err());
        assert_eq!(psu.measure(1).unwrap().current, 0.9);
        assert_eq!(psu.measure(2).unwrap().current, 0.5);
        psu.set_output(1, true).unwrap();
        assert!(journal.channel_on(1));
        psu.close().unwrap();
        assert!(control.is_closed());
    }

    #[test]
    fn memory_sink_failure_then_recovery() {
        let mut sink = MemorySink::new(Journal::default());
        let probe = sink.probe();
        let point = TelemetryPoint::new(Utc::now(), "b", Signal::Current, 1.0);
        probe.fail_once(SinkError::Unavailable("down".into()));
        assert!(sink.write_points(&[point.clone()]).is_err());
        sink.write_points(&[point]).unwrap();
        assert_eq!(probe.batches(), vec![1]);
    }
}
