//! Soft-periodic control loop.
//!
//! ## Tick
//! 1. Sample every channel and apply the safety check.
//! 2. Enqueue telemetry; flush on full-mode ticks (and roll board logs).
//! 3. Poll each board and step its heater sequencer.
//! 4. Sleep the rest of the period, or not at all after an overrun.
//!
//! ## Shutdown
//! Flush telemetry → all heaters off → disconnect boards → channels off →
//! close the supply. Every step is attempted even if an earlier one failed.
//! Runs once, from [`ControlLoop::run`] or from `Drop`.

use crate::error::{ErrorClassifier, Fault, FaultCounts, LoopError, StartupError};
use crate::power::{PowerChannelMonitor, SafetyCheck};
use crate::sequencer::{HeaterSequencer, StepOutcome};
use crate::shutdown::{ShutdownReport, ShutdownStep};
use crate::telemetry::{ChannelSample, LogMode, TelemetryBatcher};
use chrono::Utc;
use heatbench_common::config::{BenchConfig, ConfigError};
use heatbench_common::hal::driver::{BoardHandle, PowerSupply, TelemetrySink};
use heatbench_common::hal::types::{BoardLogLevel, ChannelId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Granularity of the interruptible board boot wait.
const BOOT_WAIT_SLICE: Duration = Duration::from_millis(100);

// ─── Timing ─────────────────────────────────────────────────────────

/// Sleep after a tick that took `elapsed`.
///
/// `period` is the overrun threshold: a tick at or beyond it is followed by
/// no sleep. Otherwise the loop sleeps until `overrun_sleep` after tick start.
/// Never negative.
pub fn compute_sleep(elapsed: Duration, period: Duration, overrun_sleep: Duration) -> Duration {
    if elapsed < period {
        overrun_sleep.saturating_sub(elapsed)
    } else {
        Duration::ZERO
    }
}

/// Tick timing statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    /// Ticks completed.
    pub tick_count: u64,
    /// Ticks that took at least the period.
    pub overruns: u64,
    /// Duration of the last tick.
    pub last_tick: Duration,
    /// Longest tick.
    pub max_tick: Duration,
    total_tick: Duration,
}

impl CycleStats {
    /// Record one tick; returns `true` on overrun.
    pub fn record(&mut self, elapsed: Duration, period: Duration) -> bool {
        self.tick_count += 1;
        self.last_tick = elapsed;
        self.max_tick = self.max_tick.max(elapsed);
        self.total_tick += elapsed;
        let overrun = elapsed >= period;
        if overrun {
            self.overruns += 1;
        }
        overrun
    }

    /// Mean tick duration (zero before the first tick).
    pub fn avg_tick(&self) -> Duration {
        match u32::try_from(self.tick_count) {
            Ok(0) => Duration::ZERO,
            Ok(n) => self.total_tick / n,
            Err(_) => Duration::from_secs_f64(self.total_tick.as_secs_f64() / self.tick_count as f64),
        }
    }
}

// ─── Loop ───────────────────────────────────────────────────────────

/// Opened collaborators handed to [`ControlLoop::start`].
pub struct BenchDrivers {
    /// Power supply; board `i` is powered by channel `i + 1`.
    pub power: Box<dyn PowerSupply>,
    /// Boards, in configuration order.
    pub boards: Vec<Box<dyn BoardHandle>>,
    /// Telemetry sink.
    pub sink: Box<dyn TelemetrySink>,
}

/// Why the loop stopped without a fatal fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The running flag was cleared.
    Interrupted,
    /// The requested number of ticks ran.
    TickLimit,
}

impl StopReason {
    fn board_message(self) -> &'static str {
        match self {
            Self::Interrupted => "Stopping inspection - interrupted.",
            Self::TickLimit => "Stopping inspection - tick limit reached.",
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Why the loop stopped.
    pub reason: StopReason,
    /// Timing statistics.
    pub stats: CycleStats,
    /// Recoverable faults per source.
    pub faults: FaultCounts,
    /// Safety trips.
    pub safety_trips: u64,
    /// Telemetry points dropped on a full buffer.
    pub dropped_points: u64,
    /// Shutdown outcome.
    pub shutdown: ShutdownReport,
}

/// Supply channel powering board `index`.
fn channel_for(index: usize) -> ChannelId {
    (index + 1) as ChannelId
}

/// Sleep up to `total`, waking early when `running` is cleared.
/// Returns whether the flag was still set at the end.
fn sleep_while_running(total: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(BOOT_WAIT_SLICE));
    }
}

/// Orchestrates sampling, telemetry and heater sequencing every tick.
pub struct ControlLoop {
    // Dropped before the monitor: boards are stopped before power goes off.
    sequencers: Vec<HeaterSequencer>,
    monitor: PowerChannelMonitor,
    batcher: TelemetryBatcher,
    classifier: ErrorClassifier,
    stats: CycleStats,
    running: Arc<AtomicBool>,
    period: Duration,
    overrun_sleep: Duration,
    shut_down: bool,
}

impl ControlLoop {
    /// Power the boards, wait for them to boot and attach a sequencer to each.
    ///
    /// On failure everything already switched on is switched off again and
    /// the supply is closed before the error is returned.
    pub fn start(
        config: &BenchConfig,
        drivers: BenchDrivers,
        running: Arc<AtomicBool>,
    ) -> Result<Self, StartupError> {
        let BenchDrivers { power, boards, sink } = drivers;
        if boards.len() != config.boards.len() {
            return Err(ConfigError::ValidationError(format!(
                "{} boards configured but {} board handles opened",
                config.boards.len(),
                boards.len()
            ))
            .into());
        }

        let mut monitor = PowerChannelMonitor::new(power, config.power.safety_limit);
        for index in 0..boards.len() {
            let channel = channel_for(index);
            monitor.configure(
                channel,
                config.power.voltage,
                config.power.current_limit,
                config.power.ocp,
            )?;
            monitor.activate(channel)?;
        }

        let boot_wait = config.cycle.board_boot_wait();
        if !boot_wait.is_zero() {
            info!("Waiting {:.1}s for boards to boot", boot_wait.as_secs_f64());
            if !sleep_while_running(boot_wait, &running) {
                return Err(StartupError::Interrupted);
            }
        }

        let mut sequencers = Vec::with_capacity(boards.len());
        for board in boards {
            let mut sequencer = HeaterSequencer::new(board, config.heater.clone());
            if let Err(error) = sequencer.attach() {
                return Err(StartupError::Board {
                    board_id: sequencer.board_id().to_string(),
                    error,
                });
            }
            sequencers.push(sequencer);
        }

        Ok(Self {
            sequencers,
            monitor,
            batcher: TelemetryBatcher::new(&config.telemetry, sink),
            classifier: ErrorClassifier::new(),
            stats: CycleStats::default(),
            running,
            period: config.cycle.period(),
            overrun_sleep: config.cycle.overrun_sleep(),
            shut_down: false,
        })
    }

    /// Run one tick. A fatal fault is returned as `Err`; recoverable faults
    /// are counted and the affected work is skipped.
    pub fn tick(&mut self) -> Result<LogMode, LoopError> {
        let time = Utc::now();
        let mode = self.batcher.begin_tick(Instant::now());

        for (index, sequencer) in self.sequencers.iter_mut().enumerate() {
            let channel = channel_for(index);
            let (current, voltage) = match self.monitor.sample(channel) {
                Ok(reading) => {
                    let trips = self.monitor.trips();
                    let check = match self.monitor.enforce_safety(channel, reading.current) {
                        Ok(check) => check,
                        Err(error) => {
                            self.classifier.route(Fault::Power { channel, error }, None)?;
                            if self.monitor.trips() > trips {
                                SafetyCheck::Tripped
                            } else {
                                SafetyCheck::StillTripped
                            }
                        }
                    };
                    let trusted = check.is_trusted();
                    if check == SafetyCheck::Tripped {
                        sequencer.log(
                            &format!(
                                "CH{channel} current {:.3}A above safety limit {:.3}A, output switched off",
                                reading.current,
                                self.monitor.safety_limit()
                            ),
                            BoardLogLevel::Warning,
                        );
                    }
                    (trusted.then_some(reading.current), Some(reading.voltage))
                }
                Err(error) => {
                    self.classifier.route(Fault::Power { channel, error }, None)?;
                    (None, None)
                }
            };
            let sample = ChannelSample {
                channel,
                board_id: sequencer.board_id().to_string(),
                current,
                voltage,
            };
            self.batcher.record(mode, time, &sample);
        }

        if mode == LogMode::Full || self.batcher.should_flush() {
            if let Err(e) = self.batcher.flush() {
                self.classifier.route(Fault::Sink(e), None)?;
            }
        }
        if mode == LogMode::Full {
            for sequencer in &mut self.sequencers {
                if let Err(error) = sequencer.roll_logs() {
                    let fault = Fault::Board {
                        board_id: sequencer.board_id().to_string(),
                        error,
                    };
                    self.classifier.route(fault, Some(sequencer.board_mut()))?;
                }
            }
        }

        for sequencer in &mut self.sequencers {
            let result = sequencer.poll().and_then(|()| sequencer.step());
            match result {
                Ok(StepOutcome::Armed { index }) => {
                    debug!("Board {}: heater {index} armed", sequencer.board_id());
                }
                Ok(_) => {}
                Err(error) => {
                    let fault = Fault::Board {
                        board_id: sequencer.board_id().to_string(),
                        error,
                    };
                    self.classifier.route(fault, Some(sequencer.board_mut()))?;
                }
            }
        }

        Ok(mode)
    }

    /// Tick until the running flag is cleared, `max_ticks` ticks ran, or a
    /// fatal fault occurs; then run the shutdown sequence.
    pub fn run(&mut self, max_ticks: Option<u64>) -> Result<RunSummary, LoopError> {
        info!(
            "Entering control loop: {} board(s), period={:?}, overrun_sleep={:?}",
            self.sequencers.len(),
            self.period,
            self.overrun_sleep
        );

        let outcome = loop {
            if let Some(reason) = self.stop_reason(max_ticks) {
                break Ok(reason);
            }

            let started = Instant::now();
            if let Err(e) = self.tick() {
                break Err(e);
            }
            let elapsed = started.elapsed();

            if self.stats.record(elapsed, self.period) {
                let n = self.stats.overruns;
                if n <= 10 || n % 1000 == 0 {
                    warn!(
                        "Tick overrun #{n}: tick took {:.1}ms (period {:.1}ms)",
                        elapsed.as_secs_f64() * 1e3,
                        self.period.as_secs_f64() * 1e3
                    );
                }
            }
            if self.stats.tick_count % 1000 == 0 {
                debug!(
                    "Control loop: {} ticks, avg={:?}, max={:?}, overruns={}",
                    self.stats.tick_count,
                    self.stats.avg_tick(),
                    self.stats.max_tick,
                    self.stats.overruns
                );
            }

            if self.stop_reason(max_ticks).is_some() {
                continue;
            }
            let sleep = compute_sleep(elapsed, self.period, self.overrun_sleep);
            if !sleep.is_zero() {
                thread::sleep(sleep);
            }
        };

        let message = match &outcome {
            Ok(reason) => reason.board_message(),
            Err(_) => "Stopping inspection - fatal error.",
        };
        let report = self.shutdown(message);
        info!(
            "Control loop stopped after {} ticks (overruns: {}, avg {:?}, max {:?})",
            self.stats.tick_count,
            self.stats.overruns,
            self.stats.avg_tick(),
            self.stats.max_tick
        );

        let reason = outcome?;
        Ok(RunSummary {
            reason,
            stats: self.stats.clone(),
            faults: self.classifier.counts(),
            safety_trips: self.monitor.trips(),
            dropped_points: self.batcher.dropped(),
            shutdown: report,
        })
    }

    /// Run the ordered shutdown sequence. Later calls return an empty report.
    pub fn shutdown(&mut self, message: &str) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down {
            return report;
        }
        self.shut_down = true;
        info!("Shutting down: {message}");

        report.record(
            ShutdownStep::Flush,
            "telemetry",
            self.batcher.flush().map(|_| ()),
        );
        for sequencer in &mut self.sequencers {
            let board_id = sequencer.board_id().to_string();
            report.record(ShutdownStep::DeactivateHeaters, board_id, sequencer.full_stop());
        }
        for sequencer in &mut self.sequencers {
            let board_id = sequencer.board_id().to_string();
            report.record(
                ShutdownStep::DisconnectBoard,
                board_id,
                sequencer.disconnect(message),
            );
        }
        self.monitor.release(&mut report);

        report.log();
        report
    }

    /// Shared running flag; clearing it stops the loop between ticks.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Power channel monitor.
    pub fn monitor(&self) -> &PowerChannelMonitor {
        &self.monitor
    }

    /// Heater sequencers in board order.
    pub fn sequencers(&self) -> &[HeaterSequencer] {
        &self.sequencers
    }

    /// Telemetry batcher.
    pub fn batcher(&self) -> &TelemetryBatcher {
        &self.batcher
    }

    /// Recoverable faults so far.
    pub fn fault_counts(&self) -> FaultCounts {
        self.classifier.counts()
    }

    /// Timing statistics.
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Whether the shutdown sequence already ran.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    fn stop_reason(&self, max_ticks: Option<u64>) -> Option<StopReason> {
        if !self.running.load(Ordering::SeqCst) {
            Some(StopReason::Interrupted)
        } else if max_ticks.is_some_and(|max| self.stats.tick_count >= max) {
            Some(StopReason::TickLimit)
        } else {
            None
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        if !self.shut_down {
            self.shutdown("Stopping inspection - control loop dropped.");
        }
    }
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("sequencers", &self.sequencers)
            .field("monitor", &self.monitor)
            .field("batcher", &self.batcher)
            .field("stats", &self.stats)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn sleeps_remainder_of_period() {
        assert_eq!(compute_sleep(30 * MS, 100 * MS, 100 * MS), 70 * MS);
    }

    #[test]
    fn overrun_skips_sleep() {
        assert_eq!(compute_sleep(100 * MS, 100 * MS, 100 * MS), Duration::ZERO);
        assert_eq!(compute_sleep(250 * MS, 100 * MS, 100 * MS), Duration::ZERO);
    }

    #[test]
    fn separate_overrun_sleep_target() {
        // Checked against 0.1s, sleeps toward 0.3s.
        assert_eq!(compute_sleep(50 * MS, 100 * MS, 300 * MS), 250 * MS);
        assert_eq!(compute_sleep(150 * MS, 100 * MS, 300 * MS), Duration::ZERO);
        // Sleep target below elapsed clamps to zero.
        assert_eq!(compute_sleep(50 * MS, 100 * MS, 20 * MS), Duration::ZERO);
    }

    #[test]
    fn stats_track_overruns_and_average() {
        let mut stats = CycleStats::default();
        assert_eq!(stats.avg_tick(), Duration::ZERO);
        assert!(!stats.record(20 * MS, 100 * MS));
        assert!(stats.record(120 * MS, 100 * MS));
        assert_eq!(stats.tick_count, 2);
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.max_tick, 120 * MS);
        assert_eq!(stats.avg_tick(), 70 * MS);
    }

    #[test]
    fn boot_wait_interrupted_by_flag() {
        let running = AtomicBool::new(false);
        let start = Instant::now();
        assert!(!sleep_while_running(Duration::from_secs(5), &running));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn sleep_never_exceeds_target(
            elapsed_ms in 0u64..1000,
            period_ms in 1u64..500,
            target_ms in 0u64..500,
        ) {
            let elapsed = Duration::from_millis(elapsed_ms);
            let sleep = compute_sleep(
                elapsed,
                Duration::from_millis(period_ms),
                Duration::from_millis(target_ms),
            );
            if elapsed_ms >= period_ms {
                prop_assert_eq!(sleep, Duration::ZERO);
            } else {
                prop_assert!(elapsed + sleep <= Duration::from_millis(target_ms.max(elapsed_ms)));
            }
        }
    }
}
