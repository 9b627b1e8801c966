//! Telemetry batching with adaptive rate.
//!
//! Each tick runs in one of two modes:
//!
//! - **Full**: on cadence (every N ticks or every S seconds), both signals of
//!   every channel are emitted and flushed right away.
//! - **Delta**: a signal is emitted only if it moved by more than its relative
//!   threshold since the previous tick.
//!
//! The previous-value cache is updated on every tick whether or not a point
//! was emitted.

use chrono::{DateTime, Utc};
use heatbench_common::config::{LogCadence, TelemetryConfig};
use heatbench_common::hal::driver::{SinkError, TelemetrySink};
use heatbench_common::hal::types::ChannelId;
use heatbench_common::telemetry::{Signal, TelemetryPoint};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Logging mode of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Emit everything, then flush.
    Full,
    /// Emit only significant changes.
    Delta,
}

/// Loop-wide telemetry state.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Ticks started so far.
    pub tick: u64,
    /// When the last full-mode tick started.
    pub last_full_log: Option<Instant>,
    previous: HashMap<(ChannelId, Signal), f64>,
}

impl LoopState {
    /// Cached value of a signal from the previous tick.
    pub fn previous(&self, channel: ChannelId, signal: Signal) -> Option<f64> {
        self.previous.get(&(channel, signal)).copied()
    }

    fn update(&mut self, channel: ChannelId, signal: Signal, value: Option<f64>) {
        match value {
            Some(v) => {
                self.previous.insert((channel, signal), v);
            }
            None => {
                self.previous.remove(&(channel, signal));
            }
        }
    }
}

/// Readings of one channel in one tick. `None` means absent: unreadable, or
/// dropped by the safety check.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSample {
    /// Supply channel.
    pub channel: ChannelId,
    /// Board powered by the channel (`board_id` tag).
    pub board_id: String,
    /// Trusted current [A].
    pub current: Option<f64>,
    /// Voltage [V].
    pub voltage: Option<f64>,
}

impl ChannelSample {
    fn value(&self, signal: Signal) -> Option<f64> {
        match signal {
            Signal::Current => self.current,
            Signal::Voltage => self.voltage,
        }
    }
}

/// Whether `new` differs from `previous` by more than `threshold` relative to
/// `previous`. A signal without a previous value always counts as changed.
pub fn exceeds_threshold(new: f64, previous: Option<f64>, threshold: f64) -> bool {
    match previous {
        Some(prev) => (new - prev).abs() > threshold * prev.abs(),
        None => true,
    }
}

/// Decides what to log each tick and batches points for the sink.
pub struct TelemetryBatcher {
    sink: Box<dyn TelemetrySink>,
    cadence: LogCadence,
    current_threshold: f64,
    voltage_threshold: f64,
    flush_threshold: usize,
    max_buffered: usize,
    buffer: VecDeque<TelemetryPoint>,
    state: LoopState,
    dropped: u64,
}

impl TelemetryBatcher {
    /// Create a batcher writing to `sink`.
    pub fn new(config: &TelemetryConfig, sink: Box<dyn TelemetrySink>) -> Self {
        Self {
            sink,
            cadence: config.full_log_cadence,
            current_threshold: config.current_threshold,
            voltage_threshold: config.voltage_threshold,
            flush_threshold: config.flush_threshold,
            max_buffered: config.max_buffered,
            buffer: VecDeque::new(),
            state: LoopState::default(),
            dropped: 0,
        }
    }

    /// Decide the mode of the tick starting at `now` and advance the tick
    /// counter.
    pub fn begin_tick(&mut self, now: Instant) -> LogMode {
        let full = match self.cadence {
            LogCadence::Ticks(n) => self.state.tick % n.max(1) == 0,
            LogCadence::Seconds(secs) => match self.state.last_full_log {
                None => true,
                Some(last) => {
                    now.saturating_duration_since(last)
                        >= Duration::try_from_secs_f64(secs).unwrap_or_default()
                }
            },
        };
        self.state.tick += 1;
        if full {
            self.state.last_full_log = Some(now);
            LogMode::Full
        } else {
            LogMode::Delta
        }
    }

    /// Enqueue the points `sample` warrants in `mode` and update the cache.
    ///
    /// Returns the number of points enqueued.
    pub fn record(&mut self, mode: LogMode, time: DateTime<Utc>, sample: &ChannelSample) -> usize {
        let mut enqueued = 0;
        for signal in Signal::ALL {
            let Some(value) = sample.value(signal) else {
                self.state.update(sample.channel, signal, None);
                continue;
            };
            let emit = match mode {
                LogMode::Full => true,
                LogMode::Delta => exceeds_threshold(
                    value,
                    self.state.previous(sample.channel, signal),
                    self.threshold(signal),
                ),
            };
            if emit {
                self.push(TelemetryPoint::new(time, sample.board_id.as_str(), signal, value));
                enqueued += 1;
            }
            self.state.update(sample.channel, signal, Some(value));
        }
        enqueued
    }

    /// Whether enough delta points accumulated to warrant a flush.
    pub fn should_flush(&self) -> bool {
        self.buffer.len() >= self.flush_threshold
    }

    /// Send the buffer to the sink in one call and clear it.
    ///
    /// On failure the points stay buffered for the next flush.
    pub fn flush(&mut self) -> Result<usize, SinkError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let batch = self.buffer.make_contiguous();
        match self.sink.write_points(batch) {
            Ok(()) => {
                let count = self.buffer.len();
                self.buffer.clear();
                debug!("Flushed {count} telemetry points");
                Ok(count)
            }
            Err(e) => {
                debug!("Flush of {} points failed, kept for retry", self.buffer.len());
                Err(e)
            }
        }
    }

    /// Points waiting for the next flush, oldest first.
    pub fn pending(&self) -> impl Iterator<Item = &TelemetryPoint> {
        self.buffer.iter()
    }

    /// Number of points waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Points dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Tick counter and previous-value cache.
    pub fn state(&self) -> &LoopState {
        &self.state
    }

    fn threshold(&self, signal: Signal) -> f64 {
        match signal {
            Signal::Current => self.current_threshold,
            Signal::Voltage => self.voltage_threshold,
        }
    }

    fn push(&mut self, point: TelemetryPoint) {
        if self.buffer.len() >= self.max_buffered {
            self.buffer.pop_front();
            self.dropped += 1;
            if self.dropped == 1 || self.dropped % 1000 == 0 {
                warn!(
                    "Telemetry buffer full ({} points), dropped {} oldest so far",
                    self.max_buffered, self.dropped
                );
            }
        }
        self.buffer.push_back(point);
    }
}

impl std::fmt::Debug for TelemetryBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryBatcher")
            .field("cadence", &self.cadence)
            .field("pending", &self.buffer.len())
            .field("tick", &self.state.tick)
            .field("dropped", &self.dropped)
            .finish()
    }
}
