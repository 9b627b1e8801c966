//! Bench driver traits and error types.
//!
//! This module defines:
//! - `PowerSupply` trait - Interface for programmable DC supplies
//! - `BoardHandle` trait - Interface for a connected board under test
//! - `TelemetrySink` trait - Interface for the time-series store
//! - `DriverError` / `BoardError` / `SinkError` - Error types for each
//! - Factory type aliases used by the driver registry

use crate::config::PowerConfig;
use crate::hal::types::{BoardLogLevel, ChannelId, HeaterSnapshot, Reading};
use crate::telemetry::TelemetryPoint;
use std::path::Path;
use thiserror::Error;

/// Error types for power-supply operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    /// Instrument address not present on the bus / network.
    #[error("Instrument not found: {0}")]
    NotFound(String),

    /// Connection closed or never established.
    #[error("Instrument unavailable: {0}")]
    Unavailable(String),

    /// Query did not complete in time.
    #[error("Instrument timeout: {0}")]
    Timeout(String),

    /// Instrument answered with something unparsable.
    #[error("Invalid instrument response: {0}")]
    InvalidResponse(String),

    /// Transport-level I/O failure.
    #[error("Instrument I/O error: {0}")]
    Io(String),

    /// Driver-specific configuration rejected.
    #[error("Driver configuration error: {0}")]
    ConfigError(String),

    /// No driver registered under that name.
    #[error("Driver not found: {0}")]
    DriverNotFound(String),
}

impl From<std::io::Error> for DriverError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::Timeout(e.to_string()),
            ErrorKind::NotConnected
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => Self::Unavailable(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

/// Error types for board operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BoardError {
    /// Board did not answer in time.
    #[error("Board read timeout: {0}")]
    ReadTimeout(String),

    /// Transient sensor read glitch (bad checksum, out-of-range sample).
    #[error("Sensor glitch: {0}")]
    SensorGlitch(String),

    /// The active heater has no temperature in the latest snapshot.
    #[error("No temperature reading for heater {heater}")]
    MissingReading {
        /// Heater index.
        heater: usize,
    },

    /// Heater index outside the board's heater range.
    #[error("Heater index {index} out of range (board has {count})")]
    HeaterOutOfRange {
        /// Requested index.
        index: usize,
        /// Heaters on the board.
        count: usize,
    },

    /// Connection to the board lost.
    #[error("Board disconnected: {0}")]
    Disconnected(String),

    /// Board log / data storage became unwritable.
    #[error("Board storage error: {0}")]
    Storage(String),

    /// Board configuration file missing or invalid.
    #[error("Invalid board configuration: {0}")]
    InvalidConfig(String),

    /// Anything the driver could not categorize.
    #[error("Board error: {0}")]
    Other(String),
}

/// Error types for telemetry sink writes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SinkError {
    /// Sink temporarily unreachable.
    #[error("Telemetry sink unavailable: {0}")]
    Unavailable(String),

    /// Write failed.
    #[error("Telemetry sink I/O error: {0}")]
    Io(String),

    /// A point could not be encoded.
    #[error("Telemetry serialization error: {0}")]
    Serialize(String),
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Programmable multi-channel DC power supply.
///
/// # Lifecycle
///
/// 1. Created by a factory (connection opened, instrument identified)
/// 2. `configure()` / `set_output()` per channel
/// 3. `measure()` every tick
/// 4. `close()` once, after every channel was switched off
pub trait PowerSupply: Send {
    /// Driver identifier (e.g., "simulation", "dp832").
    fn name(&self) -> &'static str;

    /// Write voltage/current setpoints; enable OCP at `ocp` if given.
    fn configure(
        &mut self,
        channel: ChannelId,
        voltage: f64,
        current_limit: f64,
        ocp: Option<f64>,
    ) -> Result<(), DriverError>;

    /// Switch a channel output on or off.
    fn set_output(&mut self, channel: ChannelId, on: bool) -> Result<(), DriverError>;

    /// Measure output current and voltage of a channel.
    fn measure(&mut self, channel: ChannelId) -> Result<Reading, DriverError>;

    /// Close the connection. Further calls fail with `DriverError::Unavailable`.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A connected board under test with a row of heaters.
///
/// Each handle is owned by exactly one heater sequencer.
pub trait BoardHandle: Send {
    /// Board identifier.
    fn board_id(&self) -> &str;

    /// Number of heaters on the board.
    fn heater_count(&self) -> usize;

    /// Open the connection and perform the initial exchange.
    fn first_conn(&mut self) -> Result<(), BoardError>;

    /// Put heaters in a known state; optionally start any heaters the board
    /// config predefines.
    fn prepare_heaters(&mut self, start_any_predefined: bool) -> Result<(), BoardError>;

    /// Advance the board's own sampling and refresh the heater snapshot.
    /// `consume` discards the sampled data after logging it on the board side.
    fn poll(&mut self, consume: bool) -> Result<(), BoardError>;

    /// Latest heater snapshot, if any poll has completed.
    fn last_heater_temps(&self) -> Option<&HeaterSnapshot>;

    /// Turn one heater on or off.
    fn set_heater_active(&mut self, index: usize, active: bool) -> Result<(), BoardError>;

    /// Set one heater's objective temperature (0 = none).
    fn set_heater_objective(&mut self, index: usize, value: f64) -> Result<(), BoardError>;

    /// Turn every heater off.
    fn heaters_deactivate_all(&mut self) -> Result<(), BoardError>;

    /// Roll the board's log files if the calendar day changed.
    fn check_newday_and_roll_logfiles(&mut self) -> Result<(), BoardError>;

    /// Disconnect gracefully, leaving `message` in the board log.
    fn stop(&mut self, message: &str) -> Result<(), BoardError>;

    /// Write a line to the board's own log.
    fn log(&mut self, message: &str, level: BoardLogLevel);
}

/// Time-series telemetry store.
pub trait TelemetrySink: Send {
    /// Write a batch of points in one call.
    fn write_points(&mut self, points: &[TelemetryPoint]) -> Result<(), SinkError>;
}

/// Factory function type for power-supply drivers.
pub type PowerSupplyFactory = fn(&PowerConfig) -> Result<Box<dyn PowerSupply>, DriverError>;

/// Factory function type for board drivers: `(board_id, board config file)`.
pub type BoardFactory = fn(&str, &Path) -> Result<Box<dyn BoardHandle>, BoardError>;
