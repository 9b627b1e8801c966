//! Fault classification and loop error types.
//!
//! Every fault raised while sampling a channel, flushing telemetry or
//! processing a board is routed through [`ErrorClassifier`]. The mapping of
//! known kinds to [`Disposition::Recoverable`] is fixed; everything else is
//! [`Disposition::Fatal`].
//!
//! | Source | Recoverable kinds |
//! |---|---|
//! | board | `ReadTimeout`, `SensorGlitch`, `MissingReading` |
//! | power supply | `Timeout`, `InvalidResponse` |
//! | sink | `Unavailable`, `Io` |

use heatbench_common::config::ConfigError;
use heatbench_common::hal::driver::{BoardError, BoardHandle, DriverError, SinkError};
use heatbench_common::hal::types::{BoardLogLevel, ChannelId};
use thiserror::Error;
use tracing::{error, warn};

/// A fault raised during one tick.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Fault {
    /// Board poll, snapshot or heater command failed.
    #[error("board {board_id}: {error}")]
    Board {
        /// Board the fault came from.
        board_id: String,
        /// Driver error.
        #[source]
        error: BoardError,
    },

    /// Channel sampling or cutoff failed.
    #[error("power channel {channel}: {error}")]
    Power {
        /// Supply channel.
        channel: ChannelId,
        /// Driver error.
        #[source]
        error: DriverError,
    },

    /// Telemetry flush failed.
    #[error("telemetry sink: {0}")]
    Sink(#[from] SinkError),
}

/// What the loop does with a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log, skip the affected work for this tick, continue.
    Recoverable,
    /// Stop the loop and run the shutdown sequence.
    Fatal,
}

/// Recoverable faults seen so far, per source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounts {
    /// Board faults.
    pub board: u64,
    /// Power-supply faults.
    pub power: u64,
    /// Sink faults.
    pub sink: u64,
}

impl FaultCounts {
    /// Sum over all sources.
    pub fn total(&self) -> u64 {
        self.board + self.power + self.sink
    }
}

/// Classifies faults and keeps the recoverable-fault tally.
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    counts: FaultCounts,
}

impl ErrorClassifier {
    /// Create a classifier with zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure classification of one fault.
    pub fn classify(fault: &Fault) -> Disposition {
        let recoverable = match fault {
            Fault::Board { error, .. } => matches!(
                error,
                BoardError::ReadTimeout(_)
                    | BoardError::SensorGlitch(_)
                    | BoardError::MissingReading { .. }
            ),
            Fault::Power { error, .. } => matches!(
                error,
                DriverError::Timeout(_) | DriverError::InvalidResponse(_)
            ),
            Fault::Sink(error) => matches!(error, SinkError::Unavailable(_) | SinkError::Io(_)),
        };
        if recoverable {
            Disposition::Recoverable
        } else {
            Disposition::Fatal
        }
    }

    /// Classify, count and log a fault.
    ///
    /// Board faults are also written to the board's own log when `board` is
    /// given.
    pub fn handle(&mut self, fault: &Fault, board: Option<&mut dyn BoardHandle>) -> Disposition {
        let disposition = Self::classify(fault);
        match disposition {
            Disposition::Recoverable => {
                match fault {
                    Fault::Board { .. } => self.counts.board += 1,
                    Fault::Power { .. } => self.counts.power += 1,
                    Fault::Sink(_) => self.counts.sink += 1,
                }
                warn!("Recoverable fault: {fault}");
            }
            Disposition::Fatal => error!("Fatal fault: {fault}"),
        }

        if let (Fault::Board { error, .. }, Some(board)) = (fault, board) {
            let level = match disposition {
                Disposition::Recoverable => BoardLogLevel::Warning,
                Disposition::Fatal => BoardLogLevel::Error,
            };
            board.log(&error.to_string(), level);
        }
        disposition
    }

    /// [`handle`](Self::handle), turning a fatal disposition into a loop error.
    pub fn route(&mut self, fault: Fault, board: Option<&mut dyn BoardHandle>) -> Result<(), LoopError> {
        match self.handle(&fault, board) {
            Disposition::Recoverable => Ok(()),
            Disposition::Fatal => Err(LoopError::Fatal(fault)),
        }
    }

    /// Recoverable faults counted so far.
    pub fn counts(&self) -> FaultCounts {
        self.counts
    }
}

/// Error that ends the tick loop.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LoopError {
    /// A fault classified as fatal.
    #[error("fatal fault, {0}")]
    Fatal(Fault),
}

/// Error raised before the tick loop is entered.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration missing, invalid or inconsistent with the drivers.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Power supply unreachable or rejected a setpoint.
    #[error("power supply connection error: {0}")]
    Connection(#[from] DriverError),

    /// Board unreachable or not ready.
    #[error("board {board_id} connection error: {error}")]
    Board {
        /// Board id.
        board_id: String,
        /// Driver error.
        #[source]
        error: BoardError,
    },

    /// Telemetry sink could not be opened.
    #[error("telemetry sink error: {0}")]
    Sink(#[from] SinkError),

    /// Cancellation requested during startup.
    #[error("interrupted during startup")]
    Interrupted,
}
