//! Value types exchanged with bench drivers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Power-supply output channel number (1-based, as printed on the front panel).
pub type ChannelId = u8;

/// One measurement of a supply channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Output current [A].
    pub current: f64,
    /// Output voltage [V].
    pub voltage: f64,
}

/// Latest per-heater averaged temperatures reported by a board.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HeaterSnapshot {
    /// Average temperature per heater index [°C].
    pub avg_temps: Vec<f64>,
}

impl HeaterSnapshot {
    /// Create a snapshot from per-heater averages.
    pub fn new(avg_temps: Vec<f64>) -> Self {
        Self { avg_temps }
    }

    /// Average temperature of heater `index`, if reported and finite.
    pub fn avg_temp(&self, index: usize) -> Option<f64> {
        self.avg_temps.get(index).copied().filter(|t| t.is_finite())
    }
}

/// Severity passed to a board's own log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoardLogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Something went wrong but the run continues.
    Warning,
    /// The run is about to stop.
    Error,
}

impl BoardLogLevel {
    /// Three-letter tag used in board log files.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Debug => "DBG",
            Self::Info => "INF",
            Self::Warning => "WRN",
            Self::Error => "ERR",
        }
    }
}

impl fmt::Display for BoardLogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_ignores_missing_and_nan() {
        let snap = HeaterSnapshot::new(vec![30.0, f64::NAN]);
        assert_eq!(snap.avg_temp(0), Some(30.0));
        assert_eq!(snap.avg_temp(1), None);
        assert_eq!(snap.avg_temp(2), None);
    }

    #[test]
    fn log_level_tags() {
        assert_eq!(BoardLogLevel::Info.to_string(), "INF");
        assert_eq!(BoardLogLevel::Warning.tag(), "WRN");
    }
}
