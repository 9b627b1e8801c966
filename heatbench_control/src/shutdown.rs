//! Shutdown bookkeeping.
//!
//! The shutdown sequence is best-effort: every step runs even if an earlier
//! one failed. Failures are collected here and logged once at the end.

use std::fmt;
use tracing::{info, warn};

/// One step of the ordered shutdown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownStep {
    /// Flush pending telemetry.
    Flush,
    /// Deactivate all heaters of a board.
    DeactivateHeaters,
    /// Gracefully disconnect a board.
    DisconnectBoard,
    /// Switch a supply channel off.
    DeactivateChannel,
    /// Close the supply connection.
    ClosePowerSupply,
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flush => "flush telemetry",
            Self::DeactivateHeaters => "deactivate heaters",
            Self::DisconnectBoard => "disconnect board",
            Self::DeactivateChannel => "deactivate channel",
            Self::ClosePowerSupply => "close power supply",
        };
        f.write_str(name)
    }
}

/// A failed shutdown step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    /// Which step.
    pub step: ShutdownStep,
    /// Board id or channel name the step acted on.
    pub target: String,
    /// Error text.
    pub message: String,
}

/// Outcome of a shutdown sequence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShutdownReport {
    failures: Vec<StepFailure>,
}

impl ShutdownReport {
    /// Record the result of one step.
    pub fn record<E: fmt::Display>(
        &mut self,
        step: ShutdownStep,
        target: impl Into<String>,
        result: Result<(), E>,
    ) {
        if let Err(e) = result {
            self.failures.push(StepFailure {
                step,
                target: target.into(),
                message: e.to_string(),
            });
        }
    }

    /// Whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failed steps in execution order.
    pub fn failures(&self) -> &[StepFailure] {
        &self.failures
    }

    /// Log the outcome.
    pub fn log(&self) {
        if self.is_clean() {
            info!("Shutdown sequence complete");
            return;
        }
        for f in &self.failures {
            warn!("Shutdown step '{}' failed for {}: {}", f.step, f.target, f.message);
        }
        warn!(
            "Shutdown sequence complete with {} failed step(s)",
            self.failures.len()
        );
    }
}
