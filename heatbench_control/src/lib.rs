//! # Heatbench Control Library
//!
//! Periodic control loop for a heater test bench: two boards, each powered
//! from one output of a programmable DC supply, heat their heaters one after
//! another while the supply current is sampled, safety-checked and logged.
//!
//! ## Module Structure
//!
//! - [`power`] - Channel setup, sampling and the software safety cutoff
//! - [`telemetry`] - Full/delta telemetry batching toward a sink
//! - [`sequencer`] - One-heater-at-a-time warm-up per board
//! - [`error`] - Fault classification (recoverable vs. fatal)
//! - [`cycle`] - The control loop, its timing and the shutdown sequence
//! - [`shutdown`] - Shutdown step bookkeeping
//!
//! ## Tick
//!
//! ```text
//!  sample CH1..CHn ──► safety check ──► batch telemetry ──► flush?
//!                                                              │
//!  sleep ◄── step sequencers ◄── poll boards ◄─────────────────┘
//! ```

pub mod cycle;
pub mod error;
pub mod power;
pub mod sequencer;
pub mod shutdown;
pub mod telemetry;

pub use crate::cycle::{BenchDrivers, ControlLoop, CycleStats, RunSummary, StopReason};
pub use crate::error::{ErrorClassifier, Fault, LoopError, StartupError};
