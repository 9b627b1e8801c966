//! Prelude module for common re-exports.
//!
//! ```rust
//! use heatbench_common::prelude::*;
//! ```

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{
    BenchConfig, ConfigError, ConfigLoader, HeaterConfig, LogCadence, LogLevel, LoopConfig,
    PowerConfig, SharedConfig, SinkConfig, TelemetryConfig,
};

// ─── Drivers ────────────────────────────────────────────────────────
pub use crate::hal::driver::{
    BoardError, BoardHandle, DriverError, PowerSupply, SinkError, TelemetrySink,
};
pub use crate::hal::types::{BoardLogLevel, ChannelId, HeaterSnapshot, Reading};

// ─── Telemetry ──────────────────────────────────────────────────────
pub use crate::telemetry::{Signal, TelemetryPoint};

// ─── System Constants ───────────────────────────────────────────────
pub use crate::consts::{DCPS_MEASUREMENT, MAX_BOARDS};
