//! System-wide constants for the heatbench workspace.
//!
//! Single source of truth for numeric limits and defaults.

/// Maximum number of boards on one bench (the supply has two 12 V outputs).
pub const MAX_BOARDS: usize = 2;

/// Measurement name used for every power-supply telemetry point.
pub const DCPS_MEASUREMENT: &str = "DCPS";

/// Default channel voltage setpoint [V].
pub const DEFAULT_VOLTAGE: f64 = 12.0;

/// Default channel current limit [A].
pub const DEFAULT_CURRENT_LIMIT: f64 = 1.5;

/// Default software safety current limit [A].
pub const DEFAULT_SAFETY_LIMIT: f64 = 1.2;

/// Default hysteresis margin below the heater target [°C].
pub const DEFAULT_HYSTERESIS: f64 = 1.5;

/// Default number of ticks ignored after a board attaches.
pub const DEFAULT_SETTLING_TICKS: u32 = 5;

/// Default full-log cadence in ticks.
pub const DEFAULT_FULL_LOG_TICKS: u64 = 10;

/// Default relative change that triggers a delta-mode current point.
pub const DEFAULT_CURRENT_THRESHOLD: f64 = 0.05;

/// Default relative change that triggers a delta-mode voltage point.
pub const DEFAULT_VOLTAGE_THRESHOLD: f64 = 0.01;

/// Default number of buffered delta points that forces a flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 50;

/// Default upper bound of the telemetry buffer.
pub const DEFAULT_MAX_BUFFERED: usize = 1000;

/// Default loop period [s].
pub const DEFAULT_LOOP_PERIOD_S: f64 = 0.1;

/// Default wait for boards to boot once their supply channel is on [s].
pub const DEFAULT_BOARD_BOOT_WAIT_S: f64 = 5.0;

/// Default directory holding `inspection_<board_id>.toml` files.
pub const DEFAULT_BOARD_CONFIG_DIR: &str = "cfg/inspection";

/// Default TCP port of a LAN-attached SCPI instrument (raw socket).
pub const DEFAULT_SCPI_PORT: u16 = 5555;

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/heatbench.toml";
