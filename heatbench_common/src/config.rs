//! Configuration loading traits and types.
//!
//! A bench run is described by one TOML file. It is loaded once, validated,
//! and handed to the control loop as an immutable value.
//!
//! # Usage
//!
//! ```rust,no_run
//! use heatbench_common::config::{load_config, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = load_config(Path::new("config/heatbench.toml"))?;
//!     println!("Boards: {:?}", config.board_ids());
//!     Ok(())
//! }
//! ```
//!
//! # TOML Example
//!
//! ```toml
//! board_config_dir = "cfg/inspection"
//!
//! [[boards]]
//! id = "abc24"
//!
//! [power]
//! driver = "simulation"
//! safety_limit = 1.2
//!
//! [heater]
//! target_temperature = 31.0
//! hysteresis = 1.5
//! settling_ticks = 5
//!
//! [telemetry]
//! full_log_cadence = { ticks = 10 }
//!
//! [loop]
//! period = 0.1
//! ```

use crate::consts::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// A board's own configuration file is missing.
    #[error("No board config file found at '{}'", .0.display())]
    BoardConfigNotFound(PathBuf),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

fn default_service_name() -> String {
    "heatbench".to_string()
}

/// Common configuration fields.
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "heatbench-rpi-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.to_path_buf())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Defaults ───────────────────────────────────────────────────────

fn default_board_config_dir() -> PathBuf {
    PathBuf::from(DEFAULT_BOARD_CONFIG_DIR)
}

fn default_board_driver() -> String {
    "simulation".to_string()
}

fn default_power_driver() -> String {
    "simulation".to_string()
}

fn default_voltage() -> f64 {
    DEFAULT_VOLTAGE
}

fn default_current_limit() -> f64 {
    DEFAULT_CURRENT_LIMIT
}

fn default_safety_limit() -> f64 {
    DEFAULT_SAFETY_LIMIT
}

fn default_hysteresis() -> f64 {
    DEFAULT_HYSTERESIS
}

fn default_settling_ticks() -> u32 {
    DEFAULT_SETTLING_TICKS
}

fn default_current_threshold() -> f64 {
    DEFAULT_CURRENT_THRESHOLD
}

fn default_voltage_threshold() -> f64 {
    DEFAULT_VOLTAGE_THRESHOLD
}

fn default_flush_threshold() -> usize {
    DEFAULT_FLUSH_THRESHOLD
}

fn default_max_buffered() -> usize {
    DEFAULT_MAX_BUFFERED
}

fn default_period() -> f64 {
    DEFAULT_LOOP_PERIOD_S
}

fn default_boot_wait() -> f64 {
    DEFAULT_BOARD_BOOT_WAIT_S
}

// ─── Sections ───────────────────────────────────────────────────────

/// Complete run configuration loaded from `heatbench.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    /// Logging / identity.
    #[serde(default)]
    pub shared: SharedConfig,

    /// Directory holding `inspection_<board_id>.toml` files.
    /// Relative paths resolve against the directory of the config file.
    #[serde(default = "default_board_config_dir")]
    pub board_config_dir: PathBuf,

    /// Board driver name (`simulation`).
    #[serde(default = "default_board_driver")]
    pub board_driver: String,

    /// Boards under test; board `i` is powered by supply channel `i + 1`.
    pub boards: Vec<BoardEntry>,

    /// Power-supply setpoints and safety limit.
    pub power: PowerConfig,

    /// Heater sequencing parameters.
    pub heater: HeaterConfig,

    /// Telemetry logging parameters.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Loop timing.
    #[serde(rename = "loop", default)]
    pub cycle: LoopConfig,
}

/// One board under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BoardEntry {
    /// Board identifier (also the telemetry `board_id` tag).
    pub id: String,

    /// Explicit board config file; defaults to
    /// `<board_config_dir>/inspection_<id>.toml`.
    #[serde(default)]
    pub config: Option<PathBuf>,
}

impl BoardEntry {
    /// Path of the board's config file given the board config directory.
    pub fn config_path(&self, board_config_dir: &Path) -> PathBuf {
        match &self.config {
            Some(path) => path.clone(),
            None => board_config_dir.join(format!("inspection_{}.toml", self.id)),
        }
    }
}

/// Power-supply configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerConfig {
    /// Driver name (`simulation`, `dp832`).
    #[serde(default = "default_power_driver")]
    pub driver: String,

    /// Instrument address (`host[:port]` for LAN instruments).
    #[serde(default)]
    pub address: Option<String>,

    /// Channel voltage setpoint [V].
    #[serde(default = "default_voltage")]
    pub voltage: f64,

    /// Channel current limit [A].
    #[serde(default = "default_current_limit")]
    pub current_limit: f64,

    /// Hardware over-current protection threshold [A]; disabled if absent.
    #[serde(default)]
    pub ocp: Option<f64>,

    /// Software safety limit checked on every sample [A].
    #[serde(default = "default_safety_limit")]
    pub safety_limit: f64,

    /// Driver-specific options.
    #[serde(default)]
    pub driver_config: HashMap<String, toml::Value>,
}

/// Heater sequencing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HeaterConfig {
    /// Objective temperature of the active heater [°C].
    pub target_temperature: f64,

    /// A heater is done once its average reaches `target - hysteresis` [°C].
    #[serde(default = "default_hysteresis")]
    pub hysteresis: f64,

    /// Ticks ignored after attach while sensor readings settle.
    #[serde(default = "default_settling_ticks")]
    pub settling_ticks: u32,
}

impl HeaterConfig {
    /// Temperature at which the active heater hands over to the next one.
    #[inline]
    pub fn advance_threshold(&self) -> f64 {
        self.target_temperature - self.hysteresis
    }
}

/// When full-mode telemetry is emitted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogCadence {
    /// Every N ticks.
    Ticks(u64),
    /// Once the given number of seconds has elapsed since the last full log.
    Seconds(f64),
}

impl Default for LogCadence {
    fn default() -> Self {
        Self::Ticks(DEFAULT_FULL_LOG_TICKS)
    }
}

/// Telemetry sink selection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Append one JSON point per line to a file.
    Jsonl {
        /// Output file.
        path: PathBuf,
    },
    /// Emit points through the tracing subscriber.
    #[default]
    Log,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Full-mode cadence.
    #[serde(default)]
    pub full_log_cadence: LogCadence,

    /// Relative change of current that is worth a delta point.
    #[serde(default = "default_current_threshold")]
    pub current_threshold: f64,

    /// Relative change of voltage that is worth a delta point.
    #[serde(default = "default_voltage_threshold")]
    pub voltage_threshold: f64,

    /// Buffered delta points that force a flush.
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,

    /// Upper bound of buffered points (oldest dropped beyond it).
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,

    /// Where points go.
    #[serde(default)]
    pub sink: SinkConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            full_log_cadence: LogCadence::default(),
            current_threshold: DEFAULT_CURRENT_THRESHOLD,
            voltage_threshold: DEFAULT_VOLTAGE_THRESHOLD,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            max_buffered: DEFAULT_MAX_BUFFERED,
            sink: SinkConfig::default(),
        }
    }
}

/// Loop timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    /// Target tick period; a tick slower than this skips the sleep [s].
    #[serde(default = "default_period")]
    pub period: f64,

    /// Sleep target measured from tick start when the tick was on time [s].
    /// Defaults to `period`.
    #[serde(default)]
    pub overrun_sleep: Option<f64>,

    /// Wait after powering the boards before connecting to them [s].
    #[serde(default = "default_boot_wait")]
    pub board_boot_wait: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            period: DEFAULT_LOOP_PERIOD_S,
            overrun_sleep: None,
            board_boot_wait: DEFAULT_BOARD_BOOT_WAIT_S,
        }
    }
}

impl LoopConfig {
    /// Tick period.
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(self.period).unwrap_or_default()
    }

    /// Sleep target for on-time ticks.
    pub fn overrun_sleep(&self) -> Duration {
        let secs = self.overrun_sleep.unwrap_or(self.period);
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    /// Board boot wait.
    pub fn board_boot_wait(&self) -> Duration {
        Duration::try_from_secs_f64(self.board_boot_wait).unwrap_or_default()
    }
}

// ─── Validation ─────────────────────────────────────────────────────

fn validation(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

fn require_positive(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(validation(format!("{name} must be a positive number, got {value}")));
    }
    Ok(())
}

fn require_non_negative(name: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value < 0.0 {
        return Err(validation(format!("{name} must be >= 0, got {value}")));
    }
    Ok(())
}

fn require_duration(name: &str, value: f64) -> Result<(), ConfigError> {
    Duration::try_from_secs_f64(value)
        .map(|_| ())
        .map_err(|e| validation(format!("{name}: {e}")))
}

impl BenchConfig {
    /// Validate the configuration (no filesystem access).
    ///
    /// # Validation Rules
    /// 1. 1..=MAX_BOARDS boards with unique, non-empty ids
    /// 2. Setpoints, OCP and safety limit positive
    /// 3. Hysteresis and delta thresholds non-negative
    /// 4. Full-log cadence positive
    /// 5. `0 < flush_threshold <= max_buffered`
    /// 6. Loop period positive, overrun sleep and boot wait non-negative
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.boards.is_empty() {
            return Err(validation("at least one board must be configured"));
        }
        if self.boards.len() > MAX_BOARDS {
            return Err(validation(format!(
                "too many boards: {} (max {MAX_BOARDS})",
                self.boards.len()
            )));
        }
        let mut ids = HashSet::new();
        for board in &self.boards {
            if board.id.trim().is_empty() {
                return Err(validation("board id cannot be empty"));
            }
            if !ids.insert(board.id.as_str()) {
                return Err(validation(format!("duplicate board id: {}", board.id)));
            }
        }

        if self.board_driver.is_empty() {
            return Err(validation("board_driver cannot be empty"));
        }
        if self.power.driver.is_empty() {
            return Err(validation("power.driver cannot be empty"));
        }
        require_positive("power.voltage", self.power.voltage)?;
        require_positive("power.current_limit", self.power.current_limit)?;
        if let Some(ocp) = self.power.ocp {
            require_positive("power.ocp", ocp)?;
        }
        require_positive("power.safety_limit", self.power.safety_limit)?;

        if !self.heater.target_temperature.is_finite() {
            return Err(validation("heater.target_temperature must be finite"));
        }
        require_non_negative("heater.hysteresis", self.heater.hysteresis)?;

        match self.telemetry.full_log_cadence {
            LogCadence::Ticks(0) => {
                return Err(validation("telemetry.full_log_cadence.ticks must be > 0"));
            }
            LogCadence::Ticks(_) => {}
            LogCadence::Seconds(secs) => {
                require_positive("telemetry.full_log_cadence.seconds", secs)?;
                require_duration("telemetry.full_log_cadence.seconds", secs)?;
            }
        }
        require_non_negative("telemetry.current_threshold", self.telemetry.current_threshold)?;
        require_non_negative("telemetry.voltage_threshold", self.telemetry.voltage_threshold)?;
        if self.telemetry.flush_threshold == 0 {
            return Err(validation("telemetry.flush_threshold must be > 0"));
        }
        if self.telemetry.max_buffered < self.telemetry.flush_threshold {
            return Err(validation(format!(
                "telemetry.max_buffered ({}) must be >= flush_threshold ({})",
                self.telemetry.max_buffered, self.telemetry.flush_threshold
            )));
        }

        require_positive("loop.period", self.cycle.period)?;
        require_duration("loop.period", self.cycle.period)?;
        if let Some(sleep) = self.cycle.overrun_sleep {
            require_non_negative("loop.overrun_sleep", sleep)?;
            require_duration("loop.overrun_sleep", sleep)?;
        }
        require_non_negative("loop.board_boot_wait", self.cycle.board_boot_wait)?;
        require_duration("loop.board_boot_wait", self.cycle.board_boot_wait)?;

        Ok(())
    }

    /// Board ids in channel order.
    pub fn board_ids(&self) -> Vec<&str> {
        self.boards.iter().map(|b| b.id.as_str()).collect()
    }

    /// Resolved board config file paths in channel order.
    pub fn board_config_paths(&self) -> Vec<PathBuf> {
        self.boards
            .iter()
            .map(|b| b.config_path(&self.board_config_dir))
            .collect()
    }

    /// Resolve relative paths against `base` (normally the config file's directory).
    pub fn resolve_paths(&mut self, base: &Path) {
        self.board_config_dir = resolve_path(base, &self.board_config_dir);
        for board in &mut self.boards {
            if let Some(path) = board.config.as_mut() {
                *path = resolve_path(base, path);
            }
        }
        if let SinkConfig::Jsonl { path } = &mut self.telemetry.sink {
            *path = resolve_path(base, path);
        }
    }

    /// Check that every board config file exists.
    pub fn verify_board_configs(&self) -> Result<(), ConfigError> {
        for path in self.board_config_paths() {
            if !path.is_file() {
                return Err(ConfigError::BoardConfigNotFound(path));
            }
        }
        Ok(())
    }
}

/// Resolve a possibly relative path against a base directory.
pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Load, resolve and validate a run configuration.
///
/// 1. Parse `path` → `BenchConfig`
/// 2. Validate parameters
/// 3. Resolve relative paths against the directory of `path`
/// 4. Verify that every board config file exists
pub fn load_config(path: &Path) -> Result<BenchConfig, ConfigError> {
    let mut config = BenchConfig::load(path)?;
    config.validate()?;

    let base = path.parent().unwrap_or(Path::new("."));
    config.resolve_paths(base);
    config.verify_board_configs()?;

    debug!(
        "Loaded {} ({} boards, power driver '{}')",
        path.display(),
        config.boards.len(),
        config.power.driver
    );
    Ok(config)
}

/// Parse and validate a run configuration from a TOML string (no path
/// resolution, no filesystem checks).
pub fn parse_config(content: &str) -> Result<BenchConfig, ConfigError> {
    let config: BenchConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}
