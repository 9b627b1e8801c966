//! Simulated board under test.
//!
//! A row of [`HeaterModel`]s behind the `BoardHandle` interface, configured
//! from the board's `inspection_<id>.toml` file:
//!
//! ```toml
//! heater_count = 10
//! ambient = 22.0
//! heating_rate = 0.5
//! cooling_coefficient = 0.05
//! log_dir = "logs"
//!
//! [[predefined]]
//! index = 3
//! objective = 28.0
//!
//! [faults]
//! glitch_every = 50
//! disconnect_after = 1000
//! ```

use super::thermal::HeaterModel;
use chrono::{Local, NaiveDate};
use heatbench_common::config::resolve_path;
use heatbench_common::hal::driver::{BoardError, BoardHandle};
use heatbench_common::hal::types::{BoardLogLevel, HeaterSnapshot};
use serde::Deserialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

fn default_heater_count() -> usize {
    10
}

fn default_ambient() -> f64 {
    22.0
}

fn default_heating_rate() -> f64 {
    0.5
}

fn default_cooling_coefficient() -> f64 {
    0.05
}

/// Heater started by `prepare_heaters(true)`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PredefinedHeater {
    /// Heater index.
    pub index: usize,
    /// Objective temperature [°C].
    pub objective: f64,
}

/// Injected board faults.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimFaults {
    /// Every Nth poll fails with a sensor glitch.
    #[serde(default)]
    pub glitch_every: Option<u64>,
    /// Polls after which the board drops its connection.
    #[serde(default)]
    pub disconnect_after: Option<u64>,
}

/// Simulated board configuration file.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SimBoardConfig {
    /// Number of heaters.
    #[serde(default = "default_heater_count")]
    pub heater_count: usize,
    /// Ambient temperature [°C].
    #[serde(default = "default_ambient")]
    pub ambient: f64,
    /// Maximum temperature gain of an active heater per poll [°C].
    #[serde(default = "default_heating_rate")]
    pub heating_rate: f64,
    /// Fraction of the excess over ambient lost per poll.
    #[serde(default = "default_cooling_coefficient")]
    pub cooling_coefficient: f64,
    /// Heaters started by `prepare_heaters(true)`.
    #[serde(default)]
    pub predefined: Vec<PredefinedHeater>,
    /// Directory for the board's daily log files; no file logging if absent.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Injected faults.
    #[serde(default)]
    pub faults: SimFaults,
}

impl Default for SimBoardConfig {
    fn default() -> Self {
        Self {
            heater_count: default_heater_count(),
            ambient: default_ambient(),
            heating_rate: default_heating_rate(),
            cooling_coefficient: default_cooling_coefficient(),
            predefined: Vec::new(),
            log_dir: None,
            faults: SimFaults::default(),
        }
    }
}

impl SimBoardConfig {
    /// Load and validate a board config file.
    pub fn load(path: &Path) -> Result<Self, BoardError> {
        let content = fs::read_to_string(path).map_err(|e| {
            BoardError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut config: Self = toml::from_str(&content).map_err(|e| {
            BoardError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;

        if let Some(dir) = config.log_dir.as_mut() {
            *dir = resolve_path(path.parent().unwrap_or(Path::new(".")), dir);
        }
        Ok(config)
    }

    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), BoardError> {
        if self.heater_count == 0 {
            return Err(BoardError::InvalidConfig("heater_count must be > 0".to_string()));
        }
        if !(self.cooling_coefficient >= 0.0 && self.cooling_coefficient < 1.0) {
            return Err(BoardError::InvalidConfig(format!(
                "cooling_coefficient must be in [0, 1), got {}",
                self.cooling_coefficient
            )));
        }
        if !(self.heating_rate >= 0.0) {
            return Err(BoardError::InvalidConfig(format!(
                "heating_rate must be >= 0, got {}",
                self.heating_rate
            )));
        }
        for p in &self.predefined {
            if p.index >= self.heater_count {
                return Err(BoardError::HeaterOutOfRange {
                    index: p.index,
                    count: self.heater_count,
                });
            }
        }
        if self.faults.glitch_every == Some(0) {
            return Err(BoardError::InvalidConfig("faults.glitch_every must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Daily board log file.
#[derive(Debug)]
struct BoardLog {
    dir: Option<PathBuf>,
    board_id: String,
    day: NaiveDate,
    file: Option<File>,
}

impl BoardLog {
    fn new(dir: Option<PathBuf>, board_id: &str) -> Self {
        Self {
            dir,
            board_id: board_id.to_string(),
            day: Local::now().date_naive(),
            file: None,
        }
    }

    fn path_for(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}_{}.log", self.board_id, self.day.format("%Y%m%d")))
    }

    fn write(&mut self, level: BoardLogLevel, message: &str) -> Result<(), BoardError> {
        debug!(board = %self.board_id, "[{level}] {message}");
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };

        if self.file.is_none() {
            fs::create_dir_all(&dir)
                .map_err(|e| BoardError::Storage(format!("{}: {e}", dir.display())))?;
            let path = self.path_for(&dir);
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| BoardError::Storage(format!("{}: {e}", path.display())))?;
            self.file = Some(file);
        }

        if let Some(file) = self.file.as_mut() {
            writeln!(
                file,
                "{} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                level.tag(),
                message
            )
            .map_err(|e| BoardError::Storage(e.to_string()))?;
        }
        Ok(())
    }

    /// Switch to a new file if `today` differs from the current day.
    fn roll(&mut self, today: NaiveDate) -> bool {
        if today == self.day {
            return false;
        }
        self.day = today;
        self.file = None;
        true
    }
}

/// Simulated board implementing `BoardHandle`.
#[derive(Debug)]
pub struct SimulatedBoard {
    board_id: String,
    config: SimBoardConfig,
    heaters: Vec<HeaterModel>,
    snapshot: Option<HeaterSnapshot>,
    connected: bool,
    polls: u64,
    log: BoardLog,
}

impl SimulatedBoard {
    /// Create a disconnected board from its configuration.
    pub fn new(board_id: &str, config: SimBoardConfig) -> Self {
        let heaters = (0..config.heater_count)
            .map(|_| HeaterModel::new(config.ambient, config.heating_rate, config.cooling_coefficient))
            .collect();
        let log = BoardLog::new(config.log_dir.clone(), board_id);
        Self {
            board_id: board_id.to_string(),
            config,
            heaters,
            snapshot: None,
            connected: false,
            polls: 0,
            log,
        }
    }

    /// Heater model at `index`.
    pub fn heater(&self, index: usize) -> Option<&HeaterModel> {
        self.heaters.get(index)
    }

    /// Indices of heaters currently switched on.
    pub fn active_heaters(&self) -> Vec<usize> {
        self.heaters
            .iter()
            .enumerate()
            .filter_map(|(i, h)| h.is_active().then_some(i))
            .collect()
    }

    /// Whether `first_conn` succeeded and `stop` has not been called.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    fn require_connected(&self) -> Result<(), BoardError> {
        if self.connected {
            Ok(())
        } else {
            Err(BoardError::Disconnected(format!("{} not connected", self.board_id)))
        }
    }

    fn heater_mut(&mut self, index: usize) -> Result<&mut HeaterModel, BoardError> {
        self.require_connected()?;
        let count = self.heaters.len();
        self.heaters
            .get_mut(index)
            .ok_or(BoardError::HeaterOutOfRange { index, count })
    }

    fn switch_all_off(&mut self) {
        for heater in &mut self.heaters {
            heater.set_active(false);
            heater.set_objective(0.0);
        }
    }
}

impl BoardHandle for SimulatedBoard {
    fn board_id(&self) -> &str {
        &self.board_id
    }

    fn heater_count(&self) -> usize {
        self.heaters.len()
    }

    fn first_conn(&mut self) -> Result<(), BoardError> {
        self.connected = true;
        self.polls = 0;
        self.snapshot = None;
        info!("Simulated board {} connected ({} heaters)", self.board_id, self.heaters.len());
        self.log.write(BoardLogLevel::Info, "Connected.")
    }

    fn prepare_heaters(&mut self, start_any_predefined: bool) -> Result<(), BoardError> {
        self.require_connected()?;
        self.switch_all_off();
        if start_any_predefined {
            for p in self.config.predefined.clone() {
                let heater = self.heater_mut(p.index)?;
                heater.set_objective(p.objective);
                heater.set_active(true);
            }
        }
        Ok(())
    }

    fn poll(&mut self, consume: bool) -> Result<(), BoardError> {
        self.require_connected()?;
        self.polls += 1;

        if let Some(limit) = self.config.faults.disconnect_after {
            if self.polls > limit {
                self.connected = false;
                return Err(BoardError::Disconnected(format!(
                    "{} dropped connection after {limit} polls",
                    self.board_id
                )));
            }
        }

        for heater in &mut self.heaters {
            heater.step();
        }

        if let Some(n) = self.config.faults.glitch_every {
            if self.polls % n == 0 {
                return Err(BoardError::SensorGlitch(format!(
                    "{} checksum mismatch on poll {}",
                    self.board_id, self.polls
                )));
            }
        }

        let temps: Vec<f64> = self.heaters.iter().map(HeaterModel::temperature).collect();
        if !consume {
            let line = temps
                .iter()
                .map(|t| format!("{t:.2}"))
                .collect::<Vec<_>>()
                .join(",");
            self.log.write(BoardLogLevel::Debug, &format!("htr_avg={line}"))?;
        }
        self.snapshot = Some(HeaterSnapshot::new(temps));
        Ok(())
    }

    fn last_heater_temps(&self) -> Option<&HeaterSnapshot> {
        self.snapshot.as_ref()
    }

    fn set_heater_active(&mut self, index: usize, active: bool) -> Result<(), BoardError> {
        self.heater_mut(index)?.set_active(active);
        Ok(())
    }

    fn set_heater_objective(&mut self, index: usize, value: f64) -> Result<(), BoardError> {
        self.heater_mut(index)?.set_objective(value);
        Ok(())
    }

    fn heaters_deactivate_all(&mut self) -> Result<(), BoardError> {
        self.require_connected()?;
        self.switch_all_off();
        self.log.write(BoardLogLevel::Info, "All heaters deactivated.")
    }

    fn check_newday_and_roll_logfiles(&mut self) -> Result<(), BoardError> {
        if self.log.roll(Local::now().date_naive()) {
            self.log.write(BoardLogLevel::Info, "New day, log file rolled.")?;
        }
        Ok(())
    }

    fn stop(&mut self, message: &str) -> Result<(), BoardError> {
        self.require_connected()?;
        let result = self.log.write(BoardLogLevel::Info, message);
        self.connected = false;
        self.log.file = None;
        info!("Simulated board {} stopped: {message}", self.board_id);
        result
    }

    fn log(&mut self, message: &str, level: BoardLogLevel) {
        if let Err(e) = self.log.write(level, message) {
            warn!("Board {} log write failed: {e}", self.board_id);
        }
    }
}
