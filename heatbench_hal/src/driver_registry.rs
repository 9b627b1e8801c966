//! Driver registry for bench drivers.
//!
//! Provides a `DriverRegistry` struct for registering and retrieving
//! power-supply and board driver factories. Constructed at startup and passed
//! by value; no global state.

use heatbench_common::config::PowerConfig;
use heatbench_common::hal::driver::{
    BoardError, BoardFactory, BoardHandle, DriverError, PowerSupply, PowerSupplyFactory,
};
use std::collections::HashMap;
use std::path::Path;

use crate::drivers::register_all_drivers;

/// Registry of available bench drivers.
pub struct DriverRegistry {
    power_supplies: HashMap<&'static str, PowerSupplyFactory>,
    boards: HashMap<&'static str, BoardFactory>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            power_supplies: HashMap::new(),
            boards: HashMap::new(),
        }
    }

    /// Create a registry with every built-in driver registered.
    pub fn with_builtin_drivers() -> Self {
        let mut registry = Self::new();
        register_all_drivers(&mut registry);
        registry
    }

    /// Register a power-supply driver factory.
    ///
    /// # Panics
    /// Panics if a power-supply driver with the same name is already registered.
    pub fn register_power_supply(&mut self, name: &'static str, factory: PowerSupplyFactory) {
        if self.power_supplies.contains_key(name) {
            panic!("Power-supply driver '{name}' is already registered");
        }
        self.power_supplies.insert(name, factory);
    }

    /// Register a board driver factory.
    ///
    /// # Panics
    /// Panics if a board driver with the same name is already registered.
    pub fn register_board(&mut self, name: &'static str, factory: BoardFactory) {
        if self.boards.contains_key(name) {
            panic!("Board driver '{name}' is already registered");
        }
        self.boards.insert(name, factory);
    }

    /// Open a power supply with the driver named in `config.driver`.
    ///
    /// # Errors
    /// Returns `DriverError::DriverNotFound` if no such driver is registered,
    /// or whatever the driver returns while connecting.
    pub fn create_power_supply(
        &self,
        config: &PowerConfig,
    ) -> Result<Box<dyn PowerSupply>, DriverError> {
        let factory = self
            .power_supplies
            .get(config.driver.as_str())
            .copied()
            .ok_or_else(|| DriverError::DriverNotFound(config.driver.clone()))?;
        factory(config)
    }

    /// Open a board handle with the named board driver.
    ///
    /// # Errors
    /// Returns `BoardError::InvalidConfig` if no such driver is registered,
    /// or whatever the driver returns while reading the board config.
    pub fn create_board(
        &self,
        driver: &str,
        board_id: &str,
        config_path: &Path,
    ) -> Result<Box<dyn BoardHandle>, BoardError> {
        let factory = self
            .boards
            .get(driver)
            .copied()
            .ok_or_else(|| BoardError::InvalidConfig(format!("board driver not found: {driver}")))?;
        factory(board_id, config_path)
    }

    /// List registered power-supply driver names.
    pub fn list_power_supplies(&self) -> Vec<&'static str> {
        self.power_supplies.keys().copied().collect()
    }

    /// List registered board driver names.
    pub fn list_boards(&self) -> Vec<&'static str> {
        self.boards.keys().copied().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
