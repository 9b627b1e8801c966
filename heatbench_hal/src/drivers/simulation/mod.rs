//! Simulation driver module.
//!
//! Software power supply and board for bring-up and testing without
//! physical hardware.

mod board;
mod power;
mod thermal;

pub use board::{SimBoardConfig, SimulatedBoard};
pub use power::SimulatedPowerSupply;
pub use thermal::HeaterModel;

use heatbench_common::config::PowerConfig;
use heatbench_common::hal::driver::{BoardError, BoardHandle, DriverError, PowerSupply};
use std::path::Path;

/// Factory function to create a simulated power supply.
pub fn create_power_supply(config: &PowerConfig) -> Result<Box<dyn PowerSupply>, DriverError> {
    Ok(Box::new(SimulatedPowerSupply::from_config(config)?))
}

/// Factory function to create a simulated board from its config file.
pub fn create_board(board_id: &str, config_path: &Path) -> Result<Box<dyn BoardHandle>, BoardError> {
    let config = SimBoardConfig::load(config_path)?;
    Ok(Box::new(SimulatedBoard::new(board_id, config)))
}
