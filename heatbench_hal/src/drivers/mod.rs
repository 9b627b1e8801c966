//! Bench driver implementations.
//!
//! - [`simulation`] - Software power supply and board for bring-up and testing
//! - [`scpi`] - SCPI power-supply drivers (Rigol DP832)
//! - [`mock`] - Recording drivers sharing a command journal, for tests
//!
//! # Adding New Drivers
//!
//! 1. Create a new submodule under `drivers/`
//! 2. Implement `PowerSupply` or `BoardHandle` from `heatbench_common::hal::driver`
//! 3. Register the factory in [`register_all_drivers`]

pub mod mock;
pub mod scpi;
pub mod simulation;

use crate::driver_registry::DriverRegistry;

/// Register all built-in drivers.
pub fn register_all_drivers(registry: &mut DriverRegistry) {
    registry.register_power_supply("simulation", simulation::create_power_supply);
    registry.register_power_supply("dp832", scpi::create_dp832);

    registry.register_board("simulation", simulation::create_board);
}
