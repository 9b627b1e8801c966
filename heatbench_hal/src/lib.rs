//! # Heatbench HAL Library
//!
//! Bench drivers with a pluggable registry.
//!
//! Drivers implement the traits defined in `heatbench_common::hal::driver`.
//!
//! # Module Structure
//!
//! - [`driver_registry`] - Driver factory registration
//! - [`drivers`] - Power-supply and board driver implementations
//! - [`sinks`] - Telemetry sink implementations
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       heatbench_hal                              │
//! │  ┌──────────────────┐   ┌────────────────┐   ┌────────────────┐  │
//! │  │ DriverRegistry   │──►│ PowerSupply    │   │ TelemetrySink  │  │
//! │  │ (name → factory) │   │ simulation /   │   │ jsonl / log    │  │
//! │  │                  │   │ dp832 (SCPI)   │   └────────────────┘  │
//! │  │                  │──►├────────────────┤                       │
//! │  │                  │   │ BoardHandle    │                       │
//! │  └──────────────────┘   │ simulation     │                       │
//! │                         └────────────────┘                       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]

pub mod driver_registry;
pub mod drivers;
pub mod sinks;

// Re-export key types for convenience
pub use crate::driver_registry::DriverRegistry;
pub use crate::sinks::create_sink;
