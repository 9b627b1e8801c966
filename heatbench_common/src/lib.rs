//! Heatbench Common Library
//!
//! Shared configuration, constants, collaborator traits and telemetry types
//! for all heatbench workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Run configuration, loading and validation
//! - [`consts`] - Workspace-wide limits and defaults
//! - [`hal`] - Power-supply / board / sink traits and their error types
//! - [`telemetry`] - Telemetry point and its wire shape
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use heatbench_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod hal;
pub mod prelude;
pub mod telemetry;
