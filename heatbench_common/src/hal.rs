//! Hardware collaborator interfaces.
//!
//! The control core talks to the bench only through the traits in
//! [`driver`]. Implementations live in `heatbench_hal`.

pub mod driver;
pub mod types;
