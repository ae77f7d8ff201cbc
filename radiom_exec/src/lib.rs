//! # Radiometry library.
//!
//! This library allows other crates in the workspace, and the benchmarks, to access items defined
//! inside the radiometry executable crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Battery monitor - keeps the latest battery snapshot for health reporting
pub mod battery_mon;

/// Bearing control - points the sensor mount and drives the motor within its limits
pub mod bearing_ctrl;

/// Global data store for the executable
pub mod data_store;

/// Heading fusion - combines the GPS pair into one ship heading
pub mod heading_fusion;

/// Orchestrator - ticks every module on its cadence and talks to the device workers
pub mod orchestrator;

/// Executable parameters
pub mod params;

/// Radiometer supervisor - per channel sampling and fault escalation
pub mod rad_sup;

/// Sample and status records, and the persistence backend interface
pub mod record;

/// Sampling scheduler - decides which channels may sample
pub mod sched;

/// Solar geometry
pub mod solar;

/// Device workers - one thread per physical device
pub mod workers;

/// GPIO power control on the Raspberry Pi
#[cfg(target_arch = "arm")]
pub mod power_ctrl;

/// Simulated equipment
#[cfg(feature = "sim")]
pub mod sim;
