//! # Communications interface crate.
//!
//! Provides the interfaces between the control core and the equipment it drives. Drivers for
//! physical devices implement the traits defined here; the core only ever talks to a device
//! through them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Data types, driver traits and errors for each class of equipment
pub mod eqpt;
