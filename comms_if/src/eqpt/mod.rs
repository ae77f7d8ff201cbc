//! # Equipment Interface
//!
//! This module defines the data exchanged with each class of equipment and the driver traits the
//! equipment workers call into. Every driver call is expected to return within a bounded time,
//! reporting a timeout error rather than blocking forever.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod battery;
pub mod gpio;
pub mod gps;
pub mod motor;
pub mod rad;
