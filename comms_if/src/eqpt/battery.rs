//! # Battery Equipment Interface

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Status reported by the battery/charge controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BatteryStatus {
    /// Units: volts
    pub voltage_v: f64,

    /// Positive when charging.
    ///
    /// Units: amps
    pub current_a: Option<f64>,

    /// Units: percent
    pub state_of_charge_pct: Option<f64>,

    pub charging: Option<bool>,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A source of battery status, typically a charge controller on a serial bus.
pub trait BatterySource: Send {
    fn read_status(&mut self) -> Result<BatteryStatus, BatteryError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatteryError {
    #[error("Timed out waiting for the charge controller")]
    Timeout,

    #[error("Charge controller communication error: {0}")]
    Comms(String),
}
