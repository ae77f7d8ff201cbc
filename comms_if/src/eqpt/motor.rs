//! # Motor Equipment Interface
//!
//! The mount is turned by a stepper motor. Positions are absolute step counts, step 0 being the
//! home position.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A motor driver controlling the mount.
pub trait MotorDriver: Send {
    /// Move to the given absolute step.
    ///
    /// Calling this repeatedly with the same step is harmless. On success the step actually
    /// achieved is returned. If the motor stalls part way the error carries the step reached.
    fn move_to_step(&mut self, step: i64) -> Result<i64, MotorError>;

    /// Return the motor to its home position (step 0).
    fn home(&mut self) -> Result<i64, MotorError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MotorError {
    #[error("Motor stalled at step {achieved_step}")]
    Stall { achieved_step: i64 },

    #[error("Timed out waiting for the motor controller")]
    Timeout,

    #[error("Motor controller communication error: {0}")]
    Comms(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotorError {
    /// The step the motor is known to have reached, if the error reports one.
    pub fn achieved_step(&self) -> Option<i64> {
        match self {
            MotorError::Stall { achieved_step } => Some(*achieved_step),
            _ => None,
        }
    }
}
