//! # Bearing control module
//!
//! Points the radiometer mount. The target angle of the motor is computed from the ship heading
//! and the desired absolute bearing (or a fixed bearing relative to the bow), clamped to the
//! mechanical limits of the mount, and turned into step commands for the motor worker.
//!
//! All mount angles are relative to the motor's zero position, clockwise positive, within
//! `[-180, 180]`.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::motor::MotorError;
use serde::Serialize;

pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Position of the mount's motor.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct MotorState {
    pub current_step: i64,

    /// Angle derived from `current_step`, always within the mechanical limits.
    ///
    /// Units: degrees
    pub current_angle_deg: f64,

    /// The last applied target.
    ///
    /// Units: degrees
    pub target_angle_deg: Option<f64>,

    /// Time the last move report was received.
    pub last_move_time: Option<DateTime<Utc>>,
}

/// A target angle for the mount.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Target {
    /// The angle the geometry asked for.
    ///
    /// Units: degrees, within [-180, 180]
    pub requested_deg: f64,

    /// The angle that will be used, equal to `requested_deg` unless it was out of range.
    ///
    /// Units: degrees
    pub applied_deg: f64,

    /// True if the requested angle was outside the mechanical limits and was clamped.
    pub out_of_range: bool,
}

/// Report of a command executed by the motor worker.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorReport {
    pub cmd: MotorCmd,
    pub result: Result<i64, MotorError>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Command for the motor worker.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCmd {
    /// Move to an absolute step position
    MoveTo { step: i64 },

    /// Return to the home position, step 0
    Home,
}

/// Possible errors that can occur during BearingCtrl operation.
#[derive(Debug, thiserror::Error)]
pub enum BearingCtrlError {
    #[error("Cannot load the bearing control parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    #[error("Invalid bearing control parameters: {0}")]
    InvalidParams(String),
}

impl Default for MotorState {
    fn default() -> Self {
        Self {
            current_step: 0,
            current_angle_deg: 0.0,
            target_angle_deg: None,
            last_move_time: None,
        }
    }
}
