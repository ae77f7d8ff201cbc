//! # GPS Equipment Interface

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single position/motion reading from one GPS receiver.
///
/// Fixes are immutable once created. A fix the receiver flagged as unusable is still delivered
/// with `valid` set to false so that consumers can tell a silent receiver from a bad one.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Fix {
    /// Index of the receiver that produced this fix.
    pub source_id: u8,

    /// Units: degrees, positive north
    pub latitude_deg: f64,

    /// Units: degrees, positive east
    pub longitude_deg: f64,

    /// Course over ground, if the receiver reported one.
    ///
    /// Units: degrees true, [0, 360)
    pub course_over_ground_deg: Option<f64>,

    /// Units: knots
    pub speed_knots: f64,

    /// Time of the fix as reported by the receiver.
    pub timestamp: DateTime<Utc>,

    /// True if the receiver reported an active fix.
    pub valid: bool,

    /// Number of satellites used in the fix, if known.
    pub num_satellites: Option<u8>,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A physical GPS device.
pub trait PositionSource: Send {
    /// Read the next fix from the device.
    ///
    /// Blocks until a fix is parsed or the device's read timeout expires.
    fn read_fix(&mut self) -> Result<Fix, GpsError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GpsError {
    #[error("Timed out waiting for a fix")]
    Timeout,

    #[error("Could not parse the data from the receiver: {0}")]
    Parse(String),

    #[error("Serial port error: {0}")]
    Io(String),

    #[error("The receiver is disconnected")]
    Disconnected,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Fix {
    /// Age of this fix relative to `now` in seconds.
    pub fn age_s(&self, now: DateTime<Utc>) -> f64 {
        (now - self.timestamp)
            .num_milliseconds() as f64
            * 1e-3
    }

    /// True if the position fields are usable numbers.
    pub fn has_position(&self) -> bool {
        self.latitude_deg.is_finite()
            && self.longitude_deg.is_finite()
            && self.latitude_deg.abs() <= 90.0
            && self.longitude_deg.abs() <= 180.0
    }
}
