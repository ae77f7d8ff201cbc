//! Parameters structure for BearingCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for bearing control.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    // ---- MECHANICS ----
    /// Motor steps per degree of mount rotation.
    pub steps_per_degree: f64,

    /// Angle of the motor's zero position relative to the ship's bow, clockwise positive.
    ///
    /// Units: degrees
    pub home_pos_deg: f64,

    /// Counter-clockwise mechanical limit of the mount.
    ///
    /// Units: degrees, within [-180, 180]
    pub ccw_limit_deg: f64,

    /// Clockwise mechanical limit of the mount.
    ///
    /// Units: degrees, within [-180, 180]
    pub cw_limit_deg: f64,

    // ---- POLICY ----
    /// Minimum difference between target and current angle before a move is made.
    ///
    /// Units: degrees
    pub deadband_deg: f64,

    /// Minimum time between two evaluations of the target.
    ///
    /// Units: seconds
    pub check_angle_every_sec: f64,

    /// Angle between the sun's azimuth and the desired viewing bearing, applied either side of
    /// the sun.
    ///
    /// Units: degrees
    #[serde(default = "default_sun_rel_azimuth_deg")]
    pub sun_rel_azimuth_deg: f64,

    /// Headings with a lower confidence don't move the mount.
    #[serde(default)]
    pub min_heading_confidence: f64,

    /// A move not reported within this time is considered lost.
    ///
    /// Units: seconds
    pub move_timeout_s: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            steps_per_degree: 100.0,
            home_pos_deg: 0.0,
            ccw_limit_deg: -170.0,
            cw_limit_deg: 170.0,
            deadband_deg: 1.0,
            check_angle_every_sec: 5.0,
            sun_rel_azimuth_deg: default_sun_rel_azimuth_deg(),
            min_heading_confidence: 0.1,
            move_timeout_s: 30.0,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.steps_per_degree.is_finite() && self.steps_per_degree > 0.0) {
            return Err(format!(
                "steps_per_degree must be positive, found {}",
                self.steps_per_degree
            ));
        }
        if self.ccw_limit_deg < -180.0 || self.cw_limit_deg > 180.0 {
            return Err("Mechanical limits must be within [-180, 180]".into());
        }
        if self.ccw_limit_deg >= self.cw_limit_deg {
            return Err(format!(
                "ccw_limit_deg ({}) must be less than cw_limit_deg ({})",
                self.ccw_limit_deg, self.cw_limit_deg
            ));
        }
        if self.deadband_deg < 0.0 || self.check_angle_every_sec < 0.0 {
            return Err("deadband_deg and check_angle_every_sec must not be negative".into());
        }
        if !(self.move_timeout_s > 0.0) {
            return Err("move_timeout_s must be positive".into());
        }

        Ok(())
    }
}

fn default_sun_rel_azimuth_deg() -> f64 {
    135.0
}
