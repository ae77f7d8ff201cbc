//! Parameters structure for the sampling scheduler

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the sampling scheduler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    /// Minimum solar elevation for default channels to sample.
    ///
    /// Units: degrees
    pub solar_elevation_limit_deg: f64,

    /// Minimum ship speed for default channels to sample, zero disables the check.
    ///
    /// Units: knots
    #[serde(default)]
    pub min_speed_knots: f64,

    /// Hold default channels while the mount is moving.
    #[serde(default = "default_hold_while_moving")]
    pub hold_while_moving: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            solar_elevation_limit_deg: 30.0,
            min_speed_knots: 0.0,
            hold_while_moving: true,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), String> {
        if !(-90.0..=90.0).contains(&self.solar_elevation_limit_deg) {
            return Err(format!(
                "solar_elevation_limit_deg must be within [-90, 90], found {}",
                self.solar_elevation_limit_deg
            ));
        }
        if !(self.min_speed_knots >= 0.0) {
            return Err("min_speed_knots must not be negative".into());
        }

        Ok(())
    }
}

fn default_hold_while_moving() -> bool {
    true
}
