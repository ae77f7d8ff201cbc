//! Parameters structure for HeadingFusion

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for heading fusion.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Params {
    // ---- GEOMETRY ----
    /// Which of the two receivers is mounted towards the bow.
    pub antenna_order: AntennaOrder,

    /// Minimum separation of the two antenna positions for a dual fix to be used. Below this the
    /// bearing between the antennas is dominated by position noise.
    ///
    /// Units: meters
    #[serde(default)]
    pub min_baseline_m: f64,

    // ---- VALIDITY ----
    /// Fixes older than this are treated as stale and excluded from fusion.
    ///
    /// Units: seconds
    pub max_fix_age_s: f64,

    /// Minimum ship speed for a single receiver's course over ground to be trusted.
    ///
    /// Units: knots
    pub min_cog_speed_knots: f64,

    // ---- CONFIDENCE ----
    /// Confidence assigned to a heading taken from one receiver's course over ground.
    pub single_cog_confidence: f64,

    /// Factor applied to the previous estimate's confidence each time it is reused.
    pub confidence_decay: f64,

    /// Number of dual antenna headings averaged together. 1 disables smoothing.
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,
}

/// Mounting order of the two GPS antennas along the bow-stern axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum AntennaOrder {
    /// The first receiver is at the bow, the second at the stern
    FrontRear,

    /// The first receiver is at the stern, the second at the bow
    RearFront,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            antenna_order: AntennaOrder::FrontRear,
            min_baseline_m: 0.0,
            max_fix_age_s: 5.0,
            min_cog_speed_knots: 2.0,
            single_cog_confidence: 0.5,
            confidence_decay: 0.9,
            smoothing_window: 1,
        }
    }
}

impl Params {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.max_fix_age_s > 0.0) {
            return Err(format!("max_fix_age_s must be positive, found {}", self.max_fix_age_s));
        }
        if self.min_cog_speed_knots < 0.0 || self.min_baseline_m < 0.0 {
            return Err("min_cog_speed_knots and min_baseline_m must not be negative".into());
        }
        if !(0.0..=1.0).contains(&self.single_cog_confidence)
            || !(0.0..=1.0).contains(&self.confidence_decay)
        {
            return Err("single_cog_confidence and confidence_decay must be within [0, 1]".into());
        }
        if self.smoothing_window == 0 {
            return Err("smoothing_window must be at least 1".into());
        }

        Ok(())
    }
}

fn default_smoothing_window() -> usize {
    1
}
