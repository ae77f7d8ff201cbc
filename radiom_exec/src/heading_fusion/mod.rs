//! # Heading fusion module
//!
//! Combines the fixes of the two GPS receivers into a single ship heading and a confidence in it.
//! With both antennas reporting, the heading is the bearing from the stern antenna to the bow
//! antenna, which unlike course over ground stays meaningful when the ship is barely moving.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The ship heading produced by one fusion cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HeadingEstimate {
    /// Units: degrees true, [0, 360)
    pub heading_deg: f64,

    /// Confidence in the heading, between 0 (none) and 1 (full).
    pub confidence: f64,

    pub derived_from: HeadingSource,

    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What a heading estimate was computed from.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadingSource {
    DualGps,
    SingleGps,
    Fixed,
}

/// The branch of the fusion logic that produced an estimate.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionPath {
    /// Bearing between the two antennas
    DualAntenna,

    /// Course over ground of the given receiver
    SingleCog { source_id: u8 },

    /// The previous estimate with decayed confidence
    HeldPrevious,

    /// No usable fix, the configured fallback bearing
    Fallback,

    /// Fixed bearing mode, fusion bypassed
    FixedBearing,
}

/// Possible errors that can occur during HeadingFusion operation.
#[derive(Debug, thiserror::Error)]
pub enum HeadingFusionError {
    #[error("Cannot load the heading fusion parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    #[error("Invalid heading fusion parameters: {0}")]
    InvalidParams(String),
}

impl FusionPath {
    /// True if the estimate is of lower quality than the configured mode can provide.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, FusionPath::DualAntenna | FusionPath::FixedBearing)
    }
}
