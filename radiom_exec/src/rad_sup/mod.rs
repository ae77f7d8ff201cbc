//! # Radiometer supervisor
//!
//! Supervises the radiometer channels. Sample requests are issued to idle channels the scheduler
//! has authorised, responses and timeouts are folded into each channel's state machine, and
//! channels which keep failing are escalated to a power cycle, subject to a minimum interval
//! between reboots.
//!
//! Requests issued together form a round. Once every channel of a round has answered or timed
//! out the round is completed and its readings are handed back for recording.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod channel;
mod params;
mod state;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::{
    gpio::{GpioError, Pin},
    rad::{RadError, Reading},
};
use serde::Serialize;

pub use channel::*;
pub use params::*;
pub use state::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Request for a radiometer worker to take a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SampleRequest {
    pub request_id: u64,
    pub channel_idx: usize,
    pub integration_time_hint_ms: Option<u32>,
}

/// The answer of a radiometer worker to a `SampleRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleResponse {
    pub request_id: u64,
    pub channel_idx: usize,
    pub result: Result<Reading, RadError>,
}

/// Request to power cycle a faulted channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootRequest {
    pub channel_idx: usize,
    pub pins: Vec<Pin>,
}

/// The result of a `RebootRequest`.
#[derive(Debug, Clone, PartialEq)]
pub struct RebootOutcome {
    pub channel_idx: usize,
    pub result: Result<(), GpioError>,
}

/// A finished round of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRound {
    /// Time the first request of the round was issued
    pub started_at: DateTime<Utc>,

    /// Number of channels asked for a sample
    pub num_requested: usize,

    /// Readings of the channels that succeeded
    pub readings: Vec<Reading>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Possible errors that can occur during RadSupervisor operation.
#[derive(Debug, thiserror::Error)]
pub enum RadSupError {
    #[error("Cannot load the radiometer supervisor parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    #[error("Invalid radiometer supervisor parameters: {0}")]
    InvalidParams(String),

    #[error("Got {got} scheduler decisions for {expected} channels")]
    DecisionCountMismatch { expected: usize, got: usize },
}
