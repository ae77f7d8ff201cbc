//! # Radiometer Equipment Interface

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Raw reading from one radiometer channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reading {
    /// Identifier of the channel which produced the reading.
    pub channel_id: String,

    /// Time at which the reading was completed.
    pub timestamp: DateTime<Utc>,

    /// Integration time the sensor actually used.
    ///
    /// Units: milliseconds
    pub integration_time_ms: u32,

    /// Raw spectrum counts, one value per pixel.
    pub spectrum: Vec<f64>,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// One radiometer channel.
///
/// Each driver instance owns the serial connection of exactly one sensor, so the channel
/// identity is a property of the instance rather than an argument.
pub trait RadiometerChannel: Send {
    /// Request a sample, waiting at most the driver's response timeout.
    ///
    /// `integration_time_hint_ms` is passed to sensors that support a fixed integration time,
    /// `None` lets the sensor choose automatically.
    fn request_sample(&mut self, integration_time_hint_ms: Option<u32>)
        -> Result<Reading, RadError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RadError {
    #[error("Timed out waiting for the sensor to respond")]
    Timeout,

    #[error("Sensor communication error: {0}")]
    Comms(String),

    #[error("Sensor returned an invalid response: {0}")]
    InvalidResponse(String),
}
