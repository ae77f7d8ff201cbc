//! Parameters structure for the radiometer supervisor

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::sched::ChannelSchedule;
use comms_if::eqpt::gpio::Pin;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the radiometer supervisor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Params {
    /// The radiometer channels, in the order they are supervised.
    pub channels: Vec<ChannelParams>,

    // ---- FAULT POLICY ----
    /// Number of consecutive failed samples at which a channel is faulted.
    pub allow_consecutive_timeouts: u32,

    /// Minimum time between two reboots of the same channel, and between power on and the first
    /// reboot.
    ///
    /// Units: seconds
    pub minimum_reboot_interval_sec: f64,

    /// A sample not answered within this time counts as a timeout.
    ///
    /// Units: seconds
    pub sample_timeout_s: f64,

    /// A power cycle not answered within this time counts as failed.
    ///
    /// Units: seconds
    #[serde(default = "default_reboot_timeout_s")]
    pub reboot_timeout_s: f64,

    /// Disable a channel after this many reboots without a successful sample in between. Unset
    /// means channels are never disabled.
    #[serde(default)]
    pub max_reboots_without_success: Option<u32>,
}

/// A single radiometer channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelParams {
    /// Name of the channel, used in logs and records
    pub id: String,

    /// Fixed port path of the sensor
    pub port: String,

    pub baud: u32,

    /// String identifying the sensor in `/dev/serial/by-id`
    #[serde(default)]
    pub id_string: Option<String>,

    /// Pins switching this sensor's power rail
    #[serde(default)]
    pub power_pins: Vec<Pin>,

    /// Integration time hint passed with each sample request.
    ///
    /// Units: milliseconds
    #[serde(default)]
    pub integration_time_hint_ms: Option<u32>,

    #[serde(default)]
    pub schedule: ChannelSchedule,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn default_reboot_timeout_s() -> f64 {
    60.0
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Params {
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.is_empty() {
            return Err("At least one radiometer channel must be configured".into());
        }

        let mut ids = HashSet::new();
        for c in self.channels.iter() {
            if !ids.insert(c.id.as_str()) {
                return Err(format!("Duplicate channel id \"{}\"", c.id));
            }
            if let ChannelSchedule::FixedInterval { interval_s } = c.schedule {
                if !(interval_s > 0.0) {
                    return Err(format!(
                        "Channel \"{}\" has a non-positive sampling interval",
                        c.id
                    ));
                }
            }
        }

        if self.allow_consecutive_timeouts == 0 {
            return Err("allow_consecutive_timeouts must be at least 1".into());
        }
        if self.minimum_reboot_interval_sec < 0.0 {
            return Err("minimum_reboot_interval_sec must not be negative".into());
        }
        if !(self.sample_timeout_s > 0.0) {
            return Err("sample_timeout_s must be positive".into());
        }
        if !(self.reboot_timeout_s > 0.0) {
            return Err("reboot_timeout_s must be positive".into());
        }
        if self.max_reboots_without_success == Some(0) {
            return Err("max_reboots_without_success must be at least 1 when set".into());
        }

        Ok(())
    }
}
