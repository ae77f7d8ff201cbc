//! # Radiometry Executable Parameters
//!
//! This module provide parameters for the radiometry executable: the devices it drives, the
//! cadences of the main loop and the bearing mode of the platform.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::gpio::Pin;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of GPS receivers fused into the ship heading.
pub const NUM_GPS: usize = 2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadiomExecParams {
    /// How the mount bearing is selected
    pub bearing_mode: BearingMode,

    /// Periods of the different processing cadences
    pub cycle: CycleParams,

    /// The two GPS receivers, first then second in antenna order
    pub gps: Vec<GpsDeviceParams>,

    /// Motor controller of the mount
    pub motor: SerialDeviceParams,

    /// Battery/charge controller, `None` if the platform has none
    pub battery: Option<SerialDeviceParams>,

    /// Power rail switching
    pub power: PowerParams,

    /// Position of a static platform, used for solar geometry when no fix is available
    pub static_position: Option<StaticPosition>,
}

/// Periods of the processing cadences of the main loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleParams {
    /// Period of the fast cycle (heading fusion and bearing control).
    ///
    /// Units: seconds
    pub fast_period_s: f64,

    /// Period of the scheduler and radiometer supervisor.
    ///
    /// Units: seconds
    pub sched_period_s: f64,

    /// Period of the battery poll.
    ///
    /// Units: seconds
    pub battery_period_s: f64,

    /// A status record is stored if no sample record has been stored for this long.
    ///
    /// Units: seconds
    pub status_record_interval_s: f64,

    /// Age above which a device snapshot is reported as stale.
    ///
    /// Units: seconds
    pub stale_snapshot_warn_s: f64,
}

/// A device attached over a serial port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceParams {
    /// Fixed port path, e.g. `/dev/ttyUSB0`
    pub port: String,

    pub baud: u32,

    /// String identifying the device in `/dev/serial/by-id`, used when `port` doesn't exist
    pub id_string: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpsDeviceParams {
    pub serial: SerialDeviceParams,

    /// Pins switching this receiver's power rail
    #[serde(default)]
    pub power_pins: Vec<Pin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerParams {
    /// How long rails are held off during a power cycle.
    ///
    /// Units: seconds
    pub off_time_s: f64,

    /// A GPS receiver without a valid fix for this long is power cycled. `None` disables the
    /// watchdog.
    ///
    /// Units: seconds
    pub gps_power_cycle_after_s: Option<f64>,

    /// Minimum time between two power cycles of the same GPS receiver.
    ///
    /// Units: seconds
    pub gps_min_power_cycle_interval_s: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StaticPosition {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Capability of the platform to track a bearing, selected once at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BearingMode {
    /// The ship heading is fused from the GPS pair and the mount tracks the sun. When no fix is
    /// available the fallback bearing is reported as the heading.
    DynamicHeading { fallback_bearing_deg: f64 },

    /// The mount holds a constant bearing relative to the ship's bow, GPS is not consulted.
    FixedBearing { fixed_bearing_deg: f64 },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for BearingMode {
    fn default() -> Self {
        BearingMode::DynamicHeading {
            fallback_bearing_deg: 0.0,
        }
    }
}

impl BearingMode {
    /// The configured constant bearing, used as the heading whenever fusion is bypassed.
    pub fn constant_bearing_deg(&self) -> f64 {
        match self {
            BearingMode::DynamicHeading {
                fallback_bearing_deg,
            } => *fallback_bearing_deg,
            BearingMode::FixedBearing { fixed_bearing_deg } => *fixed_bearing_deg,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, BearingMode::FixedBearing { .. })
    }
}

impl RadiomExecParams {
    /// Check the parameters are consistent, returning a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.gps.len() != NUM_GPS {
            return Err(format!(
                "Expected {} GPS receivers, found {}",
                NUM_GPS,
                self.gps.len()
            ));
        }

        let c = &self.cycle;
        for (name, v) in [
            ("fast_period_s", c.fast_period_s),
            ("sched_period_s", c.sched_period_s),
            ("battery_period_s", c.battery_period_s),
            ("status_record_interval_s", c.status_record_interval_s),
        ]
        .iter()
        {
            if !(v.is_finite() && *v > 0.0) {
                return Err(format!("cycle.{} must be positive, found {}", name, v));
            }
        }

        if c.sched_period_s < c.fast_period_s {
            return Err("cycle.sched_period_s must not be shorter than cycle.fast_period_s".into());
        }

        if self.power.off_time_s < 0.0 {
            return Err("power.off_time_s must not be negative".into());
        }

        if let Some(p) = self.static_position {
            if p.latitude_deg.abs() > 90.0 || p.longitude_deg.abs() > 180.0 {
                return Err(format!("static_position {:?} is not a valid position", p));
            }
        }

        Ok(())
    }

    /// All pins switching any GPS rail.
    pub fn gps_power_pins(&self) -> Vec<Pin> {
        self.gps.iter().flat_map(|g| g.power_pins.iter().copied()).collect()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_bearing_mode_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            bearing_mode: BearingMode,
        }

        let w: Wrapper = toml::from_str(
            r#"
            [bearing_mode]
            type = "FixedBearing"
            fixed_bearing_deg = 148.0
            "#,
        )
        .unwrap();

        assert_eq!(
            w.bearing_mode,
            BearingMode::FixedBearing {
                fixed_bearing_deg: 148.0
            }
        );
        assert!(w.bearing_mode.is_fixed());
        assert_eq!(w.bearing_mode.constant_bearing_deg(), 148.0);
    }

    /// Path of a file in the shipped params directory.
    fn shipped(file: &str) -> String {
        format!("{}/../params/{}", env!("CARGO_MANIFEST_DIR"), file)
    }

    #[test]
    fn test_shipped_params_are_valid() {
        use crate::{battery_mon, bearing_ctrl, heading_fusion, rad_sup, sched};
        use util::params::load_from_path;

        let exec: RadiomExecParams = load_from_path(shipped("radiom_exec.toml")).unwrap();
        exec.validate().unwrap();
        assert_eq!(exec.gps_power_pins(), vec![17, 27]);
        assert!(exec.battery.is_some());
        assert!(!exec.bearing_mode.is_fixed());

        let hf: heading_fusion::Params = load_from_path(shipped("heading_fusion.toml")).unwrap();
        heading_fusion::HeadingFusion::new(hf, exec.bearing_mode).unwrap();

        let bc: bearing_ctrl::Params = load_from_path(shipped("bearing_ctrl.toml")).unwrap();
        bearing_ctrl::BearingCtrl::new(bc, exec.bearing_mode).unwrap();

        let sc: sched::Params = load_from_path(shipped("sched.toml")).unwrap();
        sched::Scheduler::new(sc).unwrap();

        let rs: rad_sup::Params = load_from_path(shipped("rad_sup.toml")).unwrap();
        assert_eq!(rs.channels.len(), 3);
        assert_eq!(
            rs.channels[2].schedule,
            sched::ChannelSchedule::FixedInterval { interval_s: 60.0 }
        );
        rad_sup::RadSupervisor::new(rs, chrono::Utc::now()).unwrap();

        let bm: battery_mon::Params = load_from_path(shipped("battery_mon.toml")).unwrap();
        assert_eq!(bm.low_voltage_warn_v, Some(11.8));
    }
}
