//! # Simulated equipment
//!
//! Stand-ins for every device so the executable can run on a desk without hardware. The GPS
//! pair follows a common ship track so the fused heading is meaningful, the other devices answer
//! with plausible values and occasionally fail the way the real ones do.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::{
    battery::{BatteryError, BatterySource, BatteryStatus},
    gpio::{GpioError, Pin, PowerControl},
    gps::{Fix, GpsError, PositionSource},
    motor::{MotorDriver, MotorError},
    rad::{RadError, RadiometerChannel, Reading},
};
use log::{debug, trace};
use rand::{random_bool, random_range};
use std::{thread, time::Duration};
use util::{
    maths::{wrap_360, EARTH_RADIUS_M},
    time::seconds_between,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const METERS_PER_NAUTICAL_MILE: f64 = 1852.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A straight ship track at constant speed.
#[derive(Debug, Clone, Copy)]
pub struct ShipTrack {
    pub start_time: DateTime<Utc>,
    pub start_lat_deg: f64,
    pub start_lon_deg: f64,
    pub heading_deg: f64,
    pub speed_knots: f64,
}

/// One simulated receiver mounted on the ship.
pub struct SimGps {
    source_id: u8,
    track: ShipTrack,

    /// Position of the antenna ahead of the ship's reference point, negative astern.
    ///
    /// Units: meters
    pub along_ship_offset_m: f64,

    /// Half width of the uniform horizontal position noise
    ///
    /// Units: meters
    pub noise_m: f64,

    /// Time between fixes
    pub period: Duration,

    /// Probability of a fix being flagged invalid
    pub invalid_prob: f64,
}

pub struct SimMotor {
    step: i64,

    /// Speed of the simulated move
    pub steps_per_sec: f64,

    /// Probability of a move stalling half way
    pub stall_prob: f64,
}

pub struct SimRadiometer {
    channel_id: String,

    pub num_pixels: usize,

    /// Probability of the sensor not answering
    pub timeout_prob: f64,

    /// How long an unanswered request blocks before the driver gives up
    pub response_timeout: Duration,
}

pub struct SimBattery {
    voltage_v: f64,
}

/// Power control which only logs.
#[derive(Default)]
pub struct SimPower;

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ShipTrack {
    /// Position of the point `along_ship_m` ahead of the ship's reference point at `time`.
    ///
    /// Flat earth approximation, adequate over the distances a simulation covers.
    pub fn position(&self, time: DateTime<Utc>, along_ship_m: f64) -> (f64, f64) {
        let elapsed_s = seconds_between(self.start_time, time).max(0.0);
        let dist_m = self.speed_knots * METERS_PER_NAUTICAL_MILE / 3600.0 * elapsed_s + along_ship_m;

        let h = self.heading_deg.to_radians();
        let dlat = dist_m * h.cos() / EARTH_RADIUS_M;
        let dlon = dist_m * h.sin() / (EARTH_RADIUS_M * self.start_lat_deg.to_radians().cos());

        (
            self.start_lat_deg + dlat.to_degrees(),
            self.start_lon_deg + dlon.to_degrees(),
        )
    }
}

impl SimGps {
    pub fn new(source_id: u8, track: ShipTrack, along_ship_offset_m: f64) -> Self {
        Self {
            source_id,
            track,
            along_ship_offset_m,
            noise_m: 0.3,
            period: Duration::from_secs(1),
            invalid_prob: 0.01,
        }
    }

    /// The fix this receiver would report at `time`.
    pub fn fix_at(&self, time: DateTime<Utc>) -> Fix {
        let (mut lat, mut lon) = self.track.position(time, self.along_ship_offset_m);

        if self.noise_m > 0.0 {
            let n = self.noise_m;
            lat += (random_range(-n..=n) / EARTH_RADIUS_M).to_degrees();
            lon += (random_range(-n..=n) / (EARTH_RADIUS_M * lat.to_radians().cos())).to_degrees();
        }

        let cog_noise = if self.track.speed_knots < 1.0 { 40.0 } else { 3.0 };

        Fix {
            source_id: self.source_id,
            latitude_deg: lat,
            longitude_deg: lon,
            course_over_ground_deg: Some(wrap_360(
                self.track.heading_deg + random_range(-cog_noise..=cog_noise),
            )),
            speed_knots: (self.track.speed_knots + random_range(-0.2..=0.2)).max(0.0),
            timestamp: time,
            valid: !random_bool(self.invalid_prob),
            num_satellites: Some(random_range(6..=12)),
        }
    }
}

impl PositionSource for SimGps {
    fn read_fix(&mut self) -> Result<Fix, GpsError> {
        thread::sleep(self.period);
        Ok(self.fix_at(Utc::now()))
    }
}

impl SimMotor {
    pub fn new() -> Self {
        Self {
            step: 0,
            steps_per_sec: 2000.0,
            stall_prob: 0.01,
        }
    }
}

impl Default for SimMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorDriver for SimMotor {
    fn move_to_step(&mut self, step: i64) -> Result<i64, MotorError> {
        let delta = (step - self.step).abs() as f64;
        if self.steps_per_sec > 0.0 {
            thread::sleep(Duration::from_secs_f64((delta / self.steps_per_sec).min(5.0)));
        }

        if delta > 0.0 && random_bool(self.stall_prob) {
            self.step += (step - self.step) / 2;
            debug!("Simulated motor stalled at step {}", self.step);
            return Err(MotorError::Stall {
                achieved_step: self.step,
            });
        }

        self.step = step;
        Ok(self.step)
    }

    /// Homing runs against the end stop and never stalls.
    fn home(&mut self) -> Result<i64, MotorError> {
        let p = self.stall_prob;
        self.stall_prob = 0.0;
        let result = self.move_to_step(0);
        self.stall_prob = p;
        result
    }
}

impl SimRadiometer {
    pub fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            num_pixels: 256,
            timeout_prob: 0.02,
            response_timeout: Duration::from_secs(2),
        }
    }
}

impl RadiometerChannel for SimRadiometer {
    fn request_sample(
        &mut self,
        integration_time_hint_ms: Option<u32>,
    ) -> Result<Reading, RadError> {
        if random_bool(self.timeout_prob) {
            thread::sleep(self.response_timeout);
            return Err(RadError::Timeout);
        }

        let integration_time_ms = integration_time_hint_ms.unwrap_or_else(|| random_range(64..=1024));
        thread::sleep(Duration::from_millis(integration_time_ms as u64));

        // A broad hump over the visible band with some noise on top
        let n = self.num_pixels.max(1) as f64;
        let spectrum = (0..self.num_pixels)
            .map(|i| {
                let x = i as f64 / n - 0.5;
                8000.0 * (-x * x * 8.0).exp() + random_range(0.0..50.0)
            })
            .collect();

        trace!("Simulated {} sample, {} ms", self.channel_id, integration_time_ms);

        Ok(Reading {
            channel_id: self.channel_id.clone(),
            timestamp: Utc::now(),
            integration_time_ms,
            spectrum,
        })
    }
}

impl SimBattery {
    pub fn new() -> Self {
        Self { voltage_v: 12.8 }
    }
}

impl Default for SimBattery {
    fn default() -> Self {
        Self::new()
    }
}

impl BatterySource for SimBattery {
    fn read_status(&mut self) -> Result<BatteryStatus, BatteryError> {
        if random_bool(0.01) {
            return Err(BatteryError::Timeout);
        }

        // Slow random walk, kept in a lead-acid like range
        self.voltage_v = (self.voltage_v + random_range(-0.02..=0.02)).clamp(11.5, 13.6);

        Ok(BatteryStatus {
            voltage_v: self.voltage_v,
            current_a: Some(random_range(-2.0..=3.0)),
            state_of_charge_pct: Some(((self.voltage_v - 11.5) / 2.1 * 100.0).clamp(0.0, 100.0)),
            charging: None,
        })
    }
}

impl PowerControl for SimPower {
    fn set_power(&mut self, pins: &[Pin], on: bool) -> Result<(), GpioError> {
        debug!("Simulated pins {:?} {}", pins, if on { "high" } else { "low" });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;
    use util::maths::{ang_dist_deg, haversine_m, initial_bearing_deg};

    #[test]
    fn test_antenna_pair_follows_track() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let track = ShipTrack {
            start_time: t0,
            start_lat_deg: 50.3,
            start_lon_deg: -4.2,
            heading_deg: 235.0,
            speed_knots: 8.0,
        };

        let mut front = SimGps::new(0, track, 10.0);
        let mut rear = SimGps::new(1, track, -10.0);
        for g in [&mut front, &mut rear].iter_mut() {
            g.noise_m = 0.0;
            g.invalid_prob = 0.0;
        }

        let t = t0 + chrono::Duration::seconds(600);
        let (f, r) = (front.fix_at(t), rear.fix_at(t));

        let bearing = initial_bearing_deg(r.latitude_deg, r.longitude_deg, f.latitude_deg, f.longitude_deg);
        assert!(ang_dist_deg(bearing, 235.0).abs() < 0.1, "bearing {}", bearing);

        let baseline = haversine_m(r.latitude_deg, r.longitude_deg, f.latitude_deg, f.longitude_deg);
        assert!((baseline - 20.0).abs() < 0.1, "baseline {}", baseline);

        // 8 knots for 10 minutes
        let (lat, lon) = track.position(t, 0.0);
        let run = haversine_m(50.3, -4.2, lat, lon);
        assert!((run - 2469.3).abs() < 5.0, "run {}", run);
        assert!(f.valid && r.valid);
    }

    #[test]
    fn test_motor_stall_reports_partial_move() {
        let mut m = SimMotor {
            step: 0,
            steps_per_sec: 0.0,
            stall_prob: 1.0,
        };

        assert_eq!(
            m.move_to_step(1000),
            Err(MotorError::Stall { achieved_step: 500 })
        );
        assert_eq!(m.home(), Ok(0));
    }
}
