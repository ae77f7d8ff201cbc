//! # Solar geometry
//!
//! Position of the sun in the local sky, computed with the NOAA low-precision solar position
//! algorithm. Accuracy is better than a degree between 1800 and 2100, which is more than enough to
//! gate sampling and point the mount. No atmospheric refraction correction is applied.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use util::maths::{clamp, rem_euclid, wrap_360};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Julian day of the unix epoch
const JULIAN_DAY_UNIX_EPOCH: f64 = 2_440_587.5;

/// Julian day of the J2000 epoch
const JULIAN_DAY_J2000: f64 = 2_451_545.0;

/// Days in a julian century
const DAYS_PER_JULIAN_CENTURY: f64 = 36_525.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Position of the sun as seen from a point on the earth's surface.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SolarPosition {
    /// Units: degrees true, [0, 360)
    pub azimuth_deg: f64,

    /// Angle above the horizon, negative below it.
    ///
    /// Units: degrees
    pub elevation_deg: f64,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Calculate the position of the sun at `time` for an observer at `lat_deg`, `lon_deg`.
pub fn solar_position(time: DateTime<Utc>, lat_deg: f64, lon_deg: f64) -> SolarPosition {
    let unix_s = time.timestamp() as f64 + time.timestamp_subsec_nanos() as f64 * 1e-9;
    let julian_day = unix_s / SECONDS_PER_DAY + JULIAN_DAY_UNIX_EPOCH;
    let jc = (julian_day - JULIAN_DAY_J2000) / DAYS_PER_JULIAN_CENTURY;

    // ---- SUN'S ECLIPTIC POSITION ----

    let geom_mean_long_deg = wrap_360(280.46646 + jc * (36000.76983 + jc * 0.0003032));
    let geom_mean_anom_deg = 357.52911 + jc * (35999.05029 - 0.0001537 * jc);
    let eccentricity = 0.016708634 - jc * (0.000042037 + 0.0000001267 * jc);

    let m = geom_mean_anom_deg.to_radians();
    let eq_of_centre_deg = m.sin() * (1.914602 - jc * (0.004817 + 0.000014 * jc))
        + (2.0 * m).sin() * (0.019993 - 0.000101 * jc)
        + (3.0 * m).sin() * 0.000289;

    let true_long_deg = geom_mean_long_deg + eq_of_centre_deg;
    let omega = (125.04 - 1934.136 * jc).to_radians();
    let apparent_long_deg = true_long_deg - 0.00569 - 0.00478 * omega.sin();

    let mean_obliquity_deg =
        23.0 + (26.0 + (21.448 - jc * (46.815 + jc * (0.00059 - jc * 0.001813))) / 60.0) / 60.0;
    let obliquity_deg = mean_obliquity_deg + 0.00256 * omega.cos();

    let declination = (obliquity_deg.to_radians().sin() * apparent_long_deg.to_radians().sin())
        .asin();

    // ---- EQUATION OF TIME ----

    let y = (obliquity_deg.to_radians() / 2.0).tan().powi(2);
    let l0 = geom_mean_long_deg.to_radians();
    let eq_of_time_min = 4.0
        * (y * (2.0 * l0).sin() - 2.0 * eccentricity * m.sin()
            + 4.0 * eccentricity * y * m.sin() * (2.0 * l0).cos()
            - 0.5 * y * y * (4.0 * l0).sin()
            - 1.25 * eccentricity * eccentricity * (2.0 * m).sin())
        .to_degrees();

    // ---- LOCAL SKY POSITION ----

    let minutes_of_day = time.hour() as f64 * 60.0
        + time.minute() as f64
        + (time.second() as f64 + time.nanosecond() as f64 * 1e-9) / 60.0;
    let true_solar_time_min = rem_euclid(minutes_of_day + eq_of_time_min + 4.0 * lon_deg, 1440.0);

    let hour_angle_deg = if true_solar_time_min / 4.0 < 0.0 {
        true_solar_time_min / 4.0 + 180.0
    } else {
        true_solar_time_min / 4.0 - 180.0
    };

    let lat = lat_deg.to_radians();
    let cos_zenith = clamp(
        &(lat.sin() * declination.sin()
            + lat.cos() * declination.cos() * hour_angle_deg.to_radians().cos()),
        &-1.0,
        &1.0,
    );
    let zenith = cos_zenith.acos();

    // At the poles or with the sun at the zenith the azimuth is undefined, report north
    let az_denom = lat.cos() * zenith.sin();
    let azimuth_deg = if az_denom.abs() < 1e-12 {
        0.0
    } else {
        let cos_az = clamp(
            &((lat.sin() * zenith.cos() - declination.sin()) / az_denom),
            &-1.0,
            &1.0,
        );
        let a = cos_az.acos().to_degrees();

        if hour_angle_deg > 0.0 {
            wrap_360(a + 180.0)
        } else {
            wrap_360(540.0 - a)
        }
    };

    SolarPosition {
        azimuth_deg,
        elevation_deg: 90.0 - zenith.to_degrees(),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
