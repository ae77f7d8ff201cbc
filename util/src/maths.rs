//! Utility maths functions
//!
//! Angles in this module are in degrees unless the function name says otherwise.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Mean radius of the earth.
///
/// Units: meters
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

pub fn clamp<T>(value: &T, min: &T, max: &T) -> T
where
    T: Copy + PartialOrd,
{
    let mut ret = *value;

    if ret > *max {
        ret = *max
    }
    if ret < *min {
        ret = *min
    }

    ret
}

/// Calculates the least nonnegative remainder of `lhs (mod rhs)`.
///
/// This function is taken from the std library as num is missing it.
pub fn rem_euclid<T>(lhs: T, rhs: T) -> T
where
    T: Float,
{
    let r = lhs % rhs;
    if r < T::zero() {
        r + rhs.abs()
    } else {
        r
    }
}

/// Wrap an angle into the range [0, 360).
pub fn wrap_360<T>(angle_deg: T) -> T
where
    T: Float,
{
    let full: T = T::from(360.0).unwrap_or_else(T::zero);
    let r = rem_euclid(angle_deg, full);

    // Round-off in rem_euclid can give exactly 360
    if r >= full {
        T::zero()
    } else {
        r
    }
}

/// Wrap an angle into the range [-180, 180].
///
/// An input of exactly +180 is kept as +180, -180 maps to -180.
pub fn wrap_180<T>(angle_deg: T) -> T
where
    T: Float,
{
    let half: T = T::from(180.0).unwrap_or_else(T::zero);

    if angle_deg >= -half && angle_deg <= half {
        return angle_deg;
    }

    let w = wrap_360(angle_deg);
    if w > half {
        w - half - half
    } else {
        w
    }
}

/// Get the signed shortest angular distance to go from `from` to `to`.
///
/// The result is in the range [-180, 180], positive meaning clockwise.
pub fn ang_dist_deg<T>(from: T, to: T) -> T
where
    T: Float,
{
    wrap_180(to - from)
}

/// Circular mean of a set of angles, or `None` if the set is empty or the mean is undefined
/// (angles cancel out).
pub fn circular_mean_deg(angles_deg: &[f64]) -> Option<f64> {
    if angles_deg.is_empty() {
        return None;
    }

    let (s, c) = angles_deg.iter().fold((0.0, 0.0), |(s, c), a| {
        let r = a.to_radians();
        (s + r.sin(), c + r.cos())
    });

    if s.abs() < 1e-12 && c.abs() < 1e-12 {
        return None;
    }

    Some(wrap_360(s.atan2(c).to_degrees()))
}

/// Initial great-circle bearing from point 0 to point 1.
///
/// Inputs are latitude and longitude in degrees, output is in the range [0, 360).
pub fn initial_bearing_deg(lat_0: f64, lon_0: f64, lat_1: f64, lon_1: f64) -> f64 {
    let phi_0 = lat_0.to_radians();
    let phi_1 = lat_1.to_radians();
    let d_lambda = (lon_1 - lon_0).to_radians();

    let y = d_lambda.sin() * phi_1.cos();
    let x = phi_0.cos() * phi_1.sin() - phi_0.sin() * phi_1.cos() * d_lambda.cos();

    wrap_360(y.atan2(x).to_degrees())
}

/// Great-circle (haversine) distance between two points in meters.
pub fn haversine_m(lat_0: f64, lon_0: f64, lat_1: f64, lon_1: f64) -> f64 {
    let phi_0 = lat_0.to_radians();
    let phi_1 = lat_1.to_radians();
    let d_phi = (lat_1 - lat_0).to_radians();
    let d_lambda = (lon_1 - lon_0).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi_0.cos() * phi_1.cos() * (d_lambda / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}
