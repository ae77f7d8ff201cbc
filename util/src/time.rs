//! General time utility functions

use chrono::{DateTime, Duration, Utc};

/// Number of nanoseconds in a second
pub const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Convert a duration into a number of seconds, or `None` if overflow
pub fn duration_to_seconds(duration: Duration) -> Option<f64> {
    duration
        .num_nanoseconds()
        .map(|ns| ns as f64 / NANOS_PER_SECOND as f64)
}

/// Convert a number of seconds into a duration.
///
/// Negative and non-finite values are treated as zero.
pub fn seconds_to_duration(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::zero();
    }

    Duration::nanoseconds((seconds * NANOS_PER_SECOND as f64) as i64)
}

/// Seconds elapsed between `earlier` and `later`, negative if `later` is before `earlier`.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    duration_to_seconds(later - earlier).unwrap_or(std::f64::NAN)
}

/// Returns true if at least `period_s` seconds have passed since `last`, or if there is no `last`.
pub fn period_elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, period_s: f64) -> bool {
    match last {
        Some(l) => seconds_between(l, now) >= period_s,
        None => true,
    }
}
