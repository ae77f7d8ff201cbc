//! # Sampling scheduler
//!
//! Decides, per radiometer channel and per cycle, whether sampling is allowed. Default channels
//! are gated on solar elevation and ship speed, channels with a fixed interval schedule sample on
//! their own cadence regardless of conditions.
//!
//! Decisions are recomputed from the current inputs every cycle, nothing is carried over from
//! one decision to the next.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod params;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use util::time::period_elapsed;

pub use params::*;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The sampling scheduler.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    params: Params,
}

/// Whether a channel may sample this cycle, and why.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct SchedulerDecision {
    pub sampling_allowed: bool,
    pub reason: DecisionReason,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// How a channel's sampling is scheduled.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "type")]
pub enum ChannelSchedule {
    /// Gated by solar elevation and ship speed
    Default,

    /// Sample every `interval_s` seconds regardless of conditions
    FixedInterval { interval_s: f64 },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub enum DecisionReason {
    /// All default gates passed
    Allowed,

    /// The platform's position, and so the sun's, is unknown
    NoPosition,

    SunTooLow { elevation_deg: f64 },

    /// Ship speed below the minimum, or unknown
    ShipTooSlow { speed_knots: Option<f64> },

    /// The mount is moving to a new bearing
    MountMoving,

    IntervalElapsed,

    IntervalNotElapsed,
}

/// Possible errors that can occur during Scheduler operation.
#[derive(Debug, thiserror::Error)]
pub enum SchedError {
    #[error("Cannot load the scheduler parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),

    #[error("Invalid scheduler parameters: {0}")]
    InvalidParams(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for ChannelSchedule {
    fn default() -> Self {
        ChannelSchedule::Default
    }
}

impl SchedulerDecision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            sampling_allowed: true,
            reason,
        }
    }

    fn deny(reason: DecisionReason) -> Self {
        Self {
            sampling_allowed: false,
            reason,
        }
    }
}

impl Scheduler {
    /// Load the scheduler parameters from the given parameter file.
    pub fn init(params_path: &str) -> Result<Self, SchedError> {
        let params: Params = util::params::load(params_path)?;
        Self::new(params)
    }

    pub fn new(params: Params) -> Result<Self, SchedError> {
        params.validate().map_err(SchedError::InvalidParams)?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Decide whether a channel with the given schedule may sample now.
    ///
    /// `last_sample` is the last time the channel was asked for a sample, used by fixed interval
    /// schedules.
    pub fn decide(
        &self,
        now: DateTime<Utc>,
        sun_elevation_deg: Option<f64>,
        ship_speed_knots: Option<f64>,
        schedule: &ChannelSchedule,
        last_sample: Option<DateTime<Utc>>,
    ) -> SchedulerDecision {
        match schedule {
            ChannelSchedule::FixedInterval { interval_s } => {
                if period_elapsed(last_sample, now, *interval_s) {
                    SchedulerDecision::allow(DecisionReason::IntervalElapsed)
                } else {
                    SchedulerDecision::deny(DecisionReason::IntervalNotElapsed)
                }
            }
            ChannelSchedule::Default => {
                let elevation_deg = match sun_elevation_deg {
                    Some(e) => e,
                    None => return SchedulerDecision::deny(DecisionReason::NoPosition),
                };

                if elevation_deg < self.params.solar_elevation_limit_deg {
                    return SchedulerDecision::deny(DecisionReason::SunTooLow { elevation_deg });
                }

                if self.params.min_speed_knots > 0.0 {
                    match ship_speed_knots {
                        Some(s) if s >= self.params.min_speed_knots => (),
                        speed_knots => {
                            return SchedulerDecision::deny(DecisionReason::ShipTooSlow {
                                speed_knots,
                            })
                        }
                    }
                }

                SchedulerDecision::allow(DecisionReason::Allowed)
            }
        }
    }

    /// Hold an allowed default channel while the mount is moving.
    pub fn apply_mount_motion(
        &self,
        decision: SchedulerDecision,
        schedule: &ChannelSchedule,
        mount_moving: bool,
    ) -> SchedulerDecision {
        match schedule {
            ChannelSchedule::Default
                if mount_moving && decision.sampling_allowed && self.params.hold_while_moving =>
            {
                SchedulerDecision::deny(DecisionReason::MountMoving)
            }
            _ => decision,
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap()
    }

    fn sched(min_speed_knots: f64) -> Scheduler {
        Scheduler::new(Params {
            solar_elevation_limit_deg: 30.0,
            min_speed_knots,
            hold_while_moving: true,
        })
        .unwrap()
    }

    #[test]
    fn test_low_sun_blocks_default_regardless_of_speed() {
        for min_speed in [0.0, 3.0].iter() {
            let s = sched(*min_speed);
            for speed in [None, Some(0.0), Some(2.0), Some(15.0)].iter() {
                for el in [-10.0, 0.0, 25.0, 29.99].iter() {
                    let d = s.decide(t0(), Some(*el), *speed, &ChannelSchedule::Default, None);
                    assert!(!d.sampling_allowed);
                    assert_eq!(d.reason, DecisionReason::SunTooLow { elevation_deg: *el });
                }
            }
        }
    }

    #[test]
    fn test_speed_gate() {
        let s = sched(3.0);
        let d = s.decide(t0(), Some(45.0), Some(1.0), &ChannelSchedule::Default, None);
        assert_eq!(
            d.reason,
            DecisionReason::ShipTooSlow {
                speed_knots: Some(1.0)
            }
        );

        let d = s.decide(t0(), Some(45.0), None, &ChannelSchedule::Default, None);
        assert!(!d.sampling_allowed);

        let d = s.decide(t0(), Some(45.0), Some(3.0), &ChannelSchedule::Default, None);
        assert!(d.sampling_allowed);

        // Zero disables the speed check
        let d = sched(0.0).decide(t0(), Some(45.0), None, &ChannelSchedule::Default, None);
        assert_eq!(d, SchedulerDecision::allow(DecisionReason::Allowed));
    }

    #[test]
    fn test_no_position_blocks_default() {
        let d = sched(0.0).decide(t0(), None, Some(10.0), &ChannelSchedule::Default, None);
        assert_eq!(d.reason, DecisionReason::NoPosition);
        assert!(!d.sampling_allowed);
    }

    #[test]
    fn test_fixed_interval_ignores_conditions() {
        let s = sched(5.0);
        let schedule = ChannelSchedule::FixedInterval { interval_s: 60.0 };

        let d = s.decide(t0(), Some(-20.0), Some(0.0), &schedule, None);
        assert_eq!(d.reason, DecisionReason::IntervalElapsed);
        assert!(d.sampling_allowed);

        let d = s.decide(t0() + Duration::seconds(30), None, None, &schedule, Some(t0()));
        assert!(!d.sampling_allowed);

        let d = s.decide(t0() + Duration::seconds(60), None, None, &schedule, Some(t0()));
        assert!(d.sampling_allowed);
    }

    #[test]
    fn test_mount_motion_holds_default_only() {
        let s = sched(0.0);
        let allowed = s.decide(t0(), Some(45.0), None, &ChannelSchedule::Default, None);

        let held = s.apply_mount_motion(allowed, &ChannelSchedule::Default, true);
        assert_eq!(held.reason, DecisionReason::MountMoving);

        let reference = ChannelSchedule::FixedInterval { interval_s: 10.0 };
        let d = s.decide(t0(), Some(45.0), None, &reference, None);
        assert_eq!(s.apply_mount_motion(d, &reference, true), d);
    }
}
