//! Implementations for the BearingCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use serde::Serialize;

// Internal
use super::{BearingCtrlError, MotorCmd, MotorReport, MotorState, Params, Target};
use crate::{heading_fusion::HeadingEstimate, params::BearingMode};
use util::{
    maths::{ang_dist_deg, clamp, wrap_180, wrap_360},
    module::State,
    params,
    session::Session,
    time::{period_elapsed, seconds_between},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Bearing control module state
#[derive(Default)]
pub struct BearingCtrl {
    pub(crate) params: Params,

    mode: BearingMode,

    motor: MotorState,

    /// The command sent to the motor worker and not yet reported, with the time it was sent.
    in_flight: Option<(MotorCmd, DateTime<Utc>)>,

    /// Time of the last evaluation of the target
    last_eval: Option<DateTime<Utc>>,

    /// Set by `reconcile` when the motor stalled, cleared by the next `proc`
    stalled: bool,

    pub(crate) report: StatusReport,
}

/// Data required to initialise BearingCtrl.
#[derive(Debug, Clone, Copy)]
pub struct InitData {
    pub params_path: &'static str,
    pub mode: BearingMode,
}

/// Input data to bearing control.
#[derive(Debug, Clone, Copy)]
pub struct InputData {
    pub now: DateTime<Utc>,

    pub heading: Option<HeadingEstimate>,

    /// Azimuth of the sun, if the position of the platform is known.
    ///
    /// Units: degrees true
    pub sun_azimuth_deg: Option<f64>,
}

/// Status report for BearingCtrl processing.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatusReport {
    /// The target computed this cycle, if any.
    pub target: Option<Target>,

    /// The requested target was outside the mechanical limits.
    pub out_of_range: bool,

    /// No target because the heading confidence is too low.
    pub low_confidence_hold: bool,

    /// No target because the sun's azimuth is unknown.
    pub no_sun: bool,

    pub move_in_flight: bool,

    /// The last move was not reported in time and has been given up on.
    pub move_timed_out: bool,

    /// The motor reported a stall since the last cycle.
    pub stalled: bool,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State for BearingCtrl {
    type InitData = InitData;
    type InitError = BearingCtrlError;

    type InputData = InputData;
    type OutputData = Option<MotorCmd>;
    type StatusReport = StatusReport;
    type ProcError = std::convert::Infallible;

    /// Initialise the BearingCtrl module.
    fn init(&mut self, init_data: Self::InitData, _session: &Session)
        -> Result<(), Self::InitError>
    {
        let params: Params = params::load(init_data.params_path)?;
        *self = Self::new(params, init_data.mode)?;

        Ok(())
    }

    /// Compute the mount target and, if a move is needed, the command for the motor worker.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let was_out_of_range = self.report.out_of_range;
        self.report = StatusReport {
            stalled: self.stalled,
            ..Default::default()
        };
        self.stalled = false;

        // Low confidence headings don't move the mount
        if !self.mode.is_fixed() {
            match input_data.heading {
                Some(h) if h.confidence < self.params.min_heading_confidence => {
                    trace!(
                        "Heading confidence {:.2} below {:.2}, holding mount",
                        h.confidence,
                        self.params.min_heading_confidence
                    );
                    self.report.low_confidence_hold = true;
                }
                _ => (),
            }
            if input_data.sun_azimuth_deg.is_none() {
                self.report.no_sun = true;
            }
        }

        let target = if self.report.low_confidence_hold {
            None
        } else {
            self.compute_target(input_data.heading.as_ref(), input_data.sun_azimuth_deg)
        };

        let cmd = match target {
            Some(t) => {
                self.report.target = Some(t);
                self.report.out_of_range = t.out_of_range;

                if t.out_of_range && !was_out_of_range {
                    warn!(
                        "BEARING clamp: requested {:.1} deg is outside [{:.1}, {:.1}], applying {:.1} deg",
                        t.requested_deg, self.params.ccw_limit_deg, self.params.cw_limit_deg,
                        t.applied_deg
                    );
                } else if !t.out_of_range && was_out_of_range {
                    info!("BEARING back in range at {:.1} deg", t.requested_deg);
                }

                self.step(input_data.now, &t)
            }
            None => {
                self.check_move_timeout(input_data.now);
                None
            }
        };

        self.report.move_in_flight = self.in_flight.is_some();

        Ok((cmd, self.report))
    }
}

impl BearingCtrl {
    /// Create a new instance from already loaded parameters.
    pub fn new(params: Params, mode: BearingMode) -> Result<Self, BearingCtrlError> {
        params.validate().map_err(BearingCtrlError::InvalidParams)?;

        Ok(Self {
            params,
            mode,
            motor: MotorState::default(),
            in_flight: None,
            last_eval: None,
            stalled: false,
            report: StatusReport::default(),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn motor_state(&self) -> &MotorState {
        &self.motor
    }

    /// True if a command has been sent to the motor and not yet reported.
    pub fn is_moving(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Compute the target mount angle.
    ///
    /// In fixed bearing mode this is the fixed bearing relative to the motor's zero. Otherwise it
    /// is the sun-relative viewing bearing, either side of the sun, relative to the ship heading.
    /// Returns `None` if the heading or sun azimuth needed for a dynamic target are unknown.
    pub fn compute_target(
        &self,
        heading: Option<&HeadingEstimate>,
        sun_azimuth_deg: Option<f64>,
    ) -> Option<Target> {
        let (heading, sun_az) = match self.mode {
            BearingMode::FixedBearing { fixed_bearing_deg } => {
                return Some(self.clamp_to_limits(wrap_180(fixed_bearing_deg - self.params.home_pos_deg)));
            }
            BearingMode::DynamicHeading { .. } => (heading?, sun_azimuth_deg?),
        };

        let cw = self.target_for_bearing(
            wrap_360(sun_az + self.params.sun_rel_azimuth_deg),
            heading.heading_deg,
        );
        let ccw = self.target_for_bearing(
            wrap_360(sun_az - self.params.sun_rel_azimuth_deg),
            heading.heading_deg,
        );

        let cur = self.motor.current_angle_deg;
        let excess = |t: &Target| ang_dist_deg(t.requested_deg, t.applied_deg).abs();

        Some(match (cw.out_of_range, ccw.out_of_range) {
            (false, false) => {
                if (cw.applied_deg - cur).abs() <= (ccw.applied_deg - cur).abs() {
                    cw
                } else {
                    ccw
                }
            }
            (false, true) => cw,
            (true, false) => ccw,
            (true, true) => {
                if excess(&cw) <= excess(&ccw) {
                    cw
                } else {
                    ccw
                }
            }
        })
    }

    /// Mount angle needed to face `desired_bearing_deg` with the ship on `heading_deg`.
    pub fn target_for_bearing(&self, desired_bearing_deg: f64, heading_deg: f64) -> Target {
        self.clamp_to_limits(wrap_180(
            desired_bearing_deg - heading_deg - self.params.home_pos_deg,
        ))
    }

    /// Clamp a requested angle in [-180, 180] to the nearest mechanical limit if it is outside
    /// them.
    pub fn clamp_to_limits(&self, requested_deg: f64) -> Target {
        let (ccw, cw) = (self.params.ccw_limit_deg, self.params.cw_limit_deg);

        if requested_deg >= ccw && requested_deg <= cw {
            return Target {
                requested_deg,
                applied_deg: requested_deg,
                out_of_range: false,
            };
        }

        // Nearest by circular distance, the dead zone can straddle +/-180
        let applied_deg = if ang_dist_deg(requested_deg, ccw).abs() <= ang_dist_deg(requested_deg, cw).abs() {
            ccw
        } else {
            cw
        };

        Target {
            requested_deg,
            applied_deg,
            out_of_range: true,
        }
    }

    /// Advance the motor towards `target`.
    ///
    /// A command is only produced if no move is in flight, at least `check_angle_every_sec` has
    /// passed since the last evaluation and the target is further than the deadband from the
    /// current angle.
    pub fn step(&mut self, now: DateTime<Utc>, target: &Target) -> Option<MotorCmd> {
        if self.check_move_timeout(now) {
            return None;
        }

        if !period_elapsed(self.last_eval, now, self.params.check_angle_every_sec) {
            return None;
        }
        self.last_eval = Some(now);

        self.motor.target_angle_deg = Some(target.applied_deg);

        // The mount can't pass through its dead zone so this is a linear difference
        let delta_deg = target.applied_deg - self.motor.current_angle_deg;
        if delta_deg.abs() <= self.params.deadband_deg {
            trace!("Mount within deadband of target ({:.2} deg)", delta_deg);
            return None;
        }

        let step_delta = (delta_deg * self.params.steps_per_degree).round() as i64;
        let target_step = clamp(
            &(self.motor.current_step + step_delta),
            &self.min_step(),
            &self.max_step(),
        );

        if target_step == self.motor.current_step {
            return None;
        }

        debug!(
            "Moving mount {:.1} -> {:.1} deg (step {} -> {})",
            self.motor.current_angle_deg, target.applied_deg, self.motor.current_step, target_step
        );

        let cmd = MotorCmd::MoveTo { step: target_step };
        self.in_flight = Some((cmd, now));

        Some(cmd)
    }

    /// Command the motor to its home position.
    pub fn home_cmd(&mut self, now: DateTime<Utc>) -> MotorCmd {
        self.in_flight = Some((MotorCmd::Home, now));
        MotorCmd::Home
    }

    /// Forget the move in flight, used when the command could not be delivered.
    pub fn abort_move(&mut self) {
        self.in_flight = None;
    }

    /// Fold a report from the motor worker into the motor state.
    pub fn reconcile(&mut self, report: &MotorReport, now: DateTime<Utc>) {
        match self.in_flight {
            Some((cmd, _)) if cmd == report.cmd => self.in_flight = None,
            _ => debug!("Motor report for {:?} which is not in flight", report.cmd),
        }

        match &report.result {
            Ok(step) => self.set_step(*step),
            Err(e) => match e.achieved_step() {
                Some(step) => {
                    warn!(
                        "Motor stalled executing {:?}, reached step {}",
                        report.cmd, step
                    );
                    self.stalled = true;
                    self.set_step(step);
                }
                None => warn!("Motor command {:?} failed: {}", report.cmd, e),
            },
        }

        self.motor.last_move_time = Some(now);
    }

    /// Check the move in flight against the move timeout, giving up on it if it has expired.
    ///
    /// Returns true if a move is still in flight.
    fn check_move_timeout(&mut self, now: DateTime<Utc>) -> bool {
        match self.in_flight {
            Some((cmd, sent)) => {
                if seconds_between(sent, now) > self.params.move_timeout_s {
                    warn!(
                        "No report for motor command {:?} after {:.0} s, giving up",
                        cmd, self.params.move_timeout_s
                    );
                    self.in_flight = None;
                    self.report.move_timed_out = true;
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    fn set_step(&mut self, step: i64) {
        let angle = step as f64 / self.params.steps_per_degree;
        let (ccw, cw) = (self.params.ccw_limit_deg, self.params.cw_limit_deg);

        if angle < ccw || angle > cw {
            error!(
                "Motor reports step {} ({:.1} deg) outside the mechanical limits [{:.1}, {:.1}]",
                step, angle, ccw, cw
            );
        }

        self.motor.current_step = step;
        self.motor.current_angle_deg = clamp(&angle, &ccw, &cw);
    }

    fn min_step(&self) -> i64 {
        (self.params.ccw_limit_deg * self.params.steps_per_degree).ceil() as i64
    }

    fn max_step(&self) -> i64 {
        (self.params.cw_limit_deg * self.params.steps_per_degree).floor() as i64
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::heading_fusion::HeadingSource;
    use chrono::{Duration, TimeZone};
    use comms_if::eqpt::motor::MotorError;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap()
    }

    fn heading(deg: f64) -> HeadingEstimate {
        HeadingEstimate {
            heading_deg: deg,
            confidence: 1.0,
            derived_from: HeadingSource::DualGps,
            timestamp: t0(),
        }
    }

    fn ctrl(mode: BearingMode) -> BearingCtrl {
        BearingCtrl::new(
            Params {
                ccw_limit_deg: -90.0,
                cw_limit_deg: 150.0,
                ..Params::default()
            },
            mode,
        )
        .unwrap()
    }

    #[test]
    fn test_fixed_bearing_target() {
        let mut p = Params::default();
        p.home_pos_deg = 10.0;
        let bc = BearingCtrl::new(
            p,
            BearingMode::FixedBearing {
                fixed_bearing_deg: 148.0,
            },
        )
        .unwrap();

        let t = bc.compute_target(None, None).unwrap();
        assert_eq!(t.applied_deg, 138.0);
        assert!(!t.out_of_range);
    }

    #[test]
    fn test_out_of_range_clamps_to_nearest_limit() {
        let bc = ctrl(BearingMode::default());

        // Dead zone is (150, 180] u [-180, -90)
        let cases = [
            (151.0, 150.0),
            (179.0, 150.0),
            (-179.0, 150.0),
            (-125.0, -90.0),
            (-91.0, -90.0),
            (175.0, 150.0),
        ];
        for (requested, expected) in cases.iter() {
            let t = bc.clamp_to_limits(*requested);
            assert!(t.out_of_range, "{} should be out of range", requested);
            assert_eq!(t.applied_deg, *expected, "requested {}", requested);
            assert_eq!(t.requested_deg, *requested);
        }

        let t = bc.clamp_to_limits(100.0);
        assert!(!t.out_of_range);
        assert_eq!(t.applied_deg, 100.0);
    }

    #[test]
    fn test_target_formula_normalises() {
        let mut p = Params::default();
        p.home_pos_deg = 10.0;
        p.ccw_limit_deg = -180.0;
        p.cw_limit_deg = 180.0;
        let bc = BearingCtrl::new(p, BearingMode::default()).unwrap();

        // 20 - 300 - 10 = -290 -> 70
        let t = bc.target_for_bearing(20.0, 300.0);
        assert!((t.applied_deg - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_sun_relative_candidate_selection() {
        // Sun at 180, heading 0, home 0: candidates 315 (-45 deg) and 45 (45 deg)
        let mut bc = ctrl(BearingMode::default());

        // Both in range, pick the one closer to the current angle
        bc.motor.current_angle_deg = 30.0;
        let t = bc.compute_target(Some(&heading(0.0)), Some(180.0)).unwrap();
        assert!((t.applied_deg - 45.0).abs() < 1e-9);

        bc.motor.current_angle_deg = -60.0;
        let t = bc.compute_target(Some(&heading(0.0)), Some(180.0)).unwrap();
        assert!((t.applied_deg + 45.0).abs() < 1e-9);

        // Heading 250: candidates 315-250 = 65 and 45-250 = -205 -> 155 (out of range)
        let t = bc.compute_target(Some(&heading(250.0)), Some(180.0)).unwrap();
        assert!(!t.out_of_range);
        assert!((t.applied_deg - 65.0).abs() < 1e-9);

        // Without the sun there is no dynamic target
        assert!(bc.compute_target(Some(&heading(0.0)), None).is_none());
    }

    #[test]
    fn test_deadband_and_rate_limit() {
        let mut bc = ctrl(BearingMode::FixedBearing {
            fixed_bearing_deg: 0.5,
        });
        let input = |now| InputData {
            now,
            heading: None,
            sun_azimuth_deg: None,
        };

        // Within deadband of 0 deg, no move
        let (cmd, _) = bc.proc(&input(t0())).unwrap();
        assert_eq!(cmd, None);

        // Change target to 20 deg, but we evaluated too recently
        bc.mode = BearingMode::FixedBearing {
            fixed_bearing_deg: 20.0,
        };
        let (cmd, _) = bc.proc(&input(t0() + Duration::seconds(1))).unwrap();
        assert_eq!(cmd, None);

        let (cmd, report) = bc.proc(&input(t0() + Duration::seconds(5))).unwrap();
        assert_eq!(cmd, Some(MotorCmd::MoveTo { step: 2000 }));
        assert!(report.move_in_flight);

        // Nothing else is sent while the move is in flight
        let (cmd, _) = bc.proc(&input(t0() + Duration::seconds(11))).unwrap();
        assert_eq!(cmd, None);
    }

    #[test]
    fn test_reconcile_partial_move() {
        let mut bc = ctrl(BearingMode::FixedBearing {
            fixed_bearing_deg: 20.0,
        });
        let target = bc.clamp_to_limits(20.0);
        let cmd = bc.step(t0(), &target).unwrap();
        assert!(bc.is_moving());

        bc.reconcile(
            &MotorReport {
                cmd,
                result: Err(MotorError::Stall { achieved_step: 1250 }),
            },
            t0(),
        );

        assert!(!bc.is_moving());
        assert_eq!(bc.motor_state().current_step, 1250);
        assert!((bc.motor_state().current_angle_deg - 12.5).abs() < 1e-9);

        let (_, report) = bc
            .proc(&InputData {
                now: t0(),
                heading: None,
                sun_azimuth_deg: None,
            })
            .unwrap();
        assert!(report.stalled);
    }

    #[test]
    fn test_move_timeout_releases_mount() {
        let mut bc = ctrl(BearingMode::FixedBearing {
            fixed_bearing_deg: 20.0,
        });
        let target = bc.clamp_to_limits(20.0);
        assert!(bc.step(t0(), &target).is_some());

        // Default move timeout is 30 s
        let later = t0() + Duration::seconds(31);
        let cmd = bc.step(later, &target);
        assert_eq!(cmd, Some(MotorCmd::MoveTo { step: 2000 }));
    }

    #[test]
    fn test_low_confidence_holds() {
        let mut bc = ctrl(BearingMode::default());
        let mut h = heading(0.0);
        h.confidence = 0.0;

        let (cmd, report) = bc
            .proc(&InputData {
                now: t0(),
                heading: Some(h),
                sun_azimuth_deg: Some(180.0),
            })
            .unwrap();
        assert_eq!(cmd, None);
        assert!(report.low_confidence_hold);
        assert!(report.target.is_none());
    }

    #[test]
    fn test_invalid_limits_rejected() {
        let p = Params {
            ccw_limit_deg: 10.0,
            cw_limit_deg: -10.0,
            ..Params::default()
        };
        assert!(BearingCtrl::new(p, BearingMode::default()).is_err());
    }
}
