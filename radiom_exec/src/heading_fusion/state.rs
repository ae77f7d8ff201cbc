//! Implementations for the HeadingFusion state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::{DateTime, Utc};
use log::{info, trace, warn};
use serde::Serialize;
use std::collections::VecDeque;

// Internal
use super::{
    AntennaOrder, FusionPath, HeadingEstimate, HeadingFusionError, HeadingSource, Params,
};
use crate::params::{BearingMode, NUM_GPS};
use comms_if::eqpt::gps::Fix;
use util::{
    maths::{circular_mean_deg, haversine_m, initial_bearing_deg, wrap_360},
    module::State,
    params,
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Heading fusion module state
#[derive(Default)]
pub struct HeadingFusion {
    pub(crate) params: Params,

    mode: BearingMode,

    /// The last estimate produced, reused when fixes are lost
    previous: Option<HeadingEstimate>,

    /// Recent dual antenna headings used for smoothing
    window: VecDeque<f64>,

    pub(crate) report: StatusReport,
}

/// Data required to initialise HeadingFusion.
#[derive(Debug, Clone, Copy)]
pub struct InitData {
    /// Path to the parameter file, relative to the params directory
    pub params_path: &'static str,

    pub mode: BearingMode,
}

/// Input data to heading fusion.
#[derive(Debug, Clone)]
pub struct InputData {
    pub now: DateTime<Utc>,

    /// Latest fix from each receiver, in receiver order, or `None` if that receiver has not
    /// produced one yet.
    pub fixes: [Option<Fix>; NUM_GPS],
}

/// Result of a single fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fused {
    pub estimate: HeadingEstimate,
    pub path: FusionPath,

    /// Distance between the antennas, if both fixes were usable.
    ///
    /// Units: meters
    pub baseline_m: Option<f64>,
}

/// Status report for HeadingFusion processing.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatusReport {
    pub path: FusionPath,

    /// Number of fixes that passed the validity and staleness checks
    pub num_usable_fixes: usize,

    pub baseline_m: Option<f64>,

    /// Number of consecutive cycles the estimate has been degraded
    pub degraded_cycles: u64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for StatusReport {
    fn default() -> Self {
        Self {
            path: FusionPath::Fallback,
            num_usable_fixes: 0,
            baseline_m: None,
            degraded_cycles: 0,
        }
    }
}

impl State for HeadingFusion {
    type InitData = InitData;
    type InitError = HeadingFusionError;

    type InputData = InputData;
    type OutputData = HeadingEstimate;
    type StatusReport = StatusReport;
    type ProcError = std::convert::Infallible;

    /// Initialise the HeadingFusion module.
    fn init(&mut self, init_data: Self::InitData, _session: &Session)
        -> Result<(), Self::InitError>
    {
        let params: Params = params::load(init_data.params_path)?;
        *self = Self::new(params, init_data.mode)?;

        Ok(())
    }

    /// Fuse the latest fixes into a heading.
    ///
    /// Loss of fixes never produces an error, it only lowers the confidence of the output.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let now = input_data.now;

        // Sort the receivers into bow and stern
        let (front, rear) = match self.params.antenna_order {
            AntennaOrder::FrontRear => (&input_data.fixes[0], &input_data.fixes[1]),
            AntennaOrder::RearFront => (&input_data.fixes[1], &input_data.fixes[0]),
        };

        let mut fused = self.fuse(now, front.as_ref(), rear.as_ref(), self.previous.as_ref());

        // Smooth consecutive dual antenna headings, anything else restarts the window
        if fused.path == FusionPath::DualAntenna {
            self.window.push_back(fused.estimate.heading_deg);
            while self.window.len() > self.params.smoothing_window {
                self.window.pop_front();
            }
            let window: Vec<f64> = self.window.iter().copied().collect();
            if let Some(mean) = circular_mean_deg(&window) {
                fused.estimate.heading_deg = mean;
            }
        } else {
            self.window.clear();
        }

        let num_usable_fixes = input_data
            .fixes
            .iter()
            .flatten()
            .filter(|f| self.is_usable(f, now))
            .count();

        self.update_report(fused, num_usable_fixes);

        trace!(
            "HeadingFusion: {:.1} deg, conf {:.2}, {:?}",
            fused.estimate.heading_deg,
            fused.estimate.confidence,
            fused.path
        );

        self.previous = Some(fused.estimate);

        Ok((fused.estimate, self.report))
    }
}

impl HeadingFusion {
    /// Create a new instance from already loaded parameters.
    pub fn new(params: Params, mode: BearingMode) -> Result<Self, HeadingFusionError> {
        params.validate().map_err(HeadingFusionError::InvalidParams)?;

        Ok(Self {
            params,
            mode,
            previous: None,
            window: VecDeque::new(),
            report: StatusReport::default(),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The latest estimate, if any cycle has been run.
    pub fn estimate(&self) -> Option<&HeadingEstimate> {
        self.previous.as_ref()
    }

    /// Fuse a front and rear fix into a heading.
    ///
    /// `previous` is the estimate of the last cycle, used when neither the antenna bearing nor a
    /// course over ground can be trusted.
    pub fn fuse(
        &self,
        now: DateTime<Utc>,
        front: Option<&Fix>,
        rear: Option<&Fix>,
        previous: Option<&HeadingEstimate>,
    ) -> Fused {
        // Fixed bearing platforms never consult the receivers
        if let BearingMode::FixedBearing { fixed_bearing_deg } = self.mode {
            return Fused {
                estimate: HeadingEstimate {
                    heading_deg: wrap_360(fixed_bearing_deg),
                    confidence: 1.0,
                    derived_from: HeadingSource::Fixed,
                    timestamp: now,
                },
                path: FusionPath::FixedBearing,
                baseline_m: None,
            };
        }

        let front = front.filter(|f| self.is_usable(f, now));
        let rear = rear.filter(|f| self.is_usable(f, now));

        // ---- DUAL ANTENNA ----

        let mut baseline_m = None;
        if let (Some(f), Some(r)) = (front, rear) {
            let baseline = haversine_m(r.latitude_deg, r.longitude_deg, f.latitude_deg, f.longitude_deg);
            baseline_m = Some(baseline);

            if baseline > 0.0 && baseline >= self.params.min_baseline_m {
                return Fused {
                    estimate: HeadingEstimate {
                        heading_deg: initial_bearing_deg(
                            r.latitude_deg,
                            r.longitude_deg,
                            f.latitude_deg,
                            f.longitude_deg,
                        ),
                        confidence: 1.0,
                        derived_from: HeadingSource::DualGps,
                        timestamp: now,
                    },
                    path: FusionPath::DualAntenna,
                    baseline_m,
                };
            }
        }

        // No usable fix at all
        if front.is_none() && rear.is_none() {
            return self.fallback(now);
        }

        // ---- SINGLE ANTENNA ----

        let fixes = [front, rear];
        let cog_fix = fixes.iter().flatten().find(|f| {
            f.speed_knots >= self.params.min_cog_speed_knots
                && f.course_over_ground_deg.map_or(false, |c| c.is_finite())
        });

        if let Some(fix) = cog_fix {
            if let Some(cog) = fix.course_over_ground_deg {
                return Fused {
                    estimate: HeadingEstimate {
                        heading_deg: wrap_360(cog),
                        confidence: self.params.single_cog_confidence,
                        derived_from: HeadingSource::SingleGps,
                        timestamp: now,
                    },
                    path: FusionPath::SingleCog {
                        source_id: fix.source_id,
                    },
                    baseline_m,
                };
            }
        }

        // Too slow for course over ground, hold what we had
        match previous {
            Some(p) => Fused {
                estimate: HeadingEstimate {
                    heading_deg: p.heading_deg,
                    confidence: p.confidence * self.params.confidence_decay,
                    derived_from: p.derived_from,
                    timestamp: now,
                },
                path: FusionPath::HeldPrevious,
                baseline_m,
            },
            None => Fused {
                baseline_m,
                ..self.fallback(now)
            },
        }
    }

    fn fallback(&self, now: DateTime<Utc>) -> Fused {
        Fused {
            estimate: HeadingEstimate {
                heading_deg: wrap_360(self.mode.constant_bearing_deg()),
                confidence: 0.0,
                derived_from: HeadingSource::Fixed,
                timestamp: now,
            },
            path: FusionPath::Fallback,
            baseline_m: None,
        }
    }

    /// A fix is usable if the receiver flagged it valid, it has a position and it isn't stale.
    pub fn is_usable(&self, fix: &Fix, now: DateTime<Utc>) -> bool {
        fix.valid && fix.has_position() && fix.age_s(now).abs() <= self.params.max_fix_age_s
    }

    fn update_report(&mut self, fused: Fused, num_usable_fixes: usize) {
        let was_degraded = self.report.degraded_cycles > 0;

        if fused.path.is_degraded() {
            if !was_degraded {
                warn!(
                    "HEADING degraded: {:?} with {} usable fix(es), confidence {:.2}",
                    fused.path, num_usable_fixes, fused.estimate.confidence
                );
            }
            self.report.degraded_cycles += 1;
        } else {
            if was_degraded {
                info!(
                    "HEADING recovered ({:?}) after {} degraded cycles",
                    fused.path, self.report.degraded_cycles
                );
            }
            self.report.degraded_cycles = 0;
        }

        self.report.path = fused.path;
        self.report.num_usable_fixes = num_usable_fixes;
        self.report.baseline_m = fused.baseline_m;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
