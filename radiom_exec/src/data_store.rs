//! # Data Store

use chrono::{DateTime, Utc};
use comms_if::eqpt::gps::Fix;
use log::{info, warn};

use crate::{
    bearing_ctrl,
    heading_fusion::{self, HeadingEstimate},
    params::{CycleParams, NUM_GPS},
    rad_sup,
    sched::SchedulerDecision,
    solar::SolarPosition,
};
use util::time::{period_elapsed, seconds_between};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Global data store for the executable.
#[derive(Default)]
pub struct DataStore {
    // Cycle management
    /// Number of cycles already executed
    pub num_cycles: u64,

    /// Time of the current cycle
    pub now: Option<DateTime<Utc>>,

    /// Time of the first cycle
    pub start_time: Option<DateTime<Utc>>,

    /// True if the scheduler and radiometer supervisor are due this cycle
    pub is_sched_cycle: bool,

    last_sched_cycle: Option<DateTime<Utc>>,

    // GPS
    /// Latest fix from each receiver
    pub fixes: [Option<Fix>; NUM_GPS],

    /// Time each receiver last produced a valid fix
    pub last_valid_fix_time: [Option<DateTime<Utc>>; NUM_GPS],

    /// Number of consecutive read errors of each receiver
    pub num_consec_gps_errors: [u64; NUM_GPS],

    /// Time each receiver was last power cycled
    pub last_gps_power_cycle: [Option<DateTime<Utc>>; NUM_GPS],

    gps_stale: [bool; NUM_GPS],

    // HeadingFusion
    pub heading: Option<HeadingEstimate>,
    pub heading_status: heading_fusion::StatusReport,

    // Solar geometry
    pub solar: Option<SolarPosition>,

    // BearingCtrl
    pub bearing_status: bearing_ctrl::StatusReport,

    // Scheduler and RadSupervisor
    pub decisions: Vec<SchedulerDecision>,
    pub rad_sup_status: rad_sup::StatusReport,

    // Records
    /// Number of sample records built
    pub num_rounds: u64,

    /// Time a record, sample or status, was last handed to the store
    pub last_record_time: Option<DateTime<Utc>>,

    pub num_records_stored: u64,
    pub num_records_dropped: u64,

    // Monitoring Counters
    /// Number of consecutive cycle overruns
    pub num_consec_cycle_overruns: u64,
}

// ---------------------------------------------------------------------------
// IMPLS
// ---------------------------------------------------------------------------

impl DataStore {
    /// Perform actions required at the start of a cycle.
    ///
    /// Sets the scheduler flag from the time elapsed since the last scheduler cycle.
    pub fn cycle_start(&mut self, now: DateTime<Utc>, cycle: &CycleParams) {
        self.num_cycles += 1;
        self.now = Some(now);
        self.start_time.get_or_insert(now);

        self.is_sched_cycle = period_elapsed(self.last_sched_cycle, now, cycle.sched_period_s);
        if self.is_sched_cycle {
            self.last_sched_cycle = Some(now);
        }
    }

    /// Store a new fix from receiver `idx`.
    pub fn set_fix(&mut self, idx: usize, fix: Fix, now: DateTime<Utc>) {
        if let Some(n) = self.num_consec_gps_errors.get_mut(idx) {
            if *n > 0 {
                info!("GPS {} reading again after {} errors", idx, n);
            }
            *n = 0;
        }

        if fix.valid {
            if let Some(t) = self.last_valid_fix_time.get_mut(idx) {
                *t = Some(now);
            }
        }

        if let Some(f) = self.fixes.get_mut(idx) {
            *f = Some(fix);
        }
    }

    /// Note a failed read of receiver `idx`, returning the number of consecutive failures.
    pub fn gps_error(&mut self, idx: usize) -> u64 {
        match self.num_consec_gps_errors.get_mut(idx) {
            Some(n) => {
                *n += 1;
                *n
            }
            None => 0,
        }
    }

    /// Log receivers whose latest fix has become older than `warn_age_s`, or fresh again.
    pub fn check_stale_fixes(&mut self, now: DateTime<Utc>, warn_age_s: f64) {
        for (i, fix) in self.fixes.iter().enumerate() {
            let stale = match fix {
                Some(f) => seconds_between(f.timestamp, now) > warn_age_s,
                None => false,
            };

            if stale && !self.gps_stale[i] {
                warn!("GPS {} snapshot is stale (older than {:.0} s)", i, warn_age_s);
            } else if !stale && self.gps_stale[i] {
                info!("GPS {} snapshot fresh again", i);
            }
            self.gps_stale[i] = stale;
        }
    }

    /// Number of receivers whose latest fix is flagged valid.
    pub fn num_valid_fixes(&self) -> usize {
        self.fixes.iter().flatten().filter(|f| f.valid).count()
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_sched_cadence() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let cycle = CycleParams {
            fast_period_s: 1.0,
            sched_period_s: 5.0,
            battery_period_s: 60.0,
            status_record_interval_s: 60.0,
            stale_snapshot_warn_s: 10.0,
        };
        let mut ds = DataStore::default();

        let mut sched = 0;
        for s in 0..61 {
            ds.cycle_start(t0 + Duration::seconds(s), &cycle);
            sched += ds.is_sched_cycle as u32;
        }

        assert_eq!(ds.num_cycles, 61);
        assert_eq!(sched, 13);
        assert_eq!(ds.start_time, Some(t0));
    }
}
