//! # Battery monitor
//!
//! Polls the battery/charge controller at a low rate and keeps the latest snapshot for health
//! reporting. Purely observational: a failed poll clears the snapshot and is logged, nothing else
//! depends on it.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::battery::{BatteryError, BatteryStatus};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use util::time::period_elapsed;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for the battery monitor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Params {
    /// Warn when the battery voltage is below this.
    ///
    /// Units: volts
    #[serde(default)]
    pub low_voltage_warn_v: Option<f64>,

    /// Warn when the state of charge is below this.
    ///
    /// Units: percent
    #[serde(default)]
    pub low_soc_warn_pct: Option<f64>,
}

/// Battery status at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatterySnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: BatteryStatus,

    /// True if one of the low battery thresholds was crossed.
    pub low: bool,
}

#[derive(Debug, Default)]
pub struct BatteryMonitor {
    params: Params,
    snapshot: Option<BatterySnapshot>,
    last_poll: Option<DateTime<Utc>>,
    consecutive_failures: u32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BatteryMonError {
    #[error("Cannot load the battery monitor parameters: {0}")]
    ParamLoadError(#[from] util::params::LoadError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl BatteryMonitor {
    pub fn init(params_path: &str) -> Result<Self, BatteryMonError> {
        Ok(Self::new(util::params::load(params_path)?))
    }

    pub fn new(params: Params) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    /// True if at least `period_s` has passed since the last poll.
    pub fn poll_due(&self, now: DateTime<Utc>, period_s: f64) -> bool {
        period_elapsed(self.last_poll, now, period_s)
    }

    /// Note that a poll was requested at `now`.
    pub fn mark_polled(&mut self, now: DateTime<Utc>) {
        self.last_poll = Some(now);
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The latest snapshot, `None` if the last poll failed or none succeeded yet.
    pub fn snapshot(&self) -> Option<&BatterySnapshot> {
        self.snapshot.as_ref()
    }

    /// Fold the result of a poll into the monitor.
    pub fn update(
        &mut self,
        now: DateTime<Utc>,
        result: Result<BatteryStatus, BatteryError>,
    ) -> Option<&BatterySnapshot> {
        match result {
            Ok(status) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Battery status source back after {} failed poll(s)",
                        self.consecutive_failures
                    );
                }
                self.consecutive_failures = 0;

                let low = self.is_low(&status);
                let was_low = self.snapshot.as_ref().map_or(false, |s| s.low);
                if low && !was_low {
                    warn!(
                        "BATTERY low: {:.2} V, state of charge {}",
                        status.voltage_v,
                        status
                            .state_of_charge_pct
                            .map_or("unknown".to_string(), |s| format!("{:.0} %", s))
                    );
                }

                self.snapshot = Some(BatterySnapshot {
                    timestamp: now,
                    status,
                    low,
                });
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    warn!("Cannot read the battery status: {}", e);
                }
                self.snapshot = None;
            }
        }

        self.snapshot.as_ref()
    }

    fn is_low(&self, status: &BatteryStatus) -> bool {
        let v_low = self
            .params
            .low_voltage_warn_v
            .map_or(false, |v| status.voltage_v < v);
        let soc_low = match (self.params.low_soc_warn_pct, status.state_of_charge_pct) {
            (Some(min), Some(soc)) => soc < min,
            _ => false,
        };

        v_low || soc_low
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn status(v: f64, soc: Option<f64>) -> BatteryStatus {
        BatteryStatus {
            voltage_v: v,
            current_a: None,
            state_of_charge_pct: soc,
            charging: None,
        }
    }

    #[test]
    fn test_snapshot_and_failure() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let mut bm = BatteryMonitor::new(Params {
            low_voltage_warn_v: Some(11.8),
            low_soc_warn_pct: Some(20.0),
        });

        assert!(bm.poll_due(t0, 60.0));
        bm.mark_polled(t0);
        assert!(!bm.poll_due(t0 + Duration::seconds(30), 60.0));

        let s = bm.update(t0, Ok(status(12.6, Some(80.0)))).unwrap();
        assert!(!s.low);

        assert!(bm.update(t0, Ok(status(11.5, None))).unwrap().low);
        assert!(bm.update(t0, Ok(status(12.5, Some(10.0)))).unwrap().low);

        assert!(bm.update(t0, Err(BatteryError::Timeout)).is_none());
        assert!(bm.snapshot().is_none());
    }
}
