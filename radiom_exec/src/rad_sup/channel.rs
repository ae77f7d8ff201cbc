//! Radiometer channel state machine
//!
//! ```text
//! Idle --Request--> Sampling --Success--> Idle
//!                   Sampling --Timeout (below threshold)--> Idle
//!                   Sampling --Timeout (at threshold)--> Faulted
//! Faulted --RebootStarted--> Rebooting --RebootDone--> Idle
//!                            Rebooting --RebootFailed--> Faulted
//! Faulted --Disable--> Disabled
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;

use super::ChannelParams;
use crate::sched::ChannelSchedule;
use comms_if::eqpt::gpio::Pin;
use util::time::seconds_between;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A supervised radiometer channel.
#[derive(Debug, Clone, Serialize)]
pub struct SensorChannel {
    pub id: String,
    pub port: String,
    pub id_string: Option<String>,
    pub power_pins: Vec<Pin>,
    pub schedule: ChannelSchedule,
    pub integration_time_hint_ms: Option<u32>,

    consecutive_timeouts: u32,

    /// Time of the last reboot, or of power on if the channel was never rebooted.
    last_reboot_time: DateTime<Utc>,

    last_request_time: Option<DateTime<Utc>>,
    last_success_time: Option<DateTime<Utc>>,

    reboots_since_success: u32,
    total_reboots: u32,

    /// Set when a channel faults again after a reboot without succeeding in between
    persistent_alarm: bool,

    state: ChannelState,
}

/// Snapshot of a channel's health, included in records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelHealth {
    pub id: String,
    pub state: ChannelState,
    pub consecutive_timeouts: u32,
    pub total_reboots: u32,
    pub persistent_alarm: bool,
    pub last_success_time: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state")]
pub enum ChannelState {
    Idle,

    Sampling {
        request_id: u64,
        requested_at: DateTime<Utc>,
    },

    Faulted {
        since: DateTime<Utc>,
    },

    Rebooting {
        started_at: DateTime<Utc>,
    },

    /// Excluded from supervision until restart
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelEvent {
    Request { request_id: u64 },
    Success,

    /// A failed or unanswered sample, `escalate` if the timeout threshold has been reached
    Timeout { escalate: bool },

    RebootStarted,
    RebootDone,
    RebootFailed,
    Disable,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {channel} cannot handle {event:?} in state {state:?}")]
    InvalidTransition {
        channel: String,
        state: ChannelState,
        event: ChannelEvent,
    },

    #[error("Reboot of channel {channel} refused, {remaining_s:.0} s of the reboot interval remain")]
    RebootRefused { channel: String, remaining_s: f64 },

    #[error("Response {request_id} for channel {channel} doesn't match an outstanding request")]
    UnexpectedResponse { channel: String, request_id: u64 },

    #[error("No channel with index {0}")]
    UnknownChannel(usize),
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// The transition table of the channel state machine.
///
/// Returns `None` if `event` is not valid in `state`.
pub fn transition(
    state: &ChannelState,
    event: ChannelEvent,
    now: DateTime<Utc>,
) -> Option<ChannelState> {
    use ChannelEvent as E;
    use ChannelState as S;

    match (state, event) {
        (S::Idle, E::Request { request_id }) => Some(S::Sampling {
            request_id,
            requested_at: now,
        }),
        (S::Sampling { .. }, E::Success) => Some(S::Idle),
        (S::Sampling { .. }, E::Timeout { escalate: false }) => Some(S::Idle),
        (S::Sampling { .. }, E::Timeout { escalate: true }) => Some(S::Faulted { since: now }),
        (S::Faulted { .. }, E::RebootStarted) => Some(S::Rebooting { started_at: now }),
        (S::Faulted { .. }, E::Disable) => Some(S::Disabled),
        (S::Rebooting { .. }, E::RebootDone) => Some(S::Idle),
        (S::Rebooting { .. }, E::RebootFailed) => Some(S::Faulted { since: now }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SensorChannel {
    /// Create a new idle channel, powered on at `power_on_time`.
    pub fn new(params: &ChannelParams, power_on_time: DateTime<Utc>) -> Self {
        Self {
            id: params.id.clone(),
            port: params.port.clone(),
            id_string: params.id_string.clone(),
            power_pins: params.power_pins.clone(),
            schedule: params.schedule,
            integration_time_hint_ms: params.integration_time_hint_ms,
            consecutive_timeouts: 0,
            last_reboot_time: power_on_time,
            last_request_time: None,
            last_success_time: None,
            reboots_since_success: 0,
            total_reboots: 0,
            persistent_alarm: false,
            state: ChannelState::Idle,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == ChannelState::Idle
    }

    pub fn consecutive_timeouts(&self) -> u32 {
        self.consecutive_timeouts
    }

    pub fn last_reboot_time(&self) -> DateTime<Utc> {
        self.last_reboot_time
    }

    pub fn last_request_time(&self) -> Option<DateTime<Utc>> {
        self.last_request_time
    }

    pub fn reboots_since_success(&self) -> u32 {
        self.reboots_since_success
    }

    pub fn persistent_alarm(&self) -> bool {
        self.persistent_alarm
    }

    /// The request this channel is waiting on, if sampling.
    pub fn outstanding_request(&self) -> Option<(u64, DateTime<Utc>)> {
        match self.state {
            ChannelState::Sampling {
                request_id,
                requested_at,
            } => Some((request_id, requested_at)),
            _ => None,
        }
    }

    pub fn health(&self) -> ChannelHealth {
        ChannelHealth {
            id: self.id.clone(),
            state: self.state,
            consecutive_timeouts: self.consecutive_timeouts,
            total_reboots: self.total_reboots,
            persistent_alarm: self.persistent_alarm,
            last_success_time: self.last_success_time,
        }
    }

    /// Idle -> Sampling
    pub fn begin_sample(&mut self, request_id: u64, now: DateTime<Utc>) -> Result<(), ChannelError> {
        self.apply(ChannelEvent::Request { request_id }, now)?;
        self.last_request_time = Some(now);
        Ok(())
    }

    /// Sampling -> Idle, clearing the fault counters.
    pub fn record_success(&mut self, now: DateTime<Utc>) -> Result<(), ChannelError> {
        self.apply(ChannelEvent::Success, now)?;

        if self.persistent_alarm {
            info!("CHANNEL {} recovered", self.id);
        }

        self.consecutive_timeouts = 0;
        self.reboots_since_success = 0;
        self.persistent_alarm = false;
        self.last_success_time = Some(now);

        Ok(())
    }

    /// Sampling -> Idle or Faulted, depending on whether `threshold` consecutive timeouts have
    /// now been seen.
    pub fn record_timeout(
        &mut self,
        now: DateTime<Utc>,
        threshold: u32,
    ) -> Result<&ChannelState, ChannelError> {
        let escalate = self.consecutive_timeouts.saturating_add(1) >= threshold;
        self.apply(ChannelEvent::Timeout { escalate }, now)?;
        self.consecutive_timeouts = self.consecutive_timeouts.saturating_add(1);

        if escalate {
            warn!(
                "CHANNEL {} -> Faulted after {} consecutive timeouts",
                self.id, self.consecutive_timeouts
            );

            if self.reboots_since_success > 0 && !self.persistent_alarm {
                self.persistent_alarm = true;
                error!(
                    "CHANNEL {} persistent fault: faulted again after {} reboot(s) without a successful sample",
                    self.id, self.reboots_since_success
                );
            }
        }

        Ok(&self.state)
    }

    /// True if the channel is faulted and the reboot interval has elapsed.
    pub fn reboot_allowed(&self, now: DateTime<Utc>, min_interval_s: f64) -> bool {
        matches!(self.state, ChannelState::Faulted { .. })
            && seconds_between(self.last_reboot_time, now) >= min_interval_s
    }

    /// Faulted -> Rebooting, refused if the last reboot was less than `min_interval_s` ago.
    pub fn begin_reboot(&mut self, now: DateTime<Utc>, min_interval_s: f64) -> Result<(), ChannelError> {
        let elapsed_s = seconds_between(self.last_reboot_time, now);
        if matches!(self.state, ChannelState::Faulted { .. }) && elapsed_s < min_interval_s {
            return Err(ChannelError::RebootRefused {
                channel: self.id.clone(),
                remaining_s: min_interval_s - elapsed_s,
            });
        }

        self.apply(ChannelEvent::RebootStarted, now)?;

        self.last_reboot_time = now;
        self.consecutive_timeouts = 0;
        self.reboots_since_success = self.reboots_since_success.saturating_add(1);
        self.total_reboots = self.total_reboots.saturating_add(1);

        warn!(
            "CHANNEL {} -> Rebooting (reboot {} since last success)",
            self.id, self.reboots_since_success
        );

        Ok(())
    }

    /// Rebooting -> Idle if the power cycle succeeded, back to Faulted otherwise.
    pub fn finish_reboot(&mut self, now: DateTime<Utc>, ok: bool) -> Result<(), ChannelError> {
        if ok {
            self.apply(ChannelEvent::RebootDone, now)?;
            info!("CHANNEL {} -> Idle after reboot", self.id);
        } else {
            self.apply(ChannelEvent::RebootFailed, now)?;
            warn!("CHANNEL {} -> Faulted, power cycle failed", self.id);
        }

        Ok(())
    }

    /// Faulted -> Disabled
    pub fn disable(&mut self, now: DateTime<Utc>) -> Result<(), ChannelError> {
        self.apply(ChannelEvent::Disable, now)?;
        error!(
            "CHANNEL {} -> Disabled after {} reboots without success",
            self.id, self.reboots_since_success
        );
        Ok(())
    }

    fn apply(&mut self, event: ChannelEvent, now: DateTime<Utc>) -> Result<(), ChannelError> {
        match transition(&self.state, event, now) {
            Some(s) => {
                self.state = s;
                Ok(())
            }
            None => Err(ChannelError::InvalidTransition {
                channel: self.id.clone(),
                state: self.state,
                event,
            }),
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

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn channel() -> SensorChannel {
        SensorChannel::new(
            &ChannelParams {
                id: "ed".into(),
                port: "/dev/ttyUSB2".into(),
                baud: 115_200,
                id_string: None,
                power_pins: vec![11],
                integration_time_hint_ms: None,
                schedule: ChannelSchedule::Default,
            },
            t0(),
        )
    }

    fn fail(c: &mut SensorChannel, id: u64, at: DateTime<Utc>, threshold: u32) -> ChannelState {
        c.begin_sample(id, at).unwrap();
        *c.record_timeout(at, threshold).unwrap()
    }

    #[test]
    fn test_transition_table_rejects_invalid_events() {
        let now = t0();
        assert_eq!(transition(&ChannelState::Idle, ChannelEvent::Success, now), None);
        assert_eq!(
            transition(&ChannelState::Idle, ChannelEvent::RebootStarted, now),
            None
        );
        assert_eq!(
            transition(&ChannelState::Disabled, ChannelEvent::Request { request_id: 1 }, now),
            None
        );
        assert_eq!(
            transition(
                &ChannelState::Rebooting { started_at: now },
                ChannelEvent::Request { request_id: 1 },
                now
            ),
            None
        );
    }

    #[test]
    fn test_timeouts_reset_after_success() {
        let mut c = channel();

        assert_eq!(fail(&mut c, 1, secs(1), 3), ChannelState::Idle);
        assert_eq!(fail(&mut c, 2, secs(2), 3), ChannelState::Idle);
        assert_eq!(c.consecutive_timeouts(), 2);

        c.begin_sample(3, secs(3)).unwrap();
        c.record_success(secs(3)).unwrap();
        assert_eq!(c.consecutive_timeouts(), 0);
        assert!(c.is_idle());

        // A failure after the success starts counting from zero again
        assert_eq!(fail(&mut c, 4, secs(4), 3), ChannelState::Idle);
        assert_eq!(c.consecutive_timeouts(), 1);
    }

    #[test]
    fn test_threshold_faults() {
        let mut c = channel();
        assert_eq!(fail(&mut c, 1, secs(1), 2), ChannelState::Idle);
        assert_eq!(
            fail(&mut c, 2, secs(2), 2),
            ChannelState::Faulted { since: secs(2) }
        );

        // Faulted channels can't be sampled
        assert!(c.begin_sample(3, secs(3)).is_err());
    }

    #[test]
    fn test_reboot_cooldown() {
        let mut c = channel();
        fail(&mut c, 1, secs(1), 1);

        // Power on counts as the last reboot
        match c.begin_reboot(secs(10), 300.0) {
            Err(ChannelError::RebootRefused { remaining_s, .. }) => {
                assert!((remaining_s - 290.0).abs() < 1e-9)
            }
            r => panic!("Expected refusal, got {:?}", r),
        }
        assert!(matches!(c.state(), ChannelState::Faulted { .. }));
        assert!(!c.reboot_allowed(secs(299), 300.0));
        assert!(c.reboot_allowed(secs(300), 300.0));

        c.begin_reboot(secs(300), 300.0).unwrap();
        assert_eq!(c.last_reboot_time(), secs(300));
        c.finish_reboot(secs(305), true).unwrap();
        assert!(c.is_idle());

        // Faulting again straight away can't reboot within the interval of the last reboot
        fail(&mut c, 2, secs(310), 1);
        assert!(c.persistent_alarm());
        for t in [311, 400, 599].iter() {
            assert!(c.begin_reboot(secs(*t), 300.0).is_err());
            assert!(matches!(c.state(), ChannelState::Faulted { .. }));
        }
        assert!(c.begin_reboot(secs(600), 300.0).is_ok());
    }

    #[test]
    fn test_failed_power_cycle_refaults() {
        let mut c = channel();
        fail(&mut c, 1, secs(1), 1);
        c.begin_reboot(secs(400), 300.0).unwrap();
        c.finish_reboot(secs(401), false).unwrap();

        assert_eq!(c.state(), &ChannelState::Faulted { since: secs(401) });
        assert!(!c.reboot_allowed(secs(500), 300.0));
    }
}
