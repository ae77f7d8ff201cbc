//! Implementations for the RadSupervisor state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use serde::Serialize;

// Internal
use super::{
    ChannelError, ChannelHealth, ChannelState, CompletedRound, Params, RadSupError,
    RebootOutcome, RebootRequest, SampleRequest, SampleResponse, SensorChannel,
};
use crate::sched::SchedulerDecision;
use comms_if::eqpt::rad::Reading;
use util::{module::State, params, session::Session, time::seconds_between};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Radiometer supervisor state
#[derive(Default)]
pub struct RadSupervisor {
    pub(crate) params: Params,

    channels: Vec<SensorChannel>,

    next_request_id: u64,

    /// Rounds still waiting on some channels, oldest first
    rounds: Vec<Round>,

    pub(crate) report: StatusReport,
}

/// The sample requests issued on one scheduler cycle.
///
/// A channel has at most one outstanding request, so it is pending in at most one round.
#[derive(Debug, Clone)]
struct Round {
    started_at: DateTime<Utc>,
    num_requested: usize,

    /// Indexes of the channels still to answer
    pending: Vec<usize>,

    readings: Vec<Reading>,
}

/// Input data to the radiometer supervisor.
#[derive(Debug, Clone)]
pub struct InputData {
    pub now: DateTime<Utc>,

    /// One decision per channel on scheduler cycles, `None` otherwise.
    pub decisions: Option<Vec<SchedulerDecision>>,

    /// Responses received from the radiometer workers since the last cycle.
    pub responses: Vec<SampleResponse>,

    /// Outcomes of power cycles received since the last cycle.
    pub reboots: Vec<RebootOutcome>,
}

/// Output of the radiometer supervisor.
#[derive(Debug, Clone, Default)]
pub struct OutputData {
    pub sample_requests: Vec<SampleRequest>,
    pub reboot_requests: Vec<RebootRequest>,

    /// Rounds in which every channel resolved this cycle, oldest first
    pub completed: Vec<CompletedRound>,
}

/// Status report for RadSupervisor processing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub channels: Vec<ChannelHealth>,

    /// Number of channels idle and able to sample
    pub num_ready: usize,

    /// Number of samples that timed out this cycle
    pub num_timeouts: usize,

    /// Number of reboots refused this cycle because of the reboot interval
    pub num_reboots_deferred: usize,

    /// Number of power cycles given up on this cycle
    pub num_reboot_timeouts: usize,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl State for RadSupervisor {
    /// Path to the parameter file and the time the channels were powered on.
    type InitData = (&'static str, DateTime<Utc>);
    type InitError = RadSupError;

    type InputData = InputData;
    type OutputData = OutputData;
    type StatusReport = StatusReport;
    type ProcError = RadSupError;

    /// Initialise the RadSupervisor module.
    fn init(&mut self, init_data: Self::InitData, _session: &Session)
        -> Result<(), Self::InitError>
    {
        let params: Params = params::load(init_data.0)?;
        *self = Self::new(params, init_data.1)?;

        Ok(())
    }

    /// Advance every channel's state machine.
    ///
    /// Reboot outcomes and sample responses are applied first, then unanswered power cycles and
    /// sample requests are timed out and the rounds they complete are taken. New requests are
    /// then issued as a fresh round if this is a scheduler cycle, and finally reboots are
    /// requested for faulted channels whose reboot interval has elapsed.
    fn proc(&mut self, input_data: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let now = input_data.now;
        let mut output = OutputData::default();
        self.report = StatusReport::default();

        for outcome in input_data.reboots.iter() {
            if let Err(e) = self.handle_reboot_outcome(now, outcome) {
                warn!("Unexpected reboot outcome: {}", e);
            }
        }

        for response in input_data.responses.iter() {
            if let Err(e) = self.handle_response(now, response) {
                debug!("Ignoring sample response: {}", e);
            }
        }

        self.report.num_reboot_timeouts = self.check_reboot_timeouts(now);
        self.report.num_timeouts = self.check_timeouts(now);
        output.completed = self.take_completed_rounds();

        if let Some(ref decisions) = input_data.decisions {
            output.sample_requests = self.request_samples(now, decisions)?;
        }

        output.reboot_requests = self.reboot_requests(now);

        self.report.channels = self.health();
        self.report.num_ready = self.channels.iter().filter(|c| c.is_idle()).count();

        Ok((output, self.report.clone()))
    }
}

impl RadSupervisor {
    /// Create a new supervisor, with all channels idle and powered on at `power_on_time`.
    pub fn new(params: Params, power_on_time: DateTime<Utc>) -> Result<Self, RadSupError> {
        params.validate().map_err(RadSupError::InvalidParams)?;

        let channels: Vec<SensorChannel> = params
            .channels
            .iter()
            .map(|c| SensorChannel::new(c, power_on_time))
            .collect();

        for c in channels.iter().filter(|c| c.power_pins.is_empty()) {
            warn!(
                "Channel {} has no power pins, reboots will only reset its fault counters",
                c.id
            );
        }

        Ok(Self {
            params,
            channels,
            next_request_id: 1,
            rounds: Vec::new(),
            report: StatusReport::default(),
        })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn channels(&self) -> &[SensorChannel] {
        &self.channels
    }

    pub fn health(&self) -> Vec<ChannelHealth> {
        self.channels.iter().map(|c| c.health()).collect()
    }

    /// True if a round of samples is still waiting on responses.
    pub fn round_in_progress(&self) -> bool {
        !self.rounds.is_empty()
    }

    /// Issue sample requests to the idle channels whose decision allows sampling.
    ///
    /// `decisions` must hold one decision per channel, in channel order.
    pub fn request_samples(
        &mut self,
        now: DateTime<Utc>,
        decisions: &[SchedulerDecision],
    ) -> Result<Vec<SampleRequest>, RadSupError> {
        if decisions.len() != self.channels.len() {
            return Err(RadSupError::DecisionCountMismatch {
                expected: self.channels.len(),
                got: decisions.len(),
            });
        }

        let mut requests = Vec::new();

        for (idx, (channel, decision)) in self.channels.iter_mut().zip(decisions).enumerate() {
            if !decision.sampling_allowed {
                trace!("Channel {} not sampling: {:?}", channel.id, decision.reason);
                continue;
            }
            if !channel.is_idle() {
                trace!("Channel {} not sampling, {:?}", channel.id, channel.state());
                continue;
            }

            let request_id = self.next_request_id;
            self.next_request_id += 1;

            if let Err(e) = channel.begin_sample(request_id, now) {
                warn!("{}", e);
                continue;
            }

            requests.push(SampleRequest {
                request_id,
                channel_idx: idx,
                integration_time_hint_ms: channel.integration_time_hint_ms,
            });
        }

        if !requests.is_empty() {
            self.rounds.push(Round {
                started_at: now,
                num_requested: requests.len(),
                pending: requests.iter().map(|r| r.channel_idx).collect(),
                readings: Vec::new(),
            });
        }

        Ok(requests)
    }

    /// Apply a response from a radiometer worker.
    ///
    /// Responses which don't match the channel's outstanding request, for instance a late answer
    /// to a request that already timed out, are rejected and leave the channel unchanged.
    pub fn handle_response(
        &mut self,
        now: DateTime<Utc>,
        response: &SampleResponse,
    ) -> Result<(), ChannelError> {
        let threshold = self.params.allow_consecutive_timeouts;
        let channel = self
            .channels
            .get_mut(response.channel_idx)
            .ok_or(ChannelError::UnknownChannel(response.channel_idx))?;

        match channel.outstanding_request() {
            Some((id, _)) if id == response.request_id => (),
            _ => {
                return Err(ChannelError::UnexpectedResponse {
                    channel: channel.id.clone(),
                    request_id: response.request_id,
                })
            }
        }

        let reading = match &response.result {
            Ok(reading) => {
                channel.record_success(now)?;
                Some(reading.clone())
            }
            Err(e) => {
                warn!("Channel {} sample failed: {}", channel.id, e);
                channel.record_timeout(now, threshold)?;
                None
            }
        };

        self.resolve(response.channel_idx, reading, now);
        Ok(())
    }

    /// Time out channels which have been sampling for longer than the sample timeout.
    ///
    /// Returns the number of channels timed out.
    pub fn check_timeouts(&mut self, now: DateTime<Utc>) -> usize {
        let timeout_s = self.params.sample_timeout_s;
        let threshold = self.params.allow_consecutive_timeouts;
        let mut timed_out = Vec::new();

        for (idx, channel) in self.channels.iter_mut().enumerate() {
            if let Some((id, requested_at)) = channel.outstanding_request() {
                if seconds_between(requested_at, now) > timeout_s {
                    warn!(
                        "Channel {} request {} unanswered after {:.1} s",
                        channel.id, id, timeout_s
                    );
                    match channel.record_timeout(now, threshold) {
                        Ok(_) => timed_out.push(idx),
                        Err(e) => warn!("{}", e),
                    }
                }
            }
        }

        for idx in timed_out.iter() {
            self.resolve(*idx, None, now);
        }

        timed_out.len()
    }

    /// Request power cycles for faulted channels whose reboot interval has elapsed.
    ///
    /// Channels still within the interval stay faulted and are left out.
    pub fn reboot_requests(&mut self, now: DateTime<Utc>) -> Vec<RebootRequest> {
        let min_interval_s = self.params.minimum_reboot_interval_sec;
        let mut requests = Vec::new();

        for (idx, channel) in self.channels.iter_mut().enumerate() {
            if !matches!(channel.state(), ChannelState::Faulted { .. }) {
                continue;
            }

            match channel.begin_reboot(now, min_interval_s) {
                Ok(()) => requests.push(RebootRequest {
                    channel_idx: idx,
                    pins: channel.power_pins.clone(),
                }),
                Err(e @ ChannelError::RebootRefused { .. }) => {
                    trace!("{}", e);
                    self.report.num_reboots_deferred += 1;
                }
                Err(e) => warn!("{}", e),
            }
        }

        requests
    }

    /// Return channels whose power cycle has gone unanswered for longer than the reboot timeout
    /// to Faulted, so that they are rebooted again once the reboot interval has elapsed.
    ///
    /// Returns the number of channels timed out.
    pub fn check_reboot_timeouts(&mut self, now: DateTime<Utc>) -> usize {
        let timeout_s = self.params.reboot_timeout_s;
        let mut num_timed_out = 0;

        for channel in self.channels.iter_mut() {
            let started_at = match channel.state() {
                ChannelState::Rebooting { started_at } => *started_at,
                _ => continue,
            };

            if seconds_between(started_at, now) > timeout_s {
                warn!(
                    "Channel {} power cycle unanswered after {:.1} s",
                    channel.id, timeout_s
                );
                match channel.finish_reboot(now, false) {
                    Ok(()) => num_timed_out += 1,
                    Err(e) => warn!("{}", e),
                }
            }
        }

        num_timed_out
    }

    /// Apply the outcome of a power cycle.
    pub fn handle_reboot_outcome(
        &mut self,
        now: DateTime<Utc>,
        outcome: &RebootOutcome,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .get_mut(outcome.channel_idx)
            .ok_or(ChannelError::UnknownChannel(outcome.channel_idx))?;

        if let Err(ref e) = outcome.result {
            warn!("Power cycle of channel {} failed: {}", channel.id, e);
        }

        channel.finish_reboot(now, outcome.result.is_ok())
    }

    /// Take the rounds in which every channel has resolved, oldest first.
    pub fn take_completed_rounds(&mut self) -> Vec<CompletedRound> {
        let (done, waiting): (Vec<Round>, Vec<Round>) = self
            .rounds
            .drain(..)
            .partition(|r| r.pending.is_empty());
        self.rounds = waiting;

        done.into_iter()
            .map(|r| CompletedRound {
                started_at: r.started_at,
                num_requested: r.num_requested,
                readings: r.readings,
            })
            .collect()
    }

    /// Remove a channel from the pending set of the round, keeping its reading if it has one, and
    /// apply the disablement policy to channels that just faulted.
    fn resolve(&mut self, idx: usize, reading: Option<Reading>, now: DateTime<Utc>) {
        if let Some(round) = self.rounds.iter_mut().find(|r| r.pending.contains(&idx)) {
            round.pending.retain(|i| *i != idx);
            if let Some(r) = reading {
                round.readings.push(r);
            }
        }

        if let (Some(max), Some(channel)) = (
            self.params.max_reboots_without_success,
            self.channels.get_mut(idx),
        ) {
            if matches!(channel.state(), ChannelState::Faulted { .. })
                && channel.reboots_since_success() >= max
            {
                if let Err(e) = channel.disable(now) {
                    warn!("{}", e);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        rad_sup::ChannelParams,
        sched::{ChannelSchedule, DecisionReason},
    };
    use chrono::{Duration, TimeZone};
    use comms_if::eqpt::rad::RadError;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap()
    }

    fn secs(s: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(s)
    }

    fn chan(id: &str, pins: Vec<u8>) -> ChannelParams {
        ChannelParams {
            id: id.into(),
            port: format!("/dev/{}", id),
            baud: 115_200,
            id_string: None,
            power_pins: pins,
            integration_time_hint_ms: Some(100),
            schedule: ChannelSchedule::Default,
        }
    }

    fn sup(max_reboots: Option<u32>) -> RadSupervisor {
        RadSupervisor::new(
            Params {
                channels: vec![chan("lt", vec![11]), chan("ls", vec![12]), chan("es", vec![13])],
                allow_consecutive_timeouts: 2,
                minimum_reboot_interval_sec: 300.0,
                sample_timeout_s: 10.0,
                reboot_timeout_s: 30.0,
                max_reboots_without_success: max_reboots,
            },
            t0(),
        )
        .unwrap()
    }

    fn allow_all() -> Vec<SchedulerDecision> {
        vec![
            SchedulerDecision {
                sampling_allowed: true,
                reason: DecisionReason::Allowed,
            };
            3
        ]
    }

    fn reading(id: &str, t: DateTime<Utc>) -> Reading {
        Reading {
            channel_id: id.into(),
            timestamp: t,
            integration_time_ms: 100,
            spectrum: vec![1.0, 2.0, 3.0],
        }
    }

    #[test]
    fn test_round_completes_when_all_resolved() {
        let mut s = sup(None);
        let reqs = s.request_samples(t0(), &allow_all()).unwrap();
        assert_eq!(reqs.len(), 3);
        assert!(s.channels().iter().all(|c| !c.is_idle()));

        s.handle_response(
            secs(1),
            &SampleResponse {
                request_id: reqs[0].request_id,
                channel_idx: 0,
                result: Ok(reading("lt", secs(1))),
            },
        )
        .unwrap();
        s.handle_response(
            secs(1),
            &SampleResponse {
                request_id: reqs[1].request_id,
                channel_idx: 1,
                result: Err(RadError::Timeout),
            },
        )
        .unwrap();
        assert!(s.take_completed_rounds().is_empty());

        // The third never answers
        assert_eq!(s.check_timeouts(secs(5)), 0);
        assert_eq!(s.check_timeouts(secs(11)), 1);

        let rounds = s.take_completed_rounds();
        assert_eq!(rounds.len(), 1);
        let round = &rounds[0];
        assert_eq!(round.num_requested, 3);
        assert_eq!(round.readings.len(), 1);
        assert_eq!(round.readings[0].channel_id, "lt");

        // A late answer is rejected
        assert!(s
            .handle_response(
                secs(12),
                &SampleResponse {
                    request_id: reqs[2].request_id,
                    channel_idx: 2,
                    result: Ok(reading("es", secs(12))),
                },
            )
            .is_err());
        assert_eq!(s.channels()[2].consecutive_timeouts(), 1);
    }

    #[test]
    fn test_timeouts_reset_on_next_success() {
        let mut s = sup(None);

        let reqs = s.request_samples(t0(), &allow_all()).unwrap();
        s.handle_response(
            secs(1),
            &SampleResponse {
                request_id: reqs[0].request_id,
                channel_idx: 0,
                result: Err(RadError::Comms("framing".into())),
            },
        )
        .unwrap();
        assert_eq!(s.channels()[0].consecutive_timeouts(), 1);
        s.check_timeouts(secs(20));
        s.take_completed_rounds();

        let reqs = s.request_samples(secs(30), &allow_all()).unwrap();
        s.handle_response(
            secs(31),
            &SampleResponse {
                request_id: reqs[0].request_id,
                channel_idx: 0,
                result: Ok(reading("lt", secs(31))),
            },
        )
        .unwrap();
        assert_eq!(s.channels()[0].consecutive_timeouts(), 0);
    }

    #[test]
    fn test_faulted_channel_waits_for_reboot_interval() {
        let mut s = sup(None);

        for (i, t) in [0i64, 20].iter().enumerate() {
            let reqs = s.request_samples(secs(*t), &allow_all()).unwrap();
            assert_eq!(reqs.len(), 3, "round {}", i);
            s.check_timeouts(secs(*t + 11));
            s.take_completed_rounds();
        }

        assert!(s
            .channels()
            .iter()
            .all(|c| matches!(c.state(), ChannelState::Faulted { .. })));

        // Faulted channels are not sampled and not rebooted before the interval
        assert!(s.request_samples(secs(41), &allow_all()).unwrap().is_empty());
        assert!(s.reboot_requests(secs(41)).is_empty());
        assert_eq!(s.report.num_reboots_deferred, 3);

        let reboots = s.reboot_requests(secs(300));
        assert_eq!(reboots.len(), 3);
        assert_eq!(reboots[1].pins, vec![12]);

        s.handle_reboot_outcome(
            secs(305),
            &RebootOutcome {
                channel_idx: 1,
                result: Ok(()),
            },
        )
        .unwrap();
        assert!(s.channels()[1].is_idle());
        assert_eq!(s.channels()[1].consecutive_timeouts(), 0);
    }

    #[test]
    fn test_disable_after_max_reboots() {
        let mut s = sup(Some(1));
        let only_first = {
            let mut d = allow_all();
            d[1].sampling_allowed = false;
            d[2].sampling_allowed = false;
            d
        };

        let fault = |s: &mut RadSupervisor, t: i64| {
            for k in 0..2 {
                s.request_samples(secs(t + k * 20), &only_first).unwrap();
                s.check_timeouts(secs(t + k * 20 + 11));
                s.take_completed_rounds();
            }
        };

        fault(&mut s, 0);
        assert_eq!(s.reboot_requests(secs(300)).len(), 1);
        s.handle_reboot_outcome(
            secs(301),
            &RebootOutcome {
                channel_idx: 0,
                result: Ok(()),
            },
        )
        .unwrap();

        fault(&mut s, 310);
        assert_eq!(s.channels()[0].state(), &ChannelState::Disabled);
        assert!(s.channels()[0].persistent_alarm());
        assert!(s.reboot_requests(secs(2000)).is_empty());
    }

    #[test]
    fn test_continuous_sampling_completes_every_round() {
        let mut s = RadSupervisor::new(
            Params {
                channels: vec![chan("lt", vec![11])],
                ..sup(None).params
            },
            t0(),
        )
        .unwrap();
        let allow = vec![allow_all()[0]];

        let num_ticks = 6;
        let mut completed = Vec::new();
        let mut responses = Vec::new();

        for k in 0..num_ticks {
            let now = secs(5 * k);
            let (output, _) = s
                .proc(&InputData {
                    now,
                    decisions: Some(allow.clone()),
                    responses: responses.drain(..).collect(),
                    reboots: Vec::new(),
                })
                .unwrap();

            completed.extend(output.completed);

            // Answered in time for the next cycle
            assert_eq!(output.sample_requests.len(), 1, "tick {}", k);
            responses = output
                .sample_requests
                .iter()
                .map(|r| SampleResponse {
                    request_id: r.request_id,
                    channel_idx: r.channel_idx,
                    result: Ok(reading("lt", now + Duration::seconds(1))),
                })
                .collect();
        }

        assert_eq!(completed.len(), num_ticks as usize - 1);
        for (k, round) in completed.iter().enumerate() {
            assert_eq!(round.started_at, secs(5 * k as i64));
            assert_eq!(round.num_requested, 1);
            assert_eq!(round.readings.len(), 1);
        }
        assert!(s.round_in_progress());
    }

    #[test]
    fn test_slow_channel_does_not_hold_back_later_rounds() {
        let mut s = sup(None);
        let only_first_two = {
            let mut d = allow_all();
            d[2].sampling_allowed = false;
            d
        };

        let first = s.request_samples(t0(), &only_first_two).unwrap();
        s.handle_response(
            secs(1),
            &SampleResponse {
                request_id: first[0].request_id,
                channel_idx: 0,
                result: Ok(reading("lt", secs(1))),
            },
        )
        .unwrap();

        // The first channel goes again while the second is still busy
        let second = s.request_samples(secs(5), &only_first_two).unwrap();
        assert_eq!(second.len(), 1);
        s.handle_response(
            secs(6),
            &SampleResponse {
                request_id: second[0].request_id,
                channel_idx: 0,
                result: Ok(reading("lt", secs(6))),
            },
        )
        .unwrap();

        let rounds = s.take_completed_rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].started_at, secs(5));
        assert!(s.round_in_progress());

        s.handle_response(
            secs(7),
            &SampleResponse {
                request_id: first[1].request_id,
                channel_idx: 1,
                result: Ok(reading("ls", secs(7))),
            },
        )
        .unwrap();

        let rounds = s.take_completed_rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].num_requested, 2);
        assert_eq!(rounds[0].readings.len(), 2);
        assert!(!s.round_in_progress());
    }

    #[test]
    fn test_unanswered_power_cycle_returns_to_faulted() {
        let mut s = sup(None);
        let only_first = {
            let mut d = allow_all();
            d[1].sampling_allowed = false;
            d[2].sampling_allowed = false;
            d
        };

        for t in [0i64, 20].iter() {
            s.request_samples(secs(*t), &only_first).unwrap();
            s.check_timeouts(secs(*t + 11));
        }
        assert_eq!(s.reboot_requests(secs(300)).len(), 1);
        assert!(matches!(
            s.channels()[0].state(),
            ChannelState::Rebooting { .. }
        ));

        // No outcome ever arrives
        let tick = |s: &mut RadSupervisor, t: i64| {
            s.proc(&InputData {
                now: secs(t),
                decisions: None,
                responses: Vec::new(),
                reboots: Vec::new(),
            })
            .unwrap()
        };

        let (output, report) = tick(&mut s, 320);
        assert!(output.reboot_requests.is_empty());
        assert_eq!(report.num_reboot_timeouts, 0);

        let (output, report) = tick(&mut s, 331);
        assert_eq!(report.num_reboot_timeouts, 1);
        assert!(matches!(
            s.channels()[0].state(),
            ChannelState::Faulted { .. }
        ));
        assert!(output.reboot_requests.is_empty());
        assert_eq!(report.num_reboots_deferred, 1);

        // A late outcome for the abandoned power cycle leaves the channel faulted
        s.proc(&InputData {
            now: secs(335),
            decisions: None,
            responses: Vec::new(),
            reboots: vec![RebootOutcome {
                channel_idx: 0,
                result: Ok(()),
            }],
        })
        .unwrap();
        assert!(matches!(
            s.channels()[0].state(),
            ChannelState::Faulted { .. }
        ));

        // Tried again once the reboot interval has elapsed
        let (output, _) = tick(&mut s, 600);
        assert_eq!(output.reboot_requests.len(), 1);
        assert_eq!(output.reboot_requests[0].pins, vec![11]);
        assert_eq!(s.channels()[0].reboots_since_success(), 2);
    }

    #[test]
    fn test_decision_count_must_match() {
        let mut s = sup(None);
        assert!(s.request_samples(t0(), &allow_all()[..2]).is_err());
    }
}
