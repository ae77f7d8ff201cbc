//! # Orchestrator
//!
//! The top level of the control core. Each call to `Orchestrator::tick` is one cycle of the main
//! loop:
//!
//! 1. Reports from every device worker are drained. The loop never waits on a device, a worker
//!    that has nothing new simply leaves its last snapshot in place.
//! 2. Heading fusion and bearing control run every cycle, the motor command (if any) is sent.
//! 3. On scheduler cycles the sampling decisions are made and handed to the radiometer
//!    supervisor. The supervisor itself runs every cycle so that responses and timeouts are
//!    handled promptly.
//! 4. Finished rounds become sample records, and status records are written while nothing is
//!    being sampled.
//!
//! Nothing in a cycle returns an error: device and store failures are logged and reflected in the
//! data store and the health report.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::{DateTime, Utc};
use comms_if::eqpt::gpio::{GpioError, Pin};
use log::{debug, info, trace, warn};
use std::time::Duration as StdDuration;

// Internal
use crate::{
    battery_mon::BatteryMonitor,
    bearing_ctrl::{self, BearingCtrl, MotorCmd, MotorReport},
    data_store::DataStore,
    heading_fusion::{self, HeadingFusion},
    params::RadiomExecParams,
    rad_sup::{self, RadSupervisor, RebootOutcome, RebootRequest, SampleRequest, SampleResponse},
    record::{HealthReport, SampleRecord, SampleStore, StatusRecord},
    sched::{Scheduler, SchedulerDecision},
    solar::solar_position,
    workers::{
        BatteryCmd, BatteryReport, GpsReport, Link, PowerCmd, PowerReport, PowerTarget,
        WorkerError,
    },
};
use util::{
    module::State,
    time::{period_elapsed, seconds_between, seconds_to_duration},
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The processing modules driven by the orchestrator.
pub struct Modules {
    pub heading_fusion: HeadingFusion,
    pub bearing_ctrl: BearingCtrl,
    pub scheduler: Scheduler,
    pub rad_sup: RadSupervisor,
    pub battery_mon: BatteryMonitor,
}

/// The main loop's ends of the device workers' links.
pub struct DeviceLinks {
    /// One link per GPS receiver, in receiver order
    pub gps: Vec<Link<(), GpsReport>>,

    pub motor: Link<MotorCmd, MotorReport>,

    /// One link per radiometer channel, in channel order
    pub rad: Vec<Link<SampleRequest, SampleResponse>>,

    pub power: Link<PowerCmd, PowerReport>,

    pub battery: Option<Link<BatteryCmd, BatteryReport>>,
}

/// What a single cycle did.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub motor_cmd: Option<MotorCmd>,
    pub sample_requests: Vec<SampleRequest>,
    pub reboot_requests: Vec<RebootRequest>,

    /// Receivers power cycled by the GPS watchdog
    pub gps_power_cycles: Vec<usize>,

    pub sample_record_stored: bool,
    pub status_record_stored: bool,
}

pub struct Orchestrator {
    params: RadiomExecParams,
    modules: Modules,
    links: DeviceLinks,
    store: Box<dyn SampleStore>,
    ds: DataStore,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Invalid executable parameters: {0}")]
    InvalidParams(String),

    #[error("Expected {expected} {device} link(s), found {found}")]
    LinkCountMismatch {
        device: &'static str,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    WorkerError(#[from] WorkerError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Orchestrator {
    /// Create a new orchestrator. There must be one GPS link per configured receiver and one
    /// radiometer link per configured channel.
    pub fn new(
        params: RadiomExecParams,
        modules: Modules,
        links: DeviceLinks,
        store: Box<dyn SampleStore>,
    ) -> Result<Self, OrchestratorError> {
        params.validate().map_err(OrchestratorError::InvalidParams)?;

        if links.gps.len() != params.gps.len() {
            return Err(OrchestratorError::LinkCountMismatch {
                device: "GPS",
                expected: params.gps.len(),
                found: links.gps.len(),
            });
        }

        let num_channels = modules.rad_sup.channels().len();
        if links.rad.len() != num_channels {
            return Err(OrchestratorError::LinkCountMismatch {
                device: "radiometer",
                expected: num_channels,
                found: links.rad.len(),
            });
        }

        Ok(Self {
            params,
            modules,
            links,
            store,
            ds: DataStore::default(),
        })
    }

    pub fn data_store(&self) -> &DataStore {
        &self.ds
    }

    pub fn modules(&self) -> &Modules {
        &self.modules
    }

    /// Account for the wall time taken by a cycle. Returns how long to sleep before the next
    /// cycle, `None` if the cycle overran its period.
    pub fn cycle_end(&mut self, cycle_dur: StdDuration) -> Option<StdDuration> {
        let period = StdDuration::from_secs_f64(self.params.cycle.fast_period_s);

        match period.checked_sub(cycle_dur) {
            Some(d) => {
                self.ds.num_consec_cycle_overruns = 0;
                Some(d)
            }
            None => {
                warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - period.as_secs_f64()
                );
                self.ds.num_consec_cycle_overruns += 1;
                None
            }
        }
    }

    /// Power on every configured rail and send the mount home.
    pub fn startup(&mut self, now: DateTime<Utc>) -> Result<(), OrchestratorError> {
        let pins = self.all_power_pins();
        if !pins.is_empty() {
            info!("Powering on rails {:?}", pins);
            self.links.power.send(PowerCmd::Set {
                target: PowerTarget::All,
                pins,
                on: true,
            })?;
        }

        info!("Homing the mount");
        let home = self.modules.bearing_ctrl.home_cmd(now);
        if let Err(e) = self.links.motor.send(home) {
            self.modules.bearing_ctrl.abort_move();
            return Err(e.into());
        }

        Ok(())
    }

    /// Drive every configured power pin low.
    pub fn shutdown(&mut self) {
        let pins = self.all_power_pins();
        if pins.is_empty() {
            return;
        }

        info!("Powering off rails {:?}", pins);
        if let Err(e) = self.links.power.send(PowerCmd::Set {
            target: PowerTarget::All,
            pins,
            on: false,
        }) {
            warn!("Cannot power off the rails: {}", e);
        }
    }

    /// Execute one cycle of the main loop at time `now`.
    pub fn tick(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        self.ds.cycle_start(now, &self.params.cycle);

        // ---- DATA INPUT ----

        self.read_gps(now);
        self.read_motor(now);
        let reboots = self.read_power();
        let responses: Vec<SampleResponse> =
            self.links.rad.iter().flat_map(|l| l.drain()).collect();
        self.read_battery(now);

        // ---- HEADING AND BEARING ----

        self.run_heading_fusion(now);

        self.ds.solar = self
            .platform_position(now)
            .map(|(lat, lon)| solar_position(now, lat, lon));

        report.motor_cmd = self.run_bearing_ctrl(now);

        // ---- SAMPLING ----

        let decisions = if self.ds.is_sched_cycle {
            self.ds.decisions = self.decide(now);
            Some(self.ds.decisions.clone())
        } else {
            None
        };

        let completed = self.run_rad_sup(now, decisions, responses, reboots, &mut report);

        // ---- RECORDS ----

        let mut sample_attempted = false;
        for round in completed {
            if round.readings.is_empty() {
                debug!(
                    "Round started at {} produced no readings, nothing to store",
                    round.started_at
                );
            } else {
                sample_attempted = true;
                self.ds.num_rounds += 1;
                let record = SampleRecord {
                    timestamp: now,
                    trigger_id: self.ds.num_rounds,
                    fixes: self.ds.fixes.clone(),
                    heading: self.ds.heading,
                    solar: self.ds.solar,
                    motor_angle_deg: self.modules.bearing_ctrl.motor_state().current_angle_deg,
                    readings: round.readings,
                    battery: self.modules.battery_mon.snapshot().cloned(),
                    health: self.health(),
                };

                let stored = self.handle_store(now, |s| s.store(&record));
                report.sample_record_stored |= stored;
            }
        }

        if self.ds.is_sched_cycle
            && !sample_attempted
            && period_elapsed(
                self.ds.last_record_time,
                now,
                self.params.cycle.status_record_interval_s,
            )
        {
            let record = StatusRecord {
                timestamp: now,
                fixes: self.ds.fixes.clone(),
                heading: self.ds.heading,
                solar: self.ds.solar,
                motor_angle_deg: self.modules.bearing_ctrl.motor_state().current_angle_deg,
                battery: self.modules.battery_mon.snapshot().cloned(),
                health: self.health(),
            };

            report.status_record_stored = self.handle_store(now, |s| s.store_status(&record));
        }

        // ---- HOUSEKEEPING ----

        self.poll_battery(now);

        if self.ds.is_sched_cycle {
            report.gps_power_cycles = self.gps_watchdog(now);
            self.log_summary(now);
        }

        report
    }

    // ---- INPUT ----

    fn read_gps(&mut self, now: DateTime<Utc>) {
        for (idx, link) in self.links.gps.iter().enumerate() {
            for report in link.drain() {
                match report.result {
                    Ok(fix) => self.ds.set_fix(idx, fix, now),
                    Err(e) => {
                        if self.ds.gps_error(idx) == 1 {
                            warn!("GPS {} read failed: {}", idx, e);
                        } else {
                            trace!("GPS {} read failed: {}", idx, e);
                        }
                    }
                }
            }
        }

        self.ds
            .check_stale_fixes(now, self.params.cycle.stale_snapshot_warn_s);
    }

    fn read_motor(&mut self, now: DateTime<Utc>) {
        for report in self.links.motor.drain() {
            self.modules.bearing_ctrl.reconcile(&report, now);
        }
    }

    /// Drain power reports, returning the outcomes of radiometer reboots.
    fn read_power(&mut self) -> Vec<RebootOutcome> {
        let mut reboots = Vec::new();

        for report in self.links.power.drain() {
            match (report.target, report.cycled) {
                (PowerTarget::Radiometer(channel_idx), true) => reboots.push(RebootOutcome {
                    channel_idx,
                    result: report.result,
                }),
                (target, _) => match report.result {
                    Ok(()) => debug!("Power command for {:?} done", target),
                    Err(e) => warn!("Power command for {:?} failed: {}", target, e),
                },
            }
        }

        reboots
    }

    fn read_battery(&mut self, now: DateTime<Utc>) {
        if let Some(ref link) = self.links.battery {
            for report in link.drain() {
                self.modules.battery_mon.update(now, report.result);
            }
        }
    }

    // ---- PROCESSING ----

    fn run_heading_fusion(&mut self, now: DateTime<Utc>) {
        let input = heading_fusion::InputData {
            now,
            fixes: self.ds.fixes.clone(),
        };

        match self.modules.heading_fusion.proc(&input) {
            Ok((estimate, status)) => {
                self.ds.heading = Some(estimate);
                self.ds.heading_status = status;
            }
            Err(e) => match e {},
        }
    }

    fn run_bearing_ctrl(&mut self, now: DateTime<Utc>) -> Option<MotorCmd> {
        let input = bearing_ctrl::InputData {
            now,
            heading: self.ds.heading,
            sun_azimuth_deg: self.ds.solar.map(|s| s.azimuth_deg),
        };

        let cmd = match self.modules.bearing_ctrl.proc(&input) {
            Ok((cmd, status)) => {
                self.ds.bearing_status = status;
                cmd
            }
            Err(e) => match e {},
        };

        match cmd {
            Some(c) => match self.links.motor.send(c) {
                Ok(()) => Some(c),
                Err(e) => {
                    warn!("Cannot send {:?} to the motor: {}", c, e);
                    self.modules.bearing_ctrl.abort_move();
                    None
                }
            },
            None => None,
        }
    }

    /// One scheduler decision per radiometer channel.
    fn decide(&self, now: DateTime<Utc>) -> Vec<SchedulerDecision> {
        let sun_elevation_deg = self.ds.solar.map(|s| s.elevation_deg);
        let ship_speed_knots = self.ship_speed_knots(now);
        let mount_moving = self.modules.bearing_ctrl.is_moving();
        let scheduler = &self.modules.scheduler;

        self.modules
            .rad_sup
            .channels()
            .iter()
            .map(|c| {
                let d = scheduler.decide(
                    now,
                    sun_elevation_deg,
                    ship_speed_knots,
                    &c.schedule,
                    c.last_request_time(),
                );
                scheduler.apply_mount_motion(d, &c.schedule, mount_moving)
            })
            .collect()
    }

    fn run_rad_sup(
        &mut self,
        now: DateTime<Utc>,
        decisions: Option<Vec<SchedulerDecision>>,
        responses: Vec<SampleResponse>,
        reboots: Vec<RebootOutcome>,
        report: &mut CycleReport,
    ) -> Vec<rad_sup::CompletedRound> {
        let input = rad_sup::InputData {
            now,
            decisions,
            responses,
            reboots,
        };

        let output = match self.modules.rad_sup.proc(&input) {
            Ok((output, status)) => {
                self.ds.rad_sup_status = status;
                output
            }
            Err(e) => {
                warn!("Error during RadSupervisor processing: {}", e);
                return Vec::new();
            }
        };

        for req in output.sample_requests.iter() {
            // An undelivered request is caught by the supervisor's sample timeout
            match self.links.rad.get(req.channel_idx) {
                Some(link) => {
                    if let Err(e) = link.send(*req) {
                        warn!("Cannot send sample request {}: {}", req.request_id, e);
                    }
                }
                None => warn!("No link for radiometer channel {}", req.channel_idx),
            }
        }

        let off_time = self.off_time();
        for req in output.reboot_requests.iter() {
            let sent = self.links.power.send(PowerCmd::Cycle {
                target: PowerTarget::Radiometer(req.channel_idx),
                pins: req.pins.clone(),
                off_time,
            });

            if let Err(e) = sent {
                warn!("Cannot request power cycle of channel {}: {}", req.channel_idx, e);
                let outcome = RebootOutcome {
                    channel_idx: req.channel_idx,
                    result: Err(GpioError::Unavailable(e.to_string())),
                };
                if let Err(e) = self.modules.rad_sup.handle_reboot_outcome(now, &outcome) {
                    warn!("{}", e);
                }
            }
        }

        report.sample_requests = output.sample_requests;
        report.reboot_requests = output.reboot_requests;

        output.completed
    }

    // ---- RECORDS ----

    /// Hand a record to the store, returning true if it was stored.
    fn handle_store<F>(&mut self, now: DateTime<Utc>, f: F) -> bool
    where
        F: FnOnce(&mut dyn SampleStore) -> Result<(), crate::record::StoreError>,
    {
        match f(self.store.as_mut()) {
            Ok(()) => {
                self.ds.num_records_stored += 1;
                self.ds.last_record_time = Some(now);
                true
            }
            Err(e) => {
                self.ds.num_records_dropped += 1;
                warn!(
                    "STORE failed, record dropped ({} dropped so far): {}",
                    self.ds.num_records_dropped, e
                );
                false
            }
        }
    }

    fn health(&self) -> HealthReport {
        HealthReport {
            heading_path: self.ds.heading_status.path,
            heading_degraded_cycles: self.ds.heading_status.degraded_cycles,
            bearing_out_of_range: self.ds.bearing_status.out_of_range,
            channels: self.modules.rad_sup.health(),
            battery_low: self
                .modules
                .battery_mon
                .snapshot()
                .map_or(false, |s| s.low),
            records_dropped: self.ds.num_records_dropped,
        }
    }

    // ---- HOUSEKEEPING ----

    fn poll_battery(&mut self, now: DateTime<Utc>) {
        let link = match self.links.battery {
            Some(ref l) => l,
            None => return,
        };

        if !self
            .modules
            .battery_mon
            .poll_due(now, self.params.cycle.battery_period_s)
        {
            return;
        }

        match link.send(BatteryCmd::Poll) {
            Ok(()) => self.modules.battery_mon.mark_polled(now),
            Err(e) => warn!("Cannot poll the battery: {}", e),
        }
    }

    /// Power cycle receivers which have gone without a valid fix for too long.
    ///
    /// Returns the indexes of the receivers cycled.
    fn gps_watchdog(&mut self, now: DateTime<Utc>) -> Vec<usize> {
        let after_s = match self.params.power.gps_power_cycle_after_s {
            Some(a) => a,
            None => return Vec::new(),
        };
        let min_interval_s = self.params.power.gps_min_power_cycle_interval_s;
        let off_time = self.off_time();

        let mut cycled = Vec::new();

        for (idx, gps) in self.params.gps.iter().enumerate() {
            if gps.power_pins.is_empty() {
                continue;
            }

            // A receiver which never had a fix is measured from the first cycle
            let last_valid = match self.ds.last_valid_fix_time[idx].or(self.ds.start_time) {
                Some(t) => t,
                None => continue,
            };

            if seconds_between(last_valid, now) < after_s
                || !period_elapsed(self.ds.last_gps_power_cycle[idx], now, min_interval_s)
            {
                continue;
            }

            warn!(
                "GPS {} has had no valid fix for {:.0} s, power cycling it",
                idx,
                seconds_between(last_valid, now)
            );

            let cmd = PowerCmd::Cycle {
                target: PowerTarget::Gps(idx as u8),
                pins: gps.power_pins.clone(),
                off_time,
            };
            match self.links.power.send(cmd) {
                Ok(()) => {
                    self.ds.last_gps_power_cycle[idx] = Some(now);
                    cycled.push(idx);
                }
                Err(e) => warn!("Cannot power cycle GPS {}: {}", idx, e),
            }
        }

        cycled
    }

    fn log_summary(&self, now: DateTime<Utc>) {
        info!(
            "[{}] GPS: {}/{} | Rad: {}/{} | ShBe: {} | SuAz: {} | SuEl: {} | Speed: {}",
            self.ds.num_cycles,
            self.ds.num_valid_fixes(),
            self.params.gps.len(),
            self.ds.rad_sup_status.num_ready,
            self.modules.rad_sup.channels().len(),
            fmt_opt(self.ds.heading.map(|h| h.heading_deg)),
            fmt_opt(self.ds.solar.map(|s| s.azimuth_deg)),
            fmt_opt(self.ds.solar.map(|s| s.elevation_deg)),
            fmt_opt(self.ship_speed_knots(now)),
        );
    }

    // ---- HELPERS ----

    /// Position used for solar geometry: the first usable fix, or the static position.
    fn platform_position(&self, now: DateTime<Utc>) -> Option<(f64, f64)> {
        self.ds
            .fixes
            .iter()
            .flatten()
            .find(|f| self.modules.heading_fusion.is_usable(f, now))
            .map(|f| (f.latitude_deg, f.longitude_deg))
            .or_else(|| {
                self.params
                    .static_position
                    .map(|p| (p.latitude_deg, p.longitude_deg))
            })
    }

    /// Mean speed over the usable fixes.
    fn ship_speed_knots(&self, now: DateTime<Utc>) -> Option<f64> {
        let speeds: Vec<f64> = self
            .ds
            .fixes
            .iter()
            .flatten()
            .filter(|f| self.modules.heading_fusion.is_usable(f, now))
            .map(|f| f.speed_knots)
            .collect();

        if speeds.is_empty() {
            None
        } else {
            Some(speeds.iter().sum::<f64>() / speeds.len() as f64)
        }
    }

    fn all_power_pins(&self) -> Vec<Pin> {
        let mut pins: Vec<Pin> = self
            .modules
            .rad_sup
            .channels()
            .iter()
            .flat_map(|c| c.power_pins.iter().copied())
            .chain(self.params.gps_power_pins())
            .collect();
        pins.sort_unstable();
        pins.dedup();
        pins
    }

    fn off_time(&self) -> StdDuration {
        seconds_to_duration(self.params.power.off_time_s)
            .to_std()
            .unwrap_or_default()
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(v) => format!("{:.1}", v),
        None => "--".into(),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
