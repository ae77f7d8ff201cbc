//! Main radiometry executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise all modules
//!     - Spawn one worker thread per device (GPS pair, mount motor, radiometers, power, battery)
//!     - Power on the rails and home the mount
//!     - Main loop, every fast cycle:
//!         - Collect device reports
//!         - Heading fusion and solar geometry
//!         - Bearing control
//!         - On scheduler cycles:
//!             - Sampling decisions
//!             - Radiometer supervision and fault escalation
//!             - Record persistence
//!             - GPS watchdog
//!         - Battery poll
//!     - Power off the rails and stop the workers
//!
//! # Modules
//!
//! All fast cycle modules (e.g. `bearing_ctrl`) shall meet the following requirements:
//!     1. Provide a public struct implementing the `util::module::State` trait.
//!
//! # Stopping
//!
//! The executable runs until `--run-time-s` has elapsed or a file named `STOP` is created in the
//! session directory.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::Utc;
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use comms_if::eqpt::{
    battery::BatterySource,
    gpio::PowerControl,
    gps::PositionSource,
    motor::MotorDriver,
    rad::RadiometerChannel,
};
use log::{error, info, warn};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use structopt::StructOpt;

// Internal
use radiom_lib::{
    battery_mon::{self, BatteryMonitor},
    bearing_ctrl::{self, BearingCtrl},
    heading_fusion::{self, HeadingFusion},
    orchestrator::{DeviceLinks, Modules, Orchestrator},
    params::RadiomExecParams,
    rad_sup::{self, RadSupervisor},
    record::JsonLinesStore,
    sched::{self, Scheduler},
    workers::{self, Worker},
};
use util::{
    host,
    logger::{logger_init, parse_level, LevelFilter},
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Name of the file which, once created in the session directory, stops the executable.
const STOP_FILE_NAME: &str = "STOP";

/// How long each worker is given to finish its current device call at shutdown.
const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "radiom_exec",
    about = "Ship-mounted solar radiometry control executable"
)]
struct Opt {
    /// Minimum log level: info, debug or trace
    #[structopt(long, default_value = "info", parse(try_from_str = parse_level))]
    log_level: LevelFilter,

    /// Stop after this many seconds instead of running until the stop file appears
    #[structopt(long)]
    run_time_s: Option<f64>,

    /// Refuse to run with simulated equipment
    #[structopt(long)]
    no_sim: bool,
}

/// The configuration actually in use, saved into the session for later analysis.
#[derive(Serialize)]
struct EffectiveConfig {
    exec: RadiomExecParams,
    heading_fusion: heading_fusion::Params,
    bearing_ctrl: bearing_ctrl::Params,
    sched: sched::Params,
    rad_sup: rad_sup::Params,
    battery_mon: battery_mon::Params,
}

/// Device drivers handed to the workers.
struct Drivers {
    gps: Vec<Box<dyn PositionSource>>,
    motor: Box<dyn MotorDriver>,
    rad: Vec<Box<dyn RadiometerChannel>>,
    power: Box<dyn PowerControl>,
    battery: Option<Box<dyn BatterySource>>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("radiom_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(opt.log_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Solar Radiometry Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let params: RadiomExecParams =
        util::params::load("radiom_exec.toml").wrap_err("Could not load exec params")?;
    params
        .validate()
        .map_err(|e| eyre!("Invalid exec params: {}", e))?;

    info!("Exec parameters loaded, bearing mode {:?}", params.bearing_mode);

    // ---- INITIALISE MODULES ----

    info!("Initialising modules...");

    let power_on_time = Utc::now();

    let mut heading_fusion = HeadingFusion::default();
    heading_fusion
        .init(
            heading_fusion::InitData {
                params_path: "heading_fusion.toml",
                mode: params.bearing_mode,
            },
            &session,
        )
        .wrap_err("Failed to initialise HeadingFusion")?;
    info!("HeadingFusion init complete");

    let mut bearing_ctrl = BearingCtrl::default();
    bearing_ctrl
        .init(
            bearing_ctrl::InitData {
                params_path: "bearing_ctrl.toml",
                mode: params.bearing_mode,
            },
            &session,
        )
        .wrap_err("Failed to initialise BearingCtrl")?;
    info!("BearingCtrl init complete");

    let scheduler = Scheduler::init("sched.toml").wrap_err("Failed to initialise Scheduler")?;
    info!("Scheduler init complete");

    let mut rad_sup = RadSupervisor::default();
    rad_sup
        .init(("rad_sup.toml", power_on_time), &session)
        .wrap_err("Failed to initialise RadSupervisor")?;
    info!("RadSupervisor init complete, {} channels", rad_sup.channels().len());

    let battery_mon =
        BatteryMonitor::init("battery_mon.toml").wrap_err("Failed to initialise BatteryMonitor")?;
    info!("BatteryMonitor init complete");

    info!("Module initialisation complete\n");

    session.save(
        "params/effective_config.json",
        EffectiveConfig {
            exec: params.clone(),
            heading_fusion: heading_fusion.params().clone(),
            bearing_ctrl: bearing_ctrl.params().clone(),
            sched: scheduler.params().clone(),
            rad_sup: rad_sup.params().clone(),
            battery_mon: battery_mon.params().clone(),
        },
    );

    // ---- INITIALISE DEVICES ----

    log_serial_ports(&params, rad_sup.params());

    let drivers = drivers(&opt, &params, &heading_fusion, rad_sup.params())?;
    let (mut worker_handles, links) = spawn_workers(drivers, rad_sup.params())?;

    info!("{} device workers running", worker_handles.len());

    let store = JsonLinesStore::open(session.session_root.join("records.jsonl"))
        .wrap_err("Failed to open the record store")?;

    let modules = Modules {
        heading_fusion,
        bearing_ctrl,
        scheduler,
        rad_sup,
        battery_mon,
    };

    let mut orch = Orchestrator::new(params, modules, links, Box::new(store))
        .wrap_err("Failed to initialise the Orchestrator")?;

    orch.startup(Utc::now())
        .wrap_err("Failed to start up the platform")?;

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let stop_file = session.session_root.join(STOP_FILE_NAME);
    let run_start = Instant::now();
    let mut dead_workers: Vec<String> = Vec::new();

    loop {
        // Get cycle start time
        let cycle_start_instant = Instant::now();

        orch.tick(Utc::now());

        // ---- STOP CONDITIONS ----

        if let Some(t) = opt.run_time_s {
            if run_start.elapsed().as_secs_f64() >= t {
                info!("Run time of {} s reached", t);
                break;
            }
        }

        if stop_file.exists() {
            info!("Stop file found");
            break;
        }

        for w in worker_handles.iter() {
            if w.is_finished() && !dead_workers.iter().any(|n| n == w.name()) {
                error!("Worker {} has stopped unexpectedly", w.name());
                dead_workers.push(w.name().to_string());
            }
        }

        // ---- CYCLE MANAGEMENT ----

        if let Some(d) = orch.cycle_end(Instant::now() - cycle_start_instant) {
            thread::sleep(d);
        }
    }

    // ---- SHUTDOWN ----

    info!("Shutting down");

    orch.shutdown();

    for w in worker_handles.iter() {
        w.request_stop();
    }

    let num_stopped = worker_handles
        .drain(..)
        .map(|w| w.shutdown(WORKER_SHUTDOWN_TIMEOUT))
        .filter(|stopped| *stopped)
        .count();
    info!("{} device workers stopped", num_stopped);

    util::session::save_with_timestamp(
        "health/channel_health.json",
        orch.modules().rad_sup.health(),
    );

    let ds = orch.data_store();
    info!(
        "{} cycles, {} records stored, {} dropped",
        ds.num_cycles, ds.num_records_stored, ds.num_records_dropped
    );

    session.exit();

    info!("End of execution");

    Ok(())
}

/// Log the port each serial device would be opened on.
fn log_serial_ports(params: &RadiomExecParams, rad: &rad_sup::Params) {
    let mut devices: Vec<(String, &str, Option<&str>)> = params
        .gps
        .iter()
        .enumerate()
        .map(|(i, g)| (format!("gps{}", i), g.serial.port.as_str(), g.serial.id_string.as_deref()))
        .collect();

    devices.push(("motor".into(), params.motor.port.as_str(), params.motor.id_string.as_deref()));

    if let Some(ref b) = params.battery {
        devices.push(("battery".into(), b.port.as_str(), b.id_string.as_deref()));
    }

    for c in rad.channels.iter() {
        devices.push((format!("rad-{}", c.id), c.port.as_str(), c.id_string.as_deref()));
    }

    for (name, port, id_string) in devices {
        match host::resolve_serial_port(port, id_string) {
            Some(p) => info!("{} port: {:?}", name, p),
            None => warn!("{} port not found (port {:?}, id {:?})", name, port, id_string),
        }
    }
}

/// Select the device drivers for this run.
fn drivers(
    opt: &Opt,
    params: &RadiomExecParams,
    heading_fusion: &HeadingFusion,
    rad: &rad_sup::Params,
) -> Result<Drivers, Report> {
    if opt.no_sim {
        return Err(eyre!(
            "--no-sim given but no serial drivers for the GPS, motor, radiometers or battery are \
            built into this executable"
        ));
    }

    sim_drivers(params, heading_fusion, rad)
}

#[cfg(feature = "sim")]
fn sim_drivers(
    params: &RadiomExecParams,
    heading_fusion: &HeadingFusion,
    rad: &rad_sup::Params,
) -> Result<Drivers, Report> {
    use radiom_lib::{
        heading_fusion::AntennaOrder,
        sim::{ShipTrack, SimBattery, SimGps, SimMotor, SimRadiometer},
    };

    /// Distance of each antenna from the middle of the ship.
    const ANTENNA_OFFSET_M: f64 = 10.0;

    warn!("Using simulated equipment");

    let (lat, lon) = params
        .static_position
        .map(|p| (p.latitude_deg, p.longitude_deg))
        .unwrap_or((50.37, -4.14));

    let track = ShipTrack {
        start_time: Utc::now(),
        start_lat_deg: lat,
        start_lon_deg: lon,
        heading_deg: 235.0,
        speed_knots: 8.0,
    };

    let first_offset = match heading_fusion.params().antenna_order {
        AntennaOrder::FrontRear => ANTENNA_OFFSET_M,
        AntennaOrder::RearFront => -ANTENNA_OFFSET_M,
    };

    let gps: Vec<Box<dyn PositionSource>> = vec![
        Box::new(SimGps::new(0, track, first_offset)),
        Box::new(SimGps::new(1, track, -first_offset)),
    ];

    let rad = rad
        .channels
        .iter()
        .map(|c| Box::new(SimRadiometer::new(&c.id)) as Box<dyn RadiometerChannel>)
        .collect();

    let battery = params
        .battery
        .as_ref()
        .map(|_| Box::new(SimBattery::new()) as Box<dyn BatterySource>);

    Ok(Drivers {
        gps,
        motor: Box::new(SimMotor::new()),
        rad,
        power: power_control()?,
        battery,
    })
}

#[cfg(not(feature = "sim"))]
fn sim_drivers(
    _params: &RadiomExecParams,
    _heading_fusion: &HeadingFusion,
    _rad: &rad_sup::Params,
) -> Result<Drivers, Report> {
    Err(eyre!(
        "Built without the sim feature and no serial device drivers are available"
    ))
}

#[cfg(target_arch = "arm")]
fn power_control() -> Result<Box<dyn PowerControl>, Report> {
    let ctrl = radiom_lib::power_ctrl::GpioPowerCtrl::new()
        .wrap_err("Failed to open the GPIO peripheral")?;
    Ok(Box::new(ctrl))
}

#[cfg(all(not(target_arch = "arm"), feature = "sim"))]
fn power_control() -> Result<Box<dyn PowerControl>, Report> {
    warn!("No GPIO on this platform, power control is simulated");
    Ok(Box::new(radiom_lib::sim::SimPower))
}

/// Spawn one worker per device.
fn spawn_workers(
    drivers: Drivers,
    rad: &rad_sup::Params,
) -> Result<(Vec<Worker>, DeviceLinks), Report> {
    let mut handles = Vec::new();

    let mut gps = Vec::new();
    for (i, source) in drivers.gps.into_iter().enumerate() {
        let (w, l) = workers::gps::spawn(i as u8, source).wrap_err("Failed to spawn a GPS worker")?;
        handles.push(w);
        gps.push(l);
    }

    let (w, motor) = workers::motor::spawn(drivers.motor).wrap_err("Failed to spawn the motor worker")?;
    handles.push(w);

    let mut rad_links = Vec::new();
    for (c, driver) in rad.channels.iter().zip(drivers.rad.into_iter()) {
        let (w, l) = workers::rad::spawn(&c.id, driver)
            .wrap_err_with(|| format!("Failed to spawn the worker for channel {}", c.id))?;
        handles.push(w);
        rad_links.push(l);
    }

    let (w, power) = workers::power::spawn(drivers.power).wrap_err("Failed to spawn the power worker")?;
    handles.push(w);

    let battery = match drivers.battery {
        Some(b) => {
            let (w, l) = workers::battery::spawn(b).wrap_err("Failed to spawn the battery worker")?;
            handles.push(w);
            Some(l)
        }
        None => None,
    };

    Ok((
        handles,
        DeviceLinks {
            gps,
            motor,
            rad: rad_links,
            power,
            battery,
        },
    ))
}
