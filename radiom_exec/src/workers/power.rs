//! GPIO power rail worker
//!
//! Power cycles block for the rail's off time, so they run here rather than in the main loop.

use comms_if::eqpt::gpio::{GpioError, Pin, PowerControl};
use log::info;
use std::time::Duration;

use super::{serve, DeviceEnd, Link, Worker, WorkerError};

/// What a power command is for, echoed back in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerTarget {
    Radiometer(usize),
    Gps(u8),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PowerCmd {
    /// Switch the pins on or off
    Set {
        target: PowerTarget,
        pins: Vec<Pin>,
        on: bool,
    },

    /// Switch the pins off, wait `off_time`, then on again
    Cycle {
        target: PowerTarget,
        pins: Vec<Pin>,
        off_time: Duration,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PowerReport {
    pub target: PowerTarget,

    /// True if the command was a power cycle
    pub cycled: bool,

    pub result: Result<(), GpioError>,
}

/// Spawn the power worker.
pub fn spawn(mut ctrl: Box<dyn PowerControl>) -> Result<(Worker, Link<PowerCmd, PowerReport>), WorkerError> {
    Worker::spawn("power", move |end: DeviceEnd<PowerCmd, PowerReport>, stop| {
        serve(end, &stop, |cmd| match cmd {
            PowerCmd::Set { target, pins, on } => {
                info!("Power {:?} pins {:?} {}", target, pins, if on { "on" } else { "off" });
                PowerReport {
                    target,
                    cycled: false,
                    result: ctrl.set_power(&pins, on),
                }
            }
            PowerCmd::Cycle {
                target,
                pins,
                off_time,
            } => {
                info!(
                    "Power cycling {:?} pins {:?} ({:.1} s off)",
                    target,
                    pins,
                    off_time.as_secs_f64()
                );
                PowerReport {
                    target,
                    cycled: true,
                    result: ctrl.power_cycle(&pins, off_time),
                }
            }
        })
    })
}
