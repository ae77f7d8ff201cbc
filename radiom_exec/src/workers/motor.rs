//! Motor controller worker

use comms_if::eqpt::motor::MotorDriver;

use super::{serve, DeviceEnd, Link, Worker, WorkerError};
use crate::bearing_ctrl::{MotorCmd, MotorReport};

/// Spawn the motor worker, which executes one command at a time and reports the step reached.
pub fn spawn(mut driver: Box<dyn MotorDriver>) -> Result<(Worker, Link<MotorCmd, MotorReport>), WorkerError> {
    Worker::spawn("motor", move |end: DeviceEnd<MotorCmd, MotorReport>, stop| {
        serve(end, &stop, |cmd| {
            let result = match cmd {
                MotorCmd::MoveTo { step } => driver.move_to_step(step),
                MotorCmd::Home => driver.home(),
            };
            MotorReport { cmd, result }
        })
    })
}
