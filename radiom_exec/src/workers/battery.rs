//! Battery status worker

use comms_if::eqpt::battery::{BatteryError, BatterySource, BatteryStatus};

use super::{serve, DeviceEnd, Link, Worker, WorkerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryCmd {
    Poll,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatteryReport {
    pub result: Result<BatteryStatus, BatteryError>,
}

/// Spawn the battery worker, which reads the status source once per `Poll`.
pub fn spawn(
    mut source: Box<dyn BatterySource>,
) -> Result<(Worker, Link<BatteryCmd, BatteryReport>), WorkerError> {
    Worker::spawn("battery", move |end: DeviceEnd<BatteryCmd, BatteryReport>, stop| {
        serve(end, &stop, |BatteryCmd::Poll| BatteryReport {
            result: source.read_status(),
        })
    })
}
