//! GPS receiver worker
//!
//! Free running: reads fixes from its receiver as fast as they arrive and reports every result,
//! good or bad. The main loop keeps the latest.

use comms_if::eqpt::gps::{Fix, GpsError, PositionSource};
use log::debug;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use super::{DeviceEnd, Link, Worker, WorkerError};

/// Wait after a failed read before trying again, so a dead receiver doesn't spin the thread.
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// The result of one read from a receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct GpsReport {
    pub source_id: u8,
    pub result: Result<Fix, GpsError>,
}

/// Spawn the worker for receiver `source_id`.
pub fn spawn(
    source_id: u8,
    source: Box<dyn PositionSource>,
) -> Result<(Worker, Link<(), GpsReport>), WorkerError> {
    Worker::spawn(&format!("gps{}", source_id), move |end, stop| {
        run(source_id, source, end, stop)
    })
}

fn run(
    source_id: u8,
    mut source: Box<dyn PositionSource>,
    end: DeviceEnd<(), GpsReport>,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::Relaxed) {
        let result = source.read_fix();
        let failed = result.is_err();

        if !end.report(GpsReport { source_id, result }) {
            debug!("GPS {} worker: main loop gone", source_id);
            break;
        }

        if failed {
            thread::sleep(ERROR_BACKOFF);
        }
    }
}
