//! Radiometer channel worker

use comms_if::eqpt::rad::RadiometerChannel;
use log::trace;

use super::{serve, DeviceEnd, Link, Worker, WorkerError};
use crate::rad_sup::{SampleRequest, SampleResponse};

/// Spawn the worker for one radiometer channel.
pub fn spawn(
    channel_id: &str,
    mut driver: Box<dyn RadiometerChannel>,
) -> Result<(Worker, Link<SampleRequest, SampleResponse>), WorkerError> {
    let name = format!("rad-{}", channel_id);

    Worker::spawn(&name, move |end: DeviceEnd<SampleRequest, SampleResponse>, stop| {
        serve(end, &stop, |req: SampleRequest| {
            trace!("Sample request {} for channel {}", req.request_id, req.channel_idx);
            SampleResponse {
                request_id: req.request_id,
                channel_idx: req.channel_idx,
                result: driver.request_sample(req.integration_time_hint_ms),
            }
        })
    })
}
