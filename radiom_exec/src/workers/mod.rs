//! # Device workers
//!
//! Each physical device is driven by its own worker thread which owns the driver, and so the
//! device's port, exclusively. The main loop talks to a worker only through a `Link`: commands go
//! down one channel and reports come back up another. The loop never blocks on a link, it drains
//! whatever reports have arrived at the start of each cycle.
//!
//! Workers stop when their stop flag is raised or when the main side of their link is dropped.
//! Commands already queued when the stop flag is raised are still executed.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod battery;
pub mod gps;
pub mod motor;
pub mod power;
pub mod rad;

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use log::{debug, warn};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub use battery::{BatteryCmd, BatteryReport};
pub use gps::GpsReport;
pub use power::{PowerCmd, PowerReport, PowerTarget};

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// How often an idle worker checks its stop flag.
const POLL_PERIOD: Duration = Duration::from_millis(100);

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

/// The main loop's end of a worker's channels.
pub struct Link<C, R> {
    name: String,
    cmd_tx: Sender<C>,
    rep_rx: Receiver<R>,
}

/// The device end of a worker's channels.
pub struct DeviceEnd<C, R> {
    cmd_rx: Receiver<C>,
    rep_tx: Sender<R>,
}

/// Handle on a running worker thread.
pub struct Worker {
    name: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Cannot spawn the {0} worker: {1}")]
    SpawnError(String, std::io::Error),

    #[error("The {0} worker has stopped")]
    Disconnected(String),
}

/// What a device end got when waiting for a command.
pub enum NextCmd<C> {
    Cmd(C),
    Idle,
    Closed,
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Create the two ends of a worker's channels.
pub fn link<C, R>(name: &str) -> (Link<C, R>, DeviceEnd<C, R>) {
    let (cmd_tx, cmd_rx) = channel();
    let (rep_tx, rep_rx) = channel();

    (
        Link {
            name: name.to_string(),
            cmd_tx,
            rep_rx,
        },
        DeviceEnd { cmd_rx, rep_tx },
    )
}

/// Execute commands from `end` with `handler` until stopped, reporting each result.
pub(crate) fn serve<C, R, F>(end: DeviceEnd<C, R>, stop: &AtomicBool, mut handler: F)
where
    F: FnMut(C) -> R,
{
    loop {
        match end.next_cmd(POLL_PERIOD) {
            NextCmd::Cmd(cmd) => {
                if !end.report(handler(cmd)) {
                    break;
                }
            }
            NextCmd::Idle => {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
            }
            NextCmd::Closed => break,
        }
    }
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl<C, R> Link<C, R> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a command to the worker.
    pub fn send(&self, cmd: C) -> Result<(), WorkerError> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| WorkerError::Disconnected(self.name.clone()))
    }

    /// All reports received since the last call, oldest first. Never blocks.
    pub fn drain(&self) -> Vec<R> {
        let mut reports = Vec::new();
        loop {
            match self.rep_rx.try_recv() {
                Ok(r) => reports.push(r),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        reports
    }
}

impl<C, R> DeviceEnd<C, R> {
    /// Wait at most `timeout` for the next command.
    pub fn next_cmd(&self, timeout: Duration) -> NextCmd<C> {
        match self.cmd_rx.recv_timeout(timeout) {
            Ok(c) => NextCmd::Cmd(c),
            Err(RecvTimeoutError::Timeout) => NextCmd::Idle,
            Err(RecvTimeoutError::Disconnected) => NextCmd::Closed,
        }
    }

    /// Commands queued without waiting.
    pub fn pending_cmds(&self) -> Vec<C> {
        self.cmd_rx.try_iter().collect()
    }

    /// Send a report to the main loop, returns false if the main loop has gone.
    pub fn report(&self, report: R) -> bool {
        self.rep_tx.send(report).is_ok()
    }
}

impl Worker {
    /// Spawn a worker thread running `body` against the device end of a new link.
    pub fn spawn<C, R, F>(name: &str, body: F) -> Result<(Self, Link<C, R>), WorkerError>
    where
        C: Send + 'static,
        R: Send + 'static,
        F: FnOnce(DeviceEnd<C, R>, Arc<AtomicBool>) + Send + 'static,
    {
        let (main_end, device_end) = link(name);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("radiom-{}", name))
            .spawn(move || body(device_end, thread_stop))
            .map_err(|e| WorkerError::SpawnError(name.to_string(), e))?;

        debug!("Spawned {} worker", name);

        Ok((
            Self {
                name: name.to_string(),
                stop,
                handle: Some(handle),
            },
            main_end,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Ask the worker to stop without waiting for it.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the worker, waiting at most `timeout` for it to finish its current I/O.
    ///
    /// Returns true if the worker exited in time. A worker that doesn't is abandoned, it will be
    /// torn down with the process.
    pub fn shutdown(mut self, timeout: Duration) -> bool {
        self.request_stop();

        let start = Instant::now();
        while !self.is_finished() {
            if start.elapsed() >= timeout {
                warn!(
                    "{} worker did not stop within {:.1} s, abandoning it",
                    self.name,
                    timeout.as_secs_f64()
                );
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }

        match self.handle.take().map(|h| h.join()) {
            Some(Err(_)) => {
                warn!("{} worker panicked", self.name);
                false
            }
            _ => {
                debug!("{} worker stopped", self.name);
                true
            }
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_serve_echoes_and_stops() {
        let (worker, link) = Worker::spawn("echo", |end: DeviceEnd<u32, u32>, stop| {
            serve(end, &stop, |x| x * 2)
        })
        .unwrap();

        link.send(1).unwrap();
        link.send(2).unwrap();

        let mut got = Vec::new();
        let start = Instant::now();
        while got.len() < 2 && start.elapsed() < Duration::from_secs(5) {
            got.extend(link.drain());
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got, vec![2, 4]);

        assert!(worker.shutdown(Duration::from_secs(2)));
        assert!(link.send(3).is_err());
    }

    #[test]
    fn test_stuck_worker_is_abandoned() {
        let (worker, _link) = Worker::spawn("stuck", |_end: DeviceEnd<(), ()>, _stop| {
            thread::sleep(Duration::from_secs(2))
        })
        .unwrap();

        assert!(!worker.shutdown(Duration::from_millis(50)));
    }
}
