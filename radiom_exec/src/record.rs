//! # Records
//!
//! The aggregates handed to the persistence backend, and the backend interface itself.
//!
//! A `SampleRecord` is built once per completed round that produced at least one reading. A
//! `StatusRecord` carries the same context without readings and is stored periodically while no
//! samples are being taken, so the platform's track and health are still recorded.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::eqpt::{gps::Fix, rad::Reading};
use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{
    battery_mon::BatterySnapshot,
    heading_fusion::{FusionPath, HeadingEstimate},
    params::NUM_GPS,
    rad_sup::ChannelHealth,
    solar::SolarPosition,
};

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// Persistence backend for finished records.
///
/// Stores are fire and forget: a failure is reported to the caller but the record is not kept
/// for retry.
pub trait SampleStore: Send {
    fn store(&mut self, record: &SampleRecord) -> Result<(), StoreError>;

    fn store_status(&mut self, record: &StatusRecord) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// All the readings of one round, with the context they were taken in.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRecord {
    pub timestamp: DateTime<Utc>,

    /// Sequence number of the round, unique within a session
    pub trigger_id: u64,

    /// Latest fix of each receiver
    pub fixes: [Option<Fix>; NUM_GPS],

    pub heading: Option<HeadingEstimate>,
    pub solar: Option<SolarPosition>,

    /// Units: degrees
    pub motor_angle_deg: f64,

    pub readings: Vec<Reading>,

    pub battery: Option<BatterySnapshot>,

    pub health: HealthReport,
}

/// Periodic record of the platform's state while no samples are stored.
#[derive(Debug, Clone, Serialize)]
pub struct StatusRecord {
    pub timestamp: DateTime<Utc>,
    pub fixes: [Option<Fix>; NUM_GPS],
    pub heading: Option<HeadingEstimate>,
    pub solar: Option<SolarPosition>,
    pub motor_angle_deg: f64,
    pub battery: Option<BatterySnapshot>,
    pub health: HealthReport,
}

/// Health of the platform at the time of a record.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub heading_path: FusionPath,

    /// Number of consecutive cycles the heading has been degraded
    pub heading_degraded_cycles: u64,

    /// The mount is clamped at a mechanical limit
    pub bearing_out_of_range: bool,

    pub channels: Vec<ChannelHealth>,

    pub battery_low: bool,

    /// Number of records the store has failed to write this session
    pub records_dropped: u64,
}

/// A store appending one JSON object per line to a file.
pub struct JsonLinesStore {
    path: PathBuf,
    lines: JsonLines<File>,
}

/// Writes whole JSON lines to `out`.
///
/// Each line is serialised before anything is written, so a record that cannot be serialised
/// leaves no trace. If a write fails part way the next line starts with a newline, so the
/// fragment sits on a line of its own.
struct JsonLines<W: Write> {
    out: W,
    torn: bool,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Cannot write the record: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot serialise the record: {0}")]
    Serialise(#[from] serde_json::Error),
}

/// A line of the records file.
#[derive(Serialize)]
#[serde(tag = "kind")]
enum Line<'a> {
    Sample(&'a SampleRecord),
    Status(&'a StatusRecord),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl JsonLinesStore {
    /// Open the file at `path` for appending, creating it if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            lines: JsonLines::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SampleStore for JsonLinesStore {
    fn store(&mut self, record: &SampleRecord) -> Result<(), StoreError> {
        self.lines.write_line(&Line::Sample(record))
    }

    fn store_status(&mut self, record: &StatusRecord) -> Result<(), StoreError> {
        self.lines.write_line(&Line::Status(record))
    }
}

impl<W: Write> JsonLines<W> {
    fn new(out: W) -> Self {
        Self { out, torn: false }
    }

    fn write_line(&mut self, line: &Line) -> Result<(), StoreError> {
        let json = serde_json::to_vec(line)?;

        let mut buf = Vec::with_capacity(json.len() + 2);
        if self.torn {
            buf.push(b'\n');
        }
        buf.extend_from_slice(&json);
        buf.push(b'\n');

        let written = self.out.write_all(&buf).and_then(|_| self.out.flush());
        self.torn = written.is_err();
        written?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn health() -> HealthReport {
        HealthReport {
            heading_path: FusionPath::DualAntenna,
            heading_degraded_cycles: 0,
            bearing_out_of_range: false,
            channels: vec![],
            battery_low: false,
            records_dropped: 0,
        }
    }

    #[test]
    fn test_json_lines_store() {
        let t = Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap();
        let path = std::env::temp_dir().join(format!("radiom_records_{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut store = JsonLinesStore::open(&path).unwrap();
        store
            .store(&SampleRecord {
                timestamp: t,
                trigger_id: 7,
                fixes: [None, None],
                heading: None,
                solar: Some(SolarPosition {
                    azimuth_deg: 170.0,
                    elevation_deg: 62.0,
                }),
                motor_angle_deg: 12.5,
                readings: vec![Reading {
                    channel_id: "lt".into(),
                    timestamp: t,
                    integration_time_ms: 64,
                    spectrum: vec![1.0, 2.0],
                }],
                battery: None,
                health: health(),
            })
            .unwrap();
        store
            .store_status(&StatusRecord {
                timestamp: t,
                fixes: [None, None],
                heading: None,
                solar: None,
                motor_angle_deg: 0.0,
                battery: None,
                health: health(),
            })
            .unwrap();
        drop(store);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["kind"], "Sample");
        assert_eq!(lines[0]["trigger_id"], 7);
        assert_eq!(lines[0]["readings"][0]["channel_id"], "lt");
        assert_eq!(lines[1]["kind"], "Status");

        std::fs::remove_file(&path).unwrap();
    }

    /// Accepts `budget` bytes then fails every write.
    struct ShortWriter {
        out: Vec<u8>,
        budget: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.out.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_write_does_not_corrupt_next_line() {
        let record = StatusRecord {
            timestamp: Utc.with_ymd_and_hms(2024, 6, 20, 12, 0, 0).unwrap(),
            fixes: [None, None],
            heading: None,
            solar: None,
            motor_angle_deg: 0.0,
            battery: None,
            health: health(),
        };

        let mut lines = JsonLines::new(ShortWriter {
            out: Vec::new(),
            budget: usize::MAX,
        });

        lines.write_line(&Line::Status(&record)).unwrap();

        lines.out.budget = 20;
        assert!(matches!(
            lines.write_line(&Line::Status(&record)),
            Err(StoreError::Io(_))
        ));

        lines.out.budget = usize::MAX;
        lines.write_line(&Line::Status(&record)).unwrap();

        let text = String::from_utf8(lines.out.out).unwrap();
        assert!(text.ends_with('\n'));

        let parsed: Vec<bool> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).is_ok())
            .collect();
        assert_eq!(parsed, vec![true, false, true]);
        assert_eq!(text.lines().nth(1).map(|l| l.len()), Some(20));
    }
}
