//! # GPIO Power Control Interface
//!
//! Power rails of the GPS receivers and radiometers are switched through GPIO pins. Pin numbers
//! are those used by the platform's GPIO library (BCM numbering on a Raspberry Pi).

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// TYPES
// ------------------------------------------------------------------------------------------------

/// A GPIO pin number.
pub type Pin = u8;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Switches power rails on and off.
pub trait PowerControl: Send {
    /// Drive the given pins high (`on`) or low.
    fn set_power(&mut self, pins: &[Pin], on: bool) -> Result<(), GpioError>;

    /// Switch the rails off, wait `off_time`, then switch them back on.
    fn power_cycle(&mut self, pins: &[Pin], off_time: Duration) -> Result<(), GpioError> {
        debug!("Power cycling pins {:?} (off for {:?})", pins, off_time);

        self.set_power(pins, false)?;
        std::thread::sleep(off_time);
        self.set_power(pins, true)
    }
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GpioError {
    #[error("GPIO peripheral unavailable: {0}")]
    Unavailable(String),

    #[error("Could not drive pin {pin}: {msg}")]
    Pin { pin: Pin, msg: String },
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(Vec<Pin>, bool)>,
        fail_on: Option<bool>,
    }

    impl PowerControl for Recorder {
        fn set_power(&mut self, pins: &[Pin], on: bool) -> Result<(), GpioError> {
            if self.fail_on == Some(on) {
                return Err(GpioError::Pin {
                    pin: pins[0],
                    msg: "stuck".into(),
                });
            }
            self.calls.push((pins.to_vec(), on));
            Ok(())
        }
    }

    #[test]
    fn test_power_cycle_order() {
        let mut r = Recorder::default();
        r.power_cycle(&[17, 27], Duration::from_millis(1)).unwrap();

        assert_eq!(r.calls, vec![(vec![17, 27], false), (vec![17, 27], true)]);
    }

    #[test]
    fn test_power_cycle_stops_on_error() {
        let mut r = Recorder {
            fail_on: Some(false),
            ..Default::default()
        };

        assert!(r.power_cycle(&[22], Duration::from_millis(1)).is_err());
        assert!(r.calls.is_empty());
    }
}
