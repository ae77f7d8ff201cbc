//! [`PowerControl`] implementation for the Raspberry Pi GPIO header

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::gpio::{GpioError, Pin, PowerControl};
use log::debug;
use rppal::gpio::{Gpio, OutputPin};
use std::collections::HashMap;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Drives power rails through the Pi's GPIO pins (BCM numbering).
///
/// Pins are claimed as outputs on first use and kept for the lifetime of the controller. They
/// are not reset when dropped, so the rails keep their last state.
pub struct GpioPowerCtrl {
    gpio: Gpio,
    pins: HashMap<Pin, OutputPin>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GpioPowerCtrl {
    pub fn new() -> Result<Self, GpioError> {
        let gpio = Gpio::new().map_err(|e| GpioError::Unavailable(e.to_string()))?;

        Ok(Self {
            gpio,
            pins: HashMap::new(),
        })
    }

    fn output(&mut self, pin: Pin) -> Result<&mut OutputPin, GpioError> {
        if !self.pins.contains_key(&pin) {
            let mut out = self
                .gpio
                .get(pin)
                .map_err(|e| GpioError::Pin {
                    pin,
                    msg: e.to_string(),
                })?
                .into_output();
            out.set_reset_on_drop(false);

            debug!("Claimed GPIO {} as an output", pin);
            self.pins.insert(pin, out);
        }

        self.pins.get_mut(&pin).ok_or(GpioError::Pin {
            pin,
            msg: "not claimed".into(),
        })
    }
}

impl PowerControl for GpioPowerCtrl {
    fn set_power(&mut self, pins: &[Pin], on: bool) -> Result<(), GpioError> {
        for pin in pins {
            let out = self.output(*pin)?;
            if on {
                out.set_high();
            } else {
                out.set_low();
            }
        }

        Ok(())
    }
}
