//! Status LED on a GPIO.
//!
//! One short flash after a successful publish, three after a failed one.

use esp_idf_hal::delay::FreeRtos;
use esp_idf_hal::gpio::{AnyOutputPin, PinDriver};
use log::warn;
use sensornode_controller::Indicator;

const FLASH_MS: u32 = 150;

pub struct LedIndicator {
    gpio: i32,
}

impl LedIndicator {
    pub fn new(gpio: i32) -> Self {
        Self { gpio }
    }

    fn flash(&self, times: usize) -> Result<(), esp_idf_svc::sys::EspError> {
        // The LED pin is reserved for the indicator.
        let pin = unsafe { AnyOutputPin::new(self.gpio) };
        let mut led = PinDriver::output(pin)?;
        for _ in 0..times {
            led.set_high()?;
            FreeRtos::delay_ms(FLASH_MS);
            led.set_low()?;
            FreeRtos::delay_ms(FLASH_MS);
        }
        Ok(())
    }
}

impl Indicator for LedIndicator {
    fn signal(&mut self, success: bool) {
        let times = if success { 1 } else { 3 };
        if let Err(e) = self.flash(times) {
            warn!("Failed to drive status LED on GPIO{}: {:?}", self.gpio, e);
        }
    }
}
