//! Reset reason, wake-up cause and deep sleep.

use esp_idf_svc::sys;
use log::info;
use sensornode_controller::{PowerControl, PowerError, ResetCause, WakeReason};

pub struct EspPower {
    /// GPIO of the configuration button, armed as an EXT0 wake source.
    config_pin: i32,
}

impl EspPower {
    pub fn new(config_pin: i32) -> Self {
        Self { config_pin }
    }
}

fn check(rc: sys::esp_err_t, what: &str) -> Result<(), PowerError> {
    if rc == sys::ESP_OK {
        Ok(())
    } else {
        Err(PowerError::Sleep(format!("{} failed with code {}", what, rc)))
    }
}

impl PowerControl for EspPower {
    fn reset_cause(&self) -> ResetCause {
        #[allow(non_upper_case_globals)]
        match unsafe { sys::esp_reset_reason() } {
            sys::esp_reset_reason_t_ESP_RST_POWERON => ResetCause::PowerOn,
            sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => ResetCause::DeepSleep,
            sys::esp_reset_reason_t_ESP_RST_SW | sys::esp_reset_reason_t_ESP_RST_PANIC => {
                ResetCause::SoftReset
            }
            sys::esp_reset_reason_t_ESP_RST_EXT
            | sys::esp_reset_reason_t_ESP_RST_BROWNOUT
            | sys::esp_reset_reason_t_ESP_RST_INT_WDT
            | sys::esp_reset_reason_t_ESP_RST_TASK_WDT
            | sys::esp_reset_reason_t_ESP_RST_WDT => ResetCause::HardReset,
            _ => ResetCause::Unknown,
        }
    }

    fn wake_reason(&self) -> WakeReason {
        #[allow(non_upper_case_globals)]
        match unsafe { sys::esp_sleep_get_wakeup_cause() } {
            sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0
            | sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => WakeReason::Pin,
            sys::esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeReason::Timer,
            _ => WakeReason::Other,
        }
    }

    fn deep_sleep(&mut self, duration_ms: u64) -> Result<(), PowerError> {
        check(
            unsafe { sys::esp_sleep_enable_timer_wakeup(duration_ms.saturating_mul(1000)) },
            "esp_sleep_enable_timer_wakeup",
        )?;
        // The button pulls the line low.
        check(
            unsafe { sys::esp_sleep_enable_ext0_wakeup(self.config_pin, 0) },
            "esp_sleep_enable_ext0_wakeup",
        )?;

        info!("Entering deep sleep for {} ms", duration_ms);
        unsafe { sys::esp_deep_sleep_start() }
    }
}
