//! Power cycle: wake causes and deep sleep.

use crate::config_cell::ConfigCell;
use crate::error::PowerError;
use serde::Serialize;
use tracing::{error, info};

/// Shortest sleep ever requested from the hardware.
pub const MIN_SLEEP_MS: u64 = 10;

/// Sleep duration for a configured period.
///
/// Total over all inputs. Zero and negative periods become `MIN_SLEEP_MS`,
/// and positive periods below `MIN_SLEEP_MS` (1 to 9 ms) are clamped up to
/// it, so the node never busy-loops through sleep. Periods of at least
/// `MIN_SLEEP_MS` are returned unchanged.
pub fn compute_sleep_duration(configured_ms: i64) -> u64 {
    u64::try_from(configured_ms)
        .unwrap_or(0)
        .max(MIN_SLEEP_MS)
}

/// Reset cause as reported by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    PowerOn,
    /// External reset pin, brownout or watchdog.
    HardReset,
    SoftReset,
    DeepSleep,
    Unknown,
}

/// Wake-up source after deep sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// The configuration button.
    Pin,
    Timer,
    Other,
}

/// Why the program is running, from the orchestration's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeCause {
    PowerOn,
    HardReset,
    SoftReset,
    DeepSleepResume,
    ManualPinWake,
}

impl WakeCause {
    /// Causes that require a connectivity self-test and time sync before measuring.
    pub fn requires_self_test(self) -> bool {
        matches!(
            self,
            WakeCause::PowerOn | WakeCause::HardReset | WakeCause::SoftReset
        )
    }

    /// Causes that force interactive configuration regardless of saved state.
    pub fn forces_configuration(self) -> bool {
        self == WakeCause::ManualPinWake
    }
}

/// Combine the hardware readings. A pin wake wins over every reset cause.
pub fn classify_wake(reset: ResetCause, wake: WakeReason) -> WakeCause {
    if wake == WakeReason::Pin {
        return WakeCause::ManualPinWake;
    }
    match reset {
        ResetCause::PowerOn | ResetCause::Unknown => WakeCause::PowerOn,
        ResetCause::HardReset => WakeCause::HardReset,
        ResetCause::SoftReset => WakeCause::SoftReset,
        ResetCause::DeepSleep => WakeCause::DeepSleepResume,
    }
}

/// Hardware power control.
pub trait PowerControl: Send {
    fn reset_cause(&self) -> ResetCause;

    fn wake_reason(&self) -> WakeReason;

    /// Enter deep sleep for `duration_ms`. Does not return on hardware;
    /// host implementations return once the simulated sleep is over.
    fn deep_sleep(&mut self, duration_ms: u64) -> Result<(), PowerError>;
}

pub struct PowerCycle {
    control: Box<dyn PowerControl>,
}

impl PowerCycle {
    pub fn new(control: Box<dyn PowerControl>) -> Self {
        Self { control }
    }

    pub fn classify_wake(&self) -> WakeCause {
        classify_wake(self.control.reset_cause(), self.control.wake_reason())
    }

    /// Reset the cycle progress, persist it, and sleep.
    ///
    /// A failing persist is logged but does not prevent sleeping; an
    /// interrupted cycle found at the next boot is reset there.
    pub fn suspend(&mut self, config: &ConfigCell, configured_ms: i64) -> Result<u64, PowerError> {
        if let Err(e) = config.reset_cycle() {
            error!("Failed to persist cycle reset before sleep: {}", e);
        }
        let duration_ms = compute_sleep_duration(configured_ms);
        info!("Entering deep sleep for {} ms", duration_ms);
        self.control.deep_sleep(duration_ms)?;
        Ok(duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_duration_floor() {
        assert_eq!(compute_sleep_duration(120_000), 120_000);
        assert_eq!(compute_sleep_duration(0), MIN_SLEEP_MS);
        assert_eq!(compute_sleep_duration(-5), MIN_SLEEP_MS);
        assert_eq!(compute_sleep_duration(3), MIN_SLEEP_MS);
        assert_eq!(compute_sleep_duration(9), MIN_SLEEP_MS);
        assert_eq!(compute_sleep_duration(10), 10);
        assert_eq!(compute_sleep_duration(11), 11);
        assert_eq!(compute_sleep_duration(i64::MIN), MIN_SLEEP_MS);
        assert_eq!(compute_sleep_duration(i64::MAX), i64::MAX as u64);
    }

    #[test]
    fn test_sleep_duration_idempotent() {
        for input in [i64::MIN, -1, 0, 1, 10, 11, 120_000, i64::MAX] {
            let once = compute_sleep_duration(input);
            assert!(once >= MIN_SLEEP_MS);
            assert_eq!(compute_sleep_duration(once as i64), once);
        }
    }

    #[test]
    fn test_classify_wake() {
        assert_eq!(
            classify_wake(ResetCause::DeepSleep, WakeReason::Pin),
            WakeCause::ManualPinWake
        );
        assert_eq!(
            classify_wake(ResetCause::DeepSleep, WakeReason::Timer),
            WakeCause::DeepSleepResume
        );
        assert_eq!(
            classify_wake(ResetCause::SoftReset, WakeReason::Other),
            WakeCause::SoftReset
        );
        assert_eq!(
            classify_wake(ResetCause::Unknown, WakeReason::Other),
            WakeCause::PowerOn
        );
    }

    #[test]
    fn test_wake_cause_policies() {
        assert!(WakeCause::PowerOn.requires_self_test());
        assert!(WakeCause::HardReset.requires_self_test());
        assert!(!WakeCause::DeepSleepResume.requires_self_test());
        assert!(!WakeCause::ManualPinWake.requires_self_test());
        assert!(WakeCause::ManualPinWake.forces_configuration());
    }
}
