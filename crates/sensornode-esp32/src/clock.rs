//! Wall clock synchronized over SNTP.

use esp_idf_svc::sntp::{EspSntp, SyncStatus};
use log::info;
use sensornode_controller::{Clock, ClockError};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct SntpClock {
    sntp: Option<EspSntp<'static>>,
    /// How long one synchronization attempt waits for completion.
    attempt_timeout: Duration,
}

impl SntpClock {
    pub fn new(attempt_timeout: Duration) -> Self {
        Self {
            sntp: None,
            attempt_timeout,
        }
    }
}

impl Default for SntpClock {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Clock for SntpClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }

    fn synchronize(&mut self) -> Result<(), ClockError> {
        if self.sntp.is_none() {
            self.sntp =
                Some(EspSntp::new_default().map_err(|e| ClockError::Sync(e.to_string()))?);
        }
        let Some(sntp) = self.sntp.as_ref() else {
            return Err(ClockError::Sync("SNTP not running".to_string()));
        };

        let attempts = (self.attempt_timeout.as_millis() / POLL_INTERVAL.as_millis()).max(1);
        for _ in 0..attempts {
            if sntp.get_sync_status() == SyncStatus::Completed {
                info!("SNTP synchronized");
                return Ok(());
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(ClockError::Sync(format!(
            "no SNTP response within {:?}",
            self.attempt_timeout
        )))
    }
}
