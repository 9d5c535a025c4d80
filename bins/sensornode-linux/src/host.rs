//! Host stand-ins for the node's hardware.

use chrono::Utc;
use sensornode_controller::{
    Clock, ClockError, Indicator, PowerControl, PowerError, Radio, RadioError, ResetCause,
    Sensor, SensorError, WakeReason,
};
use sensornode_core::{Credential, MeasurementPayload, Sample, ScanResult, SensorSettings};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Radio of a host that already has a network uplink.
///
/// The uplink shows up in scans under `uplink_ssid`; joining it with any
/// password succeeds. The access point only exists in the log.
pub struct HostRadio {
    uplink_ssid: String,
    joined: bool,
}

impl HostRadio {
    pub fn new(uplink_ssid: impl Into<String>) -> Self {
        Self {
            uplink_ssid: uplink_ssid.into(),
            joined: false,
        }
    }
}

impl Radio for HostRadio {
    fn activate_station(&mut self) -> Result<(), RadioError> {
        debug!("Station interface up");
        Ok(())
    }

    fn scan(&mut self) -> Result<Vec<ScanResult>, RadioError> {
        Ok(vec![ScanResult::new(self.uplink_ssid.clone(), -40, 1)])
    }

    fn join(&mut self, credential: &Credential) -> Result<(), RadioError> {
        self.joined = credential.ssid == self.uplink_ssid;
        Ok(())
    }

    fn is_connected(&mut self) -> bool {
        self.joined
    }

    fn leave(&mut self) -> Result<(), RadioError> {
        self.joined = false;
        Ok(())
    }

    fn deactivate_station(&mut self) -> Result<(), RadioError> {
        debug!("Station interface down");
        Ok(())
    }

    fn start_access_point(&mut self, name: &str, _password: &str) -> Result<(), RadioError> {
        info!("Simulated access point '{}' up", name);
        Ok(())
    }

    fn stop_access_point(&mut self) -> Result<(), RadioError> {
        Ok(())
    }
}

/// DHT-style sensor producing a slowly drifting temperature and humidity.
pub struct SimulatedSensor;

impl Sensor for SimulatedSensor {
    fn acquire(
        &mut self,
        settings: &SensorSettings,
        timestamp_ms: i64,
    ) -> Result<MeasurementPayload, SensorError> {
        let phase = (timestamp_ms / 60_000) as f64 / 30.0;
        let temperature = ((21.0 + 2.0 * phase.sin()) * 10.0).round() / 10.0;
        let humidity = (45.0 + 5.0 * phase.cos()).round();
        debug!(
            "{:?} on pin {}: {} C, {} %",
            settings.sensor_type, settings.measurement_pin, temperature, humidity
        );

        let reading = |ts, value| {
            Sample::from_f64(ts, value)
                .ok_or_else(|| SensorError::Read(format!("invalid reading {}", value)))
        };
        let mut payload = MeasurementPayload::new();
        payload.insert(
            "temperature".to_string(),
            vec![reading(timestamp_ms, temperature)?],
        );
        payload.insert(
            "humidity".to_string(),
            vec![reading(timestamp_ms + 1, humidity)?],
        );
        Ok(payload)
    }
}

/// The host's own clock, assumed to be synchronized already.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn synchronize(&mut self) -> Result<(), ClockError> {
        Ok(())
    }
}

/// Status LED that only exists in the log.
pub struct LogIndicator;

impl Indicator for LogIndicator {
    fn signal(&mut self, success: bool) {
        info!(success, "Status LED blink");
    }
}

/// Deep sleep simulated by blocking the thread.
pub struct HostPower {
    reset: ResetCause,
    wake: WakeReason,
}

impl HostPower {
    pub fn new(reset: ResetCause, wake: WakeReason) -> Self {
        Self { reset, wake }
    }
}

impl PowerControl for HostPower {
    fn reset_cause(&self) -> ResetCause {
        self.reset
    }

    fn wake_reason(&self) -> WakeReason {
        self.wake
    }

    fn deep_sleep(&mut self, duration_ms: u64) -> Result<(), PowerError> {
        thread::sleep(Duration::from_millis(duration_ms));
        Ok(())
    }
}
