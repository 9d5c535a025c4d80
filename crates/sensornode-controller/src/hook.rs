//! Interactive configuration hook.
//!
//! While the node runs its access point, a configuration server (HTTP on
//! Linux and ESP32) runs on a second thread. The only way it touches the
//! node is this hook: it applies a configuration through the `ConfigCell`
//! and raises `GoToSleep` on the event queue so the pipeline restarts from
//! a clean boot. It can also read the sensor on demand, either directly
//! or as a `TestDataAcquisition` event run by the scheduler.

use crate::config_cell::ConfigCell;
use crate::connectivity::ConnectivityManager;
use crate::error::SensorError;
use crate::event::{Event, EventKind, EventQueue};
use crate::power::MIN_SLEEP_MS;
use crate::sensor::{Instruments, TestAcquisition};
use sensornode_core::{
    ConfigError, ConfigurationRequest, CyclePhase, MeasurementEnvelope, ProgressFlags,
};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_STORAGE_ERROR: u16 = 500;

/// Snapshot of the node served on the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeStatus {
    pub device_uid: String,
    pub access_point_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_point_name: Option<String>,
    pub station_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub station_ssid: Option<String>,
    pub ap_config_done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,
    pub phase: CyclePhase,
    pub progress: ProgressFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_test: Option<TestAcquisition>,
}

#[derive(Clone)]
pub struct ConfigurationHook {
    config: ConfigCell,
    queue: EventQueue,
    connectivity: Arc<Mutex<ConnectivityManager>>,
    instruments: Instruments,
}

impl ConfigurationHook {
    pub fn new(
        config: ConfigCell,
        queue: EventQueue,
        connectivity: Arc<Mutex<ConnectivityManager>>,
        instruments: Instruments,
    ) -> Self {
        Self {
            config,
            queue,
            connectivity,
            instruments,
        }
    }

    /// Apply a credential set and cloud target.
    ///
    /// Returns an HTTP-style status code: 200 when applied (and `GoToSleep`
    /// raised), 400 for an incomplete request, 500 when it could not be
    /// persisted.
    pub fn device_configuration(&self, request: ConfigurationRequest) -> u16 {
        let cloud = request.cloud.name();
        match self.config.apply_configuration(request) {
            Ok(()) => {
                info!("Configuration for {} applied, restarting cycle", cloud);
                self.queue.add_event(
                    Event::new(EventKind::GoToSleep).with("sleep_ms", MIN_SLEEP_MS),
                );
                STATUS_OK
            }
            Err(e @ (ConfigError::Missing(_) | ConfigError::InvalidData(_))) => {
                warn!("Rejected configuration: {}", e);
                STATUS_BAD_REQUEST
            }
            Err(e) => {
                warn!("Failed to store configuration: {}", e);
                STATUS_STORAGE_ERROR
            }
        }
    }

    /// One reading with the stored sensor settings, outside the cycle.
    pub fn measurement(&self) -> Result<MeasurementEnvelope, SensorError> {
        let (device_uid, settings) = self.config.read(|c| (c.device_uid.clone(), c.sensor));
        let (now, payload) = self.instruments.measure(&settings)?;
        Ok(MeasurementEnvelope::new(device_uid, now, payload))
    }

    /// Queue a test acquisition; its outcome shows up in `status().last_test`.
    pub fn start_test_data_acquisition(&self) {
        info!("Test data acquisition requested");
        self.queue.add_event(Event::new(EventKind::TestDataAcquisition));
    }

    pub fn status(&self) -> NodeStatus {
        let config = self.config.snapshot();
        let connectivity = self
            .connectivity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        NodeStatus {
            device_uid: config.device_uid.clone(),
            access_point_active: connectivity.access_point().is_some(),
            access_point_name: connectivity.access_point().map(str::to_string),
            station_connected: connectivity.station().is_some(),
            station_ssid: connectivity.station().map(|link| link.ssid.clone()),
            ap_config_done: config.ap_config_done,
            cloud: config.cloud.as_ref().map(|c| c.name().to_string()),
            phase: config.cycle.phase,
            progress: config.progress(),
            last_test: self.instruments.last_test(),
        }
    }
}

/// The interactive configuration interface.
pub trait ConfigurationServer: Send {
    /// Start serving on a background thread; `hook` is the only entry into the node.
    fn start(&mut self, hook: ConfigurationHook) -> Result<(), String>;

    /// Stop serving. Safe to call when not started.
    fn stop(&mut self);
}
