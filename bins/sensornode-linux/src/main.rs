//! Sensor node on a Linux host.
//!
//! Runs the same orchestration as the firmware with host stand-ins: the
//! configuration lives in a JSON file, MQTT goes through rumqttc, the sensor
//! is simulated and deep sleep blocks the process. Every wake rebuilds all
//! node state from the configuration file, as a real deep sleep would.

mod host;
mod mqtt;

use host::{HostPower, HostRadio, LogIndicator, SimulatedSensor, SystemClock};
use mqtt::RumqttConnector;
use sensornode_controller::{
    ConfigCell, ConnectivityManager, ConnectivitySettings, EventScheduler, NodeParts, PowerCycle,
    ResetCause, SchedulerSettings, TelemetryTransport, TransportSettings, WakeReason,
};
use sensornode_core::{load_or_init, ConfigStorage, DeviceConfig, FileConfigStorage};
use sensornode_web::HttpConfigurationServer;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

struct HostSettings {
    config_path: PathBuf,
    uplink_ssid: String,
    http_addr: SocketAddr,
    /// Simulate the configuration pin on the first wake.
    configure: bool,
}

impl HostSettings {
    fn from_env() -> anyhow::Result<Self> {
        let http_addr = std::env::var("SENSORNODE_HTTP_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".into())
            .parse()?;
        Ok(Self {
            config_path: std::env::var("SENSORNODE_CONFIG")
                .unwrap_or_else(|_| "./sensornode.json".into())
                .into(),
            uplink_ssid: std::env::var("SENSORNODE_HOST_SSID")
                .unwrap_or_else(|_| "host-uplink".into()),
            http_addr,
            configure: std::env::args().skip(1).any(|arg| arg == "--configure"),
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,sensornode_controller=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Sensor node starting...");

    let settings = HostSettings::from_env()?;
    let storage = Arc::new(FileConfigStorage::new(&settings.config_path));
    assign_device_uid(storage.as_ref())?;

    tracing::info!("   Config:  {}", settings.config_path.display());
    tracing::info!("   Uplink:  {}", settings.uplink_ssid);
    tracing::info!("   Setup:   http://{}/config", settings.http_addr);

    let mut reset = ResetCause::PowerOn;
    let mut wake = if settings.configure {
        WakeReason::Pin
    } else {
        WakeReason::Other
    };

    loop {
        let parts = NodeParts {
            config: ConfigCell::load(storage.clone())?,
            connectivity: ConnectivityManager::new(
                Box::new(HostRadio::new(settings.uplink_ssid.clone())),
                ConnectivitySettings::default(),
            ),
            transport: TelemetryTransport::new(
                Box::new(RumqttConnector::default()),
                TransportSettings::default(),
            ),
            power: PowerCycle::new(Box::new(HostPower::new(reset, wake))),
            sensor: Box::new(SimulatedSensor),
            clock: Box::new(SystemClock),
            indicator: Box::new(LogIndicator),
            configuration_server: Box::new(HttpConfigurationServer::new(settings.http_addr)),
        };

        let report = EventScheduler::new(parts, SchedulerSettings::default()).run()?;
        tracing::info!(
            "Woke up after {} ms (published: {}, errors: {:?})",
            report.duration_ms,
            report.published,
            report.errors
        );

        reset = ResetCause::DeepSleep;
        wake = WakeReason::Timer;
    }
}

/// Give a fresh node a unique id, the host analogue of the chip id.
fn assign_device_uid(storage: &dyn ConfigStorage) -> anyhow::Result<()> {
    let mut config = load_or_init(storage)?;
    if config.device_uid == DeviceConfig::default().device_uid {
        let uuid = Uuid::new_v4().simple().to_string();
        config.device_uid = uuid[..12].to_string();
        storage.save_device_config(&config)?;
        tracing::info!("Assigned device uid {}", config.device_uid);
    }
    Ok(())
}
