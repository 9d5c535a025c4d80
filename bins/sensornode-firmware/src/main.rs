//! Sensor node firmware for ESP32.
//!
//! Requires the ESP32 Rust toolchain (`espup`) and ESP-IDF. One boot runs
//! one cycle: the scheduler classifies the wake, measures, publishes and
//! ends in deep sleep, after which the chip boots again from scratch.

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::prelude::Peripherals;
use esp_idf_svc::log::EspLogger;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{error, info, warn};
use sensornode_controller::{
    ConfigCell, ConnectivityManager, ConnectivitySettings, EventScheduler, NodeParts, PowerCycle,
    SchedulerSettings, TelemetryTransport, TransportSettings,
};
use sensornode_core::{load_or_init, ConfigStorage, DeviceConfig};
use sensornode_esp32::{
    chip_id, DhtSensor, EspConfigurationServer, EspMqttConnector, EspPower, EspRadio,
    LedIndicator, NvsConfigStorage, SntpClock,
};
use std::sync::Arc;

/// The BOOT button; holding it while waking enters configuration mode.
const CONFIG_BUTTON_GPIO: i32 = 0;

/// On-board LED of most DevKitC boards.
const STATUS_LED_GPIO: i32 = 2;

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    info!("Sensor node starting...");

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;
    let storage = Arc::new(NvsConfigStorage::new(EspDefaultNvsPartition::take()?));
    assign_device_uid(storage.as_ref())?;

    let parts = NodeParts {
        config: ConfigCell::load(storage)?,
        connectivity: ConnectivityManager::new(
            Box::new(EspRadio::new(peripherals.modem, sysloop)?),
            ConnectivitySettings::default(),
        ),
        transport: TelemetryTransport::new(
            Box::new(EspMqttConnector::default()),
            TransportSettings::default(),
        ),
        power: PowerCycle::new(Box::new(EspPower::new(CONFIG_BUTTON_GPIO))),
        sensor: Box::new(DhtSensor),
        clock: Box::new(SntpClock::default()),
        indicator: Box::new(LedIndicator::new(STATUS_LED_GPIO)),
        configuration_server: Box::new(EspConfigurationServer::new()),
    };

    // Deep sleep does not return; getting here means the cycle could not complete.
    match EventScheduler::new(parts, SchedulerSettings::default()).run() {
        Ok(report) => warn!("Returned from deep sleep after {} ms", report.duration_ms),
        Err(e) => error!("Cycle aborted: {}", e),
    }
    unsafe { esp_idf_svc::sys::esp_restart() }
}

/// Replace the default device uid with the chip id on first boot.
fn assign_device_uid(storage: &dyn ConfigStorage) -> anyhow::Result<()> {
    let mut config = load_or_init(storage)?;
    if config.device_uid == DeviceConfig::default().device_uid {
        config.device_uid = chip_id();
        storage.save_device_config(&config)?;
        info!("Assigned device uid {}", config.device_uid);
    }
    Ok(())
}
