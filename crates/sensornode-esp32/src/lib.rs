//! ESP32 components of the sensor node.
//!
//! This crate provides the hardware side of the controller's collaborator
//! traits:
//! - `EspRadio`: station scan/join and the configuration access point
//! - `NvsConfigStorage`: the device configuration in NVS flash
//! - `EspMqttConnector`: MQTT (optionally over TLS) via ESP-MQTT
//! - `EspPower`: reset reason, wake-up cause and deep sleep
//! - `SntpClock`: SNTP time synchronization
//! - `DhtSensor`: DHT11 / DHT22 temperature and humidity
//! - `LedIndicator`: status LED flashed after publishing
//! - `EspConfigurationServer`: the configuration endpoints on the ESP HTTP server
//!
//! # Example
//!
//! ```ignore
//! use sensornode_esp32::{EspRadio, NvsConfigStorage};
//!
//! let radio = EspRadio::new(peripherals.modem, sysloop)?;
//! let storage = NvsConfigStorage::new(nvs_partition);
//! ```

pub mod clock;
pub mod http;
pub mod led;
pub mod mqtt;
pub mod nvs;
pub mod power;
pub mod sensor;
pub mod wifi;

pub use clock::SntpClock;
pub use http::EspConfigurationServer;
pub use led::LedIndicator;
pub use mqtt::EspMqttConnector;
pub use nvs::NvsConfigStorage;
pub use power::EspPower;
pub use sensor::DhtSensor;
pub use wifi::EspRadio;

/// Lower-case hex of the factory MAC, the node's unique id.
pub fn chip_id() -> String {
    let mut mac = [0u8; 6];
    // A failing read leaves the buffer zeroed, which still yields a stable id.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac.iter().map(|b| format!("{:02x}", b)).collect()
}
