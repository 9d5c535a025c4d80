//! Durable device configuration.
//!
//! The node keeps exactly one configuration record. It is read fully at boot
//! and written fully after every mutation that must survive deep sleep, so
//! the storage abstraction only deals in whole documents:
//! - Linux: JSON file (`FileConfigStorage`)
//! - ESP32: NVS (Non-Volatile Storage)
//! - Tests: `MemoryConfigStorage`

use crate::model::Credential;
use crate::phase::{CycleState, ProgressFlags};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

pub const DEFAULT_DATA_PUBLISHING_PERIOD_MS: i64 = 120_000;
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_PORT_SSL: u16 = 8883;
pub const DEFAULT_MQTT_REQUEST_ID: u32 = 42;
pub const DEFAULT_QOS: u8 = 1;
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 60;
pub const DEFAULT_KAA_HOST: &str = "mqtt.cloud.kaaiot.com";
pub const DEFAULT_BLYNK_HOST: &str = "blynk.cloud";

/// Errors that can occur during configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No configuration document has been saved yet.
    #[error("Configuration not found: {0}")]
    NotFound(String),

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),

    /// The stored document could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A value the node needs is absent (credential, certificate, topic part).
    #[error("Missing configuration value: {0}")]
    Missing(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

/// Abstract configuration storage.
///
/// All methods are synchronous to support embedded platforms. Writes are
/// last-write-wins; there is no transaction log.
pub trait ConfigStorage: Send + Sync {
    /// Load the device configuration. Fails with `NotFound` on a blank device.
    fn load_device_config(&self) -> Result<DeviceConfig, ConfigError>;

    /// Replace the stored device configuration.
    fn save_device_config(&self, config: &DeviceConfig) -> Result<(), ConfigError>;

    /// Check whether a configuration document exists.
    fn has_device_config(&self) -> bool;
}

/// Load the stored configuration, writing the defaults on a blank device.
pub fn load_or_init<S: ConfigStorage + ?Sized>(storage: &S) -> Result<DeviceConfig, ConfigError> {
    match storage.load_device_config() {
        Ok(config) => Ok(config),
        Err(ConfigError::NotFound(_)) => {
            let config = DeviceConfig::default();
            storage.save_device_config(&config)?;
            Ok(config)
        }
        Err(e) => Err(e),
    }
}

// ============================================================================
// Device Configuration
// ============================================================================

/// The durable record of the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Unique device identifier; also the default MQTT client id.
    pub device_uid: String,

    /// Saved station credentials, tried in saved order per ssid.
    pub credentials: Vec<Credential>,

    /// Selected cloud back end. `None` until the node has been configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud: Option<CloudTarget>,

    pub access_point: AccessPointSettings,
    pub mqtt: MqttSettings,
    pub sensor: SensorSettings,
    pub timing: TimingSettings,

    /// Set once the interactive configuration has been completed.
    pub ap_config_done: bool,

    /// Set after a successful connectivity self-test; cleared on reconfiguration.
    pub connection_tested: bool,

    /// Progress of the current measurement cycle.
    pub cycle: CycleState,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_uid: "sensornode".to_string(),
            credentials: Vec::new(),
            cloud: None,
            access_point: AccessPointSettings::default(),
            mqtt: MqttSettings::default(),
            sensor: SensorSettings::default(),
            timing: TimingSettings::default(),
            ap_config_done: false,
            connection_tested: false,
            cycle: CycleState::default(),
        }
    }
}

impl DeviceConfig {
    /// True when the node cannot run a measurement cycle without an operator.
    pub fn needs_configuration(&self) -> bool {
        !self.ap_config_done || self.credentials.is_empty() || self.cloud.is_none()
    }

    /// Name broadcast by the configuration access point.
    pub fn access_point_name(&self) -> String {
        format!("{}_{}", self.access_point.name_prefix, self.device_uid)
    }

    /// Progress flags of the current cycle, derived from the cycle token.
    pub fn progress(&self) -> ProgressFlags {
        self.cycle.flags()
    }

    /// The configured cloud target, or a configuration error.
    pub fn cloud_target(&self) -> Result<&CloudTarget, ConfigError> {
        self.cloud
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("cloud target".to_string()))
    }

    /// Apply an operator supplied configuration.
    ///
    /// Replaces credentials and cloud target, forces a fresh self-test and
    /// starts a new cycle.
    pub fn apply(&mut self, request: ConfigurationRequest) -> Result<(), ConfigError> {
        if request.credentials.is_empty() {
            return Err(ConfigError::Missing("credentials".to_string()));
        }
        request.cloud.validate()?;
        if let Some(qos) = request.qos {
            if qos > 1 {
                return Err(ConfigError::InvalidData(format!("unsupported QoS {}", qos)));
            }
            self.mqtt.qos = qos;
        }

        self.credentials = request.credentials;
        self.cloud = Some(request.cloud);
        if let Some(sensor) = request.sensor {
            self.sensor = sensor;
        }
        if let Some(period) = request.data_publishing_period_ms {
            self.timing.data_publishing_period_ms = period;
        }
        self.ap_config_done = true;
        self.connection_tested = false;
        self.cycle.reset();
        Ok(())
    }
}

/// Payload accepted by the interactive configuration interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRequest {
    pub credentials: Vec<Credential>,
    pub cloud: CloudTarget,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor: Option<SensorSettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_publishing_period_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<u8>,
}

/// Interactive configuration access point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessPointSettings {
    pub name_prefix: String,
    pub password: String,
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            name_prefix: "SensorNode".to_string(),
            password: "configure-me".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSettings {
    /// Publish/subscribe QoS, 0 or 1.
    pub qos: u8,
    pub keep_alive_secs: u16,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            qos: DEFAULT_QOS,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorType {
    Dht11,
    Dht22,
    Bme280,
}

/// Parameters handed to the sensor driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorSettings {
    pub sensor_type: SensorType,
    pub measurement_pin: u8,
    pub power_pin: u8,
    pub sda_pin: u8,
    pub scl_pin: u8,
    /// Flash the status indicator after each publish attempt.
    pub blink_led: bool,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            sensor_type: SensorType::Dht22,
            measurement_pin: 4,
            power_pin: 26,
            sda_pin: 21,
            scl_pin: 22,
            blink_led: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Interval between measurement cycles. Non-positive values fall back
    /// to the minimum sleep.
    pub data_publishing_period_ms: i64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            data_publishing_period_ms: DEFAULT_DATA_PUBLISHING_PERIOD_MS,
        }
    }
}

// ============================================================================
// Cloud Targets
// ============================================================================

/// The cloud back end measurements are delivered to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum CloudTarget {
    Aws(AwsSettings),
    Kaa(KaaSettings),
    ThingsBoard(ThingsBoardSettings),
    Blynk(BlynkSettings),
    Ibm(IbmSettings),
}

impl CloudTarget {
    pub fn name(&self) -> &'static str {
        match self {
            CloudTarget::Aws(_) => "aws",
            CloudTarget::Kaa(_) => "kaa",
            CloudTarget::ThingsBoard(_) => "thingsboard",
            CloudTarget::Blynk(_) => "blynk",
            CloudTarget::Ibm(_) => "ibm",
        }
    }

    /// Check that every value needed to connect is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            CloudTarget::Aws(aws) => {
                require("aws.endpoint", &aws.endpoint)?;
                require("aws.topic", &aws.topic)?;
                require("aws.certificate", &aws.certificate)?;
                require("aws.private_key", &aws.private_key)?;
                // A client certificate is only presented alongside a pinned CA.
                require(
                    "aws.ca_certificate",
                    aws.ca_certificate.as_deref().unwrap_or_default(),
                )
            }
            CloudTarget::Kaa(kaa) => {
                require("kaa.host", &kaa.host)?;
                require("kaa.app_version", &kaa.app_version)?;
                require("kaa.endpoint_token", &kaa.endpoint_token)
            }
            CloudTarget::ThingsBoard(tb) => {
                require("thingsboard.host", &tb.host)?;
                require("thingsboard.access_token", &tb.access_token)
            }
            CloudTarget::Blynk(blynk) => {
                require("blynk.host", &blynk.host)?;
                require("blynk.auth_token", &blynk.auth_token)
            }
            CloudTarget::Ibm(ibm) => {
                require("ibm.organization", &ibm.organization)?;
                require("ibm.device_type", &ibm.device_type)?;
                require("ibm.device_id", &ibm.device_id)?;
                require("ibm.auth_token", &ibm.auth_token)
            }
        }
    }
}

fn require(name: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::Missing(name.to_string()))
    } else {
        Ok(())
    }
}

/// AWS IoT Core: mutual TLS with a device certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSettings {
    /// Broker host, e.g. `xxxx-ats.iot.eu-central-1.amazonaws.com`.
    pub endpoint: String,
    pub port: u16,
    /// Thing name; empty means the device uid.
    pub client_id: String,
    pub topic: String,
    /// PEM encoded client certificate.
    pub certificate: String,
    /// PEM encoded private key.
    pub private_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_certificate: Option<String>,
}

impl Default for AwsSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            port: DEFAULT_MQTT_PORT_SSL,
            client_id: String::new(),
            topic: "topic/data".to_string(),
            certificate: String::new(),
            private_key: String::new(),
            ca_certificate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KaaSettings {
    pub host: String,
    pub port: u16,
    pub app_version: String,
    pub endpoint_token: String,
    pub username: String,
    pub password: String,
    pub request_id: u32,
}

impl Default for KaaSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_KAA_HOST.to_string(),
            port: DEFAULT_MQTT_PORT,
            app_version: String::new(),
            endpoint_token: String::new(),
            username: String::new(),
            password: String::new(),
            request_id: DEFAULT_MQTT_REQUEST_ID,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThingsBoardSettings {
    pub host: String,
    pub port: u16,
    /// Device access token, sent as the MQTT username.
    pub access_token: String,
}

impl Default for ThingsBoardSettings {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_MQTT_PORT,
            access_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlynkSettings {
    pub host: String,
    pub port: u16,
    pub auth_token: String,
    /// Datastream receiving the temperature reading.
    pub temperature_datastream: String,
    /// Datastream receiving the humidity reading.
    pub humidity_datastream: String,
}

impl Default for BlynkSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_BLYNK_HOST.to_string(),
            port: DEFAULT_MQTT_PORT_SSL,
            auth_token: String::new(),
            temperature_datastream: "V0".to_string(),
            humidity_datastream: "V1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbmSettings {
    pub organization: String,
    pub port: u16,
    pub device_type: String,
    pub device_id: String,
    pub auth_token: String,
    pub event: String,
}

impl Default for IbmSettings {
    fn default() -> Self {
        Self {
            organization: String::new(),
            port: DEFAULT_MQTT_PORT,
            device_type: String::new(),
            device_id: String::new(),
            auth_token: String::new(),
            event: "measurement".to_string(),
        }
    }
}

// ============================================================================
// In-memory storage
// ============================================================================

/// Volatile storage, used by tests and by hosts without a filesystem.
///
/// Keeps the serialized document so every load goes through serde exactly as
/// with durable backends.
#[derive(Debug, Default)]
pub struct MemoryConfigStorage {
    document: RwLock<Option<String>>,
    writes: AtomicUsize,
}

impl MemoryConfigStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-loaded with `config`; does not count as a write.
    pub fn with_config(config: &DeviceConfig) -> Result<Self, ConfigError> {
        let json =
            serde_json::to_string(config).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        Ok(Self {
            document: RwLock::new(Some(json)),
            writes: AtomicUsize::new(0),
        })
    }

    /// Number of saves since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl ConfigStorage for MemoryConfigStorage {
    fn load_device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let document = self
            .document
            .read()
            .map_err(|_| ConfigError::StorageUnavailable("lock poisoned".to_string()))?;
        let json = document
            .as_ref()
            .ok_or_else(|| ConfigError::NotFound("device config".to_string()))?;
        serde_json::from_str(json).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_device_config(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let json =
            serde_json::to_string(config).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        let mut document = self
            .document
            .write()
            .map_err(|_| ConfigError::StorageUnavailable("lock poisoned".to_string()))?;
        *document = Some(json);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn has_device_config(&self) -> bool {
        self.document.read().map(|d| d.is_some()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::CyclePhase;
    use pretty_assertions::assert_eq;

    fn thingsboard() -> CloudTarget {
        CloudTarget::ThingsBoard(ThingsBoardSettings {
            host: "demo.thingsboard.io".to_string(),
            access_token: "A1_TEST_TOKEN".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_load_or_init_writes_defaults() {
        let storage = MemoryConfigStorage::new();
        assert!(!storage.has_device_config());

        let config = load_or_init(&storage).unwrap();
        assert_eq!(config, DeviceConfig::default());
        assert!(storage.has_device_config());
        assert_eq!(storage.write_count(), 1);
        assert!(config.needs_configuration());
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{"device_uid": "node-7", "timing": {}, "cloud": {"provider": "kaa", "endpoint_token": "ep"}}"#,
        )
        .unwrap();

        assert_eq!(config.device_uid, "node-7");
        assert_eq!(config.timing.data_publishing_period_ms, 120_000);
        assert_eq!(config.mqtt.qos, 1);
        match config.cloud {
            Some(CloudTarget::Kaa(kaa)) => {
                assert_eq!(kaa.host, "mqtt.cloud.kaaiot.com");
                assert_eq!(kaa.request_id, 42);
                assert_eq!(kaa.endpoint_token, "ep");
            }
            other => panic!("unexpected cloud target: {:?}", other),
        }
    }

    #[test]
    fn test_cloud_target_tag() {
        let json = serde_json::to_value(thingsboard()).unwrap();
        assert_eq!(json["provider"], "thingsboard");
        assert_eq!(json["access_token"], "A1_TEST_TOKEN");
    }

    #[test]
    fn test_validate_reports_missing_certificate() {
        let target = CloudTarget::Aws(AwsSettings {
            endpoint: "example-ats.iot.eu-central-1.amazonaws.com".to_string(),
            ..Default::default()
        });
        let err = target.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref field) if field == "aws.certificate"));
    }

    #[test]
    fn test_validate_requires_ca_with_client_certificate() {
        let mut aws = AwsSettings {
            endpoint: "example-ats.iot.eu-central-1.amazonaws.com".to_string(),
            certificate: "CERT".to_string(),
            private_key: "KEY".to_string(),
            ..Default::default()
        };
        let err = CloudTarget::Aws(aws.clone()).validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(ref field) if field == "aws.ca_certificate"));

        aws.ca_certificate = Some("  ".to_string());
        assert!(CloudTarget::Aws(aws.clone()).validate().is_err());

        aws.ca_certificate = Some("CA".to_string());
        assert!(CloudTarget::Aws(aws).validate().is_ok());
    }

    #[test]
    fn test_apply_replaces_sensor_settings() {
        let mut config = DeviceConfig::default();
        assert!(!config.sensor.blink_led);

        let request: ConfigurationRequest = serde_json::from_value(serde_json::json!({
            "credentials": [{"ssid": "homewifi", "password": "secret"}],
            "cloud": {"provider": "thingsboard", "host": "demo.thingsboard.io", "access_token": "T"},
            "sensor": {"sensor_type": "DHT11", "blink_led": true}
        }))
        .unwrap();
        config.apply(request).unwrap();

        assert_eq!(
            config.sensor,
            SensorSettings {
                sensor_type: SensorType::Dht11,
                blink_led: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_apply_starts_fresh_cycle() {
        let mut config = DeviceConfig::default();
        config.connection_tested = true;
        config.cycle.finish(CyclePhase::Published);

        config
            .apply(ConfigurationRequest {
                credentials: vec![Credential::new("homewifi", "secret")],
                cloud: thingsboard(),
                sensor: None,
                data_publishing_period_ms: Some(60_000),
                qos: Some(0),
            })
            .unwrap();

        assert!(config.ap_config_done);
        assert!(!config.connection_tested);
        assert!(!config.needs_configuration());
        assert_eq!(config.cycle, CycleState::default());
        assert_eq!(config.timing.data_publishing_period_ms, 60_000);
        assert_eq!(config.mqtt.qos, 0);
    }

    #[test]
    fn test_apply_rejects_empty_credentials() {
        let mut config = DeviceConfig::default();
        let result = config.apply(ConfigurationRequest {
            credentials: vec![],
            cloud: thingsboard(),
            sensor: None,
            data_publishing_period_ms: None,
            qos: None,
        });
        assert!(result.is_err());
        assert!(!config.ap_config_done);
    }

    #[test]
    fn test_access_point_name() {
        let config = DeviceConfig {
            device_uid: "a1b2c3".to_string(),
            ..Default::default()
        };
        assert_eq!(config.access_point_name(), "SensorNode_a1b2c3");
    }

    #[test]
    fn test_progress_round_trip_through_storage() {
        let storage = MemoryConfigStorage::new();
        let mut config = DeviceConfig::default();
        config.cycle.finish(CyclePhase::SensorDataAcquired);
        storage.save_device_config(&config).unwrap();

        let mut loaded = storage.load_device_config().unwrap();
        assert!(loaded.progress().got_sensor_data);

        loaded.cycle.reset();
        storage.save_device_config(&loaded).unwrap();
        assert!(!storage.load_device_config().unwrap().progress().any());
    }
}
