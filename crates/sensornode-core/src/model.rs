//! Sensor node data model types.
//!
//! These types are shared by every layer of the node:
//! - Saved Wi-Fi credentials and transient scan results
//! - Measurement samples as produced by the sensor collaborator
//! - The measurement envelope handed to the telemetry transport

use serde::{Deserialize, Serialize};
use serde_json::Number;
use std::collections::BTreeMap;

/// Value reported by the sensor layer when a read fails.
pub const FAILED_TO_MEASURE_VALUE: f64 = -99.0;

/// A saved Wi-Fi network.
///
/// Uniqueness by SSID is not enforced: several passwords may be saved for
/// the same network and are tried in the order they were saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Network name.
    pub ssid: String,

    /// Network password (empty for open networks).
    #[serde(default)]
    pub password: String,
}

impl Credential {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// Security mode advertised by a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    Open,
    Wep,
    WpaPersonal,
    Wpa2Personal,
    WpaWpa2Personal,
    Wpa3Personal,
    Wpa2Enterprise,
    Unknown,
}

/// One network seen by a radio scan.
///
/// Scan results are produced transiently and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub ssid: String,
    /// RSSI in dBm; higher is stronger.
    pub signal_strength: i8,
    pub channel: u8,
    pub security_mode: SecurityMode,
}

impl ScanResult {
    pub fn new(ssid: impl Into<String>, signal_strength: i8, channel: u8) -> Self {
        Self {
            ssid: ssid.into(),
            signal_strength,
            channel,
            security_mode: SecurityMode::Wpa2Personal,
        }
    }
}

/// A single timestamped reading.
///
/// Serialized as a two element array `[timestamp_ms, value]`. The value keeps
/// its JSON number kind so integers stay integers on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(i64, Number)", into = "(i64, Number)")]
pub struct Sample {
    /// Unix timestamp in milliseconds.
    pub timestamp: i64,
    pub value: Number,
}

impl Sample {
    pub fn new(timestamp: i64, value: impl Into<Number>) -> Self {
        Self {
            timestamp,
            value: value.into(),
        }
    }

    /// Build a sample from a float reading. Returns `None` for NaN or infinity.
    pub fn from_f64(timestamp: i64, value: f64) -> Option<Self> {
        Number::from_f64(value).map(|value| Self { timestamp, value })
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// True when the value is the sensor layer's failure sentinel.
    pub fn is_failed_reading(&self) -> bool {
        self.as_f64() == Some(FAILED_TO_MEASURE_VALUE)
    }
}

impl From<(i64, Number)> for Sample {
    fn from((timestamp, value): (i64, Number)) -> Self {
        Self { timestamp, value }
    }
}

impl From<Sample> for (i64, Number) {
    fn from(sample: Sample) -> Self {
        (sample.timestamp, sample.value)
    }
}

/// Readings keyed by quantity name (e.g. "temperature").
pub type MeasurementPayload = BTreeMap<String, Vec<Sample>>;

/// True if the payload carries no usable reading.
///
/// An empty payload, an empty sample list or any failure sentinel counts as
/// "no data" for the whole cycle.
pub fn payload_is_unusable(payload: &MeasurementPayload) -> bool {
    payload.is_empty()
        || payload
            .values()
            .any(|samples| samples.is_empty() || samples.iter().any(Sample::is_failed_reading))
}

/// The unit handed to the telemetry transport.
///
/// Immutable once built; adapters only read it to produce their wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEnvelope {
    client_id: String,
    publish_timestamp: i64,
    payload: MeasurementPayload,
}

impl MeasurementEnvelope {
    pub fn new(
        client_id: impl Into<String>,
        publish_timestamp: i64,
        payload: MeasurementPayload,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            publish_timestamp,
            payload,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn publish_timestamp(&self) -> i64 {
        self.publish_timestamp
    }

    pub fn payload(&self) -> &MeasurementPayload {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        self.payload.values().all(Vec::is_empty)
    }

    /// The most recent sample of every quantity.
    ///
    /// Quantities without samples are omitted. On equal timestamps the sample
    /// appearing last in the list wins.
    pub fn latest(&self) -> BTreeMap<&str, &Sample> {
        self.payload
            .iter()
            .filter_map(|(key, samples)| {
                samples
                    .iter()
                    .max_by_key(|sample| sample.timestamp)
                    .map(|sample| (key.as_str(), sample))
            })
            .collect()
    }
}
