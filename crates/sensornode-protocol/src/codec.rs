//! Payload codec for the cloud dialects.
//!
//! Every cloud ingests measurements in its own shape:
//! - AWS: the full envelope, `{"client_id", "publish_timestamp", "data"}`
//! - ThingsBoard: `{"ts", "values"}` with the latest value per quantity
//! - Kaa, IBM: a flat `quantity → latest value` map
//! - Blynk: the flat map, rounded and keyed by datastream
//!
//! Payloads are JSON and travel as UTF-8 bytes in MQTT publish packets.

use crate::messages::{
    AckOutcome, AttributeRequest, AttributeResponse, AwsMeasurement, DeliveryStatus,
    ShadowDocument, ThingsBoardTelemetry,
};
use sensornode_core::{MeasurementEnvelope, Sample};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors that can occur during payload encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    /// JSON (de)serialization failed.
    #[error("Failed to process payload: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// The envelope holds no sample to publish.
    #[error("Envelope contains no samples")]
    EmptyPayload,
}

/// Encode the full envelope for AWS IoT.
pub fn encode_aws(envelope: &MeasurementEnvelope) -> Result<Vec<u8>, CodecError> {
    if envelope.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    let message = AwsMeasurement {
        client_id: envelope.client_id().to_string(),
        publish_timestamp: envelope.publish_timestamp(),
        data: serde_json::to_value(envelope.payload())?,
    };
    Ok(serde_json::to_vec(&message)?)
}

/// Build the ThingsBoard timeseries message.
///
/// `ts` is the earliest timestamp among the latest sample of each quantity,
/// so one record carries every quantity of the measurement.
pub fn thingsboard_telemetry(
    envelope: &MeasurementEnvelope,
) -> Result<ThingsBoardTelemetry, CodecError> {
    let latest = envelope.latest();
    let ts = latest
        .values()
        .map(|sample| sample.timestamp)
        .min()
        .ok_or(CodecError::EmptyPayload)?;
    let values = latest
        .into_iter()
        .map(|(key, sample)| (key.to_string(), Value::Number(sample.value.clone())))
        .collect();
    Ok(ThingsBoardTelemetry { ts, values })
}

pub fn encode_thingsboard(envelope: &MeasurementEnvelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&thingsboard_telemetry(envelope)?)?)
}

/// Encode the latest value of every quantity as a flat map.
pub fn encode_flat(envelope: &MeasurementEnvelope) -> Result<Vec<u8>, CodecError> {
    let values = flat_values(envelope, |key| key.to_string(), |sample| sample.value.clone())?;
    Ok(serde_json::to_vec(&values)?)
}

/// Encode for Blynk: flat map keyed by datastream, floats rounded to one decimal.
///
/// Quantities without a configured datastream keep their own name.
pub fn encode_blynk(
    envelope: &MeasurementEnvelope,
    temperature_datastream: &str,
    humidity_datastream: &str,
) -> Result<Vec<u8>, CodecError> {
    let values = flat_values(
        envelope,
        |key| match key {
            "temperature" => temperature_datastream.to_string(),
            "humidity" => humidity_datastream.to_string(),
            other => other.to_string(),
        },
        |sample| round_one_decimal(&sample.value),
    )?;
    Ok(serde_json::to_vec(&values)?)
}

fn flat_values(
    envelope: &MeasurementEnvelope,
    key_of: impl Fn(&str) -> String,
    value_of: impl Fn(&Sample) -> Number,
) -> Result<Map<String, Value>, CodecError> {
    let latest = envelope.latest();
    if latest.is_empty() {
        return Err(CodecError::EmptyPayload);
    }
    Ok(latest
        .into_iter()
        .map(|(key, sample)| (key_of(key), Value::Number(value_of(sample))))
        .collect())
}

fn round_one_decimal(value: &Number) -> Number {
    if !value.is_f64() {
        return value.clone();
    }
    value
        .as_f64()
        .and_then(|v| Number::from_f64((v * 10.0).round() / 10.0))
        .unwrap_or_else(|| value.clone())
}

/// Encode the ThingsBoard request for the `SleepTime` shared attribute.
pub fn encode_sleep_time_request() -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(&AttributeRequest::sleep_time())?)
}

/// Decode the `SleepTime` shared attribute (seconds) from a ThingsBoard response.
pub fn decode_sleep_time_secs(payload: &[u8]) -> Result<Option<i64>, CodecError> {
    let response: AttributeResponse = serde_json::from_slice(payload)?;
    Ok(response.shared.and_then(|shared| shared.sleep_time))
}

/// Decode the desired publishing period from an AWS shadow document.
pub fn decode_shadow_period_ms(payload: &[u8]) -> Result<Option<i64>, CodecError> {
    let document: ShadowDocument = serde_json::from_slice(payload)?;
    Ok(document
        .state
        .desired
        .and_then(|desired| desired.data_publishing_period_ms))
}

/// Interpret a message received on a status or error topic.
///
/// Anything on the error topic is a rejection; the reason is taken from the
/// cloud's status document when it parses, else the raw text.
pub fn decode_delivery_status(on_error_topic: bool, payload: &[u8]) -> AckOutcome {
    if !on_error_topic {
        return AckOutcome::Accepted;
    }
    let reason = match serde_json::from_slice::<DeliveryStatus>(payload) {
        Ok(DeliveryStatus {
            reason_phrase: Some(reason),
            ..
        }) => reason,
        Ok(DeliveryStatus {
            status_code: Some(code),
            ..
        }) => format!("status {}", code),
        _ => String::from_utf8_lossy(payload).into_owned(),
    };
    AckOutcome::Rejected(reason)
}
