//! Message types exchanged with the clouds.
//!
//! - Node → Cloud: measurement payloads, attribute requests
//! - Cloud → Node: delivery status, shadow documents, shared attributes

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// AWS measurement payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwsMeasurement {
    pub client_id: String,
    pub publish_timestamp: i64,
    /// Sample lists keyed by quantity, each sample as `[timestamp, value]`.
    pub data: Value,
}

/// ThingsBoard timeseries payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThingsBoardTelemetry {
    pub ts: i64,
    pub values: Map<String, Value>,
}

/// ThingsBoard shared attribute request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRequest {
    #[serde(rename = "sharedKeys")]
    pub shared_keys: String,
}

impl AttributeRequest {
    pub const SLEEP_TIME: &'static str = "SleepTime";

    pub fn sleep_time() -> Self {
        Self {
            shared_keys: Self::SLEEP_TIME.to_string(),
        }
    }
}

/// ThingsBoard answer to an `AttributeRequest`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AttributeResponse {
    #[serde(default)]
    pub shared: Option<SharedAttributes>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SharedAttributes {
    /// Reporting interval in seconds.
    #[serde(rename = "SleepTime", default)]
    pub sleep_time: Option<i64>,
}

/// AWS device shadow document as returned on `shadow/get/accepted`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShadowDocument {
    #[serde(default)]
    pub state: ShadowState,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShadowState {
    #[serde(default)]
    pub desired: Option<DesiredSettings>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DesiredSettings {
    #[serde(default)]
    pub data_publishing_period_ms: Option<i64>,
}

/// Delivery status published by Kaa and IBM on the status/error topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub reason_phrase: Option<String>,
}

/// How a cloud answered a publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    Accepted,
    /// Application-level rejection with the cloud's reason.
    Rejected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_request_shape() {
        let json = serde_json::to_string(&AttributeRequest::sleep_time()).unwrap();
        assert_eq!(json, r#"{"sharedKeys":"SleepTime"}"#);
    }

    #[test]
    fn test_attribute_response_without_shared() {
        let response: AttributeResponse = serde_json::from_str(r#"{"client":{}}"#).unwrap();
        assert_eq!(response.shared, None);
    }

    #[test]
    fn test_delivery_status_decode() {
        let status: DeliveryStatus =
            serde_json::from_str(r#"{"statusCode":400,"reasonPhrase":"Bad payload"}"#).unwrap();
        assert_eq!(status.status_code, Some(400));
        assert_eq!(status.reason_phrase.as_deref(), Some("Bad payload"));
    }
}
