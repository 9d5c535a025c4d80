//! MQTT topic names per cloud.

pub const THINGSBOARD_TELEMETRY: &str = "v1/devices/me/telemetry";
pub const THINGSBOARD_ATTRIBUTE_REQUEST: &str = "v1/devices/me/attributes/request/1";
pub const THINGSBOARD_ATTRIBUTE_RESPONSE: &str = "v1/devices/me/attributes/response/+";

pub const BLYNK_BATCH: &str = "batch_ds";

/// Kaa data collection topic.
pub fn kaa_data(app_version: &str, endpoint_token: &str, request_id: u32) -> String {
    format!(
        "kp1/{}/dcx/{}/json/{}",
        app_version, endpoint_token, request_id
    )
}

/// IBM Watson IoT device event topic.
pub fn ibm_event(event: &str) -> String {
    format!("iot-2/evt/{}/fmt/json", event)
}

pub fn ibm_host(organization: &str) -> String {
    format!("{}.messaging.internetofthings.ibmcloud.com", organization)
}

pub fn ibm_client_id(organization: &str, device_type: &str, device_id: &str) -> String {
    format!("d:{}:{}:{}", organization, device_type, device_id)
}

pub fn aws_shadow_get(thing: &str) -> String {
    format!("$aws/things/{}/shadow/get", thing)
}

pub fn aws_shadow_get_accepted(thing: &str) -> String {
    format!("{}/accepted", aws_shadow_get(thing))
}

/// Topic on which a cloud confirms a publish to `topic`.
pub fn status_topic(topic: &str) -> String {
    format!("{}/status", topic)
}

/// Topic on which a cloud rejects a publish to `topic`.
pub fn error_topic(topic: &str) -> String {
    format!("{}/error", topic)
}

/// Match a topic name against an MQTT filter.
///
/// Supports the single level `+` and the trailing multi level `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}
