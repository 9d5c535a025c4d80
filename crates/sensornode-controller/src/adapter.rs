//! Per-cloud adapter handles.
//!
//! A `CloudAdapterHandle` is everything the transport needs for one publish
//! cycle against the configured cloud: broker address, authentication, TLS
//! material, topics and wire encoding. It is built from the device
//! configuration at the start of a cycle and dropped at its end.

use crate::mqtt::{BrokerOptions, TlsMaterial};
use sensornode_core::{CloudTarget, ConfigError, DeviceConfig, MeasurementEnvelope};
use sensornode_protocol::{codec, topics, CodecError};
use std::time::Duration;

/// Out-of-band delivery confirmation topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckTopics {
    pub status: String,
    pub error: String,
}

/// Remote settings exchange performed before publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// AWS device shadow get; reads the desired publishing period.
    AwsShadow { request: String, response: String },
    /// ThingsBoard shared attribute request for `SleepTime`.
    ThingsBoardSleepTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Encoding {
    Envelope,
    TimeSeries,
    Flat,
    Blynk {
        temperature_datastream: String,
        humidity_datastream: String,
    },
}

#[derive(Debug, Clone)]
pub struct CloudAdapterHandle {
    target: &'static str,
    broker: BrokerOptions,
    data_topic: String,
    ack: Option<AckTopics>,
    handshake: Option<Handshake>,
    encoding: Encoding,
}

impl CloudAdapterHandle {
    /// Build the handle for the configured cloud.
    ///
    /// Missing credentials or certificates are configuration errors.
    pub fn from_config(config: &DeviceConfig) -> Result<Self, ConfigError> {
        let target = config.cloud_target()?;
        target.validate()?;
        let keep_alive = Duration::from_secs(u64::from(config.mqtt.keep_alive_secs));

        let handle = match target {
            CloudTarget::Aws(aws) => {
                let client_id = if aws.client_id.is_empty() {
                    config.device_uid.clone()
                } else {
                    aws.client_id.clone()
                };
                Self {
                    target: target.name(),
                    broker: BrokerOptions {
                        host: aws.endpoint.clone(),
                        port: aws.port,
                        client_id: client_id.clone(),
                        username: None,
                        password: None,
                        keep_alive,
                        tls: Some(TlsMaterial {
                            ca_certificate: aws.ca_certificate.clone(),
                            client_certificate: Some(aws.certificate.clone()),
                            client_key: Some(aws.private_key.clone()),
                        }),
                    },
                    data_topic: aws.topic.clone(),
                    ack: None,
                    handshake: Some(Handshake::AwsShadow {
                        request: topics::aws_shadow_get(&client_id),
                        response: topics::aws_shadow_get_accepted(&client_id),
                    }),
                    encoding: Encoding::Envelope,
                }
            }
            CloudTarget::Kaa(kaa) => {
                let topic = topics::kaa_data(&kaa.app_version, &kaa.endpoint_token, kaa.request_id);
                Self {
                    target: target.name(),
                    broker: BrokerOptions {
                        host: kaa.host.clone(),
                        port: kaa.port,
                        client_id: kaa.endpoint_token.clone(),
                        username: non_empty(&kaa.username),
                        password: non_empty(&kaa.password),
                        keep_alive,
                        tls: None,
                    },
                    ack: Some(AckTopics {
                        status: topics::status_topic(&topic),
                        error: topics::error_topic(&topic),
                    }),
                    data_topic: topic,
                    handshake: None,
                    encoding: Encoding::Flat,
                }
            }
            CloudTarget::ThingsBoard(tb) => Self {
                target: target.name(),
                broker: BrokerOptions {
                    host: tb.host.clone(),
                    port: tb.port,
                    client_id: config.device_uid.clone(),
                    username: Some(tb.access_token.clone()),
                    password: None,
                    keep_alive,
                    tls: None,
                },
                data_topic: topics::THINGSBOARD_TELEMETRY.to_string(),
                ack: None,
                handshake: Some(Handshake::ThingsBoardSleepTime),
                encoding: Encoding::TimeSeries,
            },
            CloudTarget::Blynk(blynk) => Self {
                target: target.name(),
                broker: BrokerOptions {
                    host: blynk.host.clone(),
                    port: blynk.port,
                    client_id: config.device_uid.clone(),
                    username: Some("device".to_string()),
                    password: Some(blynk.auth_token.clone()),
                    keep_alive,
                    tls: Some(TlsMaterial::default()),
                },
                data_topic: topics::BLYNK_BATCH.to_string(),
                ack: None,
                handshake: None,
                encoding: Encoding::Blynk {
                    temperature_datastream: blynk.temperature_datastream.clone(),
                    humidity_datastream: blynk.humidity_datastream.clone(),
                },
            },
            CloudTarget::Ibm(ibm) => {
                let topic = topics::ibm_event(&ibm.event);
                Self {
                    target: target.name(),
                    broker: BrokerOptions {
                        host: topics::ibm_host(&ibm.organization),
                        port: ibm.port,
                        client_id: topics::ibm_client_id(
                            &ibm.organization,
                            &ibm.device_type,
                            &ibm.device_id,
                        ),
                        username: Some("use-token-auth".to_string()),
                        password: Some(ibm.auth_token.clone()),
                        keep_alive,
                        tls: None,
                    },
                    ack: Some(AckTopics {
                        status: topics::status_topic(&topic),
                        error: topics::error_topic(&topic),
                    }),
                    data_topic: topic,
                    handshake: None,
                    encoding: Encoding::Flat,
                }
            }
        };
        Ok(handle)
    }

    /// Cloud name, for logs.
    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn broker(&self) -> &BrokerOptions {
        &self.broker
    }

    pub fn data_topic(&self) -> &str {
        &self.data_topic
    }

    pub fn ack_topics(&self) -> Option<&AckTopics> {
        self.ack.as_ref()
    }

    pub fn handshake(&self) -> Option<&Handshake> {
        self.handshake.as_ref()
    }

    /// Encode `envelope` in this cloud's wire format.
    pub fn encode(&self, envelope: &MeasurementEnvelope) -> Result<Vec<u8>, CodecError> {
        match &self.encoding {
            Encoding::Envelope => codec::encode_aws(envelope),
            Encoding::TimeSeries => codec::encode_thingsboard(envelope),
            Encoding::Flat => codec::encode_flat(envelope),
            Encoding::Blynk {
                temperature_datastream,
                humidity_datastream,
            } => codec::encode_blynk(envelope, temperature_datastream, humidity_datastream),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
