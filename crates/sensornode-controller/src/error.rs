//! Error types of the controller.
//!
//! Every error maps onto an `ErrorClass`. Only the scheduler looks at the
//! class to decide what a failure means for the current cycle; lower layers
//! just report.

use crate::event::EventKind;
use sensornode_core::ConfigError;
use sensornode_protocol::CodecError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy of the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Missing credentials, certificates or topics. Needs an operator.
    Configuration,
    /// No reachable network, join timeout, time sync failure.
    Connectivity,
    /// Broker connection or publish failure.
    Transport,
    /// Out of memory during encode or publish.
    ResourceExhaustion,
    Internal,
}

/// Radio driver failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("radio driver error: {0}")]
pub struct RadioError(pub String);

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("access point already active")]
    AccessPointActive,

    #[error("station link already active")]
    StationActive,

    #[error("no saved credentials")]
    NoCredentials,

    #[error("no reachable network ({attempted} join attempts)")]
    NoReachableNetwork { attempted: usize },

    #[error(transparent)]
    Radio(#[from] RadioError),
}

impl ConnectivityError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConnectivityError::NoCredentials => ErrorClass::Configuration,
            ConnectivityError::AccessPointActive | ConnectivityError::StationActive => {
                ErrorClass::Internal
            }
            ConnectivityError::NoReachableNetwork { .. } | ConnectivityError::Radio(_) => {
                ErrorClass::Connectivity
            }
        }
    }
}

/// Errors reported by an MQTT client implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MqttError {
    /// The broker could not be reached or refused the connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// TLS material could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(String),

    /// Send or receive failed on an established connection.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("out of memory")]
    OutOfMemory,
}

impl MqttError {
    pub fn class(&self) -> ErrorClass {
        match self {
            MqttError::Tls(_) => ErrorClass::Configuration,
            MqttError::Connection(_) | MqttError::Transport(_) => ErrorClass::Transport,
            MqttError::OutOfMemory => ErrorClass::ResourceExhaustion,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("payload error: {0}")]
    Codec(#[from] CodecError),

    #[error("network link unavailable: {0}")]
    Connectivity(#[from] ConnectivityError),

    #[error("broker connection failed: {0}")]
    Connect(MqttError),

    #[error("MQTT error: {0}")]
    Mqtt(MqttError),

    /// The cloud answered on its error topic.
    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publish failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: MqttError },
}

impl TransportError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TransportError::Configuration(_) => ErrorClass::Configuration,
            TransportError::Codec(CodecError::EmptyPayload) => ErrorClass::Internal,
            TransportError::Codec(CodecError::SerializeError(_)) => ErrorClass::Internal,
            TransportError::Connectivity(e) => e.class(),
            TransportError::Connect(e) | TransportError::Mqtt(e) => e.class(),
            TransportError::Rejected(_) => ErrorClass::Transport,
            TransportError::RetriesExhausted { last, .. } => last.class(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("sensor read failed: {0}")]
    Read(String),

    #[error("sensor not available: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    #[error("time synchronization failed: {0}")]
    Sync(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PowerError {
    #[error("deep sleep failed: {0}")]
    Sleep(String),
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Clock(#[from] ClockError),

    #[error(transparent)]
    Power(#[from] PowerError),

    #[error("configuration server failed: {0}")]
    ConfigurationServer(String),

    #[error("{kind:?} timed out after {waited_ms} ms")]
    Timeout { kind: EventKind, waited_ms: u64 },

    /// A phase found its predecessor finished with a failure.
    #[error("{kind:?} skipped: previous phase failed")]
    PredecessorFailed { kind: EventKind },

    #[error("event payload invalid: {0}")]
    InvalidPayload(String),
}

impl SchedulerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SchedulerError::Config(_) => ErrorClass::Configuration,
            SchedulerError::Connectivity(e) => e.class(),
            SchedulerError::Transport(e) => e.class(),
            SchedulerError::Clock(_) => ErrorClass::Connectivity,
            SchedulerError::Power(_) => ErrorClass::Internal,
            SchedulerError::ConfigurationServer(_) => ErrorClass::Internal,
            SchedulerError::Timeout { .. } => ErrorClass::Internal,
            SchedulerError::PredecessorFailed { .. } => ErrorClass::Internal,
            SchedulerError::InvalidPayload(_) => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            TransportError::Configuration(ConfigError::Missing("aws.certificate".into())).class(),
            ErrorClass::Configuration
        );
        assert_eq!(
            TransportError::RetriesExhausted {
                attempts: 4,
                last: MqttError::Transport("reset".into())
            }
            .class(),
            ErrorClass::Transport
        );
        assert_eq!(
            TransportError::Mqtt(MqttError::OutOfMemory).class(),
            ErrorClass::ResourceExhaustion
        );
        assert_eq!(
            SchedulerError::from(ConnectivityError::NoReachableNetwork { attempted: 2 }).class(),
            ErrorClass::Connectivity
        );
        assert_eq!(
            ConnectivityError::NoCredentials.class(),
            ErrorClass::Configuration
        );
    }
}
