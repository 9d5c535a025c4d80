//! # sensornode-controller
//!
//! Device-side orchestration of the sensor node.
//!
//! This crate provides:
//! - `ConnectivityManager`: saved credentials to a live station link, plus
//!   the access point used for interactive configuration
//! - `TelemetryTransport`: one publish operation over five cloud dialects
//! - `PowerCycle`: wake cause discrimination and sleep duration
//! - `EventScheduler`: the FIFO event queue and its single consumer loop
//!
//! Hardware and network access go through collaborator traits (`Radio`,
//! `MqttConnector`, `Sensor`, `Clock`, `Indicator`, `PowerControl`,
//! `ConfigurationServer`)
//! so the same orchestration runs on ESP32 and on Linux hosts. Everything is
//! synchronous: one consumer thread, plus one configuration server thread
//! while the node is being configured.

pub mod adapter;
pub mod clock;
pub mod config_cell;
pub mod connectivity;
pub mod error;
pub mod event;
pub mod hook;
pub mod indicator;
pub mod mqtt;
pub mod power;
pub mod scheduler;
pub mod sensor;
pub mod transport;

pub use adapter::CloudAdapterHandle;
pub use clock::{format_timestamp, Clock};
pub use config_cell::ConfigCell;
pub use connectivity::{rank_candidates, ConnectivityManager, ConnectivitySettings, Radio};
pub use error::*;
pub use event::{Event, EventKind, EventQueue};
pub use hook::{ConfigurationHook, ConfigurationServer, NodeStatus};
pub use mqtt::{BrokerOptions, InboundMessage, MqttConnector, MqttSession, QoS, TlsMaterial};
pub use power::{
    classify_wake, compute_sleep_duration, PowerControl, PowerCycle, ResetCause, WakeCause,
    WakeReason, MIN_SLEEP_MS,
};
pub use scheduler::{EventScheduler, NodeParts, SchedulerSettings, SleepReport};
pub use indicator::{Indicator, NoIndicator};
pub use sensor::{Instruments, Sensor, TestAcquisition};
pub use transport::{PublishReport, TelemetryTransport, TransportSettings};
