//! # sensornode-core
//!
//! Core data model and durable configuration for the sensor node.
//!
//! This crate provides:
//! - Data model types (Credential, ScanResult, Sample, MeasurementEnvelope)
//! - The persisted device configuration and its cloud target selector
//! - The measurement cycle token that survives deep sleep
//! - Configuration storage abstraction with memory and file backends
//!
//! This crate is intentionally runtime-agnostic and contains no async code,
//! making it usable on both Linux hosts and ESP32 (esp-idf) targets.

pub mod config;
pub mod model;
pub mod phase;
pub mod store;

pub use config::*;
pub use model::*;
pub use phase::{CyclePhase, CycleState, ProgressFlags};
pub use store::FileConfigStorage;
