//! # sensornode-web
//!
//! Interactive configuration interface of the sensor node.
//!
//! This crate provides:
//! - REST endpoints for submitting a device configuration, reading the
//!   node status and reading the sensor on demand
//! - `HttpConfigurationServer`, the `ConfigurationServer` used on Linux hosts
//!
//! ## Architecture
//!
//! The scheduler runs synchronously on its own thread. While the node waits
//! for an operator, the HTTP server runs on a second thread with a private
//! current-thread Tokio runtime. Handlers reach the node only through the
//! `ConfigurationHook`.
//!
//! - `POST /config` - apply credentials and cloud target, then restart the cycle
//! - `GET /status` - access point, station link and cycle progress
//! - `GET /measurement` - one sensor reading outside the cycle
//! - `POST /measurement/test` - queue a test acquisition on the scheduler
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sensornode_web::HttpConfigurationServer;
//!
//! let server = HttpConfigurationServer::new("0.0.0.0:8080".parse()?);
//! let parts = NodeParts { configuration_server: Box::new(server), .. };
//! ```

pub mod routes;
pub mod server;

#[cfg(test)]
mod fixture;

pub use routes::{create_router, ApiResponse};
pub use server::HttpConfigurationServer;

use sensornode_controller::ConfigurationHook;

/// Shared state of all route handlers.
pub type AppState = ConfigurationHook;
