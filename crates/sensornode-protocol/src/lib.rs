//! # sensornode-protocol
//!
//! Wire formats of the supported cloud back ends.
//!
//! Each cloud speaks its own MQTT dialect. This crate defines, per cloud:
//! - The topics data, acknowledgements and handshakes travel on
//! - The encoding of a measurement envelope into the published payload
//! - The messages a cloud sends back (delivery status, remote settings)

pub mod codec;
pub mod messages;
pub mod topics;

pub use codec::*;
pub use messages::*;
