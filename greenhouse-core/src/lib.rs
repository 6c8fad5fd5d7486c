//! Control core for an autonomous greenhouse controller.
//!
//! This crate is the hardware-independent half of the system: sensor
//! sampling and bound evaluation, relay arbitration, the key/value settings
//! store, the software heartbeat/watchdog, the message log, remote alert
//! dispatch, and the hourly report scheduler. Everything that touches a
//! real peripheral (I²C drivers, GPIO, WiFi, HTTP transport specifics) is
//! expressed as a trait in [`collaborators`]; the `greenhouse` binary crate
//! supplies concrete (or simulated) implementations and owns the tokio
//! runtime that drives these components.

pub mod alert;
pub mod bounds;
pub mod clock;
pub mod collaborators;
pub mod error;
pub mod flags;
pub mod heartbeat;
pub mod light;
pub mod message_log;
pub mod relay;
pub mod report;
pub mod runtime;
pub mod settings;
pub mod soil;
pub mod store;
pub mod sync;
pub mod temp_hum;

pub use error::{GreenhouseError, GreenhouseResult};
