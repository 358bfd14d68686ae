//! Sensor Agent - host telemetry publisher for edge devices
//!
//! Periodically samples host telemetry and publishes a flat JSON snapshot on
//! the `sensors` MQTT topic, tagged with a short device id:
//! - `request`: metric request mini-language parser
//! - `query`: backend query descriptions derived from a request
//! - `metrics`: sensor readings through `sysinfo`
//! - `collector`: flattening and publishing
//! - `connection`: bounded-retry bus connection
//! - `scheduler`: grace delay and fixed-interval publishing

pub mod bus;
pub mod collector;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod query;
pub mod request;
pub mod scheduler;

#[cfg(test)]
mod mock;

pub use collector::{flatten, Collector, OutgoingMessage};
pub use config::AgentConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use query::QueryModel;
pub use request::{ItemDelimiter, RequestModel};
pub use scheduler::{Schedule, Scheduler};
