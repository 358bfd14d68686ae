//! Agent configuration from the environment
//!
//! Handles:
//! - device identifier (`BALENA_DEVICE_UUID`)
//! - broker address (`MQTT_ADDRESS`)
//! - metric request and its item delimiter
//! - reading interval, in milliseconds or seconds
//! - log level
//!
//! Empty variables count as unset.

use crate::bus::BusAddress;
use crate::error::ConfigError;
use crate::request::{ItemDelimiter, DEFAULT_REQUEST};
use std::time::Duration;
use tracing::warn;

pub const DEVICE_UUID_VAR: &str = "BALENA_DEVICE_UUID";
pub const MQTT_ADDRESS_VAR: &str = "MQTT_ADDRESS";
pub const METRICS_REQUEST_VAR: &str = "METRICS_REQUEST";
pub const METRICS_REQUEST_DELIMITER_VAR: &str = "METRICS_REQUEST_DELIMITER";
pub const READING_INTERVAL_MS_VAR: &str = "READING_INTERVAL_MS";
pub const READING_INTERVAL_SEC_VAR: &str = "READING_INTERVAL_SEC";
pub const LOG_LEVEL_VAR: &str = "LOG_LEVEL";

/// Used when no device UUID is set, e.g. local testing.
pub const PLACEHOLDER_SHORT_UUID: &str = "xxxxxxx";
const SHORT_UUID_LEN: usize = 7;

pub const DEFAULT_MQTT_HOST: &str = "localhost";
pub const DEFAULT_READING_INTERVAL: Duration = Duration::from_millis(10_000);

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub short_uuid: String,
    pub mqtt_address: BusAddress,
    pub request_text: String,
    pub delimiter: ItemDelimiter,
    pub reading_interval: Duration,
    pub log_level: Option<String>,
}

impl AgentConfig {
    /// Load from the process environment, after reading `.env` if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let short_uuid = short_uuid(var(DEVICE_UUID_VAR).as_deref());

        let mqtt_address = match var(MQTT_ADDRESS_VAR) {
            Some(address) => BusAddress::parse(&address)?,
            None => {
                warn!("{} not set, using {}", MQTT_ADDRESS_VAR, DEFAULT_MQTT_HOST);
                BusAddress::parse(DEFAULT_MQTT_HOST)?
            }
        };

        let request_text = var(METRICS_REQUEST_VAR).unwrap_or_else(|| DEFAULT_REQUEST.to_string());

        let delimiter = match var(METRICS_REQUEST_DELIMITER_VAR) {
            Some(name) => ItemDelimiter::from_name(&name).ok_or(ConfigError::InvalidValue {
                name: METRICS_REQUEST_DELIMITER_VAR,
                value: name,
            })?,
            None => ItemDelimiter::default(),
        };

        let reading_interval = reading_interval(
            var(READING_INTERVAL_MS_VAR).as_deref(),
            var(READING_INTERVAL_SEC_VAR).as_deref(),
        );

        Ok(Self {
            short_uuid,
            mqtt_address,
            request_text,
            delimiter,
            reading_interval,
            log_level: var(LOG_LEVEL_VAR),
        })
    }

    pub fn log_directive(&self) -> Option<String> {
        log_directive(self.log_level.as_deref())
    }
}

/// `tracing-subscriber` filter directive for a `LOG_LEVEL` value.
///
/// Runs before any subscriber exists, so an unknown level is returned as
/// `None` without logging; the caller reports it once logging is up.
pub fn log_directive(level: Option<&str>) -> Option<String> {
    let level = level?.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Some(level),
        "silent" | "off" => Some("off".to_string()),
        _ => None,
    }
}

/// First characters of the device UUID.
pub fn short_uuid(device_uuid: Option<&str>) -> String {
    match device_uuid {
        Some(uuid) => uuid.trim().chars().take(SHORT_UUID_LEN).collect(),
        None => PLACEHOLDER_SHORT_UUID.to_string(),
    }
}

/// Milliseconds win over seconds; invalid or zero values fall through.
fn reading_interval(millis: Option<&str>, secs: Option<&str>) -> Duration {
    if let Some(text) = millis {
        match text.trim().parse::<u64>() {
            Ok(ms) if ms > 0 => return Duration::from_millis(ms),
            _ => warn!("Ignoring {}='{}'", READING_INTERVAL_MS_VAR, text),
        }
    }
    if let Some(text) = secs {
        match text.trim().parse::<f64>() {
            // Sub-millisecond values round to zero and count as invalid
            Ok(s) if s.is_finite() && (s * 1000.0).round() >= 1.0 => {
                return Duration::from_millis((s * 1000.0).round() as u64);
            }
            _ => warn!("Ignoring {}='{}'", READING_INTERVAL_SEC_VAR, text),
        }
    }
    DEFAULT_READING_INTERVAL
}
