//! Sensor Agent - host telemetry publisher
//!
//! Reads its settings from the environment, connects to the local MQTT
//! broker and publishes sensor snapshots until terminated.

use anyhow::{Context, Result};
use sensor_agent::bus::MqttConnector;
use sensor_agent::config;
use sensor_agent::metrics::SysinfoBackend;
use sensor_agent::{AgentConfig, Collector, ConnectionManager, RequestModel, Schedule, Scheduler};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // LOG_LEVEL wins over RUST_LOG
    let level = std::env::var(config::LOG_LEVEL_VAR)
        .ok()
        .filter(|level| !level.trim().is_empty());
    let directive = config::log_directive(level.as_deref());
    let filter = match &directive {
        Some(directive) => EnvFilter::new(directive),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let (Some(level), None) = (&level, &directive) {
        warn!("Unknown {} '{}', falling back to RUST_LOG or info", config::LOG_LEVEL_VAR, level);
    }

    let config = AgentConfig::from_env().context("Invalid configuration")?;

    info!("Sensor Agent v{} starting (device {})", env!("CARGO_PKG_VERSION"), config.short_uuid);
    info!("Request text: {}", config.request_text);
    info!("Reading interval: {} ms", config.reading_interval.as_millis());

    let request = RequestModel::parse(&config.request_text, config.delimiter);
    if request.is_empty() {
        info!("No valid metrics requested; messages will carry only the device id");
    }

    let connection = ConnectionManager::new(
        MqttConnector::for_device(&config.short_uuid),
        config.mqtt_address.clone(),
    );
    let collector = Collector::new(SysinfoBackend::new(), request, config.short_uuid.clone());

    Scheduler::new(connection, collector, Schedule::every(config.reading_interval))
        .run()
        .await;

    Ok(())
}
