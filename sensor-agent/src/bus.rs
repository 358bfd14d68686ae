//! MQTT message bus access
//!
//! The agent only needs two primitives from the bus: connect to an address
//! and publish a payload on a topic. Both sit behind traits so the connection
//! state machine and the publisher can be driven without a broker.

use crate::error::{BusError, ConfigError};
use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, Incoming, MqttOptions, Outgoing, QoS};
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAddress {
    pub host: String,
    pub port: u16,
}

impl BusAddress {
    /// Accepts `host`, `host:port`, `mqtt://host` and `mqtt://host:port`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let trimmed = text.trim();
        let rest = trimmed.strip_prefix("mqtt://").unwrap_or(trimmed);
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidAddress(text.to_string()))?;
                (host, port)
            }
            None => (rest, DEFAULT_MQTT_PORT),
        };

        if host.is_empty() || host.contains('/') {
            return Err(ConfigError::InvalidAddress(text.to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for BusAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mqtt://{}:{}", self.host, self.port)
    }
}

/// A live connection able to publish.
#[async_trait]
pub trait BusHandle: Send + Sync {
    /// Fire-and-forget: success only means the payload was handed over.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError>;
}

/// Opens connections to the bus.
#[async_trait]
pub trait BusConnector: Send + Sync {
    type Handle: BusHandle;

    async fn connect(&self, address: &BusAddress) -> Result<Self::Handle, BusError>;
}

/// Connects with `rumqttc`.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    client_id: String,
    keep_alive: Duration,
    connect_timeout: Duration,
}

impl MqttConnector {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Client id unique per process, so devices sharing the placeholder id
    /// do not kick each other off the broker.
    pub fn for_device(short_uuid: &str) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self::new(format!("sensor-agent-{}-{}", short_uuid, &suffix[..8]))
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl BusConnector for MqttConnector {
    type Handle = MqttBus;

    async fn connect(&self, address: &BusAddress) -> Result<MqttBus, BusError> {
        let mut options = MqttOptions::new(&self.client_id, &address.host, address.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, 10);

        let wait_for_ack = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => return Ok(ack),
                    Ok(other) => debug!("MQTT event before ConnAck: {:?}", other),
                    Err(e) => return Err(BusError::from(e)),
                }
            }
        };
        let ack = tokio::time::timeout(self.connect_timeout, wait_for_ack)
            .await
            .map_err(|_| BusError::Timeout)??;

        if ack.code != ConnectReturnCode::Success {
            return Err(BusError::Connection(format!("broker refused: {:?}", ack.code)));
        }
        info!("Connected to {} as {}", address, self.client_id);

        // Drives the session. Stops at the first transport error, after which
        // every publish fails: the agent never reconnects.
        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Publish(id))) => debug!("MQTT publish sent ({})", id),
                    Ok(_) => {}
                    Err(e) => {
                        error!("MQTT connection lost: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(MqttBus { client })
    }
}

/// Connected `rumqttc` client.
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
}

#[async_trait]
impl BusHandle for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await?;
        Ok(())
    }
}
