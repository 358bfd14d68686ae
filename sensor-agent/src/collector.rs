//! Read sensors, flatten, publish
//!
//! Nested readings are flattened against the request that produced them:
//! a metric requested bare (`mem`) is published under its own name, every
//! other reading under `<metric>/<aspect>`.

use crate::bus::{BusConnector, BusHandle};
use crate::connection::ConnectionManager;
use crate::metrics::{Readings, SensorBackend};
use crate::query::QueryModel;
use crate::request::{RequestModel, DETAIL_SEPARATOR};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

/// Topic every snapshot is published on.
pub const SENSORS_TOPIC: &str = "sensors";

/// Key carrying the device identifier.
pub const SHORT_UUID_KEY: &str = "short_uuid";

/// Flat snapshot as published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct OutgoingMessage(Map<String, Value>);

impl OutgoingMessage {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Flatten readings into a message keyed per the request.
pub fn flatten(short_uuid: &str, readings: &Readings, model: &RequestModel) -> OutgoingMessage {
    let mut message = Map::new();
    message.insert(SHORT_UUID_KEY.to_string(), Value::String(short_uuid.to_string()));

    for (metric, aspects) in readings {
        let bare = match model.get(metric) {
            Some(request) => request.is_default_aspect(),
            None => {
                debug!("Reading for unrequested metric '{}'", metric);
                false
            }
        };

        for (aspect, value) in aspects {
            if value.is_array() || value.is_object() {
                warn!("Skipping non-scalar reading {}{}{}", metric, DETAIL_SEPARATOR, aspect);
                continue;
            }
            let key = if bare {
                metric.clone()
            } else {
                format!("{}{}{}", metric, DETAIL_SEPARATOR, aspect)
            };
            message.insert(key, value.clone());
        }
    }

    OutgoingMessage(message)
}

/// How a collect-and-publish cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Published,
    NotConnected,
    ReadFailed,
    PublishFailed,
}

/// Owns the parsed request and the sensor backend.
pub struct Collector<B: SensorBackend> {
    backend: B,
    request: RequestModel,
    query: QueryModel,
    short_uuid: String,
}

impl<B: SensorBackend> Collector<B> {
    pub fn new(backend: B, request: RequestModel, short_uuid: impl Into<String>) -> Self {
        let query = QueryModel::build(&request);
        Self {
            backend,
            request,
            query,
            short_uuid: short_uuid.into(),
        }
    }

    pub fn request(&self) -> &RequestModel {
        &self.request
    }

    pub fn query(&self) -> &QueryModel {
        &self.query
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// One cycle. Failures are logged here and never escalated.
    pub async fn collect_and_publish<C: BusConnector>(
        &mut self,
        connection: &ConnectionManager<C>,
    ) -> CycleOutcome {
        let readings = match self.backend.read(&self.query).await {
            Ok(readings) => readings,
            Err(e) => {
                error!("Sensor read failed, skipping cycle: {}", e);
                return CycleOutcome::ReadFailed;
            }
        };

        let message = flatten(&self.short_uuid, &readings, &self.request);
        let text = match message.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Cannot encode message: {}", e);
                return CycleOutcome::PublishFailed;
            }
        };

        let Some(handle) = connection.handle() else {
            warn!("Can't publish; not connected");
            return CycleOutcome::NotConnected;
        };

        match handle.publish(SENSORS_TOPIC, text.clone().into_bytes()).await {
            Ok(()) => {
                debug!("Published msg: {}", text);
                CycleOutcome::Published
            }
            Err(e) => {
                error!("Publish to '{}' failed: {}", SENSORS_TOPIC, e);
                CycleOutcome::PublishFailed
            }
        }
    }
}
