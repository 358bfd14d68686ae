//! Test doubles for the bus and the sensor backend
//!
//! `MockConnector` replays a script of connect outcomes and hands out
//! `MockBus` handles that record every publish instead of sending it.

use crate::bus::{BusAddress, BusConnector, BusHandle};
use crate::error::{BackendError, BusError};
use crate::metrics::{Readings, SensorBackend};
use crate::query::QueryModel;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct MockMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl MockMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap()
    }
}

/// Records publishes; optionally fails them all.
#[derive(Clone, Default)]
pub struct MockBus {
    published: Arc<Mutex<Vec<MockMessage>>>,
    fail_publish: bool,
}

impl MockBus {
    pub fn published(&self) -> Vec<MockMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl BusHandle for MockBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        if self.fail_publish {
            return Err(BusError::Publish("connection closed".into()));
        }
        self.published.lock().unwrap().push(MockMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Connect outcomes are taken from the script in order; an exhausted
/// script keeps failing.
#[derive(Clone, Default)]
pub struct MockConnector {
    script: Arc<Mutex<VecDeque<bool>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    bus: MockBus,
}

impl MockConnector {
    pub fn new(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            ..Self::default()
        }
    }

    pub fn succeeding() -> Self {
        Self::new([true])
    }

    pub fn failing() -> Self {
        Self::new([])
    }

    pub fn with_failing_publish(mut self) -> Self {
        self.bus.fail_publish = true;
        self
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn bus(&self) -> MockBus {
        self.bus.clone()
    }
}

#[async_trait]
impl BusConnector for MockConnector {
    type Handle = MockBus;

    async fn connect(&self, address: &BusAddress) -> Result<MockBus, BusError> {
        self.attempts.lock().unwrap().push(Instant::now());
        let succeed = self.script.lock().unwrap().pop_front().unwrap_or(false);
        if succeed {
            Ok(self.bus.clone())
        } else {
            Err(BusError::Connection(format!("{} refused", address)))
        }
    }
}

/// Replays canned readings, one per read; the last one repeats.
pub struct ScriptedBackend {
    script: VecDeque<Result<Readings, String>>,
    last: Option<Readings>,
    pub queries: Vec<QueryModel>,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = Result<Readings, String>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: None,
            queries: Vec::new(),
        }
    }

    pub fn constant(readings: Readings) -> Self {
        Self::new([Ok(readings)])
    }
}

#[async_trait]
impl SensorBackend for ScriptedBackend {
    async fn read(&mut self, query: &QueryModel) -> Result<Readings, BackendError> {
        self.queries.push(query.clone());
        match self.script.pop_front() {
            Some(Ok(readings)) => {
                self.last = Some(readings.clone());
                Ok(readings)
            }
            Some(Err(reason)) => Err(BackendError::Read(reason)),
            None => self
                .last
                .clone()
                .ok_or_else(|| BackendError::Read("script exhausted".into())),
        }
    }
}

/// Build readings from a JSON object literal.
pub fn readings(value: serde_json::Value) -> Readings {
    serde_json::from_value(value).unwrap()
}
