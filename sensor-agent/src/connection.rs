//! Bus connection state machine
//!
//! ```text
//! Disconnected --attempt ok--> Connected
//! Disconnected --attempt failed, tries left--> Disconnected (pause)
//! Disconnected --attempt failed, no tries left--> Failed
//! ```
//!
//! `Failed` is terminal for the life of the process, and so is a connection
//! lost after `Connected`: nothing here ever reconnects.

use crate::bus::{BusAddress, BusConnector};
use std::time::Duration;
use tracing::{info, warn};

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
    Failed,
}

/// Holds at most one bus handle for the process lifetime.
pub struct ConnectionManager<C: BusConnector> {
    connector: C,
    address: BusAddress,
    policy: RetryPolicy,
    state: ConnectionState,
    handle: Option<C::Handle>,
}

impl<C: BusConnector> ConnectionManager<C> {
    pub fn new(connector: C, address: BusAddress) -> Self {
        Self::with_policy(connector, address, RetryPolicy::default())
    }

    pub fn with_policy(connector: C, address: BusAddress, policy: RetryPolicy) -> Self {
        Self {
            connector,
            address,
            policy,
            state: ConnectionState::Disconnected,
            handle: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The live handle, only when `Connected`.
    pub fn handle(&self) -> Option<&C::Handle> {
        self.handle.as_ref()
    }

    /// Resolve to `Connected` or `Failed`, retrying per the policy.
    ///
    /// Calling again once resolved returns the same state without touching
    /// the bus.
    pub async fn connect(&mut self) -> ConnectionState {
        if self.state != ConnectionState::Disconnected {
            return self.state;
        }

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.connector.connect(&self.address).await {
                Ok(handle) => {
                    info!("Connected to {} (attempt {}/{})", self.address, attempt, max_attempts);
                    self.handle = Some(handle);
                    self.state = ConnectionState::Connected;
                    return self.state;
                }
                Err(e) => {
                    warn!("Cannot connect to {}: {}", self.address, e);
                    if attempt < max_attempts {
                        info!("Retry in {} seconds", self.policy.delay.as_secs());
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        warn!("Retries exhausted; publishing disabled");
        self.state = ConnectionState::Failed;
        self.state
    }
}
