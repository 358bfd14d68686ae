//! Publishing schedule
//!
//! Connect once. When connected, wait a grace period so subscribers can
//! register, publish immediately, then publish on a fixed interval. When not
//! connected, stay idle: the process keeps running without publishing.

use crate::bus::BusConnector;
use crate::collector::Collector;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::metrics::SensorBackend;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const STARTUP_GRACE: Duration = Duration::from_secs(10);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub grace: Duration,
    pub interval: Duration,
}

impl Schedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            grace: STARTUP_GRACE,
            interval,
        }
    }
}

pub struct Scheduler<C: BusConnector, B: SensorBackend> {
    connection: ConnectionManager<C>,
    collector: Collector<B>,
    schedule: Schedule,
}

impl<C: BusConnector, B: SensorBackend> Scheduler<C, B> {
    pub fn new(connection: ConnectionManager<C>, collector: Collector<B>, schedule: Schedule) -> Self {
        Self {
            connection,
            collector,
            schedule,
        }
    }

    /// Run until the process is terminated.
    pub async fn run(mut self) {
        if self.run_cycles(None).await == 0 {
            info!("Not connected; idle");
            std::future::pending::<()>().await;
        }
    }

    /// Connect, then run at most `limit` cycles (unbounded for `None`).
    /// Returns the number of cycles run; zero when the bus never connected.
    async fn run_cycles(&mut self, limit: Option<u64>) -> u64 {
        if self.connection.connect().await != ConnectionState::Connected {
            warn!("No bus connection; publishing disabled");
            return 0;
        }

        debug!("Delay {} seconds before initial publish", self.schedule.grace.as_secs());
        tokio::time::sleep(self.schedule.grace).await;

        // tokio rejects a zero period
        let period = self.schedule.interval.max(MIN_INTERVAL);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut cycles = 0;
        loop {
            let outcome = self.collector.collect_and_publish(&self.connection).await;
            debug!("Cycle {} finished: {:?}", cycles + 1, outcome);
            cycles += 1;
            if limit.is_some_and(|limit| cycles >= limit) {
                return cycles;
            }
            ticker.tick().await;
        }
    }
}
