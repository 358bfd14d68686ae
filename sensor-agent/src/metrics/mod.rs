//! Sensor readings for the agent
//!
//! Evaluates a [`QueryModel`] against the host and returns nested readings
//! (metric -> aspect -> scalar). Supported metrics:
//! - `currentLoad`: CPU usage percent, 1-minute load average, core count
//! - `cpuTemperature`: average/max/critical of CPU thermal sensors
//! - `mem`: memory and swap usage in bytes
//! - `networkStats`: byte counters and rates, summed over interfaces
//! - `time`: uptime and boot time

use crate::error::BackendError;
use crate::query::{QueryDescription, QueryModel};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use sysinfo::{Components, Networks, System};
use tracing::debug;

/// Aspect name to scalar value for one metric.
pub type AspectValues = serde_json::Map<String, Value>;

/// Metric name to its aspect values.
pub type Readings = BTreeMap<String, AspectValues>;

/// Anything able to answer a [`QueryModel`].
#[async_trait]
pub trait SensorBackend: Send {
    async fn read(&mut self, query: &QueryModel) -> Result<Readings, BackendError>;
}

/// Labels that mark a thermal sensor as belonging to the CPU.
const CPU_SENSOR_HINTS: &[&str] = &["cpu", "core", "package", "tdie", "tctl", "soc"];

/// Interfaces left out of network totals unless named explicitly.
const LOOPBACK_PREFIX: &str = "lo";

/// Measured host state for one read.
#[derive(Debug, Clone, Default)]
pub struct HostSnapshot {
    pub cpu: CpuSnapshot,
    pub memory: MemorySnapshot,
    pub temperatures: Vec<TemperatureSensor>,
    pub interfaces: Vec<InterfaceCounters>,
    pub uptime_secs: u64,
    pub boot_time_secs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct CpuSnapshot {
    pub usage_percent: f32,
    pub load_one: f64,
    pub core_count: usize,
}

/// Memory figures in bytes.
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshot {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub available: u64,
    pub swap_total: u64,
    pub swap_used: u64,
    pub swap_free: u64,
}

#[derive(Debug, Clone)]
pub struct TemperatureSensor {
    pub label: String,
    pub celsius: f32,
    pub critical: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct InterfaceCounters {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Bytes received since the previous read.
    pub rx_delta: u64,
    pub tx_delta: u64,
}

impl HostSnapshot {
    /// Evaluate every metric of the query. Unknown metrics are left out.
    pub fn evaluate(&self, query: &QueryModel, elapsed: Option<Duration>) -> Result<Readings, BackendError> {
        let mut readings = Readings::new();

        for (metric, text) in query.iter() {
            let description = QueryDescription::parse(text).ok_or_else(|| BackendError::Query {
                metric: metric.clone(),
                reason: format!("unbalanced parameter list in '{}'", text),
            })?;

            let values = match metric.as_str() {
                "currentLoad" => self.current_load(&description),
                "cpuTemperature" => self.cpu_temperature(&description),
                "mem" => self.mem(&description),
                "networkStats" => self.network_stats(&description, elapsed),
                "time" => self.time(&description),
                _ => {
                    debug!("No sensor for metric '{}'", metric);
                    continue;
                }
            };

            if values.is_empty() {
                debug!("No known aspects in '{}' for metric '{}'", text, metric);
                continue;
            }
            readings.insert(metric.clone(), values);
        }

        Ok(readings)
    }

    fn current_load(&self, description: &QueryDescription) -> AspectValues {
        select(
            description,
            [
                ("currentLoad", json!(round2(self.cpu.usage_percent as f64))),
                ("avgLoad", json!(round2(self.cpu.load_one))),
                ("cpus", json!(self.cpu.core_count)),
            ],
        )
    }

    fn cpu_temperature(&self, description: &QueryDescription) -> AspectValues {
        let sensors: Vec<&TemperatureSensor> = if description.params.is_empty() {
            let cpu: Vec<_> = self
                .temperatures
                .iter()
                .filter(|s| label_matches(&s.label, CPU_SENSOR_HINTS.iter().copied()))
                .collect();
            if cpu.is_empty() {
                self.temperatures.iter().collect()
            } else {
                cpu
            }
        } else {
            self.temperatures
                .iter()
                .filter(|s| label_matches(&s.label, description.params.iter().map(String::as_str)))
                .collect()
        };

        let main = if sensors.is_empty() {
            Value::Null
        } else {
            let sum: f64 = sensors.iter().map(|s| s.celsius as f64).sum();
            json!(round2(sum / sensors.len() as f64))
        };
        let max = sensors
            .iter()
            .map(|s| s.celsius as f64)
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))))
            .map_or(Value::Null, |t| json!(round2(t)));
        let critical = sensors
            .iter()
            .find_map(|s| s.critical)
            .map_or(Value::Null, |t| json!(round2(t as f64)));

        select(description, [("main", main), ("max", max), ("critical", critical)])
    }

    fn mem(&self, description: &QueryDescription) -> AspectValues {
        let m = &self.memory;
        select(
            description,
            [
                ("total", json!(m.total)),
                ("free", json!(m.free)),
                ("used", json!(m.used)),
                ("active", json!(m.total.saturating_sub(m.available))),
                ("available", json!(m.available)),
                ("swaptotal", json!(m.swap_total)),
                ("swapused", json!(m.swap_used)),
                ("swapfree", json!(m.swap_free)),
            ],
        )
    }

    fn network_stats(&self, description: &QueryDescription, elapsed: Option<Duration>) -> AspectValues {
        let selected: Vec<&InterfaceCounters> = self
            .interfaces
            .iter()
            .filter(|iface| {
                if description.params.is_empty() {
                    !iface.name.starts_with(LOOPBACK_PREFIX)
                } else {
                    description.params.iter().any(|p| p == &iface.name)
                }
            })
            .collect();

        let (rx_bytes, tx_bytes, rx_sec, tx_sec) = if selected.is_empty() {
            (Value::Null, Value::Null, Value::Null, Value::Null)
        } else {
            let rx: u64 = selected.iter().map(|i| i.rx_bytes).sum();
            let tx: u64 = selected.iter().map(|i| i.tx_bytes).sum();
            let rate = |delta: u64| match elapsed {
                Some(e) if e.as_secs_f64() > 0.0 => json!(round2(delta as f64 / e.as_secs_f64())),
                _ => Value::Null,
            };
            let rx_delta: u64 = selected.iter().map(|i| i.rx_delta).sum();
            let tx_delta: u64 = selected.iter().map(|i| i.tx_delta).sum();
            (json!(rx), json!(tx), rate(rx_delta), rate(tx_delta))
        };

        select(
            description,
            [
                ("rx_bytes", rx_bytes),
                ("tx_bytes", tx_bytes),
                ("rx_sec", rx_sec),
                ("tx_sec", tx_sec),
            ],
        )
    }

    fn time(&self, description: &QueryDescription) -> AspectValues {
        select(
            description,
            [
                ("uptime", json!(self.uptime_secs)),
                ("boot", json!(self.boot_time_secs)),
            ],
        )
    }
}

/// Keep the offered aspects the description asks for, in the order asked.
fn select<const N: usize>(description: &QueryDescription, offered: [(&str, Value); N]) -> AspectValues {
    let mut values = AspectValues::new();
    if description.wants_all() {
        for (aspect, value) in offered {
            values.insert(aspect.to_string(), value);
        }
        return values;
    }

    let mut offered: Vec<(&str, Value)> = offered.into_iter().collect();
    for wanted in &description.aspects {
        match offered.iter().position(|(aspect, _)| aspect == wanted) {
            Some(index) => {
                let (aspect, value) = offered.remove(index);
                values.insert(aspect.to_string(), value);
            }
            None => debug!("Unknown aspect '{}'", wanted),
        }
    }
    values
}

fn label_matches<'a>(label: &str, mut needles: impl Iterator<Item = &'a str>) -> bool {
    let label = label.to_lowercase();
    needles.any(|needle| label.contains(&needle.to_lowercase()))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Host sensors read through `sysinfo`.
///
/// Keeps its handles between reads so CPU usage and network rates are
/// measured over the polling interval.
pub struct SysinfoBackend {
    system: System,
    networks: Networks,
    components: Components,
    last_read: Option<Instant>,
}

impl SysinfoBackend {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            last_read: None,
        }
    }

    async fn snapshot(&mut self, query: &QueryModel) -> HostSnapshot {
        let mut snapshot = HostSnapshot {
            uptime_secs: System::uptime(),
            boot_time_secs: System::boot_time(),
            ..HostSnapshot::default()
        };

        if query.get("currentLoad").is_some() {
            self.system.refresh_cpu_usage();
            if self.last_read.is_none() {
                // Usage is a delta between two refreshes
                tokio::time::sleep(Duration::from_millis(200)).await;
                self.system.refresh_cpu_usage();
            }
            let load = System::load_average();
            snapshot.cpu = CpuSnapshot {
                usage_percent: self.system.global_cpu_info().cpu_usage(),
                load_one: load.one,
                core_count: self.system.cpus().len(),
            };
        }

        if query.get("mem").is_some() {
            self.system.refresh_memory();
            snapshot.memory = MemorySnapshot {
                total: self.system.total_memory(),
                free: self.system.free_memory(),
                used: self.system.used_memory(),
                available: self.system.available_memory(),
                swap_total: self.system.total_swap(),
                swap_used: self.system.used_swap(),
                swap_free: self.system.free_swap(),
            };
        }

        if query.get("cpuTemperature").is_some() {
            self.components.refresh();
            snapshot.temperatures = (&self.components)
                .into_iter()
                .map(|c| TemperatureSensor {
                    label: c.label().to_string(),
                    celsius: c.temperature(),
                    critical: c.critical(),
                })
                .collect();
        }

        if query.get("networkStats").is_some() {
            self.networks.refresh();
            snapshot.interfaces = (&self.networks)
                .into_iter()
                .map(|(name, data)| InterfaceCounters {
                    name: name.clone(),
                    rx_bytes: data.total_received(),
                    tx_bytes: data.total_transmitted(),
                    rx_delta: data.received(),
                    tx_delta: data.transmitted(),
                })
                .collect();
        }

        snapshot
    }
}

impl Default for SysinfoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SensorBackend for SysinfoBackend {
    async fn read(&mut self, query: &QueryModel) -> Result<Readings, BackendError> {
        debug!("Reading sensors for {} metrics", query.len());
        let snapshot = self.snapshot(query).await;

        let now = Instant::now();
        let elapsed = self.last_read.map(|last| now.duration_since(last));
        self.last_read = Some(now);

        snapshot.evaluate(query, elapsed)
    }
}
