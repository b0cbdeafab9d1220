//! Metrics - counters, meters and their reporting.
//!
//! No global state: contexts live in an explicit `MetricsRegistry` and
//! reporters are looked up by name in a `ReporterRegistry`.

pub mod job;
pub mod registry;
pub mod reporter;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;

pub use self::job::JobMetrics;
pub use self::registry::MetricsRegistry;
pub use self::reporter::{LogReporter, Reporter, ReporterFactory, ReporterRegistry};

/// Records written by a task.
pub const RECORDS: &str = "records";
/// Bytes written by a task.
pub const BYTES: &str = "bytes";
/// Rate of records written by a task.
pub const RECORDS_RATE: &str = "records.rate";
pub const TASKS_COMPLETED: &str = "tasks.completed";
pub const TASKS_FAILED: &str = "tasks.failed";
pub const TASKS_RETRIED: &str = "tasks.retried";

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn inc(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Counts events and derives a mean rate since creation.
#[derive(Debug)]
pub struct Meter {
    count: AtomicU64,
    started_at: Instant,
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

impl Meter {
    pub fn mark(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Events per second since the meter was created.
    pub fn mean_rate(&self) -> f64 {
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.count() as f64 / elapsed
    }
}

/// Named, tagged group of metrics (one per job and one per task).
#[derive(Debug)]
pub struct MetricContext {
    name: String,
    tags: BTreeMap<String, String>,
    counters: DashMap<String, Arc<Counter>>,
    meters: DashMap<String, Arc<Meter>>,
}

impl MetricContext {
    pub fn new(name: impl Into<String>, tags: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            tags,
            counters: DashMap::new(),
            meters: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        Arc::clone(self.counters.entry(name.to_string()).or_default().value())
    }

    pub fn meter(&self, name: &str) -> Arc<Meter> {
        Arc::clone(self.meters.entry(name.to_string()).or_default().value())
    }

    pub fn snapshot(&self) -> MetricSnapshot {
        MetricSnapshot {
            context: self.name.clone(),
            tags: self.tags.clone(),
            counters: self
                .counters
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().count()))
                .collect(),
            meters: self
                .meters
                .iter()
                .map(|entry| {
                    let meter = entry.value();
                    (
                        entry.key().clone(),
                        MeterSnapshot {
                            count: meter.count(),
                            mean_rate: meter.mean_rate(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Values of one `MetricContext` at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    pub context: String,
    pub tags: BTreeMap<String, String>,
    pub counters: BTreeMap<String, u64>,
    pub meters: BTreeMap<String, MeterSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeterSnapshot {
    pub count: u64,
    pub mean_rate: f64,
}
