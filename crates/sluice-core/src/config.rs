//! Runtime configuration.
//!
//! Loaded either from a flat string property map (the `task.maxretries` style
//! keys job files use) or from a JSON file mirroring `RuntimeConfig`. Missing
//! keys fall back to the defaults below.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{JobCommitPolicy, RetryPolicy};
use crate::error::ConfigError;
use crate::metrics::ReporterRegistry;

pub const MAX_TASK_RETRIES_KEY: &str = "task.maxretries";
pub const TASK_STATUS_REPORT_INTERVAL_KEY: &str = "task.status.reportintervalinms";
pub const TASK_STATUS_REPORT_INTERVAL_UNIT_KEY: &str = "task.status.reportintervalunit";
pub const TASK_RETRY_INTERVAL_KEY: &str = "task.retry.intervalinms";
pub const TASK_RETRY_MULTIPLIER_KEY: &str = "task.retry.multiplier";
pub const EXECUTOR_POOL_SIZE_KEY: &str = "taskexecutor.threadpool.size";
pub const EXECUTOR_QUEUE_CAPACITY_KEY: &str = "taskexecutor.queue.capacity";
pub const MAX_CONCURRENT_MONITORS_KEY: &str = "task.monitor.max.concurrent";
pub const METRICS_ENABLED_KEY: &str = "metrics.enabled";
pub const METRICS_REPORT_INTERVAL_KEY: &str = "metrics.report.interval";
pub const METRICS_REPORTERS_KEY: &str = "metrics.reporters";
pub const JOB_CANCEL_TIMEOUT_KEY: &str = "job.cancel.timeout.ms";
pub const COLLECTOR_INTERVAL_KEY: &str = "task.state.collector.interval.seconds";
pub const JOB_COMMIT_POLICY_KEY: &str = "job.commit.policy";
pub const STATE_STORE_DIR_KEY: &str = "state.store.dir";

/// Unit of `task.status.reportintervalinms`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Ms,
    S,
    Min,
}

impl TimeUnit {
    pub fn to_duration(self, amount: u64) -> Duration {
        match self {
            TimeUnit::Ms => Duration::from_millis(amount),
            TimeUnit::S => Duration::from_secs(amount),
            TimeUnit::Min => Duration::from_secs(amount.saturating_mul(60)),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ms" | "milliseconds" => Ok(TimeUnit::Ms),
            "s" | "seconds" => Ok(TimeUnit::S),
            "min" | "minutes" => Ok(TimeUnit::Min),
            other => Err(format!("unknown time unit '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub report_interval_ms: u64,
    pub reporters: Vec<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            report_interval_ms: 60_000,
            reporters: vec!["log".to_string()],
        }
    }
}

impl MetricsConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A work unit may override `metrics.enabled` for its own task.
    pub fn is_enabled_for(&self, properties: &BTreeMap<String, String>) -> bool {
        properties
            .get(METRICS_ENABLED_KEY)
            .and_then(|v| parse_bool(v).ok())
            .unwrap_or(self.enabled)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_task_retries: u32,

    /// Monitor sampling interval, in `task_status_report_interval_unit`.
    pub task_status_report_interval: u64,
    pub task_status_report_interval_unit: TimeUnit,

    pub task_retry_interval_ms: u64,
    pub task_retry_multiplier: f64,

    pub executor_pool_size: usize,
    pub executor_queue_capacity: usize,
    pub max_concurrent_monitors: usize,

    pub metrics: MetricsConfig,

    pub job_cancel_timeout_ms: u64,
    pub collector_interval_secs: u64,
    pub commit_policy: JobCommitPolicy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_store_dir: Option<PathBuf>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_task_retries: 4,
            task_status_report_interval: 30_000,
            task_status_report_interval_unit: TimeUnit::Ms,
            task_retry_interval_ms: 0,
            task_retry_multiplier: 2.0,
            executor_pool_size: 10,
            executor_queue_capacity: 1024,
            max_concurrent_monitors: 1024,
            metrics: MetricsConfig::default(),
            job_cancel_timeout_ms: 30_000,
            collector_interval_secs: 60,
            commit_policy: JobCommitPolicy::Full,
            state_store_dir: None,
        }
    }
}

impl RuntimeConfig {
    /// Build from flat properties. Unknown keys are ignored.
    pub fn from_properties(properties: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (key, value) in properties {
            match key.as_str() {
                MAX_TASK_RETRIES_KEY => config.max_task_retries = parse(key, value)?,
                TASK_STATUS_REPORT_INTERVAL_KEY => {
                    config.task_status_report_interval = parse(key, value)?
                }
                TASK_STATUS_REPORT_INTERVAL_UNIT_KEY => {
                    config.task_status_report_interval_unit = parse(key, value)?
                }
                TASK_RETRY_INTERVAL_KEY => config.task_retry_interval_ms = parse(key, value)?,
                TASK_RETRY_MULTIPLIER_KEY => config.task_retry_multiplier = parse(key, value)?,
                EXECUTOR_POOL_SIZE_KEY => config.executor_pool_size = parse(key, value)?,
                EXECUTOR_QUEUE_CAPACITY_KEY => config.executor_queue_capacity = parse(key, value)?,
                MAX_CONCURRENT_MONITORS_KEY => config.max_concurrent_monitors = parse(key, value)?,
                METRICS_ENABLED_KEY => {
                    config.metrics.enabled = parse_bool(value).map_err(|reason| invalid(key, value, reason))?
                }
                METRICS_REPORT_INTERVAL_KEY => config.metrics.report_interval_ms = parse(key, value)?,
                METRICS_REPORTERS_KEY => {
                    config.metrics.reporters = value
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(str::to_string)
                        .collect()
                }
                JOB_CANCEL_TIMEOUT_KEY => config.job_cancel_timeout_ms = parse(key, value)?,
                COLLECTOR_INTERVAL_KEY => config.collector_interval_secs = parse(key, value)?,
                JOB_COMMIT_POLICY_KEY => {
                    config.commit_policy = match value.trim().to_ascii_lowercase().as_str() {
                        "full" => JobCommitPolicy::Full,
                        "partial" => JobCommitPolicy::Partial,
                        _ => return Err(invalid(key, value, "expected 'full' or 'partial'")),
                    }
                }
                STATE_STORE_DIR_KEY => config.state_store_dir = Some(PathBuf::from(value)),
                _ => {}
            }
        }

        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Fail fast on values the runtime cannot work with.
    pub fn validate(&self, reporters: &ReporterRegistry) -> Result<(), ConfigError> {
        non_zero(EXECUTOR_POOL_SIZE_KEY, self.executor_pool_size as u64)?;
        non_zero(EXECUTOR_QUEUE_CAPACITY_KEY, self.executor_queue_capacity as u64)?;
        non_zero(MAX_CONCURRENT_MONITORS_KEY, self.max_concurrent_monitors as u64)?;
        non_zero(TASK_STATUS_REPORT_INTERVAL_KEY, self.task_status_report_interval)?;
        non_zero(COLLECTOR_INTERVAL_KEY, self.collector_interval_secs)?;
        if self.metrics.enabled {
            non_zero(METRICS_REPORT_INTERVAL_KEY, self.metrics.report_interval_ms)?;
        }
        if !self.task_retry_multiplier.is_finite() || self.task_retry_multiplier < 1.0 {
            return Err(invalid(
                TASK_RETRY_MULTIPLIER_KEY,
                &self.task_retry_multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }
        reporters.validate(&self.metrics.reporters)?;
        Ok(())
    }

    pub fn task_status_report_interval(&self) -> Duration {
        self.task_status_report_interval_unit
            .to_duration(self.task_status_report_interval)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.task_retry_interval_ms),
            self.task_retry_multiplier,
        )
    }

    pub fn job_cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.job_cancel_timeout_ms)
    }

    pub fn collector_interval(&self) -> Duration {
        Duration::from_secs(self.collector_interval_secs)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, value, e.to_string()))
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(format!("'{other}' is not a boolean")),
    }
}

fn non_zero(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(invalid(key, "0", "must be greater than zero"));
    }
    Ok(())
}

fn invalid(key: &str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}
