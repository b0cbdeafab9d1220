use std::collections::HashMap;

use tracing::info;

use super::MetricSnapshot;
use crate::config::MetricsConfig;
use crate::error::{RegistryError, ReporterError};

/// Sink for metric snapshots.
pub trait Reporter: Send + Sync {
    fn name(&self) -> &str;

    fn report(&self, snapshots: &[MetricSnapshot]) -> Result<(), ReporterError>;
}

/// Builds a reporter from the metrics configuration.
pub type ReporterFactory = fn(&MetricsConfig) -> Result<Box<dyn Reporter>, ReporterError>;

/// Registry of reporter constructors (name -> factory).
///
/// Names listed in `metrics.reporters` are validated against this registry
/// before a job starts, so a typo fails the launch instead of silently
/// dropping metrics.
pub struct ReporterRegistry {
    factories: HashMap<String, ReporterFactory>,
}

impl ReporterRegistry {
    /// An empty registry (no reporters at all).
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: ReporterFactory,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(RegistryError::DuplicateReporter(name));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn validate(&self, names: &[String]) -> Result<(), ReporterError> {
        match names.iter().find(|name| !self.contains(name)) {
            Some(unknown) => Err(ReporterError::UnknownReporter(unknown.clone())),
            None => Ok(()),
        }
    }

    pub fn build(
        &self,
        name: &str,
        config: &MetricsConfig,
    ) -> Result<Box<dyn Reporter>, ReporterError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ReporterError::UnknownReporter(name.to_string()))?;
        factory(config)
    }
}

impl Default for ReporterRegistry {
    /// Registry with the built-in `log` reporter.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.factories.insert(LogReporter::NAME.to_string(), LogReporter::factory);
        registry
    }
}

/// Writes every snapshot as a structured `tracing` event.
#[derive(Debug, Default)]
pub struct LogReporter;

impl LogReporter {
    pub const NAME: &'static str = "log";

    fn factory(_config: &MetricsConfig) -> Result<Box<dyn Reporter>, ReporterError> {
        Ok(Box::new(LogReporter))
    }
}

impl Reporter for LogReporter {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn report(&self, snapshots: &[MetricSnapshot]) -> Result<(), ReporterError> {
        for snapshot in snapshots {
            let body = serde_json::to_string(snapshot).map_err(|e| ReporterError::Report {
                name: Self::NAME.to_string(),
                reason: e.to_string(),
            })?;
            info!(context = %snapshot.context, metrics = %body, "metrics");
        }
        Ok(())
    }
}
