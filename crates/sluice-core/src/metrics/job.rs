use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::reporter::{Reporter, ReporterRegistry};
use super::{MetricContext, MetricSnapshot, MetricsRegistry, TASKS_COMPLETED, TASKS_FAILED, TASKS_RETRIED};
use crate::config::MetricsConfig;
use crate::domain::{JobId, TaskId, WorkingState};
use crate::error::ReporterError;

struct Reporting {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

/// Metrics of one job run: the job context, per-task contexts and the
/// periodic reporting loop.
pub struct JobMetrics {
    job_id: JobId,
    config: MetricsConfig,
    registry: Arc<MetricsRegistry>,
    reporters: Arc<ReporterRegistry>,
    job_context: Arc<MetricContext>,

    /// Names of every context created for this job, job context first.
    context_names: Arc<Mutex<Vec<String>>>,
    reporting: Mutex<Option<Reporting>>,
}

impl JobMetrics {
    /// Fails if `config.reporters` names an unknown reporter.
    pub fn new(
        job_id: JobId,
        config: MetricsConfig,
        registry: Arc<MetricsRegistry>,
        reporters: Arc<ReporterRegistry>,
    ) -> Result<Self, ReporterError> {
        reporters.validate(&config.reporters)?;

        let tags = BTreeMap::from([("job_id".to_string(), job_id.to_string())]);
        let job_context = registry.get_or_create(job_id.as_str(), tags);

        Ok(Self {
            context_names: Arc::new(Mutex::new(vec![job_id.to_string()])),
            job_id,
            config,
            registry,
            reporters,
            job_context,
            reporting: Mutex::new(None),
        })
    }

    pub fn job_context(&self) -> &Arc<MetricContext> {
        &self.job_context
    }

    pub fn task_context(&self, task_id: &TaskId) -> Arc<MetricContext> {
        let tags = BTreeMap::from([
            ("job_id".to_string(), self.job_id.to_string()),
            ("task_id".to_string(), task_id.to_string()),
        ]);
        let context = self.registry.get_or_create(task_id.as_str(), tags);
        self.context_names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task_id.to_string());
        context
    }

    /// Count a finalized task.
    pub fn record_task_outcome(&self, state: WorkingState) {
        self.job_context.counter(TASKS_COMPLETED).inc(1);
        if state == WorkingState::Failed {
            self.job_context.counter(TASKS_FAILED).inc(1);
        }
    }

    pub fn record_retry(&self) {
        self.job_context.counter(TASKS_RETRIED).inc(1);
    }

    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        collect_snapshots(&self.registry, &self.context_names)
    }

    /// Start the periodic reporting loop. A second call is a no-op.
    ///
    /// Reporters that fail to build are logged and skipped.
    pub fn start_reporting(&self) {
        let mut reporting = self
            .reporting
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if reporting.is_some() {
            warn!(job_id = %self.job_id, "metrics reporting already started");
            return;
        }

        let mut built: Vec<Box<dyn Reporter>> = Vec::new();
        for name in &self.config.reporters {
            match self.reporters.build(name, &self.config) {
                Ok(reporter) => built.push(reporter),
                Err(e) => warn!(job_id = %self.job_id, reporter = %name, error = %e, "reporter not started"),
            }
        }

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        let registry = Arc::clone(&self.registry);
        let names = Arc::clone(&self.context_names);
        let period = self.config.report_interval();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => {
                        report_all(&built, &collect_snapshots(&registry, &names));
                        break;
                    }
                    _ = ticker.tick() => {
                        report_all(&built, &collect_snapshots(&registry, &names));
                    }
                }
            }
        });

        debug!(job_id = %self.job_id, "metrics reporting started");
        *reporting = Some(Reporting { shutdown, join });
    }

    /// Stop the reporting loop after one final report.
    pub async fn stop_reporting(&self) {
        let reporting = self
            .reporting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Reporting { shutdown, join }) = reporting {
            shutdown.cancel();
            if let Err(e) = join.await {
                warn!(job_id = %self.job_id, error = %e, "metrics reporting loop failed");
            }
        }
    }

    /// Drop every context of this job from the registry.
    pub fn close(&self) {
        let names = std::mem::take(
            &mut *self
                .context_names
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for name in names {
            self.registry.remove(&name);
        }
    }
}

fn collect_snapshots(registry: &MetricsRegistry, names: &Mutex<Vec<String>>) -> Vec<MetricSnapshot> {
    let names = names
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    names
        .iter()
        .filter_map(|name| registry.get(name))
        .map(|ctx| ctx.snapshot())
        .collect()
}

fn report_all(reporters: &[Box<dyn Reporter>], snapshots: &[MetricSnapshot]) {
    for reporter in reporters {
        if let Err(e) = reporter.report(snapshots) {
            warn!(reporter = reporter.name(), error = %e, "metrics report failed");
        }
    }
}
