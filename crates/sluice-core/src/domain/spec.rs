//! Input specs for a job run (JobSpec / WorkUnit).
//!
//! Properties are flat string maps so work units can carry source-specific
//! settings without the core knowing about them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A Job is the unit of launch / cancellation / result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub job_name: String,

    /// One task is created per work unit, in order.
    pub work_units: Vec<WorkUnit>,

    /// Job-level properties, copied into the final `JobState`.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl JobSpec {
    pub fn new(job_name: impl Into<String>) -> Self {
        Self {
            job_name: job_name.into(),
            work_units: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_work_unit(mut self, work_unit: WorkUnit) -> Self {
        self.work_units.push(work_unit);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// A slice of work executed by exactly one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Selects the handler in the `HandlerRegistry`.
    pub task_type: String,

    /// Copied into the task's `TaskState` properties.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl WorkUnit {
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
