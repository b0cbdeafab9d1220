use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use super::MetricContext;

/// Explicit home of every live `MetricContext`, keyed by context name.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    contexts: DashMap<String, Arc<MetricContext>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing context for `name`, or a new one with `tags`.
    pub fn get_or_create(&self, name: &str, tags: BTreeMap<String, String>) -> Arc<MetricContext> {
        let entry = self
            .contexts
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MetricContext::new(name, tags)));
        Arc::clone(entry.value())
    }

    pub fn get(&self, name: &str) -> Option<Arc<MetricContext>> {
        self.contexts.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, name: &str) -> Option<Arc<MetricContext>> {
        self.contexts.remove(name).map(|(_, ctx)| ctx)
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_returns_the_same_context() {
        let registry = MetricsRegistry::new();
        let first = registry.get_or_create("job_a_1", BTreeMap::new());
        let second = registry.get_or_create("job_a_1", BTreeMap::new());

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn removed_context_is_gone() {
        let registry = MetricsRegistry::new();
        registry.get_or_create("job_a_1", BTreeMap::new());

        assert!(registry.remove("job_a_1").is_some());
        assert!(registry.get("job_a_1").is_none());
        assert!(registry.is_empty());
    }
}
