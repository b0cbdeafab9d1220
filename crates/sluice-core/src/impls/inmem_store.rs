//! InMemoryStateStore - プロセス内の state store
//!
//! store_name ごとに BTreeMap を持つので list は key 順になる。

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::TaskState;
use crate::error::StoreError;
use crate::ports::StateStore;

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    stores: RwLock<HashMap<String, BTreeMap<String, TaskState>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(&self, store_name: &str, key: &str, state: &TaskState) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        self.stores
            .write()
            .await
            .entry(store_name.to_string())
            .or_default()
            .insert(key.to_string(), state.clone());
        Ok(())
    }

    async fn get(&self, store_name: &str, key: &str) -> Result<Option<TaskState>, StoreError> {
        Ok(self
            .stores
            .read()
            .await
            .get(store_name)
            .and_then(|store| store.get(key))
            .cloned())
    }

    async fn list(&self, store_name: &str) -> Result<Vec<(String, TaskState)>, StoreError> {
        Ok(self
            .stores
            .read()
            .await
            .get(store_name)
            .map(|store| {
                store
                    .iter()
                    .map(|(key, state)| (key.clone(), state.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
