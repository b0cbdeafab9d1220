//! FsStateStore - ファイルシステム上の state store
//!
//! 配置: `<root>/<store_name>/<key>`。1 レコード 1 JSON ファイル。
//! `<key>.tmp` に書いてから rename するので、`list` が書きかけを読むことはない。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::domain::TaskState;
use crate::error::StoreError;
use crate::ports::StateStore;

const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, store_name: &str) -> Result<PathBuf, StoreError> {
        validate_segment(store_name)?;
        Ok(self.root.join(store_name))
    }
}

/// 名前はパス要素になるので区切り文字と `.`/`..` は不可
fn validate_segment(segment: &str) -> Result<(), StoreError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(())
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn put(&self, store_name: &str, key: &str, state: &TaskState) -> Result<(), StoreError> {
        validate_segment(key)?;
        let dir = self.store_dir(store_name)?;
        fs::create_dir_all(&dir).await?;

        let body = serde_json::to_vec_pretty(state)?;
        let tmp = dir.join(format!("{key}{TMP_SUFFIX}"));
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, dir.join(key)).await?;
        Ok(())
    }

    async fn get(&self, store_name: &str, key: &str) -> Result<Option<TaskState>, StoreError> {
        validate_segment(key)?;
        let path = self.store_dir(store_name)?.join(key);
        match fs::read(&path).await {
            Ok(body) => Ok(Some(serde_json::from_slice(&body)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, store_name: &str) -> Result<Vec<(String, TaskState)>, StoreError> {
        let dir = self.store_dir(store_name)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(key) = entry.file_name().into_string() else {
                continue;
            };
            if key.ends_with(TMP_SUFFIX) {
                continue;
            }
            let body = fs::read(entry.path()).await?;
            records.push((key, serde_json::from_slice(&body)?));
        }
        records.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(records)
    }
}
