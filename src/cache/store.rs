// src/cache/store.rs
//! Key-value backends for [`super::TtlCache`].
//!
//! `FileStore` keeps one JSON document per cache instance: a flat map of
//! key -> entry. Every `put` rewrites the whole document through a temp file
//! and a rename, so readers never see a half-written snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<Value>;
    async fn put(&self, key: &str, value: Value) -> Result<()>;
    async fn len(&self) -> usize;
}

/// In-process store, used by tests and by dry runs without a data dir.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.inner.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<HashMap<String, Value>>,
}

impl FileStore {
    /// Load the snapshot at `path`. A missing or unreadable file is an empty
    /// cache, never an error.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let map = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, Value>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "cache file corrupt, starting empty");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cache file unreadable, starting empty");
                HashMap::new()
            }
        };
        Self {
            path,
            inner: Mutex::new(map),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let mut map = self.inner.lock().await;
        map.insert(key.to_string(), value);
        let bytes = serde_json::to_vec_pretty(&*map).context("serializing cache snapshot")?;
        write_atomic(&self.path, &bytes).await
    }

    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Write bytes to `path` via a sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .with_context(|| format!("creating {}", tmp.display()))?;
    file.write_all(bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    Ok(())
}
