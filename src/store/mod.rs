//! File-backed JSON document store.
//!
//! The whole data layer is whole-document read/modify/write: no locking, no
//! transactions, last write wins. That is an accepted trade-off for a
//! low-traffic admin tool whose process restarts often; route handlers must
//! depend only on [`DocumentStore`] so the backing can change later.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Narrow key-value interface over whole JSON documents.
///
/// Keys are relative path stems: `"news"` maps to `<root>/news.json`,
/// `"archive/daily/news-2025-01-15"` to the daily archive file.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read a whole document.
    async fn read(&self, key: &str) -> Result<Value, StoreError>;

    /// Overwrite a whole document.
    async fn write(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Whether a document exists.
    async fn exists(&self, key: &str) -> bool;

    /// Delete a document. Missing documents report [`StoreError::NotFound`].
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// [`DocumentStore`] backed by pretty-printed JSON files under a root dir.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn read(&self, key: &str) -> Result<Value, StoreError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }

    async fn write(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Serialize {
            key: key.to_string(),
            source: e,
        })?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::Io {
                path: path.display().to_string(),
                source: e,
            })
    }

    async fn exists(&self, key: &str) -> bool {
        tokio::fs::try_exists(self.path_for(key))
            .await
            .unwrap_or(false)
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(StoreError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }
}

/// Read a typed document, falling back on missing/corrupt files.
///
/// Read-side degradation is deliberate: a single bad file is logged and
/// treated as the fallback rather than failing the request.
pub async fn read_or<T: DeserializeOwned>(store: &dyn DocumentStore, key: &str, fallback: T) -> T {
    match store.read(key).await {
        Ok(value) => match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(key, "Document has unexpected shape: {e}");
                fallback
            }
        },
        Err(StoreError::NotFound(_)) => fallback,
        Err(e) => {
            error!(key, "Failed to read document: {e}");
            fallback
        }
    }
}

/// Read a typed array document, defaulting to empty.
pub async fn read_vec<T: DeserializeOwned>(store: &dyn DocumentStore, key: &str) -> Vec<T> {
    read_or(store, key, Vec::new()).await
}

/// Serialize and write a typed document. Write failures propagate.
pub async fn write_json<T: Serialize>(
    store: &dyn DocumentStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|e| StoreError::Serialize {
        key: key.to_string(),
        source: e,
    })?;
    store.write(key, &value).await
}
