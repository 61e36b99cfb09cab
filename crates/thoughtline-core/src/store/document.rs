//! Keyed document persistence.
//!
//! [`DocumentStore`] is the boundary every higher-level store writes
//! through. Two backends are provided:
//!
//! - [`InMemoryDocumentStore`] for tests and single-process runs.
//! - [`FileDocumentStore`], one pretty-printed JSON file per document.
//!   Keys are percent-encoded into filenames so any key is a valid,
//!   reversible filename.

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, percent_encode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thoughtline_types::{PipelineError, Result};
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Bounds every stored document type satisfies.
pub trait Document: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Document for T where T: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {}

/// Upsert / fetch / scan / delete by string key.
#[async_trait]
pub trait DocumentStore<T: Document>: Send + Sync {
    /// Insert or replace the document at `key`.
    async fn put(&self, key: &str, doc: &T) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<T>>;

    /// Documents whose key starts with `prefix`, ordered by key.
    async fn scan(&self, prefix: &str) -> Result<Vec<T>>;

    /// Remove one document. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    /// Every document, ordered by key.
    async fn list(&self) -> Result<Vec<T>> {
        self.scan("").await
    }
}

// ── In-memory ───────────────────────────────────────────────────────────

/// [`DocumentStore`] backed by a sorted map.
#[derive(Debug)]
pub struct InMemoryDocumentStore<T> {
    docs: RwLock<BTreeMap<String, T>>,
}

impl<T> InMemoryDocumentStore<T> {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T> Default for InMemoryDocumentStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Document> DocumentStore<T> for InMemoryDocumentStore<T> {
    async fn put(&self, key: &str, doc: &T) -> Result<()> {
        self.docs.write().await.insert(key.to_string(), doc.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<T>> {
        Ok(self.docs.read().await.get(key).cloned())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<T>> {
        Ok(self
            .docs
            .read()
            .await
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.docs.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.docs.write().await.clear();
        Ok(())
    }
}

// ── File-backed ─────────────────────────────────────────────────────────

const EXTENSION: &str = "json";

/// [`DocumentStore`] writing one JSON file per document under a directory.
///
/// The directory is created lazily on first write. Writes go to a temp
/// file that is renamed over the target, so a document is either absent
/// or complete. Files that fail to parse are skipped during scans with a
/// warning.
#[derive(Debug)]
pub struct FileDocumentStore<T> {
    dir: PathBuf,
    _doc: PhantomData<fn() -> T>,
}

impl<T> FileDocumentStore<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _doc: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let encoded = percent_encode(key.as_bytes(), NON_ALPHANUMERIC).to_string();
        self.dir.join(format!("{encoded}.{EXTENSION}"))
    }

    /// Decoded keys of every document file, sorted.
    async fn keys(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage(&self.dir, e)),
        };

        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| storage(&self.dir, e))? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(stem) = name.strip_suffix(&format!(".{EXTENSION}")) else {
                continue;
            };
            match percent_decode_str(stem).decode_utf8() {
                Ok(key) => keys.push(key.into_owned()),
                Err(e) => warn!(filename = %name, error = %e, "skipping undecodable document filename"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn read(&self, path: &Path) -> Result<Option<T>>
    where
        T: Document,
    {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage(path, e)),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

fn storage(path: &Path, err: std::io::Error) -> PipelineError {
    PipelineError::StorageUnavailable(format!("{}: {err}", path.display()))
}

#[async_trait]
impl<T: Document> DocumentStore<T> for FileDocumentStore<T> {
    async fn put(&self, key: &str, doc: &T) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| storage(&self.dir, e))?;
        let path = self.path_for(key);
        let body = serde_json::to_string_pretty(doc)?;
        // Never ends in `.json`, so `keys` ignores leftovers.
        let tmp = path.with_extension(format!("{EXTENSION}.{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = tokio::fs::write(&tmp, body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(storage(&tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(storage(&path, e));
        }
        debug!(key, path = %path.display(), "wrote document");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<T>> {
        self.read(&self.path_for(key)).await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        for key in self.keys().await?.into_iter().filter(|k| k.starts_with(prefix)) {
            match self.read(&self.path_for(&key)).await {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(PipelineError::Json(e)) => {
                    warn!(key = %key, error = %e, "skipping unparsable document");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(docs)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage(&path, e)),
        }
    }

    async fn clear(&self) -> Result<()> {
        for key in self.keys().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}
