//! Persistent Metadata Store
//!
//! Narrow interface over wherever object attributes are persisted, plus the
//! default JSON-file implementation. Metadata files live in the `meta` content
//! tree, next to (not inside) the object bytes, and are written atomically via
//! temp file + rename so a concurrent reader never observes a torn file.

use crate::object_attrs::ObjectAttrs;
use crate::{CacheError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Persistent metadata store
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Returns `CacheError::NotFound` when nothing is persisted at `meta_fqn`
    async fn load(&self, meta_fqn: &Path) -> Result<ObjectAttrs>;

    async fn persist(&self, meta_fqn: &Path, attrs: &ObjectAttrs) -> Result<()>;

    /// Removing metadata that does not exist is not an error
    async fn remove(&self, meta_fqn: &Path) -> Result<()>;
}

/// JSON file per object
#[derive(Debug, Default)]
pub struct JsonMetaStore {
    tmp_seq: AtomicU64,
}

impl JsonMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tmp_path(&self, meta_fqn: &Path) -> PathBuf {
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let mut name = meta_fqn.as_os_str().to_owned();
        name.push(format!(".{}.{}.tmp", std::process::id(), seq));
        PathBuf::from(name)
    }
}

#[async_trait]
impl MetaStore for JsonMetaStore {
    async fn load(&self, meta_fqn: &Path) -> Result<ObjectAttrs> {
        let content = match tokio::fs::read(meta_fqn).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CacheError::NotFound(meta_fqn.display().to_string()));
            }
            Err(e) => return Err(CacheError::IoError(format!("{}: {}", meta_fqn.display(), e))),
        };
        let attrs = serde_json::from_slice(&content).map_err(|e| {
            CacheError::SerializationError(format!("{}: {}", meta_fqn.display(), e))
        })?;
        Ok(attrs)
    }

    async fn persist(&self, meta_fqn: &Path, attrs: &ObjectAttrs) -> Result<()> {
        if let Some(parent) = meta_fqn.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::IoError(format!(
                    "Failed to create metadata directory: path={:?}, error={}",
                    parent, e
                ))
            })?;
        }

        let content = serde_json::to_vec(attrs)?;
        let tmp = self.tmp_path(meta_fqn);
        tokio::fs::write(&tmp, &content).await?;
        if let Err(e) = tokio::fs::rename(&tmp, meta_fqn).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::IoError(format!(
                "Failed to rename metadata file: path={:?}, error={}",
                meta_fqn, e
            )));
        }
        debug!(path = ?meta_fqn, size = attrs.size, "metadata persisted");
        Ok(())
    }

    async fn remove(&self, meta_fqn: &Path) -> Result<()> {
        match tokio::fs::remove_file(meta_fqn).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::IoError(format!("{}: {}", meta_fqn.display(), e))),
        }
    }
}
