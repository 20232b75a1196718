//! Remote Backend Module
//!
//! Interface to the remote source of truth behind a bucket, and the per-provider
//! table the read path uses to find the backend for a given bucket.

use crate::bucket::{Bucket, Provider};
use crate::error::BackendError;
use crate::object_attrs::{Checksum, ObjectAttrs};
use crate::{CacheError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::AsyncRead;

/// Body of a remote GET
pub type RemoteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Result of a remote GET
pub struct RemoteObject {
    pub reader: RemoteStream,
    /// Checksum the backend expects the bytes to have, if it reported one
    pub expected_checksum: Option<Checksum>,
    pub size: u64,
}

/// Remote backend client
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    fn provider(&self) -> Provider;

    /// Remote attributes of `name`; a missing object is a 404 `BackendError`
    async fn head_object(&self, bck: &Bucket, name: &str) -> std::result::Result<ObjectAttrs, BackendError>;

    async fn get_object_reader(&self, bck: &Bucket, name: &str) -> std::result::Result<RemoteObject, BackendError>;
}

/// Backends keyed by provider
#[derive(Default, Clone)]
pub struct Backends {
    by_provider: HashMap<Provider, Arc<dyn RemoteBackend>>,
}

impl Backends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` for its provider, replacing any previous one
    pub fn register(&mut self, backend: Arc<dyn RemoteBackend>) {
        self.by_provider.insert(backend.provider(), backend);
    }

    pub fn with(mut self, backend: Arc<dyn RemoteBackend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, bck: &Bucket) -> Result<&Arc<dyn RemoteBackend>> {
        if !bck.is_remote() {
            return Err(CacheError::InvalidRequest(format!(
                "bucket {} has no remote backend",
                bck
            )));
        }
        self.by_provider.get(&bck.provider).ok_or_else(|| {
            CacheError::ConfigError(format!("no backend configured for provider {}", bck.provider))
        })
    }

    pub fn providers(&self) -> impl Iterator<Item = &Provider> {
        self.by_provider.keys()
    }
}
