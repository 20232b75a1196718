//! Shared fixtures: temporary mountpoints and an in-memory remote backend

#![allow(dead_code)]

use async_trait::async_trait;
use hybrid_cache::backend::{Backends, RemoteBackend, RemoteObject};
use hybrid_cache::bucket::{Bucket, Provider, VersioningConf};
use hybrid_cache::meta_store::JsonMetaStore;
use hybrid_cache::mountpoint::Mountpoints;
use hybrid_cache::object_attrs::{Checksum, ChecksumType, ObjectAttrs};
use hybrid_cache::record::{CachedRecord, LocalStore};
use hybrid_cache::registry::{RecordRegistry, RegistryConfig};
use hybrid_cache::BackendError;
use hyper::StatusCode;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn md5(v: &str) -> Checksum {
    Checksum::new(ChecksumType::Md5, v)
}

/// Local store over `n` mountpoints inside one temp dir
pub fn local_store(n: usize) -> (TempDir, Arc<LocalStore>) {
    let dir = TempDir::new().unwrap();
    let paths: Vec<_> = (0..n).map(|i| dir.path().join(format!("mp{}", i))).collect();
    let store = LocalStore::new(
        Mountpoints::new(paths).unwrap(),
        Arc::new(JsonMetaStore::new()),
        RecordRegistry::new(RegistryConfig::default()),
    );
    (dir, Arc::new(store))
}

pub fn cloud_bucket(name: &str, sync_warm_get: bool) -> Arc<Bucket> {
    Arc::new(Bucket::new(name, Provider::Aws).with_versioning(VersioningConf {
        enabled: true,
        validate_warm_get: true,
        sync_warm_get,
    }))
}

pub fn local_bucket(name: &str) -> Arc<Bucket> {
    Arc::new(Bucket::new(name, Provider::Local))
}

/// Write `data` with `attrs` into the local cache and return a fresh record
pub async fn cache_object(
    store: &Arc<LocalStore>,
    bck: &Arc<Bucket>,
    name: &str,
    data: &[u8],
    attrs: ObjectAttrs,
) -> CachedRecord {
    let mut rec = store.record(Arc::clone(bck), name).unwrap();
    let guard = rec.lock(true).await;
    rec.write_local(data, attrs, &guard).await.unwrap();
    guard.unlock();
    store.record(Arc::clone(bck), name).unwrap()
}

/// In-memory remote backend counting calls
pub struct MockBackend {
    provider: Provider,
    objects: Mutex<HashMap<String, (ObjectAttrs, Vec<u8>)>>,
    head_error: Mutex<Option<BackendError>>,
    pub heads: AtomicUsize,
    pub gets: AtomicUsize,
}

impl MockBackend {
    pub fn new(provider: Provider) -> Arc<Self> {
        Arc::new(Self {
            provider,
            objects: Mutex::new(HashMap::new()),
            head_error: Mutex::new(None),
            heads: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        })
    }

    pub fn put(&self, name: &str, data: &[u8], attrs: ObjectAttrs) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), (attrs, data.to_vec()));
    }

    pub fn delete(&self, name: &str) {
        self.objects.lock().unwrap().remove(name);
    }

    /// Make every HEAD fail with `status`
    pub fn fail_heads(&self, status: StatusCode) {
        *self.head_error.lock().unwrap() = Some(BackendError::new(status, "injected"));
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn backends(self: &Arc<Self>) -> Arc<Backends> {
        let backend: Arc<dyn RemoteBackend> = Arc::clone(self) as Arc<dyn RemoteBackend>;
        Arc::new(Backends::new().with(backend))
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn head_object(&self, _bck: &Bucket, name: &str) -> Result<ObjectAttrs, BackendError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.head_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|(attrs, _)| attrs.clone())
            .ok_or_else(|| BackendError::not_found(name))
    }

    async fn get_object_reader(&self, _bck: &Bucket, name: &str) -> Result<RemoteObject, BackendError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let (attrs, data) = self
            .objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::not_found(name))?;
        Ok(RemoteObject {
            reader: Box::new(Cursor::new(data)),
            expected_checksum: attrs.checksum,
            size: attrs.size,
        })
    }
}
