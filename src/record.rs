//! Cached Record
//!
//! In-memory view of one locally cached object: its identity (bucket + name,
//! resolved to a local path by the placement function), its persisted attributes,
//! and the reader/writer lock that guards them.
//!
//! Lock discipline:
//! - the lock is shared by every record instance for the same path (the registry
//!   hands it out), so two views of one object always serialize on one lock;
//! - `load` runs under at least a shared hold; `persist` requires an exclusive one;
//! - `remove` may be called under a shared hold. The hold is then upgraded: the
//!   shared guard is released, an exclusive guard acquired (waiting for all other
//!   readers, including open streams), the delete performed, and the guard
//!   downgraded back to shared. No reader ever observes a half-deleted record.
//!
//! Guards are owned values, so a shared hold can be moved into a
//! [`DeferredReleaseReader`](crate::read_stream::DeferredReleaseReader) and outlive
//! the call that acquired it. Releasing consumes the guard, so a double release
//! does not compile.

use crate::bucket::Bucket;
use crate::meta_store::MetaStore;
use crate::mountpoint::{ContentType, Mountpoints, Placement};
use crate::object_attrs::{Checksum, ObjectAttrs};
use crate::registry::RecordRegistry;
use crate::{CacheError, Result};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, warn};

/// Local side of the cache: mountpoints, metadata store and the shared registry
pub struct LocalStore {
    mountpoints: Mountpoints,
    meta: Arc<dyn MetaStore>,
    registry: RecordRegistry,
}

impl LocalStore {
    pub fn new(mountpoints: Mountpoints, meta: Arc<dyn MetaStore>, registry: RecordRegistry) -> Self {
        Self {
            mountpoints,
            meta,
            registry,
        }
    }

    pub fn mountpoints(&self) -> &Mountpoints {
        &self.mountpoints
    }

    pub fn registry(&self) -> &RecordRegistry {
        &self.registry
    }

    pub fn meta(&self) -> &Arc<dyn MetaStore> {
        &self.meta
    }

    /// Instantiate the in-memory record for `bck/name`; nothing is read from disk
    pub fn record(self: &Arc<Self>, bck: Arc<Bucket>, name: &str) -> Result<CachedRecord> {
        let placement = self.mountpoints.place(&bck, name)?;
        let lock = self.registry.lock_for(&placement.fqn);
        Ok(CachedRecord {
            bck,
            name: name.to_string(),
            placement,
            attrs: ObjectAttrs::default(),
            exists: false,
            lock,
            store: Arc::clone(self),
        })
    }
}

enum GuardState {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
    /// Transient, only observable if an upgrade is cancelled midway
    Released,
}

/// Held acquisition of a record's lock; dropping it (or `unlock`) releases
pub struct RecordGuard {
    lock: Arc<RwLock<()>>,
    state: GuardState,
}

impl RecordGuard {
    pub fn is_exclusive(&self) -> bool {
        matches!(self.state, GuardState::Exclusive(_))
    }

    pub fn is_held(&self) -> bool {
        !matches!(self.state, GuardState::Released)
    }

    /// Release the hold. Consumes the guard: a second release is not expressible.
    pub fn unlock(self) {}

    fn guards(&self, lock: &Arc<RwLock<()>>) -> bool {
        Arc::ptr_eq(&self.lock, lock) && self.is_held()
    }

    /// Swap a shared hold for an exclusive one. No-op when already exclusive.
    async fn upgrade(&mut self) -> bool {
        match std::mem::replace(&mut self.state, GuardState::Released) {
            GuardState::Shared(read) => {
                drop(read);
                self.state = GuardState::Exclusive(Arc::clone(&self.lock).write_owned().await);
                true
            }
            other => {
                self.state = other;
                false
            }
        }
    }

    fn downgrade(&mut self) {
        if let GuardState::Exclusive(write) = std::mem::replace(&mut self.state, GuardState::Released) {
            self.state = GuardState::Shared(write.downgrade());
        }
    }
}

impl fmt::Debug for RecordGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.state {
            GuardState::Shared(_) => "shared",
            GuardState::Exclusive(_) => "exclusive",
            GuardState::Released => "released",
        };
        f.debug_struct("RecordGuard").field("mode", &mode).finish()
    }
}

/// One object's cached metadata plus its lock
pub struct CachedRecord {
    bck: Arc<Bucket>,
    name: String,
    placement: Placement,
    attrs: ObjectAttrs,
    exists: bool,
    lock: Arc<RwLock<()>>,
    store: Arc<LocalStore>,
}

impl CachedRecord {
    pub fn bucket(&self) -> &Bucket {
        &self.bck
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fully-qualified path of the object bytes
    pub fn fqn(&self) -> &Path {
        &self.placement.fqn
    }

    pub fn meta_fqn(&self) -> &Path {
        &self.placement.meta_fqn
    }

    pub fn placement(&self) -> &Placement {
        &self.placement
    }

    pub fn attrs(&self) -> &ObjectAttrs {
        &self.attrs
    }

    pub fn size(&self) -> u64 {
        self.attrs.size
    }

    pub fn checksum(&self) -> Option<&Checksum> {
        self.attrs.checksum.as_ref().filter(|c| !c.is_none())
    }

    pub fn version(&self) -> &str {
        &self.attrs.version
    }

    pub fn atime(&self) -> SystemTime {
        self.attrs.atime
    }

    pub fn set_atime(&mut self, atime: SystemTime) {
        self.attrs.atime = atime;
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Compare cached attributes with attributes reported by the remote backend,
    /// honoring the bucket's versioning policy
    pub fn equal(&self, remote: &ObjectAttrs) -> bool {
        self.attrs.equal(remote, self.bck.versioning.enabled)
    }

    pub async fn lock(&self, exclusive: bool) -> RecordGuard {
        let lock = Arc::clone(&self.lock);
        let state = if exclusive {
            GuardState::Exclusive(Arc::clone(&lock).write_owned().await)
        } else {
            GuardState::Shared(Arc::clone(&lock).read_owned().await)
        };
        RecordGuard { lock, state }
    }

    pub fn try_lock(&self, exclusive: bool) -> Option<RecordGuard> {
        let lock = Arc::clone(&self.lock);
        let state = if exclusive {
            GuardState::Exclusive(Arc::clone(&lock).try_write_owned().ok()?)
        } else {
            GuardState::Shared(Arc::clone(&lock).try_read_owned().ok()?)
        };
        Some(RecordGuard { lock, state })
    }

    fn check_guard(&self, guard: &RecordGuard, op: &str) -> Result<()> {
        if guard.guards(&self.lock) {
            Ok(())
        } else {
            Err(CacheError::Internal(format!(
                "{} {}: guard does not hold this record's lock",
                op,
                self.fqn().display()
            )))
        }
    }

    /// Read persisted metadata into the record.
    ///
    /// `locked` is the caller's hold on this record; with `None` a shared hold is
    /// taken for the duration of the call. Fails with `NotFound` when nothing is
    /// persisted and `LoadFailed` on any other problem.
    pub async fn load(&mut self, populate_cache: bool, locked: Option<&RecordGuard>) -> Result<()> {
        let _own_guard = match locked {
            Some(guard) => {
                self.check_guard(guard, "load")?;
                None
            }
            None => Some(self.lock(false).await),
        };

        let registry = self.store.registry();
        if let Some(attrs) = registry.get(self.fqn()) {
            self.attrs = attrs;
            self.exists = true;
            return Ok(());
        }

        match self.store.meta().load(self.meta_fqn()).await {
            Ok(attrs) => {
                if populate_cache {
                    registry.put(self.fqn(), attrs.clone());
                }
                self.attrs = attrs;
                self.exists = true;
                Ok(())
            }
            Err(CacheError::NotFound(_)) => {
                self.exists = false;
                Err(CacheError::NotFound(self.fqn().display().to_string()))
            }
            Err(e) => {
                self.exists = false;
                Err(CacheError::load_failed("load", self.fqn().display(), e))
            }
        }
    }

    /// Persist `attrs` as this record's metadata. Requires an exclusive hold.
    pub async fn persist(&mut self, attrs: ObjectAttrs, guard: &RecordGuard) -> Result<()> {
        self.check_guard(guard, "persist")?;
        if !guard.is_exclusive() {
            return Err(CacheError::InvalidRequest(format!(
                "persist {} requires an exclusive lock",
                self.fqn().display()
            )));
        }
        self.store.meta().persist(self.meta_fqn(), &attrs).await?;
        self.store.registry().put(self.fqn(), attrs.clone());
        self.attrs = attrs;
        self.exists = true;
        Ok(())
    }

    /// Write object bytes and their metadata. Requires an exclusive hold.
    pub async fn write_local(&mut self, data: &[u8], attrs: ObjectAttrs, guard: &RecordGuard) -> Result<()> {
        self.check_guard(guard, "write")?;
        if !guard.is_exclusive() {
            return Err(CacheError::InvalidRequest(format!(
                "write {} requires an exclusive lock",
                self.fqn().display()
            )));
        }
        let fqn = self.fqn().to_path_buf();
        if let Some(parent) = fqn.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                CacheError::IoError(format!(
                    "Failed to create object directory: path={:?}, error={}",
                    parent, e
                ))
            })?;
        }
        // same mountpoint, so the rename below stays on one filesystem
        let tmp = self.placement.mountpoint.make_path_fqn(
            &self.bck,
            ContentType::Work,
            &format!("{}.{}.tmp", self.name, std::process::id()),
        );
        if let Some(parent) = tmp.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &fqn).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CacheError::IoError(format!(
                "Failed to rename object file: path={:?}, error={}",
                fqn, e
            )));
        }
        self.persist(attrs, guard).await
    }

    /// Open the local object bytes. The caller must hold the lock.
    pub async fn open_local(&self) -> Result<tokio::fs::File> {
        tokio::fs::File::open(self.fqn())
            .await
            .map_err(|e| CacheError::load_failed("open", self.fqn().display(), e))
    }

    /// Delete the persisted copy (bytes and metadata) and mark the record
    /// non-existent. Deleting a record that does not exist succeeds.
    ///
    /// With `Some(guard)` the caller's hold is reused; a shared hold is upgraded
    /// for the delete and handed back shared. With `None` an exclusive hold is
    /// taken for the duration of the call.
    pub async fn remove(&mut self, locked: Option<&mut RecordGuard>) -> Result<()> {
        match locked {
            Some(guard) => {
                self.check_guard(guard, "remove")?;
                let upgraded = guard.upgrade().await;
                if upgraded {
                    debug!(path = ?self.fqn(), "remove: forcing through shared hold");
                }
                let res = self.remove_locked().await;
                if upgraded {
                    guard.downgrade();
                }
                res
            }
            None => {
                let _guard = self.lock(true).await;
                self.remove_locked().await
            }
        }
    }

    async fn remove_locked(&mut self) -> Result<()> {
        let registry = self.store.registry();
        registry.uncache(self.fqn());

        let obj_err = match tokio::fs::remove_file(self.fqn()).await {
            Ok(()) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => Some(e),
        };
        self.store.meta().remove(self.meta_fqn()).await.map_err(|e| {
            CacheError::load_failed("remove", self.meta_fqn().display(), e)
        })?;
        self.exists = false;

        if let Some(e) = obj_err {
            warn!(path = ?self.fqn(), error = %e, "metadata removed but object bytes remain");
            return Err(CacheError::load_failed("remove", self.fqn().display(), e));
        }
        debug!(path = ?self.fqn(), "record removed");
        Ok(())
    }

    /// Evict the record from the in-memory registry; persisted state is untouched
    pub fn uncache(&self) {
        self.store.registry().uncache(self.fqn());
    }
}

impl fmt::Debug for CachedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRecord")
            .field("bucket", &self.bck.to_string())
            .field("name", &self.name)
            .field("fqn", &self.placement.fqn)
            .field("exists", &self.exists)
            .finish()
    }
}

impl fmt::Display for CachedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bck, self.name)
    }
}
