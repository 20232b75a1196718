//! Remote Reconciler
//!
//! Decides whether a locally cached copy still matches the remote source of truth.
//!
//! Outcomes of `check_remote_md`:
//! - `Ok(true)`: bucket has no remote version metadata, or remote attributes match;
//! - `Ok(false)`: remote attributes differ, or the object is gone remotely and the
//!   bucket's `sync_warm_get` policy deleted the local copy;
//! - `Err(_)`: the remote HEAD failed (including 404 without `sync_warm_get`). The
//!   in-memory registry entry is evicted, the persisted copy is left alone.

use crate::backend::Backends;
use crate::record::{CachedRecord, RecordGuard};
use crate::{CacheError, Result};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RemoteReconciler {
    backends: Arc<Backends>,
}

impl RemoteReconciler {
    pub fn new(backends: Arc<Backends>) -> Self {
        Self { backends }
    }

    pub fn backends(&self) -> &Arc<Backends> {
        &self.backends
    }

    /// Compare `record` against a remote HEAD.
    ///
    /// The caller holds `guard` (shared or exclusive) on the record; a delete
    /// triggered by `sync_warm_get` reuses that hold.
    pub async fn check_remote_md(&self, record: &mut CachedRecord, guard: &mut RecordGuard) -> Result<bool> {
        let bck = record.bucket();
        if !bck.is_cloud() && !bck.is_remote_cluster() {
            // local buckets, and remote ones without versioning metadata
            return Ok(true);
        }

        let head = match self.backends.get(bck) {
            Ok(backend) => backend.head_object(bck, record.name()).await.map_err(CacheError::from),
            Err(e) => Err(e),
        };

        match head {
            Ok(remote) => {
                let eq = record.equal(&remote);
                debug!(
                    object = %record,
                    equal = eq,
                    local_version = %record.version(),
                    remote_version = %remote.version,
                    "remote metadata checked"
                );
                Ok(eq)
            }
            Err(e) if e.is_not_found() && record.bucket().sync_warm_get() => {
                debug!(object = %record, "object deleted remotely, removing cached copy");
                record.remove(Some(guard)).await?;
                Ok(false)
            }
            Err(e) => {
                warn!(object = %record, error = %e, "remote metadata check failed");
                record.uncache();
                Err(e)
            }
        }
    }
}
