//! Data Provider Module
//!
//! A data provider turns a cached record into a byte stream plus the attributes
//! header describing those bytes. Callers are written against [`DataProvider`]
//! only, so other providers (for instance one that transforms objects on the fly)
//! can be substituted without touching the orchestration that uses them.
//!
//! [`LocalDataProvider`] is the read orchestrator for plain GETs. Per request it
//! decides once between four plans and then dispatches:
//!
//! | local metadata | `latest_ver` | remote check          | plan        |
//! |----------------|--------------|-----------------------|-------------|
//! | loaded         | false        | -                     | ServeLocal  |
//! | loaded         | true         | equal                 | ServeLocal  |
//! | loaded         | true         | not equal             | Refresh     |
//! | loaded         | true         | 404                   | Skip        |
//! | loaded         | true         | other error           | error       |
//! | not found      | -            | bucket is remote      | ColdFetch   |
//! | not found      | -            | bucket is local       | Skip        |
//! | load error     | -            | -                     | error       |
//!
//! The shared lock taken before loading is held across the remote check, moves
//! into the returned stream for `ServeLocal`, and is released before any remote
//! GET is issued.

use crate::backend::Backends;
use crate::object_attrs::ObjectAttrs;
use crate::read_stream::{BoxObjectReader, DeferredReleaseReader, NopCloser};
use crate::record::{CachedRecord, RecordGuard};
use crate::remote_check::RemoteReconciler;
use crate::{CacheError, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Where the bytes of a served stream come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Local,
    Remote,
}

/// Result of asking a provider for an object
pub enum ReadOutcome {
    Ready {
        reader: BoxObjectReader,
        attrs: ObjectAttrs,
        source: ReadSource,
    },
    /// Nothing to serve from this provider; the caller should treat the object as
    /// absent here and may try another source
    Skip,
}

impl ReadOutcome {
    pub fn is_skip(&self) -> bool {
        matches!(self, ReadOutcome::Skip)
    }

    pub fn source(&self) -> Option<ReadSource> {
        match self {
            ReadOutcome::Ready { source, .. } => Some(*source),
            ReadOutcome::Skip => None,
        }
    }
}

impl fmt::Debug for ReadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadOutcome::Ready { attrs, source, .. } => f
                .debug_struct("Ready")
                .field("attrs", attrs)
                .field("source", source)
                .finish(),
            ReadOutcome::Skip => f.write_str("Skip"),
        }
    }
}

/// Data provider capability
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn reader(&self, record: &mut CachedRecord, latest_ver: bool) -> Result<ReadOutcome>;
}

enum ReadPlan {
    /// Local copy is valid; the shared hold travels with the stream
    ServeLocal(RecordGuard),
    /// Local copy is stale
    Refresh,
    /// No local copy
    ColdFetch,
    Skip,
}

/// Provider serving local bytes, falling back to the remote backend
pub struct LocalDataProvider {
    reconciler: RemoteReconciler,
}

impl LocalDataProvider {
    pub fn new(backends: Arc<Backends>) -> Self {
        Self {
            reconciler: RemoteReconciler::new(backends),
        }
    }

    pub fn reconciler(&self) -> &RemoteReconciler {
        &self.reconciler
    }

    async fn plan(&self, record: &mut CachedRecord, latest_ver: bool) -> Result<ReadPlan> {
        let mut guard = record.lock(false).await;

        match record.load(false, Some(&guard)).await {
            Ok(()) => {
                if latest_ver {
                    match self.reconciler.check_remote_md(record, &mut guard).await {
                        Ok(true) => {}
                        Ok(false) => {
                            guard.unlock();
                            return Ok(ReadPlan::Refresh);
                        }
                        Err(e) if e.is_not_found() => {
                            guard.unlock();
                            return Ok(ReadPlan::Skip);
                        }
                        Err(e) => {
                            guard.unlock();
                            return Err(CacheError::fetch_failed(
                                "head-latest",
                                record.fqn().display(),
                                e,
                            ));
                        }
                    }
                }
                Ok(ReadPlan::ServeLocal(guard))
            }
            Err(CacheError::NotFound(_)) => {
                guard.unlock();
                if record.bucket().is_remote() {
                    Ok(ReadPlan::ColdFetch)
                } else {
                    Ok(ReadPlan::Skip)
                }
            }
            Err(e) => {
                guard.unlock();
                Err(e)
            }
        }
    }

    async fn serve_local(&self, record: &mut CachedRecord, guard: RecordGuard) -> Result<ReadOutcome> {
        // an open failure drops `guard` on return
        let file = record.open_local().await?;
        record.set_atime(SystemTime::now());
        let attrs = record.attrs().clone();
        Ok(ReadOutcome::Ready {
            reader: Box::new(DeferredReleaseReader::new(file, guard)),
            attrs,
            source: ReadSource::Local,
        })
    }

    /// GET from the remote backend; no local lock is held here
    async fn fetch_remote(&self, record: &mut CachedRecord) -> Result<ReadOutcome> {
        let now = SystemTime::now();
        record.set_atime(now);

        let bck = record.bucket();
        let backend = self.reconciler.backends().get(bck)?;
        let res = backend.get_object_reader(bck, record.name()).await?;

        let attrs = ObjectAttrs {
            size: res.size,
            checksum: record.checksum().cloned().or(res.expected_checksum),
            version: String::new(),
            atime: now,
        };
        Ok(ReadOutcome::Ready {
            reader: Box::new(NopCloser::new(res.reader)),
            attrs,
            source: ReadSource::Remote,
        })
    }
}

#[async_trait]
impl DataProvider for LocalDataProvider {
    async fn reader(&self, record: &mut CachedRecord, latest_ver: bool) -> Result<ReadOutcome> {
        match self.plan(record, latest_ver).await? {
            ReadPlan::ServeLocal(guard) => {
                debug!(object = %record, "serving local copy");
                self.serve_local(record, guard).await
            }
            ReadPlan::Refresh => {
                debug!(object = %record, "local copy is stale, fetching remote");
                self.fetch_remote(record).await
            }
            ReadPlan::ColdFetch => {
                debug!(object = %record, "no local copy, fetching remote");
                self.fetch_remote(record).await
            }
            ReadPlan::Skip => {
                debug!(object = %record, "nothing to serve, skipping");
                Ok(ReadOutcome::Skip)
            }
        }
    }
}
