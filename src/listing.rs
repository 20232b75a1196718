//! Listing Module
//!
//! Listing entries and the per-request reconciler that merges what is cached on
//! every local mountpoint against pages of an authoritative remote listing.
//!
//! Names cached locally but missing from the remote page that covers them are
//! emitted as synthetic entries flagged [`EntryFlags::VER_REMOVED`] and
//! [`EntryFlags::IS_CACHED`]: objects deleted remotely that still occupy local
//! disk.

use crate::bucket::Bucket;
use crate::mountpoint::{ContentType, Mountpoint};
use crate::page_iter::{LocalPageIterator, PageBound};
use crate::page_pool::{Page, PagePool};
use crate::record::LocalStore;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u16 {
        /// Absent from the remote listing
        const VER_REMOVED = 1 << 0;
        /// Present in the local cache
        const IS_CACHED   = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
    pub flags: EntryFlags,
}

impl ListEntry {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            flags: EntryFlags::empty(),
        }
    }

    /// Entry for a name that is cached here but gone remotely
    pub fn remotely_deleted(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            flags: EntryFlags::VER_REMOVED | EntryFlags::IS_CACHED,
        }
    }

    pub fn is_remotely_deleted(&self) -> bool {
        self.flags.contains(EntryFlags::VER_REMOVED | EntryFlags::IS_CACHED)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub entries: Vec<ListEntry>,
}

impl ListPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|en| en.name.as_str())
    }
}

/// Sizing of listing page buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,
}

fn default_page_size() -> usize {
    1000
}

fn default_pool_capacity() -> usize {
    8
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            pool_capacity: default_pool_capacity(),
        }
    }
}

/// Local state of one mountpoint within a listing
struct MountpointPages {
    mountpoint: Arc<Mountpoint>,
    it: LocalPageIterator,
    page: Page,
}

/// Local side of one bucket listing request.
///
/// Call [`LocalPages::reconcile`] once per remote page, in order; the last call
/// passes `last = true`.
pub struct LocalPages {
    bck: Arc<Bucket>,
    mps: Vec<MountpointPages>,
    pool: PagePool,
}

impl LocalPages {
    pub fn new(store: &LocalStore, bck: Arc<Bucket>, prefix: &str, config: &ListingConfig) -> Self {
        let pool = PagePool::new(config.pool_capacity, config.page_size);
        let mps = store
            .mountpoints()
            .avail()
            .iter()
            .map(|mp| MountpointPages {
                mountpoint: Arc::clone(mp),
                it: LocalPageIterator::new(mp.make_path_ct(&bck, ContentType::Object), prefix),
                page: pool.alloc(),
            })
            .collect::<Vec<_>>();
        info!(
            "Creating local listing: bucket={}, prefix={:?}, mountpoints={}",
            bck,
            prefix,
            mps.len()
        );
        Self { bck, mps, pool }
    }

    pub fn bucket(&self) -> &Bucket {
        &self.bck
    }

    /// True once every mountpoint has been fully enumerated
    pub fn is_exhausted(&self) -> bool {
        self.mps.iter().all(|m| m.it.is_exhausted())
    }

    /// Names scanned but not yet reconciled, across all mountpoints
    pub fn pending(&self) -> usize {
        self.mps.iter().map(|m| m.page.len()).sum()
    }

    /// Merge one remote page against the local namespace, appending an entry to
    /// `out` for every cached name the remote page does not report.
    ///
    /// Returns the number of entries appended.
    pub fn reconcile(&mut self, remote_page: &[ListEntry], out: &mut ListPage, last: bool) -> usize {
        let bound = match remote_page.last() {
            Some(en) if !last => PageBound::Until(en.name.clone()),
            _ => PageBound::AllPages,
        };

        // 1. every mountpoint: next local page
        for mp in &mut self.mps {
            if mp.it.pos().is_empty() {
                mp.it.clear();
                continue;
            }
            if let Err(e) = mp.it.next(&bound, &mut mp.page) {
                warn!(
                    bucket = %self.bck,
                    mountpoint = ?mp.mountpoint.path(),
                    error = %e,
                    "local page scan failed, skipping page"
                );
                // names in this range are only ever compared against this remote page
                mp.it.skip_to(&bound);
            }
        }

        // 2. remote page as a set
        let mut remote = self.pool.get();
        for en in remote_page {
            remote.insert(en.name.clone(), 0);
        }

        // 3. cached but not remote
        let before = out.len();
        for mp in &mut self.mps {
            let mut absent: Vec<(String, u64)> = mp
                .page
                .drain()
                .filter(|(name, _)| !remote.contains_key(name))
                .collect();
            absent.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            out.entries.extend(
                absent
                    .into_iter()
                    .map(|(name, size)| ListEntry::remotely_deleted(name, size)),
            );
        }
        drop(remote);

        let added = out.len() - before;
        debug!(
            bucket = %self.bck,
            remote = remote_page.len(),
            added,
            last,
            "listing page reconciled"
        );
        added
    }
}

impl Drop for LocalPages {
    fn drop(&mut self) {
        for mp in self.mps.drain(..) {
            self.pool.free(mp.page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_flags() {
        let en = ListEntry::remotely_deleted("a", 3);
        assert!(en.is_remotely_deleted());
        assert!(en.flags.contains(EntryFlags::IS_CACHED));
        assert!(!ListEntry::new("a", 3).is_remotely_deleted());
        let only_cached = ListEntry {
            flags: EntryFlags::IS_CACHED,
            ..ListEntry::new("a", 3)
        };
        assert!(!only_cached.is_remotely_deleted());
    }

    #[test]
    fn test_listing_config_defaults() {
        let cfg: ListingConfig = serde_yaml::from_str("page_size: 10").unwrap();
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.pool_capacity, 8);
    }
}
