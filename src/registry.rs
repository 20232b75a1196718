//! Record Registry
//!
//! Shared in-memory state for cached records, keyed by fully-qualified local path:
//! - a lock table handing out one reader/writer lock per path, so every in-memory
//!   view of the same object serializes on the same lock;
//! - a bounded metadata cache that saves repeated metadata reads from disk.
//!
//! Cached attributes are only ever inserted or evicted by record operations that
//! hold the path's lock.

use crate::object_attrs::ObjectAttrs;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Configuration for the RecordRegistry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Whether loaded metadata is cached in memory
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum number of cached metadata entries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_enabled() -> bool {
    true
}

fn default_max_entries() -> usize {
    10000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_entries: default_max_entries(),
        }
    }
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    attrs: ObjectAttrs,
    loaded_at: Instant,
    seq: u64,
}

/// Counters for the metadata cache
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
}

/// Snapshot of registry counters for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl RegistryMetrics {
    pub fn snapshot(&self) -> RegistryMetricsSnapshot {
        RegistryMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

pub struct RecordRegistry {
    locks: DashMap<PathBuf, Arc<RwLock<()>>>,
    entries: DashMap<PathBuf, RegistryEntry>,
    /// Insertion order for oldest-first eviction; stale items are skipped by `seq`
    order: Mutex<VecDeque<(PathBuf, u64)>>,
    next_seq: AtomicU64,
    config: RegistryConfig,
    metrics: RegistryMetrics,
}

impl RecordRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        info!(
            "Creating RecordRegistry: enabled={}, max_entries={}",
            config.enabled, config.max_entries
        );
        Self {
            locks: DashMap::new(),
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            config,
            metrics: RegistryMetrics::default(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn metrics(&self) -> RegistryMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The one lock guarding `fqn`
    pub fn lock_for(&self, fqn: &Path) -> Arc<RwLock<()>> {
        if let Some(lock) = self.locks.get(fqn) {
            return Arc::clone(lock.value());
        }
        Arc::clone(
            self.locks
                .entry(fqn.to_path_buf())
                .or_insert_with(|| Arc::new(RwLock::new(())))
                .value(),
        )
    }

    /// Drop lock-table entries nobody outside the registry references
    pub fn prune_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn get(&self, fqn: &Path) -> Option<ObjectAttrs> {
        if !self.config.enabled {
            return None;
        }
        match self.entries.get(fqn) {
            Some(entry) => {
                self.metrics.hits.fetch_add(1, Ordering::Relaxed);
                debug!(path = ?fqn, age_ms = entry.loaded_at.elapsed().as_millis(), "registry hit");
                Some(entry.attrs.clone())
            }
            None => {
                self.metrics.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, fqn: &Path, attrs: ObjectAttrs) {
        if !self.config.enabled || self.config.max_entries == 0 {
            return;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            fqn.to_path_buf(),
            RegistryEntry {
                attrs,
                loaded_at: Instant::now(),
                seq,
            },
        );

        let mut order = self.order.lock().unwrap_or_else(|e| e.into_inner());
        order.push_back((fqn.to_path_buf(), seq));
        while self.entries.len() > self.config.max_entries {
            let Some((oldest, oldest_seq)) = order.pop_front() else {
                break;
            };
            let removed = self
                .entries
                .remove_if(&oldest, |_, entry| entry.seq == oldest_seq)
                .is_some();
            if removed {
                self.metrics.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(path = ?oldest, "registry entry evicted");
            }
        }
        // keep the order queue from growing without bound on repeated puts
        if order.len() > self.config.max_entries.saturating_mul(2) {
            order.retain(|(path, seq)| {
                self.entries
                    .get(path)
                    .map(|entry| entry.seq == *seq)
                    .unwrap_or(false)
            });
        }
    }

    /// Evict the in-memory entry; persisted state is not touched
    pub fn uncache(&self, fqn: &Path) {
        if self.entries.remove(fqn).is_some() {
            self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
            debug!(path = ?fqn, "registry entry invalidated");
        }
    }

    pub fn contains(&self, fqn: &Path) -> bool {
        self.entries.contains_key(fqn)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for RecordRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
