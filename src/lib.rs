//! Hybrid Cache - consistency layer for a disk-resident object cache
//!
//! Serves reads from locally cached copies when they are known to be current,
//! falls back to the remote backend when they are stale or missing, and reconciles
//! local listings against authoritative remote listings to find cached objects
//! that were deleted remotely.

pub mod backend;
pub mod bucket;
pub mod config;
pub mod data_provider;
pub mod error;
pub mod http_backend;
pub mod listing;
pub mod logging;
pub mod meta_store;
pub mod mountpoint;
pub mod object_attrs;
pub mod page_iter;
pub mod page_pool;
pub mod read_stream;
pub mod record;
pub mod registry;
pub mod remote_check;

pub use error::{BackendError, CacheError, Result};
