//! Mountpoint Module
//!
//! Local mountpoints and the deterministic placement function that maps
//! `(bucket, content type, object name)` to a fully-qualified local path.
//!
//! On-disk layout per mountpoint:
//!
//! ```text
//! <mountpoint>/<provider>/<bucket>/obj/<object name>    object bytes
//! <mountpoint>/<provider>/<bucket>/meta/<object name>   persisted attributes (JSON)
//! <mountpoint>/<provider>/<bucket>/work/...             in-flight writes
//! ```
//!
//! The mountpoint that owns a given object is chosen by highest random weight
//! over BLAKE3 digests, so every node computes the same placement without
//! coordination and adding a mountpoint only moves the objects it wins.

use crate::bucket::Bucket;
use crate::{CacheError, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Kind of content stored under a bucket root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentType {
    Object,
    Meta,
    /// Temporary files, renamed into `Object` once complete
    Work,
}

impl ContentType {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ContentType::Object => "obj",
            ContentType::Meta => "meta",
            ContentType::Work => "work",
        }
    }
}

/// One local mountpoint (disk)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mountpoint {
    path: PathBuf,
}

impl Mountpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Namespace root of a bucket for one content type
    pub fn make_path_ct(&self, bck: &Bucket, ct: ContentType) -> PathBuf {
        self.path
            .join(bck.provider.as_str())
            .join(&bck.name)
            .join(ct.dir_name())
    }

    /// Fully-qualified path of an object (or its metadata) on this mountpoint
    pub fn make_path_fqn(&self, bck: &Bucket, ct: ContentType, name: &str) -> PathBuf {
        self.make_path_ct(bck, ct).join(name)
    }

    fn weight(&self, bck: &Bucket, name: &str) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.path.as_os_str().as_encoded_bytes());
        hasher.update(&[0]);
        hasher.update(bck.provider.as_str().as_bytes());
        hasher.update(bck.name.as_bytes());
        hasher.update(&[0]);
        hasher.update(name.as_bytes());
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_be_bytes(prefix)
    }
}

/// Resolved location of one object
#[derive(Debug, Clone)]
pub struct Placement {
    pub mountpoint: Arc<Mountpoint>,
    pub fqn: PathBuf,
    pub meta_fqn: PathBuf,
}

/// Ordered set of available mountpoints
#[derive(Debug, Clone)]
pub struct Mountpoints {
    avail: Vec<Arc<Mountpoint>>,
}

impl Mountpoints {
    pub fn new<I, P>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let mut avail: Vec<Arc<Mountpoint>> = Vec::new();
        for p in paths {
            let mp = Mountpoint::new(p);
            if avail.iter().any(|m| m.path == mp.path) {
                return Err(CacheError::ConfigError(format!(
                    "duplicate mountpoint: {:?}",
                    mp.path
                )));
            }
            avail.push(Arc::new(mp));
        }
        if avail.is_empty() {
            return Err(CacheError::ConfigError(
                "at least one mountpoint is required".to_string(),
            ));
        }
        Ok(Self { avail })
    }

    pub fn avail(&self) -> &[Arc<Mountpoint>] {
        &self.avail
    }

    pub fn len(&self) -> usize {
        self.avail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.avail.is_empty()
    }

    /// Mountpoint that owns `name` (highest random weight)
    pub fn hrw(&self, bck: &Bucket, name: &str) -> &Arc<Mountpoint> {
        let mut best = &self.avail[0];
        let mut best_weight = best.weight(bck, name);
        for mp in &self.avail[1..] {
            let w = mp.weight(bck, name);
            if w > best_weight {
                best = mp;
                best_weight = w;
            }
        }
        best
    }

    /// Placement function: resolve an object's identity to its local paths
    pub fn place(&self, bck: &Bucket, name: &str) -> Result<Placement> {
        validate_object_name(name)?;
        let mountpoint = Arc::clone(self.hrw(bck, name));
        let fqn = mountpoint.make_path_fqn(bck, ContentType::Object, name);
        let meta_fqn = mountpoint.make_path_fqn(bck, ContentType::Meta, name);
        debug!(bucket = %bck, name = %name, fqn = ?fqn, "object placed");
        Ok(Placement {
            mountpoint,
            fqn,
            meta_fqn,
        })
    }
}

/// Object names are relative slash-separated paths; reject anything that could
/// escape the bucket root.
pub fn validate_object_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CacheError::InvalidRequest("empty object name".to_string()));
    }
    if name.ends_with('/') || name.contains('\0') {
        return Err(CacheError::InvalidRequest(format!(
            "invalid object name: {:?}",
            name
        )));
    }
    for component in Path::new(name).components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(CacheError::InvalidRequest(format!(
                "invalid object name: {:?}",
                name
            )));
        }
    }
    Ok(())
}
