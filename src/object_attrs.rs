//! Object Attributes
//!
//! The attributes header that accompanies every byte stream handed out by a data
//! provider, regardless of whether the bytes come from local disk or a remote
//! fetch. The same structure is what gets persisted as a record's metadata.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Checksum algorithm. The algorithms themselves are computed elsewhere;
/// this layer only compares values of the same type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    None,
    Md5,
    Crc32c,
    Xxhash,
    Sha256,
    Blake3,
}

/// Opaque checksum value tagged with its algorithm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    #[serde(rename = "type")]
    pub ty: ChecksumType,
    pub value: String,
}

impl Checksum {
    pub fn new(ty: ChecksumType, value: impl Into<String>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.ty == ChecksumType::None || self.value.is_empty()
    }

    /// Two checksums can only be compared when both are set and of the same type
    pub fn comparable(&self, other: &Checksum) -> bool {
        !self.is_none() && !other.is_none() && self.ty == other.ty
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[{}]", self.ty, self.value)
    }
}

/// Externally visible object attributes (version, checksum, size, access time)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttrs {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<Checksum>,
    /// Remote version; empty when the backend is unversioned
    #[serde(default)]
    pub version: String,
    pub atime: SystemTime,
}

impl Default for ObjectAttrs {
    fn default() -> Self {
        Self {
            size: 0,
            checksum: None,
            version: String::new(),
            atime: UNIX_EPOCH,
        }
    }
}

impl ObjectAttrs {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_atime(mut self, atime: SystemTime) -> Self {
        self.atime = atime;
        self
    }

    /// Access time as nanoseconds since the Unix epoch
    pub fn atime_unix_nanos(&self) -> u128 {
        self.atime
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos()
    }

    /// Compare cached attributes (`self`) with attributes reported by the remote
    /// backend.
    ///
    /// Any mismatch in size, version (when `compare_versions` and both sides have
    /// one) or checksum (when both sides have one of the same type) makes the copies
    /// unequal. When neither version nor checksum could be compared the copies are
    /// also treated as unequal: freshness cannot be proven from size alone.
    pub fn equal(&self, remote: &ObjectAttrs, compare_versions: bool) -> bool {
        if self.size != remote.size {
            return false;
        }

        let mut matched = false;

        if compare_versions && !self.version.is_empty() && !remote.version.is_empty() {
            if self.version != remote.version {
                return false;
            }
            matched = true;
        }

        if let (Some(local), Some(other)) = (&self.checksum, &remote.checksum) {
            if local.comparable(other) {
                if local.value != other.value {
                    return false;
                }
                matched = true;
            }
        }

        matched
    }
}
