//! Bucket Descriptor
//!
//! A bucket is identified by name and provider. The provider decides whether the
//! local copy is the only copy (`local`) or a cache in front of a remote backend
//! (cloud providers, an HTTP origin, or a remote cluster). Each bucket also carries
//! the versioning policy used by warm GETs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the authoritative copy of a bucket's objects lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// In-cluster bucket; local disks hold the only copy
    Local,
    Aws,
    Gcp,
    Azure,
    /// Plain HTTP(S) origin; remote but without versioning metadata
    Http,
    /// Bucket of another cluster of this same store
    RemoteCluster,
}

impl Provider {
    /// Short directory-safe name used in the on-disk layout
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Aws => "aws",
            Provider::Gcp => "gcp",
            Provider::Azure => "azure",
            Provider::Http => "http",
            Provider::RemoteCluster => "remote",
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, Provider::Aws | Provider::Gcp | Provider::Azure)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-bucket versioning policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningConf {
    /// Compare remote versions when deciding whether a cached copy is current
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Check the remote backend on every warm GET
    #[serde(default)]
    pub validate_warm_get: bool,
    /// Delete the cached copy when the remote backend reports it gone
    #[serde(default)]
    pub sync_warm_get: bool,
}

fn default_true() -> bool {
    true
}

impl Default for VersioningConf {
    fn default() -> Self {
        Self {
            enabled: true,
            validate_warm_get: false,
            sync_warm_get: false,
        }
    }
}

/// Bucket descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
    pub provider: Provider,
    #[serde(default)]
    pub versioning: VersioningConf,
}

impl Bucket {
    pub fn new(name: impl Into<String>, provider: Provider) -> Self {
        Self {
            name: name.into(),
            provider,
            versioning: VersioningConf::default(),
        }
    }

    pub fn with_versioning(mut self, versioning: VersioningConf) -> Self {
        self.versioning = versioning;
        self
    }

    /// Any bucket whose content has a remote source of truth
    pub fn is_remote(&self) -> bool {
        self.provider != Provider::Local
    }

    pub fn is_cloud(&self) -> bool {
        self.provider.is_cloud()
    }

    pub fn is_remote_cluster(&self) -> bool {
        self.provider == Provider::RemoteCluster
    }

    pub fn sync_warm_get(&self) -> bool {
        self.versioning.sync_warm_get
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.provider, self.name)
    }
}
