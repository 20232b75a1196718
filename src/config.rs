//! Configuration Module
//!
//! Loads configuration from a YAML file and environment variable overrides:
//! local mountpoints, known buckets and their versioning policy, remote backend
//! endpoints, and tuning for the metadata registry and listing buffers.

use crate::bucket::{Bucket, Provider};
use crate::listing::ListingConfig;
use crate::logging::LoggingConfig;
use crate::registry::RegistryConfig;
use crate::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ENV_LOG_LEVEL: &str = "HYBRID_CACHE_LOG_LEVEL";
pub const ENV_MOUNTPOINTS: &str = "HYBRID_CACHE_MOUNTPOINTS";

/// Custom deserializer for a list of paths, expanding ~ to the home directory
mod pathbuf_serde {
    use serde::{Deserialize, Deserializer};
    use std::path::PathBuf;

    pub fn deserialize_vec<'de, D>(deserializer: D) -> Result<Vec<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Vec::<String>::deserialize(deserializer)?;
        Ok(v.iter().map(|s| expand_tilde(s)).collect())
    }

    pub(crate) fn expand_tilde(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = std::env::var_os("HOME") {
                let mut result = PathBuf::from(home);
                result.push(rest);
                return result;
            }
        }
        PathBuf::from(path)
    }
}

/// Optional path with ~ expansion
pub(crate) mod option_pathbuf_serde {
    use serde::{Deserialize, Deserializer};
    use std::path::PathBuf;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.as_deref().map(super::pathbuf_serde::expand_tilde))
    }
}

/// Custom deserializer for Duration from string format like "30s", "5m", "1h"
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("Empty duration string".to_string());
        }

        let num_end = s
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(s.len());
        if num_end == 0 {
            return Err(format!("No number found in duration string: {}", s));
        }

        let num_str = &s[..num_end];
        let unit = s[num_end..].trim();
        let value: f64 = num_str
            .parse()
            .map_err(|e| format!("Failed to parse number '{}': {}", num_str, e))?;

        let secs = match unit {
            "ms" | "millis" => value / 1000.0,
            "" | "s" | "sec" | "secs" | "seconds" => value,
            "m" | "min" | "mins" | "minutes" => value * 60.0,
            "h" | "hr" | "hours" => value * 3600.0,
            _ => return Err(format!("Unknown duration unit: {}", unit)),
        };
        Duration::try_from_secs_f64(secs)
            .map_err(|e| format!("Invalid duration '{}': {}", s, e))
    }
}

/// Remote backend endpoints, one per provider family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// S3-compatible endpoint serving aws/gcp/azure buckets
    #[serde(default)]
    pub cloud_endpoint: Option<String>,
    /// Endpoint of the remote cluster
    #[serde(default)]
    pub remote_cluster_endpoint: Option<String>,
    /// Plain HTTP origin
    #[serde(default)]
    pub http_endpoint: Option<String>,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "duration_serde::deserialize"
    )]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            cloud_endpoint: None,
            remote_cluster_endpoint: None,
            http_endpoint: None,
            request_timeout: default_request_timeout(),
        }
    }
}

impl BackendsConfig {
    /// Endpoint serving buckets of `provider`, if configured
    pub fn endpoint_for(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::Local => None,
            Provider::Aws | Provider::Gcp | Provider::Azure => self.cloud_endpoint.as_deref(),
            Provider::RemoteCluster => self.remote_cluster_endpoint.as_deref(),
            Provider::Http => self.http_endpoint.as_deref(),
        }
    }

    /// Every remote provider with a configured endpoint
    pub fn endpoints(&self) -> Vec<(Provider, &str)> {
        [
            Provider::Aws,
            Provider::Gcp,
            Provider::Azure,
            Provider::RemoteCluster,
            Provider::Http,
        ]
        .into_iter()
        .filter_map(|p| self.endpoint_for(p).map(|ep| (p, ep)))
        .collect()
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, deserialize_with = "pathbuf_serde::deserialize_vec")]
    pub mountpoints: Vec<PathBuf>,
    #[serde(default)]
    pub buckets: Vec<Bucket>,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from an optional file, apply environment overrides, and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => {
                debug!("No configuration file given, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;

        info!(
            "Configuration: mountpoints={}, buckets={}, registry_enabled={}, registry_max_entries={}, page_size={}",
            config.mountpoints.len(),
            config.buckets.len(),
            config.registry.enabled,
            config.registry.max_entries,
            config.listing.page_size
        );
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::ConfigError(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_yaml_str(&content).map_err(|e| {
            CacheError::ConfigError(format!("Failed to parse config file {:?}: {}", path, e))
        })?;
        info!("Configuration loaded from file: {:?}", path);
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }

        if let Ok(mountpoints) = std::env::var(ENV_MOUNTPOINTS) {
            let paths: Vec<PathBuf> = mountpoints
                .split(':')
                .filter(|s| !s.is_empty())
                .map(pathbuf_serde::expand_tilde)
                .collect();
            if paths.is_empty() {
                warn!("{} is set but lists no paths, ignoring", ENV_MOUNTPOINTS);
            } else {
                self.mountpoints = paths;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.mountpoints.is_empty() {
            return Err(CacheError::ConfigError(
                "at least one mountpoint is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for bck in &self.buckets {
            if bck.name.is_empty() || bck.name.contains('/') {
                return Err(CacheError::ConfigError(format!(
                    "invalid bucket name: {:?}",
                    bck.name
                )));
            }
            if !seen.insert(bck.name.as_str()) {
                return Err(CacheError::ConfigError(format!(
                    "duplicate bucket: {}",
                    bck.name
                )));
            }
            if bck.is_remote() && self.backends.endpoint_for(bck.provider).is_none() {
                return Err(CacheError::ConfigError(format!(
                    "bucket {} has no endpoint configured for provider {}",
                    bck, bck.provider
                )));
            }
        }

        if self.listing.page_size == 0 || self.listing.pool_capacity == 0 {
            return Err(CacheError::ConfigError(
                "listing page_size and pool_capacity must be non-zero".to_string(),
            ));
        }
        if self.registry.enabled && self.registry.max_entries == 0 {
            return Err(CacheError::ConfigError(
                "registry max_entries must be non-zero when enabled".to_string(),
            ));
        }
        if self.backends.request_timeout.is_zero() {
            return Err(CacheError::ConfigError(
                "backends request_timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Configured bucket by name
    pub fn bucket(&self, name: &str) -> Result<&Bucket> {
        self.buckets
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| CacheError::NotFound(format!("bucket {}", name)))
    }
}
