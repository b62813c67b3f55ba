// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Configuration for the storage substrate
//!
//! Plain serde structs with defaults. Nothing here reads the environment;
//! the embedding process decides where values come from.

use crate::cache::DEFAULT_MAX_POOL_SIZE;
use crate::error::{CdpError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default schema version prefix used in every physical address
pub const DEFAULT_VERSION_PREFIX: &str = "100";

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpConfig {
    #[serde(default)]
    pub elastic: ElasticConfig,

    /// Schema version prefix, e.g. `"100"` in `prod-100.acme.event`
    #[serde(default = "default_version_prefix")]
    pub version_prefix: String,

    #[serde(default)]
    pub partitioning: PartitioningConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Directory with index schema files (optional)
    #[serde(default)]
    pub mappings_dir: Option<PathBuf>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            elastic: ElasticConfig::default(),
            version_prefix: default_version_prefix(),
            partitioning: PartitioningConfig::default(),
            cache: CacheConfig::default(),
            mappings_dir: None,
        }
    }
}

impl CdpConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.elastic.hosts.is_empty() {
            return Err(CdpError::Config("at least one elastic host is required".into()));
        }
        if self.version_prefix.is_empty() || self.version_prefix.contains('.') {
            return Err(CdpError::Config(format!(
                "version prefix {:?} must be non-empty and contain no dots",
                self.version_prefix
            )));
        }
        if self.cache.max_pool_size == 0 {
            return Err(CdpError::Config("cache.max_pool_size must be positive".into()));
        }
        Ok(())
    }
}

/// Document-search cluster connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Base URLs, used round-robin
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            username: None,
            password: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ElasticConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Partition granularity of the high-volume streams
///
/// Values are granularity names (`minute`, `hour`, `day`, `month`, `quarter`),
/// parsed once when the index catalog is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitioningConfig {
    #[serde(default = "default_month")]
    pub event: String,
    #[serde(default = "default_quarter")]
    pub profile: String,
    #[serde(default = "default_quarter")]
    pub session: String,
    #[serde(default = "default_month")]
    pub log: String,
}

impl Default for PartitioningConfig {
    fn default() -> Self {
        Self {
            event: default_month(),
            profile: default_quarter(),
            session: default_quarter(),
            log: default_month(),
        }
    }
}

/// Read-through cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// TTL of routing rule lookups
    #[serde(default = "default_rules_ttl")]
    pub rules_ttl_secs: u64,

    /// TTL of plugin spec lookups
    #[serde(default = "default_plugin_ttl")]
    pub plugin_ttl_secs: u64,

    /// TTL of event-type metadata lookups
    #[serde(default = "default_event_type_ttl")]
    pub event_type_ttl_secs: u64,

    /// Cache empty lookups too
    #[serde(default)]
    pub allow_null_results: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            rules_ttl_secs: default_rules_ttl(),
            plugin_ttl_secs: default_plugin_ttl(),
            event_type_ttl_secs: default_event_type_ttl(),
            allow_null_results: false,
        }
    }
}

fn default_version_prefix() -> String {
    DEFAULT_VERSION_PREFIX.to_string()
}

fn default_hosts() -> Vec<String> {
    vec!["http://localhost:9200".to_string()]
}

fn default_request_timeout() -> u64 {
    30
}

fn default_month() -> String {
    "month".to_string()
}

fn default_quarter() -> String {
    "quarter".to_string()
}

fn default_max_pool_size() -> usize {
    DEFAULT_MAX_POOL_SIZE
}

fn default_rules_ttl() -> u64 {
    15
}

fn default_plugin_ttl() -> u64 {
    60
}

fn default_event_type_ttl() -> u64 {
    60
}
