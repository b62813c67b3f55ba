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

//! Configuration loading for the `cdp` binary
//!
//! Priority: TOML file > `CDP_*` environment variables > defaults.
//!
//! Supported environment variables:
//! - CDP_ELASTIC_HOSTS: Comma-separated base URLs (default: http://localhost:9200)
//! - CDP_ELASTIC_USERNAME / CDP_ELASTIC_PASSWORD: Basic auth credentials
//! - CDP_ELASTIC_TIMEOUT: Request timeout in seconds (default: 30)
//! - CDP_VERSION_PREFIX: Schema version prefix (default: 100)
//! - CDP_MAPPINGS_DIR: Directory with index schema files
//! - CDP_EVENT_PARTITIONING, CDP_PROFILE_PARTITIONING, CDP_SESSION_PARTITIONING,
//!   CDP_LOG_PARTITIONING: Partition granularity overrides
//! - CDP_CACHE_MAX_POOL_SIZE: Lookup cache pool size (default: 1000)

use anyhow::{Context as _, Result};
use cdp_core::CdpConfig;
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file over the defaults
pub fn from_file<P: AsRef<Path>>(path: P) -> Result<CdpConfig> {
    overlay_file(&CdpConfig::default(), path.as_ref())
}

/// Settings present in the file replace those of `base`, the rest are kept
fn overlay_file(base: &CdpConfig, path: &Path) -> Result<CdpConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {path:?}"))?;
    let overlay: toml::Table =
        toml::from_str(&content).with_context(|| format!("Invalid config file {path:?}"))?;

    let mut merged = toml::Value::try_from(base).context("Failed to encode configuration")?;
    merge(&mut merged, toml::Value::Table(overlay));
    merged
        .try_into()
        .with_context(|| format!("Invalid config file {path:?}"))
}

fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply environment overrides read through `lookup`
///
/// Values that do not parse are ignored.
pub fn apply_env<F>(config: &mut CdpConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(hosts) = lookup("CDP_ELASTIC_HOSTS") {
        let hosts: Vec<String> = hosts
            .split(',')
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .map(String::from)
            .collect();
        if !hosts.is_empty() {
            config.elastic.hosts = hosts;
        }
    }
    if let Some(username) = lookup("CDP_ELASTIC_USERNAME") {
        config.elastic.username = Some(username);
    }
    if let Some(password) = lookup("CDP_ELASTIC_PASSWORD") {
        config.elastic.password = Some(password);
    }
    if let Some(timeout) = lookup("CDP_ELASTIC_TIMEOUT").and_then(|v| v.parse().ok()) {
        config.elastic.request_timeout_secs = timeout;
    }
    if let Some(prefix) = lookup("CDP_VERSION_PREFIX") {
        config.version_prefix = prefix;
    }
    if let Some(dir) = lookup("CDP_MAPPINGS_DIR") {
        config.mappings_dir = Some(PathBuf::from(dir));
    }

    let partitioning = &mut config.partitioning;
    for (var, slot) in [
        ("CDP_EVENT_PARTITIONING", &mut partitioning.event),
        ("CDP_PROFILE_PARTITIONING", &mut partitioning.profile),
        ("CDP_SESSION_PARTITIONING", &mut partitioning.session),
        ("CDP_LOG_PARTITIONING", &mut partitioning.log),
    ] {
        if let Some(value) = lookup(var) {
            *slot = value;
        }
    }

    if let Some(size) = lookup("CDP_CACHE_MAX_POOL_SIZE").and_then(|v| v.parse().ok()) {
        config.cache.max_pool_size = size;
    }
}

/// Load configuration with priority: file > env > defaults
pub fn load(config_file: Option<PathBuf>) -> Result<CdpConfig> {
    let mut config = CdpConfig::default();
    apply_env(&mut config, |key| std::env::var(key).ok());

    if let Some(path) = config_file {
        if path.exists() {
            tracing::info!("Loading configuration from file: {:?}", path);
            config = overlay_file(&config, &path)?;
        } else {
            tracing::warn!("Config file not found: {:?}, using environment and defaults", path);
        }
    }

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_defaults() {
        let mut config = CdpConfig::default();
        apply_env(
            &mut config,
            env(&[
                ("CDP_ELASTIC_HOSTS", "http://es1:9200, http://es2:9200"),
                ("CDP_ELASTIC_TIMEOUT", "5"),
                ("CDP_VERSION_PREFIX", "091"),
                ("CDP_EVENT_PARTITIONING", "day"),
                ("CDP_CACHE_MAX_POOL_SIZE", "not-a-number"),
            ]),
        );

        assert_eq!(config.elastic.hosts, vec!["http://es1:9200", "http://es2:9200"]);
        assert_eq!(config.elastic.request_timeout_secs, 5);
        assert_eq!(config.version_prefix, "091");
        assert_eq!(config.partitioning.event, "day");
        assert_eq!(config.partitioning.profile, "quarter");
        assert_eq!(config.cache.max_pool_size, 1000);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
version_prefix = "200"

[elastic]
hosts = ["https://search.internal:9243"]
username = "cdp"

[cache]
rules_ttl_secs = 30
"#
        )
        .unwrap();

        let config = from_file(file.path()).unwrap();
        assert_eq!(config.version_prefix, "200");
        assert_eq!(config.elastic.hosts, vec!["https://search.internal:9243"]);
        assert_eq!(config.elastic.username.as_deref(), Some("cdp"));
        assert_eq!(config.cache.rules_ttl_secs, 30);
        assert_eq!(config.cache.plugin_ttl_secs, 60);
    }

    #[test]
    fn test_file_wins_over_env() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[elastic]\nhosts = [\"http://from-file:9200\"]").unwrap();

        let mut config = CdpConfig::default();
        apply_env(
            &mut config,
            env(&[("CDP_ELASTIC_HOSTS", "http://from-env:9200"), ("CDP_ELASTIC_USERNAME", "ops")]),
        );
        let config = overlay_file(&config, file.path()).unwrap();

        assert_eq!(config.elastic.hosts, vec!["http://from-file:9200"]);
        assert_eq!(config.elastic.username.as_deref(), Some("ops"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "version_prefix = [").unwrap();
        assert!(from_file(file.path()).is_err());
    }
}
