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

//! Static catalog of logical indices
//!
//! The set of logical resources is closed: every one of them is a
//! [`LogicalIndex`] variant carrying an [`IndexDescriptor`]. The catalog is
//! built once at process start (partition granularity of the high-volume
//! streams may be overridden from configuration) and is read-only afterwards.

use cdp_core::config::PartitioningConfig;
use cdp_core::{CdpError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Known logical resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogicalIndex {
    Event,
    Profile,
    Session,
    Log,
    Rule,
    Flow,
    Resource,
    EventSource,
    Destination,
    Segment,
    /// Event-type metadata
    EventManagement,
    /// Plugin specs
    Action,
    ConsentType,
    IdentificationPoint,
    EventReshaping,
    Report,
    User,
}

impl LogicalIndex {
    pub const ALL: [LogicalIndex; 17] = [
        LogicalIndex::Event,
        LogicalIndex::Profile,
        LogicalIndex::Session,
        LogicalIndex::Log,
        LogicalIndex::Rule,
        LogicalIndex::Flow,
        LogicalIndex::Resource,
        LogicalIndex::EventSource,
        LogicalIndex::Destination,
        LogicalIndex::Segment,
        LogicalIndex::EventManagement,
        LogicalIndex::Action,
        LogicalIndex::ConsentType,
        LogicalIndex::IdentificationPoint,
        LogicalIndex::EventReshaping,
        LogicalIndex::Report,
        LogicalIndex::User,
    ];

    /// Logical name as it appears in physical addresses
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalIndex::Event => "event",
            LogicalIndex::Profile => "profile",
            LogicalIndex::Session => "session",
            LogicalIndex::Log => "log",
            LogicalIndex::Rule => "rule",
            LogicalIndex::Flow => "flow",
            LogicalIndex::Resource => "resource",
            LogicalIndex::EventSource => "event-source",
            LogicalIndex::Destination => "destination",
            LogicalIndex::Segment => "segment",
            LogicalIndex::EventManagement => "event-management",
            LogicalIndex::Action => "action",
            LogicalIndex::ConsentType => "consent-type",
            LogicalIndex::IdentificationPoint => "identification-point",
            LogicalIndex::EventReshaping => "event-reshaping",
            LogicalIndex::Report => "report",
            LogicalIndex::User => "user",
        }
    }
}

impl fmt::Display for LogicalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogicalIndex {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self> {
        LogicalIndex::ALL
            .iter()
            .copied()
            .find(|index| index.as_str() == s)
            .ok_or_else(|| CdpError::UnknownIndex(s.to_string()))
    }
}

/// Time window of a rolling partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partitioning {
    None,
    Minute,
    Hour,
    Day,
    Month,
    Quarter,
}

impl Partitioning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partitioning::None => "none",
            Partitioning::Minute => "minute",
            Partitioning::Hour => "hour",
            Partitioning::Day => "day",
            Partitioning::Month => "month",
            Partitioning::Quarter => "quarter",
        }
    }
}

impl fmt::Display for Partitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Partitioning {
    type Err = CdpError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Partitioning::None),
            "minute" => Ok(Partitioning::Minute),
            "hour" => Ok(Partitioning::Hour),
            "day" => Ok(Partitioning::Day),
            "month" => Ok(Partitioning::Month),
            "quarter" => Ok(Partitioning::Quarter),
            _ => Err(CdpError::InvalidPartitioning(s.to_string())),
        }
    }
}

/// Static configuration of one logical resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexDescriptor {
    pub logical: LogicalIndex,
    /// Time-rolling set of physical indices behind one alias
    pub partitioned: bool,
    /// Reads and writes go through an alias
    pub aliased: bool,
    /// One shared copy, never split by environment
    pub staging_only: bool,
    pub granularity: Partitioning,
    /// Schema file name, relative to the mappings directory
    pub schema_file: String,
}

impl IndexDescriptor {
    fn single(logical: LogicalIndex) -> Self {
        Self {
            logical,
            partitioned: false,
            aliased: true,
            staging_only: false,
            granularity: Partitioning::None,
            schema_file: format!("{}-index.json", logical.as_str()),
        }
    }

    fn rolling(logical: LogicalIndex, granularity: Partitioning) -> Self {
        Self {
            partitioned: true,
            granularity,
            ..Self::single(logical)
        }
    }

    pub fn name(&self) -> &'static str {
        self.logical.as_str()
    }
}

/// Immutable registry of index descriptors
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    descriptors: HashMap<LogicalIndex, IndexDescriptor>,
}

impl IndexCatalog {
    /// Build the catalog with partition granularities taken from `config`
    ///
    /// Fails with `InvalidPartitioning` for an unknown granularity name, or
    /// for `none` on a stream that has to roll.
    pub fn from_config(config: &PartitioningConfig) -> Result<Self> {
        let rolling = |logical: LogicalIndex, name: &str| -> Result<IndexDescriptor> {
            let granularity: Partitioning = name.parse()?;
            if granularity == Partitioning::None {
                return Err(CdpError::InvalidPartitioning(format!(
                    "{logical} must be partitioned, got {name:?}"
                )));
            }
            Ok(IndexDescriptor::rolling(logical, granularity))
        };

        let mut descriptors = HashMap::with_capacity(LogicalIndex::ALL.len());
        for logical in LogicalIndex::ALL {
            let descriptor = match logical {
                LogicalIndex::Event => rolling(logical, &config.event)?,
                LogicalIndex::Profile => rolling(logical, &config.profile)?,
                LogicalIndex::Session => rolling(logical, &config.session)?,
                LogicalIndex::Log => rolling(logical, &config.log)?,
                LogicalIndex::User => IndexDescriptor {
                    aliased: false,
                    staging_only: true,
                    ..IndexDescriptor::single(logical)
                },
                _ => IndexDescriptor::single(logical),
            };
            descriptors.insert(logical, descriptor);
        }

        tracing::debug!(
            event = %config.event,
            profile = %config.profile,
            session = %config.session,
            log = %config.log,
            "index catalog built"
        );
        Ok(Self { descriptors })
    }

    pub fn get(&self, logical: LogicalIndex) -> &IndexDescriptor {
        // from_config registers every variant
        &self.descriptors[&logical]
    }

    /// Look a descriptor up by its logical name
    pub fn get_by_name(&self, name: &str) -> Result<&IndexDescriptor> {
        Ok(self.get(name.parse()?))
    }

    /// Descriptors in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &IndexDescriptor> {
        LogicalIndex::ALL.iter().map(move |logical| self.get(*logical))
    }
}

impl Default for IndexCatalog {
    fn default() -> Self {
        let descriptors = LogicalIndex::ALL
            .iter()
            .map(|&logical| {
                let descriptor = match logical {
                    LogicalIndex::Event | LogicalIndex::Log => {
                        IndexDescriptor::rolling(logical, Partitioning::Month)
                    }
                    LogicalIndex::Profile | LogicalIndex::Session => {
                        IndexDescriptor::rolling(logical, Partitioning::Quarter)
                    }
                    LogicalIndex::User => IndexDescriptor {
                        aliased: false,
                        staging_only: true,
                        ..IndexDescriptor::single(logical)
                    },
                    _ => IndexDescriptor::single(logical),
                };
                (logical, descriptor)
            })
            .collect();
        Self { descriptors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for logical in LogicalIndex::ALL {
            assert_eq!(logical.as_str().parse::<LogicalIndex>().unwrap(), logical);
        }
    }

    #[test]
    fn test_unknown_index() {
        match "events".parse::<LogicalIndex>() {
            Err(CdpError::UnknownIndex(name)) => assert_eq!(name, "events"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(IndexCatalog::default().get_by_name("nope").is_err());
    }

    #[test]
    fn test_default_catalog_matches_default_config() {
        let from_config = IndexCatalog::from_config(&PartitioningConfig::default()).unwrap();
        let default = IndexCatalog::default();
        for logical in LogicalIndex::ALL {
            assert_eq!(from_config.get(logical), default.get(logical));
        }
    }

    #[test]
    fn test_config_overrides_granularity() {
        let config = PartitioningConfig {
            event: "day".into(),
            ..PartitioningConfig::default()
        };
        let catalog = IndexCatalog::from_config(&config).unwrap();
        assert_eq!(catalog.get(LogicalIndex::Event).granularity, Partitioning::Day);
        assert!(catalog.get(LogicalIndex::Event).partitioned);
        assert!(!catalog.get(LogicalIndex::Rule).partitioned);
    }

    #[test]
    fn test_invalid_granularity() {
        let config = PartitioningConfig {
            session: "fortnight".into(),
            ..PartitioningConfig::default()
        };
        assert!(matches!(
            IndexCatalog::from_config(&config),
            Err(CdpError::InvalidPartitioning(_))
        ));

        let config = PartitioningConfig {
            log: "none".into(),
            ..PartitioningConfig::default()
        };
        assert!(matches!(
            IndexCatalog::from_config(&config),
            Err(CdpError::InvalidPartitioning(_))
        ));
    }
}
