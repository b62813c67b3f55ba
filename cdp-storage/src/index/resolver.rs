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

//! Physical address resolution
//!
//! ## Address layout
//!
//! ```text
//! alias         = ["prod-"] version "." tenant "." logical
//! write target  = alias "-" suffix            (partitioned)
//!               = alias                       (otherwise)
//! storage index = alias "-" suffix            (partitioned)
//!               = alias "-index"              (aliased, single index)
//!               = alias                       (not aliased)
//! ```
//!
//! The `prod-` prefix is omitted for staging contexts and for descriptors
//! flagged `staging_only`. Every function here is pure in
//! `(descriptor, context, now)`.

use super::catalog::{IndexCatalog, IndexDescriptor, LogicalIndex, Partitioning};
use cdp_core::config::CdpConfig;
use cdp_core::{current_context, CdpError, Context, Result};
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Index template covering every partition of a rolling resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexTemplate {
    pub name: String,
    /// Index pattern the template applies to
    pub pattern: String,
    /// Alias every matching partition joins
    pub alias: String,
}

/// Partition suffix for `now`
///
/// - month: `YYYY-M`
/// - quarter: `YYYY-qN`
/// - day: `YYYY-M/D`
/// - hour: `YYYY-M/D/H`
/// - minute: `YYYY-M/D/H/Min`
pub fn resolve_partition_suffix(granularity: Partitioning, now: DateTime<Utc>) -> Result<String> {
    let (year, month) = (now.year(), now.month());
    let suffix = match granularity {
        Partitioning::Month => format!("{year}-{month}"),
        Partitioning::Quarter => format!("{year}-q{}", (month - 1) / 3 + 1),
        Partitioning::Day => format!("{year}-{month}/{}", now.day()),
        Partitioning::Hour => format!("{year}-{month}/{}/{}", now.day(), now.hour()),
        Partitioning::Minute => format!(
            "{year}-{month}/{}/{}/{}",
            now.day(),
            now.hour(),
            now.minute()
        ),
        Partitioning::None => {
            return Err(CdpError::InvalidPartitioning(granularity.to_string()));
        }
    };
    Ok(suffix)
}

/// Computes physical addresses from logical names
#[derive(Debug, Clone)]
pub struct IndexResolver {
    catalog: Arc<IndexCatalog>,
    version_prefix: String,
}

impl IndexResolver {
    pub fn new(catalog: Arc<IndexCatalog>, version_prefix: impl Into<String>) -> Self {
        Self {
            catalog,
            version_prefix: version_prefix.into(),
        }
    }

    /// Build the catalog and resolver from configuration
    pub fn from_config(config: &CdpConfig) -> Result<Self> {
        let catalog = IndexCatalog::from_config(&config.partitioning)?;
        Ok(Self::new(Arc::new(catalog), config.version_prefix.clone()))
    }

    pub fn catalog(&self) -> &IndexCatalog {
        &self.catalog
    }

    pub fn version_prefix(&self) -> &str {
        &self.version_prefix
    }

    pub fn descriptor(&self, logical: LogicalIndex) -> &IndexDescriptor {
        self.catalog.get(logical)
    }

    /// Alias for the bound context
    pub fn resolve_alias(&self, logical: LogicalIndex) -> String {
        self.resolve_alias_for(logical, &current_context())
    }

    pub fn resolve_alias_for(&self, logical: LogicalIndex, ctx: &Context) -> String {
        let descriptor = self.catalog.get(logical);
        let env = if ctx.is_production() && !descriptor.staging_only {
            "prod-"
        } else {
            ""
        };
        let alias = format!(
            "{env}{}.{}.{}",
            self.version_prefix,
            ctx.tenant(),
            descriptor.name()
        );
        tracing::debug!(index = %logical, tenant = ctx.tenant(), %alias, "resolved alias");
        alias
    }

    /// Alias for a logical name given as text
    pub fn resolve_alias_by_name(&self, name: &str) -> Result<String> {
        Ok(self.resolve_alias(name.parse()?))
    }

    /// Index that must receive new writes at `now`
    pub fn resolve_write_target(&self, logical: LogicalIndex, now: DateTime<Utc>) -> Result<String> {
        self.resolve_write_target_for(logical, &current_context(), now)
    }

    pub fn resolve_write_target_for(
        &self,
        logical: LogicalIndex,
        ctx: &Context,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let descriptor = self.catalog.get(logical);
        let alias = self.resolve_alias_for(logical, ctx);
        if !descriptor.partitioned {
            return Ok(alias);
        }
        let suffix = resolve_partition_suffix(descriptor.granularity, now)?;
        Ok(format!("{alias}-{suffix}"))
    }

    /// Physical index an alias currently points at
    pub fn resolve_storage_index(&self, logical: LogicalIndex, now: DateTime<Utc>) -> Result<String> {
        self.resolve_storage_index_for(logical, &current_context(), now)
    }

    pub fn resolve_storage_index_for(
        &self,
        logical: LogicalIndex,
        ctx: &Context,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let descriptor = self.catalog.get(logical);
        if descriptor.partitioned {
            return self.resolve_write_target_for(logical, ctx, now);
        }
        let alias = self.resolve_alias_for(logical, ctx);
        if descriptor.aliased {
            Ok(format!("{alias}-index"))
        } else {
            Ok(alias)
        }
    }

    /// Template for partitioned resources; `None` for single-index ones
    pub fn resolve_template(&self, logical: LogicalIndex) -> Option<IndexTemplate> {
        self.resolve_template_for(logical, &current_context())
    }

    pub fn resolve_template_for(&self, logical: LogicalIndex, ctx: &Context) -> Option<IndexTemplate> {
        if !self.catalog.get(logical).partitioned {
            return None;
        }
        let alias = self.resolve_alias_for(logical, ctx);
        Some(IndexTemplate {
            name: format!("template.{alias}"),
            pattern: format!("{alias}-*"),
            alias,
        })
    }
}
