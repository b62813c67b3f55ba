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

//! Read-through lookups on hot configuration paths
//!
//! Routing rules, plugin specs and event-type metadata are read on every
//! tracked event but change rarely, so each lookup is memoized with its own
//! TTL in one shared cache. Keys include the bound tenant and environment.

use cdp_core::config::CacheConfig;
use cdp_core::{current_context, CacheStats, Memoizer, MemoryCache, Result, StorageRecord, StorageRecords};
use cdp_storage::{LogicalIndex, PersistenceService};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on rules attached to one `(event type, source)` pair
const MAX_RULES: usize = 1000;

/// Memoized configuration lookups
#[derive(Clone)]
pub struct LookupCache {
    storage: PersistenceService,
    cache: Arc<MemoryCache>,
    rules: Memoizer,
    plugins: Memoizer,
    event_types: Memoizer,
}

impl LookupCache {
    pub fn new(storage: PersistenceService, config: &CacheConfig) -> Self {
        let cache = Arc::new(MemoryCache::new("lookups", config.max_pool_size));
        let memoizer = |name: &str, ttl_secs: u64| {
            Memoizer::new(cache.clone(), name, Duration::from_secs(ttl_secs))
                .allow_null_results(config.allow_null_results)
        };
        Self {
            rules: memoizer("rules", config.rules_ttl_secs),
            plugins: memoizer("plugin", config.plugin_ttl_secs),
            event_types: memoizer("event_type", config.event_type_ttl_secs),
            storage,
            cache,
        }
    }

    /// Enabled routing rules for an event type arriving from a source
    pub async fn rules(&self, event_type: &str, source_id: &str) -> Result<StorageRecords> {
        let ctx = current_context();
        let args = (ctx.tenant(), ctx.is_production(), event_type, source_id);
        self.rules
            .call(&args, || async {
                tracing::debug!(event_type, source_id, "loading routing rules");
                self.storage
                    .load_by_values(
                        LogicalIndex::Rule,
                        &[
                            ("event.type", json!(event_type)),
                            ("source.id", json!(source_id)),
                            ("enabled", json!(true)),
                        ],
                        None,
                        MAX_RULES,
                    )
                    .await
            })
            .await
    }

    /// Plugin spec by id
    pub async fn plugin(&self, id: &str) -> Result<Option<StorageRecord>> {
        let ctx = current_context();
        let args = (ctx.tenant(), ctx.is_production(), id);
        self.plugins
            .call(&args, || self.storage.load(LogicalIndex::Action, id))
            .await
    }

    /// Metadata of an event type
    pub async fn event_type(&self, event_type: &str) -> Result<Option<StorageRecord>> {
        let ctx = current_context();
        let args = (ctx.tenant(), ctx.is_production(), event_type);
        self.event_types
            .call(&args, || async {
                let found = self
                    .storage
                    .load_by(LogicalIndex::EventManagement, "event_type", &json!(event_type), 1)
                    .await?;
                Ok(found.into_records().into_iter().next())
            })
            .await
    }

    pub fn invalidate_rules(&self, event_type: &str, source_id: &str) {
        let ctx = current_context();
        self.rules
            .invalidate(&(ctx.tenant(), ctx.is_production(), event_type, source_id));
    }

    pub fn invalidate_plugin(&self, id: &str) {
        let ctx = current_context();
        self.plugins.invalidate(&(ctx.tenant(), ctx.is_production(), id));
    }

    pub fn invalidate_event_type(&self, event_type: &str) {
        let ctx = current_context();
        self.event_types
            .invalidate(&(ctx.tenant(), ctx.is_production(), event_type));
    }

    /// Drop every cached lookup of every tenant
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
