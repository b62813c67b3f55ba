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

//! CDP Core
//!
//! Tenant context propagation, TTL caching and the record model shared by the
//! storage and query layers.
//!
//! ## Architecture
//!
//! - **Context**: task-local `(tenant, environment, user)` binding
//! - **Cache**: lazily expiring in-process pool plus a memoizer on top of it
//! - **Records**: property maps with out-of-band storage metadata
//! - **Errors**: the single error taxonomy every crate of the core returns

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod record;

pub use cache::{CacheItem, CacheStats, CacheableResult, Memoizer, MemoryCache, DEFAULT_MAX_POOL_SIZE};
pub use config::{CacheConfig, CdpConfig, ElasticConfig, PartitioningConfig, DEFAULT_VERSION_PREFIX};
pub use context::{
    context_id, current_context, spawn_with_context, with_context, with_context_sync, Context,
    User, DEFAULT_TENANT,
};
pub use error::{CdpError, Result};
pub use record::{
    AggBucket, AggregateResult, Aggregations, BulkInsertResult, RecordMetadata, StorageRecord,
    StorageRecords,
};
