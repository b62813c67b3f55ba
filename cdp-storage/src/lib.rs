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

//! CDP Storage Layer
//!
//! Addressing and persistence on top of a document-search engine.
//!
//! ## Architecture
//!
//! - **Index catalog**: closed set of logical indices with static descriptors
//! - **Resolver**: logical name + context + clock to physical alias/index
//! - **Backends**: Elasticsearch over HTTP, and an in-memory engine for tests
//! - **Persistence service**: CRUD/search/bulk-upsert, single error boundary
//! - **Installer**: templates, partitions and aliases on demand
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cdp_core::{with_context, CdpConfig, Context};
//! use cdp_storage::{ElasticBackend, IndexResolver, LogicalIndex, PersistenceService};
//!
//! let config = CdpConfig::default();
//! let backend = Arc::new(ElasticBackend::new(&config.elastic)?);
//! let resolver = Arc::new(IndexResolver::from_config(&config)?);
//! let storage = PersistenceService::new(backend, resolver);
//!
//! let profile = with_context(Context::new("acme", true), async {
//!     storage.load(LogicalIndex::Profile, "p-1").await
//! })
//! .await?;
//! ```

pub mod backend;
pub mod error;
pub mod index;
pub mod service;
pub mod setup;

pub use backend::{BulkItem, BulkOperation, BulkResponse, ElasticBackend, MemoryBackend, SearchBackend};
pub use error::{BackendError, BackendResult};
pub use index::{
    resolve_partition_suffix, IndexCatalog, IndexDescriptor, IndexResolver, IndexTemplate,
    LogicalIndex, Partitioning,
};
pub use service::{PersistenceService, SortField, SortOrder};
pub use setup::{IndexInstaller, InstallReport};
