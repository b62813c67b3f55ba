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

//! Document-search backend abstraction
//!
//! The trait mirrors the subset of the Elasticsearch API the core needs.
//! Search results are exchanged in the engine's own JSON shape so that one
//! parser ([`response`]) serves every implementation.

pub mod elastic;
pub mod memory;
pub mod response;

use crate::error::BackendResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use elastic::ElasticBackend;
pub use memory::MemoryBackend;

/// One document of a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub index: String,
    /// Engine-assigned when `None`
    pub id: Option<String>,
    pub source: Value,
}

/// Per-document outcome of a bulk request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub index: String,
    pub id: String,
    pub status: u16,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkItem>,
}

/// Search-engine operations used by the persistence service
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Index (create or replace) documents
    async fn bulk(&self, operations: Vec<BulkOperation>) -> BackendResult<BulkResponse>;

    /// Run a search request body, returning the raw response
    async fn search(&self, index: &str, body: &Value) -> BackendResult<Value>;

    /// Number of documents matching `query` (a query clause, not a request body)
    async fn count(&self, index: &str, query: &Value) -> BackendResult<u64>;

    /// Delete documents matching `query`, returning how many were removed
    async fn delete_by_query(&self, index: &str, query: &Value) -> BackendResult<u64>;

    /// Make recent writes visible to search
    async fn refresh(&self, index: &str) -> BackendResult<()>;

    /// Force recent writes to durable storage
    async fn flush(&self, index: &str) -> BackendResult<()>;

    async fn index_exists(&self, index: &str) -> BackendResult<bool>;

    async fn create_index(&self, index: &str, body: &Value) -> BackendResult<()>;

    async fn alias_exists(&self, alias: &str) -> BackendResult<bool>;

    async fn put_alias(&self, index: &str, alias: &str) -> BackendResult<()>;

    async fn template_exists(&self, name: &str) -> BackendResult<bool>;

    async fn put_template(&self, name: &str, body: &Value) -> BackendResult<()>;

    /// Translate an SQL statement into a query-DSL request body
    async fn translate_sql(&self, sql: &str) -> BackendResult<Value>;
}
