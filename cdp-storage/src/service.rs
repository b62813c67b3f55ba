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

//! Persistence service
//!
//! Uniform CRUD, search and bulk-upsert operations addressed by logical index.
//! Physical addresses come from the [`IndexResolver`] and the bound context.
//!
//! This is the only place backend errors are handled: every [`BackendError`]
//! leaves as `CdpError::Storage`, except that a missing index on a read or
//! filter path reads as an empty result.

use crate::backend::{BulkOperation, SearchBackend};
use crate::error::BackendError;
use crate::index::{IndexResolver, LogicalIndex};
use cdp_core::{
    current_context, AggregateResult, BulkInsertResult, CdpError, Result, StorageRecord,
    StorageRecords,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One sort key of a query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }

    pub fn to_dsl(&self) -> Value {
        json!({ &self.field: { "order": self.order } })
    }
}

/// Convert a backend error into the public storage error
pub(crate) fn storage_error(err: BackendError, index: &str) -> CdpError {
    let mut details = err.details();
    if let Some(map) = details.as_object_mut() {
        map.insert("target".into(), json!(index));
    }
    CdpError::storage(err.to_string(), details)
}

/// Storage operations against the document-search engine
#[derive(Clone)]
pub struct PersistenceService {
    backend: Arc<dyn SearchBackend>,
    resolver: Arc<IndexResolver>,
}

impl PersistenceService {
    pub fn new(backend: Arc<dyn SearchBackend>, resolver: Arc<IndexResolver>) -> Self {
        Self { backend, resolver }
    }

    pub fn resolver(&self) -> &Arc<IndexResolver> {
        &self.resolver
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Run a search body, reading a missing index as an empty result
    async fn search(&self, alias: &str, body: &Value) -> Result<StorageRecords> {
        let response = match self.backend.search(alias, body).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => {
                tracing::warn!(index = alias, "index not found, returning empty result");
                return Ok(StorageRecords::empty());
            }
            Err(e) => return Err(storage_error(e, alias)),
        };
        crate::backend::response::parse_search_response(&response)
            .map_err(|e| storage_error(e, alias))
    }

    /// Load one record by storage id
    #[tracing::instrument(skip(self), fields(tenant = %current_context().tenant()))]
    pub async fn load(&self, index: LogicalIndex, id: &str) -> Result<Option<StorageRecord>> {
        let alias = self.resolver.resolve_alias(index);
        let body = json!({"query": {"ids": {"values": [id]}}, "size": 1});
        Ok(self.search(&alias, &body).await?.into_records().into_iter().next())
    }

    /// Records whose `field` equals `value`
    #[tracing::instrument(skip(self, value), fields(tenant = %current_context().tenant()))]
    pub async fn load_by(
        &self,
        index: LogicalIndex,
        field: &str,
        value: &Value,
        limit: usize,
    ) -> Result<StorageRecords> {
        let alias = self.resolver.resolve_alias(index);
        let body = json!({"query": {"term": {field: value}}, "size": limit});
        self.search(&alias, &body).await
    }

    /// Records matching every `(field, value)` pair
    #[tracing::instrument(skip(self, pairs, sort), fields(tenant = %current_context().tenant()))]
    pub async fn load_by_values(
        &self,
        index: LogicalIndex,
        pairs: &[(&str, Value)],
        sort: Option<&[SortField]>,
        limit: usize,
    ) -> Result<StorageRecords> {
        let alias = self.resolver.resolve_alias(index);
        let must: Vec<Value> = pairs
            .iter()
            .map(|(field, value)| json!({"term": {*field: value}}))
            .collect();
        let mut body = json!({"query": {"bool": {"must": must}}, "size": limit});
        if let Some(sort) = sort {
            body["sort"] = Value::Array(sort.iter().map(SortField::to_dsl).collect());
        }
        self.search(&alias, &body).await
    }

    /// Index records, overwriting documents with the same id
    ///
    /// With `replace_id` set, a record's `id` field becomes its document id.
    /// A record loaded from storage is written back to the physical index it
    /// came from; all others go to the current write target.
    #[tracing::instrument(skip(self, records), fields(tenant = %current_context().tenant(), count = records.len()))]
    pub async fn upsert(
        &self,
        index: LogicalIndex,
        records: Vec<StorageRecord>,
        replace_id: bool,
    ) -> Result<BulkInsertResult> {
        if records.is_empty() {
            return Ok(BulkInsertResult::default());
        }
        let write_target = self.resolver.resolve_write_target(index, Utc::now())?;

        let operations: Vec<BulkOperation> = records
            .into_iter()
            .map(|record| {
                let metadata = record.metadata().cloned();
                let id = match (replace_id, record.id()) {
                    (true, Some(id)) => Some(id.to_string()),
                    _ => metadata.as_ref().map(|m| m.id.clone()),
                };
                let target = match metadata {
                    Some(m) if !m.index.is_empty() => m.index,
                    _ => write_target.clone(),
                };
                BulkOperation {
                    index: target,
                    id,
                    source: record.to_value(),
                }
            })
            .collect();

        let response = self
            .backend
            .bulk(operations)
            .await
            .map_err(|e| storage_error(e, &write_target))?;

        let mut result = BulkInsertResult::default();
        for item in response.items {
            match item.error {
                Some(error) => {
                    tracing::error!(index = %item.index, id = %item.id, %error, "bulk item failed");
                    result.errors.push(format!("{}: {}", item.id, error));
                }
                None => {
                    result.saved += 1;
                    result.ids.push(item.id);
                }
            }
        }
        Ok(result)
    }

    /// Upsert a single record
    pub async fn upsert_one(
        &self,
        index: LogicalIndex,
        record: StorageRecord,
        replace_id: bool,
    ) -> Result<BulkInsertResult> {
        self.upsert(index, vec![record], replace_id).await
    }

    /// Delete a record by storage id, returning the number removed
    #[tracing::instrument(skip(self), fields(tenant = %current_context().tenant()))]
    pub async fn delete_by_id(&self, index: LogicalIndex, id: &str) -> Result<u64> {
        self.delete_matching(index, &json!({"ids": {"values": [id]}}))
            .await
    }

    /// Delete records whose `field` equals `value`
    #[tracing::instrument(skip(self, value), fields(tenant = %current_context().tenant()))]
    pub async fn delete_by(&self, index: LogicalIndex, field: &str, value: &Value) -> Result<u64> {
        self.delete_matching(index, &json!({"term": {field: value}}))
            .await
    }

    async fn delete_matching(&self, index: LogicalIndex, query: &Value) -> Result<u64> {
        let alias = self.resolver.resolve_alias(index);
        match self.backend.delete_by_query(&alias, query).await {
            Ok(deleted) => Ok(deleted),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(storage_error(e, &alias)),
        }
    }

    /// Run a raw search request body
    #[tracing::instrument(skip(self, body), fields(tenant = %current_context().tenant()))]
    pub async fn query(&self, index: LogicalIndex, body: &Value) -> Result<StorageRecords> {
        let alias = self.resolver.resolve_alias(index);
        self.search(&alias, body).await
    }

    /// Count documents matching a raw request body (its `query` part)
    #[tracing::instrument(skip(self, body), fields(tenant = %current_context().tenant()))]
    pub async fn count(&self, index: LogicalIndex, body: &Value) -> Result<u64> {
        let alias = self.resolver.resolve_alias(index);
        let match_all = json!({"match_all": {}});
        let query = body.get("query").unwrap_or(&match_all);
        match self.backend.count(&alias, query).await {
            Ok(count) => Ok(count),
            Err(e) if e.is_not_found() => Ok(0),
            Err(e) => Err(storage_error(e, &alias)),
        }
    }

    /// Run a request body and return the buckets of aggregation `key`
    #[tracing::instrument(skip(self, body), fields(tenant = %current_context().tenant()))]
    pub async fn aggregate(
        &self,
        index: LogicalIndex,
        body: &Value,
        key: &str,
    ) -> Result<AggregateResult> {
        let records = self.query(index, body).await?;
        Ok(AggregateResult {
            total: records.total(),
            buckets: records.aggregation(key).map(<[_]>::to_vec).unwrap_or_default(),
        })
    }

    /// Make recent writes visible to reads
    #[tracing::instrument(skip(self), fields(tenant = %current_context().tenant()))]
    pub async fn refresh(&self, index: LogicalIndex) -> Result<()> {
        let alias = self.resolver.resolve_alias(index);
        self.backend
            .refresh(&alias)
            .await
            .map_err(|e| storage_error(e, &alias))
    }

    /// Force recent writes to durable storage
    #[tracing::instrument(skip(self), fields(tenant = %current_context().tenant()))]
    pub async fn flush(&self, index: LogicalIndex) -> Result<()> {
        let alias = self.resolver.resolve_alias(index);
        self.backend
            .flush(&alias)
            .await
            .map_err(|e| storage_error(e, &alias))
    }

    /// Translate SQL into a query-DSL request body
    pub async fn translate_sql(&self, sql: &str) -> Result<Value> {
        self.backend
            .translate_sql(sql)
            .await
            .map_err(|e| storage_error(e, "_sql/translate"))
    }
}
