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

//! Parsing of engine responses into record types

use super::{BulkItem, BulkResponse};
use crate::error::{BackendError, BackendResult};
use cdp_core::{AggBucket, Aggregations, RecordMetadata, StorageRecord, StorageRecords};
use serde_json::Value;
use std::collections::BTreeMap;

/// Hits, total and aggregations of a `_search` response
pub fn parse_search_response(body: &Value) -> BackendResult<StorageRecords> {
    let hits = body
        .get("hits")
        .ok_or_else(|| BackendError::Response("search response has no hits".into()))?;

    let raw_hits = hits
        .get("hits")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut records = Vec::with_capacity(raw_hits.len());
    for hit in raw_hits {
        records.push(parse_hit(hit)?);
    }

    // "total" is a number on old engines and {"value": n, ...} on newer ones
    let total = match hits.get("total") {
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
        Some(Value::Object(t)) => t.get("value").and_then(Value::as_u64).unwrap_or(0),
        _ => records.len() as u64,
    };

    let aggregations = match body.get("aggregations").and_then(Value::as_object) {
        Some(aggs) => parse_aggregations(aggs),
        None => Aggregations::new(),
    };

    Ok(StorageRecords::new(records, total).with_aggregations(aggregations))
}

fn parse_hit(hit: &Value) -> BackendResult<StorageRecord> {
    let id = hit
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::Response("hit without _id".into()))?;
    let index = hit.get("_index").and_then(Value::as_str).unwrap_or_default();
    let source = hit.get("_source").cloned().unwrap_or(Value::Object(Default::default()));

    let record = StorageRecord::from_value(source)
        .ok_or_else(|| BackendError::Response(format!("document {id} is not an object")))?;
    Ok(record.with_metadata(RecordMetadata {
        id: id.to_string(),
        index: index.to_string(),
    }))
}

fn parse_aggregations(aggs: &serde_json::Map<String, Value>) -> Aggregations {
    aggs.iter()
        .filter_map(|(name, agg)| {
            let buckets = agg.get("buckets")?.as_array()?;
            Some((name.clone(), buckets.iter().map(parse_bucket).collect()))
        })
        .collect()
}

fn parse_bucket(bucket: &Value) -> AggBucket {
    let key = bucket.get("key").cloned().unwrap_or(Value::Null);
    let count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
    let mut parsed = AggBucket::new(key, count);
    parsed.key_as_string = bucket
        .get("key_as_string")
        .and_then(Value::as_str)
        .map(str::to_string);

    if let Some(fields) = bucket.as_object() {
        let children: BTreeMap<String, Vec<AggBucket>> = parse_aggregations(fields);
        parsed.children = children;
    }
    parsed
}

/// Per-item outcome of a `_bulk` response
pub fn parse_bulk_response(body: &Value) -> BackendResult<BulkResponse> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| BackendError::Response("bulk response has no items".into()))?;

    let items = items
        .iter()
        .filter_map(|item| item.as_object()?.values().next())
        .map(|result| BulkItem {
            index: result["_index"].as_str().unwrap_or_default().to_string(),
            id: result["_id"].as_str().unwrap_or_default().to_string(),
            status: result["status"].as_u64().unwrap_or(0) as u16,
            error: result.get("error").map(|e| match e {
                Value::String(s) => s.clone(),
                other => {
                    let kind = other["type"].as_str().unwrap_or("error");
                    let reason = other["reason"].as_str().unwrap_or_default();
                    format!("{kind}: {reason}")
                }
            }),
        })
        .collect();

    Ok(BulkResponse { items })
}
