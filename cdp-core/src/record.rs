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

//! Storage record model
//!
//! A [`StorageRecord`] owns a property map and, separately, the metadata of
//! where it was loaded from. Metadata is never serialized as a data field and
//! does not take part in equality.

use crate::cache::CacheableResult;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

/// Where a record lives in storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub id: String,
    /// Physical index the record was read from
    pub index: String,
}

/// Generic document with out-of-band metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageRecord {
    data: Map<String, Value>,
    #[serde(skip)]
    metadata: Option<RecordMetadata>,
}

impl StorageRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(data: Map<String, Value>) -> Self {
        Self {
            data,
            metadata: None,
        }
    }

    /// Build from a JSON value; anything but an object yields `None`
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self::from_map(map)),
            _ => None,
        }
    }

    pub fn with_metadata(mut self, metadata: RecordMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Read a dotted path such as `metadata.time.insert`
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.data.get(parts.next()?)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.data.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Value of the `id` data field, when it is a string
    pub fn id(&self) -> Option<&str> {
        self.data.get("id").and_then(Value::as_str)
    }

    pub fn metadata(&self) -> Option<&RecordMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: Option<RecordMetadata>) {
        self.metadata = metadata;
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.data
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.data.clone())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PartialEq for StorageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl From<Map<String, Value>> for StorageRecord {
    fn from(data: Map<String, Value>) -> Self {
        Self::from_map(data)
    }
}

/// One aggregation bucket, possibly with nested sub-aggregations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggBucket {
    pub key: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_as_string: Option<String>,
    pub count: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Vec<AggBucket>>,
}

impl AggBucket {
    pub fn new(key: Value, count: u64) -> Self {
        Self {
            key,
            key_as_string: None,
            count,
            children: BTreeMap::new(),
        }
    }

    /// Key rendered as text, preferring the backend's own formatting
    pub fn key_string(&self) -> String {
        if let Some(s) = &self.key_as_string {
            return s.clone();
        }
        match &self.key {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Named aggregation results
pub type Aggregations = BTreeMap<String, Vec<AggBucket>>;

/// A page of records plus the full match count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageRecords {
    records: Vec<StorageRecord>,
    /// Total number of matches, may exceed the page length
    total: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    aggregations: Aggregations,
}

impl StorageRecords {
    pub fn new(records: Vec<StorageRecord>, total: u64) -> Self {
        Self {
            records,
            total,
            aggregations: Aggregations::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_aggregations(mut self, aggregations: Aggregations) -> Self {
        self.aggregations = aggregations;
        self
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first(&self) -> Option<&StorageRecord> {
        self.records.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, StorageRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[StorageRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<StorageRecord> {
        self.records
    }

    pub fn aggregations(&self) -> &Aggregations {
        &self.aggregations
    }

    pub fn aggregation(&self, name: &str) -> Option<&[AggBucket]> {
        self.aggregations.get(name).map(Vec::as_slice)
    }
}

impl IntoIterator for StorageRecords {
    type Item = StorageRecord;
    type IntoIter = std::vec::IntoIter<StorageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a StorageRecords {
    type Item = &'a StorageRecord;
    type IntoIter = std::slice::Iter<'a, StorageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl CacheableResult for StorageRecords {
    fn is_null_result(&self) -> bool {
        self.records.is_empty() && self.total == 0
    }
}

impl CacheableResult for StorageRecord {
    fn is_null_result(&self) -> bool {
        self.data.is_empty()
    }
}

/// Buckets of a single-field aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Documents matched by the aggregated query
    pub total: u64,
    pub buckets: Vec<AggBucket>,
}

impl AggregateResult {
    /// `(key, count)` pairs in bucket order
    pub fn counts(&self) -> Vec<(String, u64)> {
        self.buckets
            .iter()
            .map(|b| (b.key_string(), b.count))
            .collect()
    }
}

/// Outcome of one or more bulk insert batches
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkInsertResult {
    pub saved: usize,
    pub errors: Vec<String>,
    pub ids: Vec<String>,
}

impl BulkInsertResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl Add for BulkInsertResult {
    type Output = BulkInsertResult;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for BulkInsertResult {
    fn add_assign(&mut self, rhs: Self) {
        self.saved += rhs.saved;
        self.errors.extend(rhs.errors);
        self.ids.extend(rhs.ids);
    }
}

impl std::iter::Sum for BulkInsertResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> StorageRecord {
        StorageRecord::from_value(value).unwrap()
    }

    #[test]
    fn test_metadata_is_out_of_band() {
        let plain = record(json!({"id": "p-1", "name": "Ann"}));
        let loaded = plain.clone().with_metadata(RecordMetadata {
            id: "p-1".into(),
            index: "100.acme.profile-2024-q1".into(),
        });

        assert_eq!(plain, loaded);
        assert_eq!(
            serde_json::to_value(&loaded).unwrap(),
            json!({"id": "p-1", "name": "Ann"})
        );
        assert_eq!(loaded.metadata().unwrap().index, "100.acme.profile-2024-q1");
    }

    #[test]
    fn test_get_path() {
        let rec = record(json!({"metadata": {"time": {"insert": "2024-01-01T00:00:00Z"}}}));
        assert_eq!(
            rec.get_path("metadata.time.insert"),
            Some(&json!("2024-01-01T00:00:00Z"))
        );
        assert_eq!(rec.get_path("metadata.nope"), None);
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(StorageRecord::from_value(json!([1, 2])).is_none());
    }

    #[test]
    fn test_bulk_results_accumulate() {
        let a = BulkInsertResult {
            saved: 2,
            errors: vec![],
            ids: vec!["a".into(), "b".into()],
        };
        let b = BulkInsertResult {
            saved: 1,
            errors: vec!["c: mapper_parsing_exception".into()],
            ids: vec!["d".into()],
        };

        let total: BulkInsertResult = vec![a, b].into_iter().sum();
        assert_eq!(total.saved, 3);
        assert_eq!(total.ids, vec!["a", "b", "d"]);
        assert!(!total.is_ok());
    }

    #[test]
    fn test_bucket_key_string() {
        let mut bucket = AggBucket::new(json!(1_704_067_200_000_i64), 3);
        assert_eq!(bucket.key_string(), "1704067200000");
        bucket.key_as_string = Some("2024-01-01T00:00:00.000Z".into());
        assert_eq!(bucket.key_string(), "2024-01-01T00:00:00.000Z");
    }
}
