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

//! Time-range queries and histograms
//!
//! A request flows through: translate the textual filter, AND it with the
//! generated time-range clause, pick a bucket width (histograms only), run
//! the search through the persistence service, shape the response.

use crate::filter::{ExpressionParser, FilterTranslator};
use crate::histogram::HistogramInterval;
use crate::time_range::{ResolvedRange, TimeRangePayload};
use cdp_core::{AggBucket, CdpError, Result, StorageRecords};
use cdp_storage::{LogicalIndex, PersistenceService, SortField};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const HISTOGRAM_AGG: &str = "histogram";
const GROUP_AGG: &str = "groups";
/// Upper bound on distinct groups per bucket
const MAX_GROUPS: usize = 100;

/// One histogram bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Bucket start
    pub key: DateTime<Utc>,
    /// Bucket start rendered in the requested zone
    pub label: String,
    pub count: u64,
    /// Count per group; groups without documents are absent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, u64>,
}

/// Bucketed counts over a time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub interval: HistogramInterval,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub time_zone: String,
    /// Every group seen in any bucket, sorted
    pub groups: Vec<String>,
    pub buckets: Vec<HistogramBucket>,
    /// Documents in the range
    pub total: u64,
}

/// Query engine over one persistence service
#[derive(Clone)]
pub struct QueryEngine {
    storage: PersistenceService,
    translator: Arc<dyn FilterTranslator>,
}

impl QueryEngine {
    pub fn new(storage: PersistenceService, translator: Arc<dyn FilterTranslator>) -> Self {
        Self {
            storage,
            translator,
        }
    }

    /// Engine using the local expression language for filters
    pub fn with_expression_parser(storage: PersistenceService) -> Self {
        Self::new(storage, Arc::new(ExpressionParser))
    }

    pub fn storage(&self) -> &PersistenceService {
        &self.storage
    }

    /// Translate a textual filter; `None` matches everything
    pub async fn parse_filter(&self, filter: Option<&str>) -> Result<Option<Value>> {
        self.translator.translate(filter).await
    }

    /// Filter AND-combined with an inclusive range on `time_field`
    pub fn range_query(filter: Option<Value>, range: &ResolvedRange, time_field: &str) -> Value {
        let bounds = json!({"range": {time_field: {
            "gte": range.local_from(),
            "lte": range.local_to(),
        }}});
        let must: Vec<Value> = filter.into_iter().chain(std::iter::once(bounds)).collect();
        json!({"bool": {"must": must}})
    }

    /// Newest-first page of records inside the range
    ///
    /// A filter that cannot be translated yields an empty result, an invalid
    /// range is an error.
    #[tracing::instrument(skip(self, payload), fields(index = %index))]
    pub async fn time_range_query(
        &self,
        index: LogicalIndex,
        payload: &TimeRangePayload,
        time_field: &str,
    ) -> Result<StorageRecords> {
        let range = payload.resolve(Utc::now())?;
        let filter = match self.parse_filter(payload.filter.as_deref()).await {
            Ok(filter) => filter,
            Err(e) => {
                tracing::warn!(error = %e, "filter translation failed, returning empty result");
                return Ok(StorageRecords::empty());
            }
        };

        let body = json!({
            "query": Self::range_query(filter, &range, time_field),
            "sort": [SortField::desc(time_field).to_dsl()],
            "from": payload.start,
            "size": payload.limit,
        });
        self.storage.query(index, &body).await
    }

    /// Counts per time bucket, optionally split by `group_by`
    ///
    /// Empty buckets between the range bounds are included. Filter errors
    /// propagate.
    #[tracing::instrument(skip(self, payload), fields(index = %index))]
    pub async fn histogram(
        &self,
        index: LogicalIndex,
        payload: &TimeRangePayload,
        time_field: &str,
        group_by: Option<&str>,
    ) -> Result<Histogram> {
        let range = payload.resolve(Utc::now())?;
        let filter = self.parse_filter(payload.filter.as_deref()).await?;
        let interval = HistogramInterval::select(range.from, range.to);
        tracing::debug!(%interval, "selected histogram interval");

        let mut date_histogram = json!({
            "field": time_field,
            "fixed_interval": interval.as_fixed_interval(),
            "min_doc_count": 0,
            "extended_bounds": {"min": range.local_from(), "max": range.local_to()},
        });
        if !range.is_utc() {
            date_histogram["time_zone"] = json!(range.timezone.name());
        }
        let mut aggregation = json!({"date_histogram": date_histogram});
        if let Some(group) = group_by {
            aggregation["aggs"] = json!({GROUP_AGG: {"terms": {"field": group, "size": MAX_GROUPS}}});
        }

        let body = json!({
            "query": Self::range_query(filter, &range, time_field),
            "size": 0,
            "aggs": {HISTOGRAM_AGG: aggregation},
        });
        let result = self.storage.query(index, &body).await?;

        let mut groups = BTreeSet::new();
        let mut buckets = Vec::new();
        for bucket in result.aggregation(HISTOGRAM_AGG).unwrap_or_default() {
            let shaped = shape_bucket(bucket, &range)?;
            groups.extend(shaped.groups.keys().cloned());
            buckets.push(shaped);
        }

        Ok(Histogram {
            interval,
            from: range.from,
            to: range.to,
            time_zone: range.timezone.name().to_string(),
            groups: groups.into_iter().collect(),
            buckets,
            total: result.total(),
        })
    }
}

fn shape_bucket(bucket: &AggBucket, range: &ResolvedRange) -> Result<HistogramBucket> {
    let key = bucket
        .key
        .as_i64()
        .and_then(|millis| Utc.timestamp_millis_opt(millis).single())
        .ok_or_else(|| {
            CdpError::storage(
                "malformed histogram bucket key",
                json!({"key": bucket.key.clone()}),
            )
        })?;
    let label = bucket.key_as_string.clone().unwrap_or_else(|| {
        key.with_timezone(&range.timezone)
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    });
    let groups = bucket
        .children
        .get(GROUP_AGG)
        .map(|children| {
            children
                .iter()
                .filter(|child| child.count > 0)
                .map(|child| (child.key_string(), child.count))
                .collect()
        })
        .unwrap_or_default();

    Ok(HistogramBucket {
        key,
        label,
        count: bucket.count,
        groups,
    })
}
