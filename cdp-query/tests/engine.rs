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

//! Time-range queries and histograms against the in-memory engine

use cdp_core::{with_context, CdpError, Context, StorageRecord};
use cdp_query::{DatetimeSpec, QueryEngine, SqlTranslator, TimeRangePayload};
use cdp_storage::{IndexCatalog, IndexInstaller, IndexResolver, LogicalIndex, MemoryBackend, PersistenceService};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

const TIME_FIELD: &str = "metadata.time.insert";

struct Harness {
    backend: Arc<MemoryBackend>,
    storage: PersistenceService,
}

fn acme() -> Context {
    Context::new("acme", true)
}

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, d, h, m, 0).unwrap()
}

/// Four events in March 2024 plus one in April
async fn seeded() -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let resolver = Arc::new(IndexResolver::new(Arc::new(IndexCatalog::default()), "100"));
    let storage = PersistenceService::new(backend.clone(), resolver.clone());
    let installer = IndexInstaller::new(backend.clone(), resolver);

    installer.install(LogicalIndex::Event).await.unwrap();
    let events = [
        ("e1", "2024-03-01T10:00:00Z", "page-view"),
        ("e2", "2024-03-01T23:30:00Z", "click"),
        ("e3", "2024-03-02T12:00:00Z", "page-view"),
        ("e4", "2024-03-03T08:00:00Z", "click"),
        ("e5", "2024-04-10T08:00:00Z", "click"),
    ];
    let records = events
        .iter()
        .map(|(id, time, kind)| {
            StorageRecord::from_value(json!({
                "id": id,
                "type": kind,
                "metadata": {"time": {"insert": time}},
            }))
            .unwrap()
        })
        .collect();
    let saved = storage.upsert(LogicalIndex::Event, records, true).await.unwrap();
    assert_eq!(saved.saved, 5);
    storage.refresh(LogicalIndex::Event).await.unwrap();

    Harness { backend, storage }
}

fn march(from: DateTime<Utc>, to: DateTime<Utc>) -> TimeRangePayload {
    TimeRangePayload::between(DatetimeSpec::absolute(from), DatetimeSpec::absolute(to))
}

#[tokio::test]
async fn test_time_range_query_is_sorted_and_paged() {
    with_context(acme(), async {
        let h = seeded().await;
        let engine = QueryEngine::with_expression_parser(h.storage.clone());

        let payload = march(at(1, 0, 0), at(4, 0, 0)).with_page(0, 2);
        let page = engine
            .time_range_query(LogicalIndex::Event, &payload, TIME_FIELD)
            .await
            .unwrap();
        assert_eq!(page.total(), 4);
        let ids: Vec<&str> = page.iter().filter_map(StorageRecord::id).collect();
        assert_eq!(ids, vec!["e4", "e3"]);

        let next = engine
            .time_range_query(LogicalIndex::Event, &payload.clone().with_page(2, 2), TIME_FIELD)
            .await
            .unwrap();
        let ids: Vec<&str> = next.iter().filter_map(StorageRecord::id).collect();
        assert_eq!(ids, vec!["e2", "e1"]);
    })
    .await;
}

#[tokio::test]
async fn test_time_range_query_applies_filter() {
    with_context(acme(), async {
        let h = seeded().await;
        let engine = QueryEngine::with_expression_parser(h.storage.clone());

        let payload = march(at(1, 0, 0), at(31, 0, 0)).with_filter("type == 'click' AND NOT id == e2");
        let result = engine
            .time_range_query(LogicalIndex::Event, &payload, TIME_FIELD)
            .await
            .unwrap();
        assert_eq!(result.total(), 1);
        assert_eq!(result.first().and_then(StorageRecord::id), Some("e4"));
    })
    .await;
}

#[tokio::test]
async fn test_bad_filter_reads_as_empty_but_bad_range_fails() {
    with_context(acme(), async {
        let h = seeded().await;
        let engine = QueryEngine::with_expression_parser(h.storage.clone());

        let broken = march(at(1, 0, 0), at(31, 0, 0)).with_filter("type ==");
        let result = engine
            .time_range_query(LogicalIndex::Event, &broken, TIME_FIELD)
            .await
            .unwrap();
        assert!(result.is_empty());

        let inverted = march(at(31, 0, 0), at(1, 0, 0));
        let err = engine
            .time_range_query(LogicalIndex::Event, &inverted, TIME_FIELD)
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::Range { .. }));

        let err = engine
            .histogram(LogicalIndex::Event, &broken, TIME_FIELD, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CdpError::FilterSyntax { .. }));
    })
    .await;
}

#[tokio::test]
async fn test_histogram_daily_with_groups() {
    with_context(acme(), async {
        let h = seeded().await;
        let engine = QueryEngine::with_expression_parser(h.storage.clone());

        let payload = march(at(1, 0, 0), at(31, 0, 0));
        let histogram = engine
            .histogram(LogicalIndex::Event, &payload, TIME_FIELD, Some("type"))
            .await
            .unwrap();

        assert_eq!(histogram.interval.as_fixed_interval(), "1d");
        assert_eq!(histogram.time_zone, "UTC");
        assert_eq!(histogram.total, 4);
        assert_eq!(histogram.groups, vec!["click", "page-view"]);
        assert_eq!(histogram.buckets.len(), 31);

        let first = &histogram.buckets[0];
        assert_eq!(first.key, at(1, 0, 0));
        assert_eq!(first.count, 2);
        assert_eq!(first.groups["click"], 1);
        assert_eq!(first.groups["page-view"], 1);

        // gaps are filled with empty buckets
        assert_eq!(histogram.buckets[3].count, 0);
        assert!(histogram.buckets[3].groups.is_empty());
        let counted: u64 = histogram.buckets.iter().map(|b| b.count).sum();
        assert_eq!(counted, 4);
    })
    .await;
}

#[tokio::test]
async fn test_histogram_buckets_follow_local_midnight() {
    with_context(acme(), async {
        let h = seeded().await;
        let engine = QueryEngine::with_expression_parser(h.storage.clone());

        let payload = march(at(1, 0, 0), at(31, 0, 0)).with_time_zone("Europe/Warsaw");
        let histogram = engine
            .histogram(LogicalIndex::Event, &payload, TIME_FIELD, None)
            .await
            .unwrap();

        assert_eq!(histogram.time_zone, "Europe/Warsaw");
        let first = &histogram.buckets[0];
        assert_eq!(first.key, Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap());
        assert!(first.label.starts_with("2024-03-01T00:00:00"));
        // 23:30Z on the 1st falls on the 2nd in Warsaw
        assert_eq!(first.count, 1);
        assert_eq!(histogram.buckets[1].count, 2);
    })
    .await;
}

#[tokio::test]
async fn test_histogram_short_range_uses_minutes() {
    with_context(acme(), async {
        let h = seeded().await;
        let engine = QueryEngine::with_expression_parser(h.storage.clone());

        let payload = march(at(1, 8, 0), at(1, 15, 12));
        let histogram = engine
            .histogram(LogicalIndex::Event, &payload, TIME_FIELD, None)
            .await
            .unwrap();
        assert_eq!(histogram.interval.as_fixed_interval(), "8m");
        assert_eq!(histogram.total, 1);
        let hit = histogram.buckets.iter().find(|b| b.count > 0).unwrap();
        assert_eq!(hit.key, at(1, 10, 0));
    })
    .await;
}

#[tokio::test]
async fn test_sql_translator() {
    with_context(acme(), async {
        let h = seeded().await;
        let translator = SqlTranslator::new(h.storage.clone(), LogicalIndex::Event);
        let statement = translator.statement("type = 'click'");
        assert_eq!(statement, "SELECT * FROM \"prod-100.acme.event\" WHERE type = 'click'");
        h.backend.register_sql_translation(
            statement,
            json!({"size": 1000, "query": {"term": {"type": {"value": "click"}}}}),
        );

        let engine = QueryEngine::new(h.storage.clone(), Arc::new(translator));
        let payload = march(at(1, 0, 0), at(31, 0, 0)).with_filter("type = 'click'");
        let result = engine
            .time_range_query(LogicalIndex::Event, &payload, TIME_FIELD)
            .await
            .unwrap();
        assert_eq!(result.total(), 2);

        // the engine rejects what it cannot translate
        let err = engine.parse_filter(Some("type = = 'click'")).await.unwrap_err();
        assert!(matches!(err, CdpError::FilterSyntax { position: 0, .. }));
    })
    .await;
}

#[tokio::test]
async fn test_missing_index_reads_as_empty() {
    with_context(Context::new("nobody", false), async {
        let h = seeded().await;
        let engine = QueryEngine::with_expression_parser(h.storage.clone());
        let payload = march(at(1, 0, 0), at(31, 0, 0));

        let result = engine
            .time_range_query(LogicalIndex::Session, &payload, TIME_FIELD)
            .await
            .unwrap();
        assert!(result.is_empty());

        let histogram = engine
            .histogram(LogicalIndex::Session, &payload, TIME_FIELD, Some("type"))
            .await
            .unwrap();
        assert!(histogram.buckets.is_empty());
        assert!(histogram.groups.is_empty());
    })
    .await;
}
