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

//! Persistence service against the in-memory engine

use async_trait::async_trait;
use cdp_core::{with_context, CdpError, Context, StorageRecord};
use cdp_storage::{
    BackendError, BackendResult, BulkOperation, BulkResponse, IndexCatalog, IndexInstaller,
    IndexResolver, LogicalIndex, MemoryBackend, PersistenceService, SearchBackend, SortField,
};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    backend: Arc<MemoryBackend>,
    resolver: Arc<IndexResolver>,
    storage: PersistenceService,
    installer: IndexInstaller,
}

fn harness() -> Harness {
    let backend = Arc::new(MemoryBackend::new());
    let resolver = Arc::new(IndexResolver::new(Arc::new(IndexCatalog::default()), "100"));
    Harness {
        storage: PersistenceService::new(backend.clone(), resolver.clone()),
        installer: IndexInstaller::new(backend.clone(), resolver.clone()),
        backend,
        resolver,
    }
}

fn record(value: Value) -> StorageRecord {
    StorageRecord::from_value(value).unwrap()
}

#[tokio::test]
async fn test_upsert_same_id_overwrites() {
    let h = harness();
    with_context(Context::new("acme", true), async {
        h.installer.install(LogicalIndex::Profile).await.unwrap();

        let first = h
            .storage
            .upsert_one(LogicalIndex::Profile, record(json!({"id": "p-1", "name": "Ann"})), true)
            .await
            .unwrap();
        let second = h
            .storage
            .upsert_one(LogicalIndex::Profile, record(json!({"id": "p-1", "name": "Bob"})), true)
            .await
            .unwrap();
        assert_eq!(first.saved, 1);
        assert_eq!(second.saved, 1);
        assert_eq!(second.ids, vec!["p-1"]);

        h.storage.refresh(LogicalIndex::Profile).await.unwrap();
        assert_eq!(h.storage.count(LogicalIndex::Profile, &json!({})).await.unwrap(), 1);

        let loaded = h.storage.load(LogicalIndex::Profile, "p-1").await.unwrap().unwrap();
        assert_eq!(loaded.get("name"), Some(&json!("Bob")));
        assert_eq!(loaded.metadata().unwrap().id, "p-1");
    })
    .await;
}

#[tokio::test]
async fn test_without_replace_id_documents_accumulate() {
    let h = harness();
    with_context(Context::new("acme", false), async {
        h.installer.install(LogicalIndex::Log).await.unwrap();
        let records = vec![
            record(json!({"id": "same", "message": "a"})),
            record(json!({"id": "same", "message": "b"})),
        ];
        let result = h.storage.upsert(LogicalIndex::Log, records, false).await.unwrap();
        assert_eq!(result.saved, 2);
        assert_ne!(result.ids[0], result.ids[1]);
        assert_eq!(h.storage.count(LogicalIndex::Log, &json!({})).await.unwrap(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_loaded_record_is_written_back_to_its_partition() {
    let h = harness();
    let old = Utc.with_ymd_and_hms(2023, 2, 10, 0, 0, 0).unwrap();

    with_context(Context::new("acme", true), async {
        h.installer.install_at(LogicalIndex::Profile, old).await.unwrap();
        h.backend
            .bulk(vec![BulkOperation {
                index: "prod-100.acme.profile-2023-q1".into(),
                id: Some("p-9".into()),
                source: json!({"id": "p-9", "visits": 1}),
            }])
            .await
            .unwrap();

        let mut profile = h.storage.load(LogicalIndex::Profile, "p-9").await.unwrap().unwrap();
        assert_eq!(profile.metadata().unwrap().index, "prod-100.acme.profile-2023-q1");
        profile.set("visits", json!(2));
        h.storage.upsert_one(LogicalIndex::Profile, profile, true).await.unwrap();

        let current = h
            .resolver
            .resolve_write_target(LogicalIndex::Profile, Utc::now())
            .unwrap();
        assert_eq!(h.backend.document_count("prod-100.acme.profile-2023-q1"), 1);
        assert_eq!(h.backend.document_count(&current), 0);

        let reloaded = h.storage.load(LogicalIndex::Profile, "p-9").await.unwrap().unwrap();
        assert_eq!(reloaded.get("visits"), Some(&json!(2)));
    })
    .await;
}

#[tokio::test]
async fn test_missing_index_reads_as_empty() {
    let h = harness();
    with_context(Context::new("nobody", true), async {
        let s = &h.storage;
        assert!(s.load(LogicalIndex::Session, "x").await.unwrap().is_none());
        assert!(s
            .load_by(LogicalIndex::Session, "profile.id", &json!("p"), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(s.count(LogicalIndex::Session, &json!({})).await.unwrap(), 0);
        assert_eq!(s.delete_by(LogicalIndex::Session, "a", &json!(1)).await.unwrap(), 0);
        assert_eq!(
            s.aggregate(LogicalIndex::Session, &json!({}), "by_x").await.unwrap().total,
            0
        );

        // refresh is not a read path
        assert!(matches!(
            s.refresh(LogicalIndex::Session).await,
            Err(CdpError::Storage { .. })
        ));
    })
    .await;
}

#[tokio::test]
async fn test_tenants_and_environments_are_isolated() {
    let h = harness();
    let contexts = [
        Context::new("acme", true),
        Context::new("acme", false),
        Context::new("globex", true),
    ];

    for (i, ctx) in contexts.iter().enumerate() {
        with_context(ctx.clone(), async {
            h.installer.install(LogicalIndex::Segment).await.unwrap();
            h.storage
                .upsert_one(LogicalIndex::Segment, record(json!({"id": "s", "n": i})), true)
                .await
                .unwrap();
        })
        .await;
    }

    for (i, ctx) in contexts.iter().enumerate() {
        let loaded = with_context(ctx.clone(), async {
            h.storage.load(LogicalIndex::Segment, "s").await.unwrap().unwrap()
        })
        .await;
        assert_eq!(loaded.get("n"), Some(&json!(i)));
    }
}

#[tokio::test]
async fn test_load_by_values_sort_and_aggregate() {
    let h = harness();
    with_context(Context::new("acme", true), async {
        h.installer.install(LogicalIndex::Event).await.unwrap();
        let events = vec![
            record(json!({"id": "e1", "type": "view", "source": {"id": "web"}, "n": 1})),
            record(json!({"id": "e2", "type": "view", "source": {"id": "web"}, "n": 3})),
            record(json!({"id": "e3", "type": "view", "source": {"id": "app"}, "n": 2})),
            record(json!({"id": "e4", "type": "click", "source": {"id": "web"}, "n": 4})),
        ];
        assert!(h.storage.upsert(LogicalIndex::Event, events, true).await.unwrap().is_ok());

        let found = h
            .storage
            .load_by_values(
                LogicalIndex::Event,
                &[("type", json!("view")), ("source.id", json!("web"))],
                Some(&[SortField::desc("n")]),
                10,
            )
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, vec!["e2", "e1"]);

        let body = json!({"size": 0, "aggs": {"by_type": {"terms": {"field": "type"}}}});
        let result = h.storage.aggregate(LogicalIndex::Event, &body, "by_type").await.unwrap();
        assert_eq!(result.total, 4);
        assert_eq!(
            result.counts(),
            vec![("view".to_string(), 3), ("click".to_string(), 1)]
        );

        assert_eq!(h.storage.delete_by_id(LogicalIndex::Event, "e4").await.unwrap(), 1);
        assert_eq!(h.storage.delete_by(LogicalIndex::Event, "type", &json!("view")).await.unwrap(), 3);
    })
    .await;
}

#[tokio::test]
async fn test_installer_is_idempotent_and_reads_schema() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("rule-index.json"),
        r#"{"mappings": {"properties": {"name": {"type": "keyword"}}}}"#,
    )
    .unwrap();

    let h = harness();
    let installer =
        IndexInstaller::new(h.backend.clone(), h.resolver.clone()).with_mappings_dir(dir.path());

    with_context(Context::new("acme", true), async {
        let first = installer.install(LogicalIndex::Rule).await.unwrap();
        assert_eq!(first.indices, vec!["prod-100.acme.rule-index"]);
        assert_eq!(first.aliases, vec!["prod-100.acme.rule"]);

        let settings = h.backend.index_settings("prod-100.acme.rule-index").unwrap();
        assert_eq!(settings["mappings"]["properties"]["name"]["type"], "keyword");

        assert!(installer.install(LogicalIndex::Rule).await.unwrap().is_noop());

        // partitioned resources get a template that carries the alias
        let events = installer.install(LogicalIndex::Event).await.unwrap();
        assert_eq!(events.templates, vec!["template.prod-100.acme.event"]);
        assert!(events.aliases.is_empty());
        assert_eq!(h.backend.alias_members("prod-100.acme.event").len(), 1);
    })
    .await;
}

/// Backend whose every call fails with a server error
struct BrokenBackend;

fn broken<T>() -> BackendResult<T> {
    Err(BackendError::Api {
        status: 503,
        body: r#"{"error": {"type": "cluster_block_exception"}}"#.into(),
    })
}

#[async_trait]
impl SearchBackend for BrokenBackend {
    async fn bulk(&self, _: Vec<BulkOperation>) -> BackendResult<BulkResponse> {
        broken()
    }
    async fn search(&self, _: &str, _: &Value) -> BackendResult<Value> {
        broken()
    }
    async fn count(&self, _: &str, _: &Value) -> BackendResult<u64> {
        broken()
    }
    async fn delete_by_query(&self, _: &str, _: &Value) -> BackendResult<u64> {
        broken()
    }
    async fn refresh(&self, _: &str) -> BackendResult<()> {
        broken()
    }
    async fn flush(&self, _: &str) -> BackendResult<()> {
        broken()
    }
    async fn index_exists(&self, _: &str) -> BackendResult<bool> {
        broken()
    }
    async fn create_index(&self, _: &str, _: &Value) -> BackendResult<()> {
        broken()
    }
    async fn alias_exists(&self, _: &str) -> BackendResult<bool> {
        broken()
    }
    async fn put_alias(&self, _: &str, _: &str) -> BackendResult<()> {
        broken()
    }
    async fn template_exists(&self, _: &str) -> BackendResult<bool> {
        broken()
    }
    async fn put_template(&self, _: &str, _: &Value) -> BackendResult<()> {
        broken()
    }
    async fn translate_sql(&self, _: &str) -> BackendResult<Value> {
        broken()
    }
}

#[tokio::test]
async fn test_backend_failures_become_storage_errors() {
    let resolver = Arc::new(IndexResolver::new(Arc::new(IndexCatalog::default()), "100"));
    let storage = PersistenceService::new(Arc::new(BrokenBackend), resolver);

    let err = storage.load(LogicalIndex::Flow, "f").await.unwrap_err();
    match err {
        CdpError::Storage { details, .. } => {
            assert_eq!(details["status"], 503);
            assert_eq!(details["body"]["error"]["type"], "cluster_block_exception");
            assert_eq!(details["target"], "100.default.flow");
        }
        other => panic!("unexpected {other:?}"),
    }

    let err = storage
        .upsert_one(LogicalIndex::Flow, record(json!({"id": "f"})), true)
        .await
        .unwrap_err();
    assert!(matches!(err, CdpError::Storage { .. }));
}
