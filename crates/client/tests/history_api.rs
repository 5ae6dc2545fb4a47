//! Integration tests for the read models: version history and record pages.

mod common;

use cleanflow_client::cache::RecordPageCache;
use cleanflow_client::events::{Invalidation, InvalidationBus};
use cleanflow_client::history::VersionHistoryStore;
use cleanflow_core::diff::DiffStatus;
use cleanflow_core::record::{RecordFilter, RecordQuery};
use common::{api, envelope, record_json, version_json};
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test: version history
// ---------------------------------------------------------------------------

/// Versions come back newest first regardless of server order, and a
/// second listing is served from cache.
#[tokio::test]
async fn history_is_sorted_and_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/7/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            version_json(11, 7, "2024-05-01T10:00:00Z", "first"),
            version_json(13, 7, "2024-05-01T12:00:00Z", "third"),
            version_json(12, 7, "2024-05-01T12:00:00Z", "second"),
        ]))))
        .expect(1)
        .mount(&server)
        .await;

    let store = VersionHistoryStore::new(api(&server), &InvalidationBus::default());
    let versions = store.list(7).await.unwrap();
    let ids: Vec<_> = versions.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![13, 12, 11]);

    let again = store.list(7).await.unwrap();
    assert_eq!(again, versions);
}

/// Each version's diff reports the changed phone field.
#[tokio::test]
async fn version_diff_marks_changed_fields() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/7/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            version_json(11, 7, "2024-05-01T10:00:00Z", "Manual correction"),
        ]))))
        .mount(&server)
        .await;

    let store = VersionHistoryStore::new(api(&server), &InvalidationBus::default());
    let versions = store.list(7).await.unwrap();
    let diff = VersionHistoryStore::diff(&versions[0]);
    let phone = diff.iter().find(|d| d.field == "phone").unwrap();
    assert_eq!(phone.status, DiffStatus::Changed);
    assert_eq!(phone.after.as_deref(), Some("13800000000"));
}

/// Editing a reason twice is harmless, patches the cached list and does not
/// refetch or add a version.
#[tokio::test]
async fn reason_update_is_idempotent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/7/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([
            version_json(11, 7, "2024-05-01T10:00:00Z", "typo"),
        ]))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/versions/11/reason"))
        .and(body_json(json!({ "reason": "Customer called" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!(null))))
        .expect(2)
        .mount(&server)
        .await;

    let store = VersionHistoryStore::new(api(&server), &InvalidationBus::default());
    let before = store.list(7).await.unwrap();

    store.update_reason(11, "Customer called").await.unwrap();
    store.update_reason(11, "Customer called").await.unwrap();

    let after = store.list(7).await.unwrap();
    assert_eq!(after.len(), before.len());
    assert_eq!(after[0].reason, "Customer called");
    assert_eq!(after[0].before, before[0].before);
    assert_eq!(after[0].after, before[0].after);
}

/// A history invalidation forces the next listing to refetch.
#[tokio::test]
async fn history_invalidation_refetches() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/records/7/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!([]))))
        .expect(2)
        .mount(&server)
        .await;

    let bus = InvalidationBus::default();
    let store = VersionHistoryStore::new(api(&server), &bus);
    store.list(7).await.unwrap();
    bus.publish(Invalidation::History { record_id: 7 });
    store.list(7).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: record pages
// ---------------------------------------------------------------------------

/// Pages are fetched with the server's parameter names, cached per query
/// and dropped when their batch is invalidated.
#[tokio::test]
async fn record_pages_cache_until_invalidated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/batches/1/records"))
        .and(query_param("page", "2"))
        .and(query_param("pageSize", "100"))
        .and(query_param("filter", "error"))
        .and(query_param("search", "Li"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "data": [record_json(7, 1, "138", "Error")],
            "total": 101
        }))))
        .expect(2)
        .mount(&server)
        .await;

    let bus = InvalidationBus::default();
    let cache = RecordPageCache::new(&bus);
    let api = api(&server);
    let query = RecordQuery {
        page: 2,
        page_size: 500,
        filter: RecordFilter::Error,
        search: "  Li ".to_string(),
    };

    let page = cache.fetch(&api, 1, &query).await.unwrap();
    assert_eq!(page.total, 101);
    assert_eq!(page.data[0].id, 7);

    cache.fetch(&api, 1, &query).await.unwrap();
    assert_eq!(cache.len().await, 1);

    bus.publish(Invalidation::Records { batch_id: 1 });
    assert!(cache.get(1, &query).await.is_none());
    cache.fetch(&api, 1, &query).await.unwrap();
}
