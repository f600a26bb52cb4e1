//! Dedup cache freshness and cross-restart persistence
//!
//! Covers:
//! - mark freshness and session eviction
//! - flush then load through the in-memory store (native values)
//! - flush then load through the file store (JSON values, new process)
//! - unknown stored shapes are dropped

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use data_platform_gateway::dedup::{DEDUP_STATE_KEY, SessionDedupCache};
use data_platform_gateway::session::{
    FileSessionStore, MemorySessionStore, Session, SessionStore, SessionValue,
};

const ENTRY_TTL: Duration = Duration::from_secs(300);
const SESSION_TIMEOUT: Duration = Duration::from_secs(1800);
const SESSION_TTL: Duration = Duration::from_secs(3600);

fn cache() -> SessionDedupCache {
    SessionDedupCache::new(ENTRY_TTL, SESSION_TIMEOUT)
}

/// Every (session, target) pair the tests ask about, fresh or stale.
const PAIRS: &[(&str, &str)] = &[
    ("s1", "hive.sales.orders"),
    ("s1", "hive.sales.customers"),
    ("s1", "hive.sales.stale"),
    ("s2", "hive.sales.orders"),
    ("s2", "never.marked"),
    ("s3", "hive.sales.orders"),
];

fn populated() -> SessionDedupCache {
    let cache = cache();
    cache.mark_sent("s1", "hive.sales.orders");
    cache.mark_sent("s1", "hive.sales.customers");
    cache.mark_sent_at("s1", "hive.sales.stale", Utc::now() - chrono::Duration::minutes(10));
    cache.mark_sent("s2", "hive.sales.orders");
    cache
}

fn answers(cache: &SessionDedupCache) -> Vec<bool> {
    PAIRS
        .iter()
        .map(|(session, target)| cache.was_sent_recently(session, target))
        .collect()
}

#[test]
fn test_mark_freshness() {
    let cache = cache();
    assert!(!cache.was_sent_recently("s1", "t"));
    cache.mark_sent("s1", "t");
    assert!(cache.was_sent_recently("s1", "t"));
    assert!(!cache.was_sent_recently("s2", "t"));

    cache.mark_sent_at("s1", "old", Utc::now() - chrono::Duration::seconds(301));
    assert!(!cache.was_sent_recently("s1", "old"));
}

#[test]
fn test_idle_session_evicted() {
    let cache = cache();
    cache.mark_sent("s1", "t");
    cache.mark_sent("s2", "t");
    assert_eq!(cache.session_count(), 2);

    assert_eq!(cache.cleanup_at(Utc::now()), 0);
    let later = Utc::now() + chrono::Duration::seconds(1801);
    assert_eq!(cache.cleanup_at(later), 2);
    assert_eq!(cache.session_count(), 0);
}

#[tokio::test]
async fn test_round_trip_through_memory_store() {
    let store = MemorySessionStore::new(SESSION_TTL);
    let original = populated();
    let expected = answers(&original);

    let stats = original.flush_to_store(&store, SESSION_TTL).await;
    assert_eq!(stats.written, 2);
    assert_eq!(stats.failed, 0);

    let stored = store.get("s1").await.unwrap().unwrap();
    assert!(matches!(stored.state.get(DEDUP_STATE_KEY), Some(SessionValue::SentMarks(_))));

    let restored = cache();
    assert_eq!(restored.load_from_store(&store).await.unwrap(), 2);
    assert_eq!(answers(&restored), expected);
}

#[tokio::test]
async fn test_round_trip_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.json");
    let original = populated();
    let expected = answers(&original);

    {
        let store = FileSessionStore::open(&path, SESSION_TTL).unwrap();
        let stats = original.flush_to_store(&store, SESSION_TTL).await;
        assert_eq!(stats.written, 2);
        store.close().await.unwrap();
    }

    let reopened = FileSessionStore::open(&path, SESSION_TTL).unwrap();
    let stored = reopened.get("s1").await.unwrap().unwrap();
    assert!(matches!(stored.state.get(DEDUP_STATE_KEY), Some(SessionValue::Json(_))));

    let restored = cache();
    assert_eq!(restored.load_from_store(&reopened).await.unwrap(), 2);
    assert_eq!(answers(&restored), expected);
}

#[tokio::test]
async fn test_flush_merges_into_existing_session_state() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(SESSION_TTL));
    let mut session = Session::new("s1", "ana", SESSION_TTL);
    session.state.insert("cursor".to_string(), json!(42).into());
    store.create(session).await.unwrap();

    let cache = cache();
    cache.mark_sent("s1", "hive.sales.orders");
    cache.flush_to_store(store.as_ref(), SESSION_TTL).await;

    let stored = store.get("s1").await.unwrap().unwrap();
    assert_eq!(stored.user_id, "ana");
    assert_eq!(stored.state.get("cursor"), Some(&SessionValue::Json(json!(42))));
    assert!(stored.state.contains_key(DEDUP_STATE_KEY));
}

#[tokio::test]
async fn test_unknown_shapes_dropped_on_load() {
    let store = MemorySessionStore::new(SESSION_TTL);
    let mut state = BTreeMap::new();
    state.insert(DEDUP_STATE_KEY.to_string(), SessionValue::Json(json!("not a map")));
    let mut broken = Session::new("broken", "ana", SESSION_TTL);
    broken.state = state;
    store.create(broken).await.unwrap();

    let mut partial = Session::new("partial", "ana", SESSION_TTL);
    partial.state.insert(
        DEDUP_STATE_KEY.to_string(),
        SessionValue::Json(json!({
            "good": Utc::now().to_rfc3339(),
            "bad": "yesterday",
            "wrong": 7,
        })),
    );
    store.create(partial).await.unwrap();

    let cache = cache();
    assert_eq!(cache.load_from_store(&store).await.unwrap(), 1);
    assert!(cache.was_sent_recently("partial", "good"));
    assert!(!cache.was_sent_recently("partial", "bad"));
    assert!(!cache.was_sent_recently("broken", "anything"));
}
