//! Short-term tier against the in-process key-value backend.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use hmem_core::{
    AdvancedSearchQuery, ConnectionPool, InMemoryKv, MemoryEntry, MemoryError, MemoryStore, PoolConfig,
    RetryPolicy, ShortTermStore,
};
use tokio_test::{assert_err, assert_ok};

use common::{aged, assert_well_ranked};

fn pool(kv: &InMemoryKv, config: PoolConfig, retry: RetryPolicy) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::new(Arc::new(kv.clone()), config, retry))
}

fn store(kv: &InMemoryKv, agent: &str) -> ShortTermStore {
    let pool = pool(kv, PoolConfig::default(), RetryPolicy::default());
    ShortTermStore::new(agent, pool, Duration::from_secs(3600))
}

#[tokio::test]
async fn test_get_returns_stored_entry() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    let entry = aged("User prefers dark roast", ChronoDuration::minutes(5))
        .with_meta("source", "chat")
        .with_meta("turn", 7);

    let id = assert_ok!(store.add(&entry).await);
    let fetched = assert_ok!(store.get(&id).await);
    assert_eq!(fetched, Some(entry));
}

#[tokio::test]
async fn test_delete_then_get_is_not_found() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    let id = store.add(&aged("temporary", ChronoDuration::zero())).await.unwrap();

    store.delete(&id).await.unwrap();
    assert_eq!(store.get(&id).await.unwrap(), None);
    // Deleting again is not an error
    assert_ok!(store.delete(&id).await);
    assert!(kv.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_entries_expire_after_ttl() {
    let kv = InMemoryKv::new();
    let pool = pool(&kv, PoolConfig::default(), RetryPolicy::default());
    let store = ShortTermStore::new("alpha", pool, Duration::from_secs(1));

    let id = store.add(&aged("blink", ChronoDuration::zero())).await.unwrap();
    assert!(store.get(&id).await.unwrap().is_some());

    tokio::time::advance(Duration::from_millis(1100)).await;
    assert_eq!(store.get(&id).await.unwrap(), None);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_zero_ttl_is_rejected() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    let err = store
        .add_with_ttl(&aged("never", ChronoDuration::zero()), Duration::from_millis(500))
        .await
        .unwrap_err();
    assert!(err.is_invalid_request());
    assert!(kv.is_empty());
}

#[tokio::test]
async fn test_search_bounds_and_threshold() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    for content in [
        "coffee at nine",
        "coffee and tea",
        "tea only",
        "espresso is coffee",
        "nothing relevant",
    ] {
        store.add(&aged(content, ChronoDuration::zero())).await.unwrap();
    }

    let results = store
        .search(&AdvancedSearchQuery::new("coffee tea").limit(3))
        .await
        .unwrap();
    assert_well_ranked(&results, 3);
    assert_eq!(results[0].memory_entry.content, "coffee and tea");
    assert_eq!(results[0].relevance_score, 1.0);

    let strict = store
        .search(&AdvancedSearchQuery::new("coffee tea").threshold(0.75))
        .await
        .unwrap();
    assert_eq!(strict.len(), 1);
    assert!(strict.iter().all(|r| r.relevance_score >= 0.75));
}

#[tokio::test]
async fn test_search_filters() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    store
        .add(&aged("old coffee", ChronoDuration::hours(3)).with_meta("mood", "tired"))
        .await
        .unwrap();
    store
        .add(&aged("new coffee", ChronoDuration::minutes(1)).with_meta("mood", "happy"))
        .await
        .unwrap();

    let now = chrono::Utc::now();
    let recent = store
        .search(&AdvancedSearchQuery::new("coffee").time_range(now - ChronoDuration::hours(1), now))
        .await
        .unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].memory_entry.content, "new coffee");

    let tired = store
        .search(&AdvancedSearchQuery::new("coffee").filter("mood", "tired"))
        .await
        .unwrap();
    assert_eq!(tired.len(), 1);
    assert_eq!(tired[0].memory_entry.content, "old coffee");

    let wrong_type = store
        .search(&AdvancedSearchQuery::new("coffee").context_type("tool"))
        .await
        .unwrap();
    assert!(wrong_type.is_empty());
}

#[tokio::test]
async fn test_agents_are_isolated() {
    let kv = InMemoryKv::new();
    let shared = pool(&kv, PoolConfig::default(), RetryPolicy::default());
    let alpha = ShortTermStore::new("alpha", Arc::clone(&shared), Duration::from_secs(60));
    let alpha2 = ShortTermStore::new("alpha2", Arc::clone(&shared), Duration::from_secs(60));
    let glob = ShortTermStore::new("al*", Arc::clone(&shared), Duration::from_secs(60));

    alpha.add(&aged("one", ChronoDuration::zero())).await.unwrap();
    alpha2.add(&aged("two", ChronoDuration::zero())).await.unwrap();
    alpha2.add(&aged("three", ChronoDuration::zero())).await.unwrap();

    assert_eq!(alpha.count().await.unwrap(), 1);
    assert_eq!(alpha2.count().await.unwrap(), 2);
    assert_eq!(glob.count().await.unwrap(), 0);
    assert!(glob.search(&AdvancedSearchQuery::new("")).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recent_and_older_than_ordering() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    for hours in [2, 0, 4, 1, 3] {
        store
            .add(&aged(&format!("{hours}h"), ChronoDuration::hours(hours)))
            .await
            .unwrap();
    }

    let recent = store.get_recent(3).await.unwrap();
    let contents: Vec<&str> = recent.iter().map(|s| s.entry.content.as_str()).collect();
    assert_eq!(contents, vec!["0h", "1h", "2h"]);

    let threshold = chrono::Utc::now() - ChronoDuration::minutes(150);
    let older = store.get_older_than(threshold).await.unwrap();
    let contents: Vec<&str> = older.iter().map(|s| s.entry.content.as_str()).collect();
    assert_eq!(contents, vec!["4h", "3h"]);
}

#[tokio::test]
async fn test_corrupt_records_are_skipped() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    store.add(&aged("valid coffee", ChronoDuration::zero())).await.unwrap();
    kv.insert_raw("agent:alpha:broken", "{not json", Duration::from_secs(60));

    let results = store.search(&AdvancedSearchQuery::new("coffee")).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(store.get_recent(10).await.unwrap().len(), 1);

    let err = store.get("broken").await.unwrap_err();
    assert!(matches!(err, MemoryError::Serialization(_)));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_when_backend_offline() {
    let kv = InMemoryKv::new();
    kv.set_online(false);
    let store = store(&kv, "alpha");

    let err = assert_err!(store.add(&aged("lost", ChronoDuration::zero())).await);
    assert!(matches!(err, MemoryError::StoreUnavailable { .. }));
    assert!(err.is_transient());
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover() {
    let kv = InMemoryKv::new();
    let store = store(&kv, "alpha");
    let id = store.add(&aged("kept", ChronoDuration::zero())).await.unwrap();

    kv.fail_next(2);
    let fetched = assert_ok!(store.get(&id).await);
    assert_eq!(fetched.map(|e| e.content), Some("kept".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_command_discards_connection() {
    let kv = InMemoryKv::new();
    let pool = pool(
        &kv,
        PoolConfig {
            operation_timeout_ms: 50,
            ..Default::default()
        },
        RetryPolicy::none(),
    );
    let store = ShortTermStore::new("alpha", Arc::clone(&pool), Duration::from_secs(60));
    let id = store.add(&aged("slow", ChronoDuration::zero())).await.unwrap();
    assert_eq!(pool.idle_count(), 1);

    kv.set_latency(Duration::from_millis(200));
    let err = store.get(&id).await.unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(pool.idle_count(), 0);

    kv.set_latency(Duration::ZERO);
    assert!(store.get(&id).await.unwrap().is_some());
    assert_eq!(kv.connections_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_command_is_not_returned_to_pool() {
    let kv = InMemoryKv::new();
    let pool = pool(&kv, PoolConfig::default(), RetryPolicy::none());
    let store = ShortTermStore::new("alpha", Arc::clone(&pool), Duration::from_secs(60));
    let id = store.add(&aged("slow", ChronoDuration::zero())).await.unwrap();

    kv.set_latency(Duration::from_millis(200));
    let cancelled = tokio::time::timeout(Duration::from_millis(10), store.get(&id)).await;
    assert!(cancelled.is_err());
    assert_eq!(pool.idle_count(), 0);

    kv.set_latency(Duration::ZERO);
    assert!(store.get(&id).await.unwrap().is_some());
    assert_eq!(kv.connections_opened(), 2);
}

#[tokio::test]
async fn test_pool_close_then_reconnect() {
    let kv = InMemoryKv::new();
    let pool = pool(&kv, PoolConfig::default(), RetryPolicy::default());
    let store = ShortTermStore::new("alpha", Arc::clone(&pool), Duration::from_secs(60));
    let id = store.add(&aged("survives", ChronoDuration::zero())).await.unwrap();

    pool.close().await;
    pool.close().await;
    assert!(!pool.is_initialized());
    assert_eq!(pool.idle_count(), 0);

    // Data lives in the backend, not the pool
    let entry: Option<MemoryEntry> = store.get(&id).await.unwrap();
    assert_eq!(entry.map(|e| e.content), Some("survives".to_string()));
    assert!(pool.is_initialized());
}
