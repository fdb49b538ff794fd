//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmem_core::{
    AdvancedSearchQuery, InMemoryKv, MemoryBackends, MemoryConfig, MemoryContext, MemoryCoordinator,
    MemoryEntry, MemoryError, MemoryStore, MemoryTier, Result, SearchResult, Settings, StoredEntry,
};

/// In-process settings: memory cache, private database, hash embeddings.
pub fn settings() -> Settings {
    Settings {
        redis_url: "memory://".into(),
        database_path: ":memory:".into(),
        embedding_model: "hash".into(),
        ..Default::default()
    }
}

pub fn backends() -> (MemoryBackends, InMemoryKv) {
    let kv = InMemoryKv::new();
    let backends = MemoryBackends::with_kv(settings(), kv.clone()).unwrap();
    (backends, kv)
}

pub fn coordinator(config: MemoryConfig) -> (MemoryCoordinator, InMemoryKv) {
    let (backends, kv) = backends();
    (backends.coordinator("agent-1", config), kv)
}

/// Entry whose context timestamp lies `age` in the past.
pub fn aged(content: &str, age: Duration) -> MemoryEntry {
    MemoryEntry::new(content, MemoryContext::new("chat", Utc::now() - age))
}

pub fn entry_at(content: &str, timestamp: DateTime<Utc>) -> MemoryEntry {
    MemoryEntry::new(content, MemoryContext::new("chat", timestamp))
}

pub fn assert_well_ranked(results: &[SearchResult], max_results: usize) {
    assert!(results.len() <= max_results);
    assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.relevance_score)));
    assert!(results
        .windows(2)
        .all(|w| w[0].relevance_score >= w[1].relevance_score));
}

/// Store wrapper that fails a configurable number of imports or deletes.
pub struct Flaky {
    inner: Arc<dyn MemoryStore>,
    pub failing_imports: AtomicU32,
    pub failing_deletes: AtomicU32,
}

impl Flaky {
    pub fn new(inner: Arc<dyn MemoryStore>) -> Self {
        Self {
            inner,
            failing_imports: AtomicU32::new(0),
            failing_deletes: AtomicU32::new(0),
        }
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MemoryStore for Flaky {
    fn tier(&self) -> MemoryTier {
        self.inner.tier()
    }

    async fn add(&self, entry: &MemoryEntry) -> Result<String> {
        self.inner.add(entry).await
    }

    async fn import(&self, origin_id: &str, entry: &MemoryEntry) -> Result<String> {
        if Self::take(&self.failing_imports) {
            return Err(MemoryError::unavailable("flaky", "import refused"));
        }
        self.inner.import(origin_id, entry).await
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        self.inner.get(id).await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if Self::take(&self.failing_deletes) {
            return Err(MemoryError::unavailable("flaky", "delete refused"));
        }
        self.inner.delete(id).await
    }

    async fn search(&self, query: &AdvancedSearchQuery) -> Result<Vec<SearchResult>> {
        self.inner.search(query).await
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<StoredEntry>> {
        self.inner.get_recent(limit).await
    }

    async fn get_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<StoredEntry>> {
        self.inner.get_older_than(threshold).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }

    async fn clear(&self) -> Result<usize> {
        self.inner.clear().await
    }
}
