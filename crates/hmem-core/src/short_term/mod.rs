//! Short-term tier: expiring entries in a shared key-value cache.
//!
//! Each entry lives under `agent:{agent_id}:{memory_id}` as a JSON record and
//! expires after the configured TTL. Search walks the agent's key space with
//! `SCAN`, fetches values in `MGET` batches, and ranks by keyword overlap.

pub mod backend;
pub mod pool;
#[cfg(feature = "redis")]
pub mod redis;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MemoryError, Result};
use crate::ranking::{keyword_relevance, matches_filters, rank};
use crate::traits::MemoryStore;
use crate::types::{AdvancedSearchQuery, MemoryEntry, MemoryTier, SearchResult, StoredEntry};

pub use backend::{InMemoryKv, KvConnection, KvConnector};
pub use pool::{ConnectionPool, KvFuture, PooledConnection};

/// Short-term store scoped to one agent.
pub struct ShortTermStore {
    agent_id: String,
    prefix: String,
    pattern: String,
    pool: Arc<ConnectionPool>,
    ttl: Duration,
}

impl ShortTermStore {
    pub fn new(agent_id: impl Into<String>, pool: Arc<ConnectionPool>, ttl: Duration) -> Self {
        let agent_id = agent_id.into();
        let prefix = format!("agent:{agent_id}:");
        let pattern = format!("agent:{}:*", backend::escape_glob(&agent_id));
        Self {
            agent_id,
            prefix,
            pattern,
            pool,
            ttl,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key for `id`, or `None` when the id could not have been issued by
    /// this store. A `:` would reach into another agent's namespace
    /// (`agent:team` + `7:x` is agent `team:7`'s key `x`).
    fn key(&self, id: &str) -> Option<String> {
        if id.is_empty() || id.contains(':') {
            return None;
        }
        Some(format!("{}{}", self.prefix, id))
    }

    /// Memory id of a scanned key when it belongs to this agent. The `SCAN`
    /// pattern also matches keys of agents whose id extends ours with `:`.
    fn own_id<'k>(&self, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(&self.prefix)
            .filter(|id| !id.is_empty() && !id.contains(':'))
    }

    /// Store an entry with an explicit time-to-live.
    pub async fn add_with_ttl(&self, entry: &MemoryEntry, ttl: Duration) -> Result<String> {
        let ttl_secs = ttl.as_secs();
        if ttl_secs == 0 {
            return Err(MemoryError::invalid("short-term ttl must be at least one second"));
        }

        let id = Uuid::new_v4().to_string();
        let key = format!("{}{}", self.prefix, id);
        let record = serde_json::to_string(entry)?;

        self.pool
            .with_connection("SET", |conn| {
                let key = key.clone();
                let record = record.clone();
                Box::pin(async move { conn.set_ex(&key, &record, ttl_secs).await })
            })
            .await?;

        debug!(agent_id = %self.agent_id, memory_id = %id, ttl_secs, "Stored short-term memory");
        Ok(id)
    }

    /// Every key in the agent's namespace. `SCAN` may repeat keys, so they are
    /// deduplicated; keys of agents nested under ours are dropped.
    async fn scan_keys(&self) -> Result<Vec<String>> {
        let batch = self.pool.config().scan_batch_size.max(1);
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        let mut cursor = 0u64;

        loop {
            let (next, page) = self
                .pool
                .with_connection("SCAN", |conn| {
                    let pattern = self.pattern.clone();
                    Box::pin(async move { conn.scan(cursor, &pattern, batch).await })
                })
                .await?;

            for key in page {
                if self.own_id(&key).is_some() && seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    /// Load every live entry for the agent, skipping unreadable records.
    async fn load_all(&self) -> Result<Vec<StoredEntry>> {
        let keys = self.scan_keys().await?;
        let batch = self.pool.config().scan_batch_size.max(1);
        let mut entries = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(batch) {
            let chunk = chunk.to_vec();
            let values = self
                .pool
                .with_connection("MGET", |conn| {
                    let chunk = chunk.clone();
                    Box::pin(async move { conn.mget(&chunk).await })
                })
                .await?;

            for (key, value) in chunk.iter().zip(values) {
                // Expired between SCAN and MGET
                let Some(value) = value else { continue };
                let Some(id) = self.own_id(key) else { continue };

                match serde_json::from_str::<MemoryEntry>(&value) {
                    Ok(entry) => entries.push(StoredEntry {
                        id: id.to_string(),
                        entry,
                    }),
                    Err(e) => {
                        warn!(agent_id = %self.agent_id, key = %key, error = %e, "Skipping corrupt short-term record");
                    }
                }
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl MemoryStore for ShortTermStore {
    fn tier(&self) -> MemoryTier {
        MemoryTier::ShortTerm
    }

    async fn add(&self, entry: &MemoryEntry) -> Result<String> {
        self.add_with_ttl(entry, self.ttl).await
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let Some(key) = self.key(id) else {
            return Ok(None);
        };
        let value = self
            .pool
            .with_connection("GET", |conn| {
                let key = key.clone();
                Box::pin(async move { conn.get(&key).await })
            })
            .await?;

        match value {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let Some(key) = self.key(id) else {
            return Ok(());
        };
        self.pool
            .with_connection("DEL", |conn| {
                let key = key.clone();
                Box::pin(async move { conn.del(&key).await })
            })
            .await?;

        debug!(agent_id = %self.agent_id, memory_id = %id, "Deleted short-term memory");
        Ok(())
    }

    async fn search(&self, query: &AdvancedSearchQuery) -> Result<Vec<SearchResult>> {
        query.validate()?;

        let results = self
            .load_all()
            .await?
            .into_iter()
            .filter(|stored| matches_filters(&stored.entry, query))
            .map(|stored| SearchResult {
                relevance_score: keyword_relevance(&query.query, &stored.entry.content),
                id: stored.id,
                tier: MemoryTier::ShortTerm,
                memory_entry: stored.entry,
            })
            .collect();

        Ok(rank(results, query.relevance_threshold, query.max_results))
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<StoredEntry>> {
        let mut entries = self.load_all().await?;
        entries.sort_by(|a, b| b.entry.timestamp().cmp(&a.entry.timestamp()));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn get_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<StoredEntry>> {
        let mut entries: Vec<StoredEntry> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|stored| stored.entry.timestamp() < threshold)
            .collect();
        entries.sort_by_key(|stored| stored.entry.timestamp());
        Ok(entries)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.scan_keys().await?.len())
    }

    async fn clear(&self) -> Result<usize> {
        let keys = self.scan_keys().await?;
        for key in &keys {
            self.pool
                .with_connection("DEL", |conn| {
                    let key = key.clone();
                    Box::pin(async move { conn.del(&key).await })
                })
                .await?;
        }

        debug!(agent_id = %self.agent_id, cleared = keys.len(), "Cleared short-term memory");
        Ok(keys.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::retry::RetryPolicy;
    use crate::types::MemoryContext;
    use chrono::Duration as ChronoDuration;

    fn store(kv: &InMemoryKv, agent: &str) -> ShortTermStore {
        let pool = ConnectionPool::new(
            Arc::new(kv.clone()),
            PoolConfig {
                scan_batch_size: 3,
                ..Default::default()
            },
            RetryPolicy::default(),
        );
        ShortTermStore::new(agent, Arc::new(pool), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_add_get_delete() {
        let kv = InMemoryKv::new();
        let store = store(&kv, "alpha");
        let entry = MemoryEntry::new("alpha likes tea", MemoryContext::now("chat")).with_meta("n", 1);

        let id = store.add(&entry).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), Some(entry));

        store.delete(&id).await.unwrap();
        assert_eq!(store.get(&id).await.unwrap(), None);
        // Deleting twice is fine
        store.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_agents_do_not_see_each_other() {
        let kv = InMemoryKv::new();
        let alpha = store(&kv, "alpha");
        let alphabet = store(&kv, "alphabet");

        alpha.add(&MemoryEntry::new("coffee", MemoryContext::now("chat"))).await.unwrap();
        alphabet.add(&MemoryEntry::new("coffee", MemoryContext::now("chat"))).await.unwrap();

        assert_eq!(alpha.count().await.unwrap(), 1);
        assert_eq!(alphabet.count().await.unwrap(), 1);
        let hits = alpha.search(&AdvancedSearchQuery::new("coffee")).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_colon_agent_ids_do_not_share_a_namespace() {
        let kv = InMemoryKv::new();
        let team = store(&kv, "team");
        let nested = store(&kv, "team:7");

        let own = team.add(&MemoryEntry::new("team coffee", MemoryContext::now("chat"))).await.unwrap();
        let other = nested.add(&MemoryEntry::new("nested coffee", MemoryContext::now("chat"))).await.unwrap();

        assert_eq!(team.count().await.unwrap(), 1);
        assert_eq!(nested.count().await.unwrap(), 1);
        let hits = team.search(&AdvancedSearchQuery::new("coffee")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, own);

        // `7:<id>` under `team` spells the nested agent's key
        let crafted = format!("7:{other}");
        assert_eq!(team.get(&crafted).await.unwrap(), None);
        team.delete(&crafted).await.unwrap();
        assert!(nested.get(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_removes_only_own_keys() {
        let kv = InMemoryKv::new();
        let team = store(&kv, "team");
        let nested = store(&kv, "team:7");
        for i in 0..7 {
            team.add(&MemoryEntry::new(format!("note {i}"), MemoryContext::now("chat"))).await.unwrap();
        }
        nested.add(&MemoryEntry::new("keep me", MemoryContext::now("chat"))).await.unwrap();

        assert_eq!(team.clear().await.unwrap(), 7);
        assert_eq!(team.count().await.unwrap(), 0);
        assert_eq!(nested.count().await.unwrap(), 1);
        assert_eq!(kv.len(), 1);
        assert_eq!(team.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_records_are_skipped() {
        let kv = InMemoryKv::new();
        let store = store(&kv, "alpha");
        store.add(&MemoryEntry::new("good record", MemoryContext::now("chat"))).await.unwrap();
        kv.insert_raw("agent:alpha:broken", "{not json", Duration::from_secs(60));

        let hits = store.search(&AdvancedSearchQuery::new("record")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(store.get_recent(10).await.unwrap().len(), 1);
        assert!(store.get("broken").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let kv = InMemoryKv::new();
        let store = store(&kv, "alpha");
        let entry = MemoryEntry::new("fleeting", MemoryContext::now("chat"));

        let id = store.add_with_ttl(&entry, Duration::from_secs(5)).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.add_with_ttl(&entry, Duration::ZERO).await.unwrap_err().is_invalid_request());
    }

    #[tokio::test]
    async fn test_recent_and_older_ordering() {
        let kv = InMemoryKv::new();
        let store = store(&kv, "alpha");
        let now = Utc::now();
        for hours in [3, 1, 5, 2] {
            let ts = now - ChronoDuration::hours(hours);
            store
                .add(&MemoryEntry::new(format!("{hours}h"), MemoryContext::new("chat", ts)))
                .await
                .unwrap();
        }

        let recent: Vec<String> = store
            .get_recent(3)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.entry.content)
            .collect();
        assert_eq!(recent, vec!["1h", "2h", "3h"]);

        let older: Vec<String> = store
            .get_older_than(now - ChronoDuration::hours(2))
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.entry.content)
            .collect();
        assert_eq!(older, vec!["5h", "3h"]);
    }
}
