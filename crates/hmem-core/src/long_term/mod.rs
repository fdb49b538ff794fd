//! Long-term tier: durable entries ranked by embedding similarity.
//!
//! Every agent owns the collection `agent_{agent_id}` inside a shared SQLite
//! database. Content is embedded on insert; search embeds the query text and
//! ranks the filtered rows by cosine distance.

pub mod embeddings;
pub mod migrations;
pub mod sqlite;
pub mod workers;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::ranking::{normalize_distances, rank};
use crate::traits::MemoryStore;
use crate::types::{AdvancedSearchQuery, MemoryEntry, MemoryTier, SearchResult, StoredEntry};

pub use embeddings::{Embedder, HashEmbedder, cosine_distance, embedder_for};
#[cfg(feature = "embeddings")]
pub use embeddings::FastEmbedder;
pub use sqlite::SqliteIndex;
pub use workers::BlockingPool;

/// Long-term store scoped to one agent.
pub struct LongTermStore {
    agent_id: String,
    collection: Arc<str>,
    index: Arc<SqliteIndex>,
    embedder: Arc<dyn Embedder>,
    workers: BlockingPool,
    page_size: usize,
}

impl LongTermStore {
    pub fn new(
        agent_id: impl Into<String>,
        index: Arc<SqliteIndex>,
        embedder: Arc<dyn Embedder>,
        workers: BlockingPool,
        page_size: usize,
    ) -> Self {
        let agent_id = agent_id.into();
        let collection: Arc<str> = Arc::from(format!("agent_{agent_id}"));
        Self {
            agent_id,
            collection,
            index,
            embedder,
            workers,
            page_size: page_size.max(1),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Collection name holding this agent's rows.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    async fn insert(&self, origin_id: Option<String>, entry: &MemoryEntry) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let entry = entry.clone();
        let index = Arc::clone(&self.index);
        let embedder = Arc::clone(&self.embedder);
        let collection = Arc::clone(&self.collection);

        let stored_id = self
            .workers
            .run("long_term.insert", move || {
                let embedding = embedder.embed(&entry.content)?;
                index.insert(&collection, &id, origin_id.as_deref(), &entry, &embedding)
            })
            .await?;

        debug!(agent_id = %self.agent_id, memory_id = %stored_id, "Stored long-term memory");
        Ok(stored_id)
    }
}

#[async_trait]
impl MemoryStore for LongTermStore {
    fn tier(&self) -> MemoryTier {
        MemoryTier::LongTerm
    }

    async fn add(&self, entry: &MemoryEntry) -> Result<String> {
        self.insert(None, entry).await
    }

    async fn import(&self, origin_id: &str, entry: &MemoryEntry) -> Result<String> {
        self.insert(Some(origin_id.to_string()), entry).await
    }

    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>> {
        let index = Arc::clone(&self.index);
        let collection = Arc::clone(&self.collection);
        let id = id.to_string();
        self.workers
            .run("long_term.get", move || index.get(&collection, &id))
            .await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let index = Arc::clone(&self.index);
        let collection = Arc::clone(&self.collection);
        let owned_id = id.to_string();
        let removed = self
            .workers
            .run("long_term.delete", move || index.delete(&collection, &owned_id))
            .await?;

        debug!(agent_id = %self.agent_id, memory_id = %id, removed, "Deleted long-term memory");
        Ok(())
    }

    async fn search(&self, query: &AdvancedSearchQuery) -> Result<Vec<SearchResult>> {
        query.validate()?;

        let index = Arc::clone(&self.index);
        let embedder = Arc::clone(&self.embedder);
        let collection = Arc::clone(&self.collection);
        let query = query.clone();

        self.workers
            .run("long_term.search", move || {
                let target = embedder.embed(&query.query)?;
                let mut scored: Vec<(f64, _)> = index
                    .candidates(&collection, &query)?
                    .into_iter()
                    .map(|c| (cosine_distance(&target, &c.embedding), c))
                    .collect();

                // Nearest first, then relative scoring against the farthest kept hit
                scored.sort_by(|a, b| a.0.total_cmp(&b.0));
                scored.truncate(query.max_results);

                let distances: Vec<f64> = scored.iter().map(|(d, _)| *d).collect();
                let results = scored
                    .into_iter()
                    .zip(normalize_distances(&distances))
                    .map(|((_, c), score)| SearchResult {
                        id: c.id,
                        tier: MemoryTier::LongTerm,
                        memory_entry: c.entry,
                        relevance_score: score,
                    })
                    .collect();

                Ok(rank(results, query.relevance_threshold, query.max_results))
            })
            .await
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        let mut offset = 0;

        // Offsets count rows, not decoded entries, so skipped rows never shift a page
        while entries.len() < limit {
            let take = (limit - entries.len()).min(self.page_size);
            let index = Arc::clone(&self.index);
            let collection = Arc::clone(&self.collection);

            let page = self
                .workers
                .run("long_term.recent", move || index.recent(&collection, take, offset))
                .await?;
            if page.is_empty() {
                break;
            }
            offset += take;
            entries.extend(page);
        }

        Ok(entries)
    }

    async fn get_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        let page_size = self.page_size;
        let mut offset = 0;

        loop {
            let index = Arc::clone(&self.index);
            let collection = Arc::clone(&self.collection);

            let page = self
                .workers
                .run("long_term.older_than", move || {
                    index.older_than(&collection, threshold, page_size, offset)
                })
                .await?;
            if page.is_empty() {
                break;
            }
            offset += page_size;
            entries.extend(page);
        }

        Ok(entries)
    }

    async fn count(&self) -> Result<usize> {
        let index = Arc::clone(&self.index);
        let collection = Arc::clone(&self.collection);
        self.workers
            .run("long_term.count", move || index.count(&collection))
            .await
    }

    async fn clear(&self) -> Result<usize> {
        let index = Arc::clone(&self.index);
        let collection = Arc::clone(&self.collection);
        let cleared = self
            .workers
            .run("long_term.clear", move || index.clear(&collection))
            .await?;

        debug!(agent_id = %self.agent_id, cleared, "Cleared long-term memory");
        Ok(cleared)
    }
}
