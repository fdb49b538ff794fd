//! Store trait implemented by both memory tiers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{AdvancedSearchQuery, MemoryEntry, MemoryTier, SearchResult, StoredEntry};

/// Core trait for one tier's storage operations.
///
/// Implementations are scoped to a single agent namespace.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Which tier this store backs.
    fn tier(&self) -> MemoryTier;

    /// Store an entry under a freshly generated id.
    async fn add(&self, entry: &MemoryEntry) -> Result<String>;

    /// Store an entry migrated from another tier.
    ///
    /// Stores that can remember `origin_id` return the id of an earlier import
    /// of the same origin instead of writing a second copy.
    async fn import(&self, origin_id: &str, entry: &MemoryEntry) -> Result<String> {
        let _ = origin_id;
        self.add(entry).await
    }

    /// Retrieve an entry by id; `None` when absent.
    async fn get(&self, id: &str) -> Result<Option<MemoryEntry>>;

    /// Delete an entry. Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Ranked search, at most `query.max_results` hits, scores non-increasing.
    async fn search(&self, query: &AdvancedSearchQuery) -> Result<Vec<SearchResult>>;

    /// Most recent entries, newest first.
    async fn get_recent(&self, limit: usize) -> Result<Vec<StoredEntry>>;

    /// Entries whose context timestamp is strictly before `threshold`, oldest first.
    async fn get_older_than(&self, threshold: DateTime<Utc>) -> Result<Vec<StoredEntry>>;

    /// Number of entries in the namespace.
    async fn count(&self) -> Result<usize>;

    /// Delete every entry in the namespace and return how many were removed.
    async fn clear(&self) -> Result<usize>;

    /// Release resources held for this store.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
