//! Per-agent coordinator over the short-term and long-term tiers.
//!
//! The coordinator routes single-tier operations, federates search across the
//! enabled tiers, and owns the lifecycle operations that move entries between
//! tiers: consolidation (short-term to long-term) and forgetting (long-term
//! entries past their age limit).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::{MemoryError, Result};
use crate::ranking::rank;
use crate::traits::MemoryStore;
use crate::types::{
    AdvancedSearchQuery, DEFAULT_CONTEXT_TYPE, MAX_CONTENT_BYTES, MemoryConfig, MemoryContext,
    MemoryEntry, MemoryOperation, MemoryTier, Metadata, OperationOutcome, RelevantMemory,
    SearchResult, StoredEntry,
};

/// Latest timestamp that still formats as a four-digit-year RFC 3339 string.
fn end_of_time() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(253_402_300_799, 999_999_999).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn threshold_before(age: Duration) -> Result<DateTime<Utc>> {
    let age = chrono::Duration::from_std(age)
        .map_err(|_| MemoryError::invalid(format!("age {age:?} is out of range")))?;
    Utc::now()
        .checked_sub_signed(age)
        .ok_or_else(|| MemoryError::invalid("age reaches before the supported time range"))
}

/// Outcome of moving entries from short-term to long-term memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationReport {
    /// Entries selected for migration.
    pub harvested: usize,
    /// Entries stored in long-term memory and removed from short-term memory.
    pub migrated: usize,
    /// Entries left in short-term memory because a step failed.
    pub failed: usize,
    /// Errors encountered (non-fatal).
    pub errors: Vec<String>,
}

impl ConsolidationReport {
    pub fn has_changes(&self) -> bool {
        self.migrated > 0
    }
}

/// Limits applied by [`MemoryCoordinator::run_maintenance`].
#[derive(Debug, Clone, PartialEq)]
pub struct MaintenancePolicy {
    /// Short-term entries older than this are consolidated.
    pub consolidation_interval: Duration,
    /// Short-term entries beyond this count are consolidated oldest first.
    pub max_short_term_memories: usize,
    /// Long-term entries beyond this count are deleted oldest first.
    pub long_term_memory_limit: usize,
    /// Long-term entries older than this are forgotten.
    pub forget_age: Duration,
}

impl MaintenancePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            consolidation_interval: settings.consolidation_interval(),
            max_short_term_memories: settings.max_short_term_memories,
            long_term_memory_limit: settings.long_term_memory_limit,
            forget_age: settings.forget_age(),
        }
    }
}

impl Default for MaintenancePolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Result of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    /// Age-based consolidation.
    pub consolidation: ConsolidationReport,
    /// Count-based consolidation.
    pub overflow: ConsolidationReport,
    /// Long-term entries removed for age.
    pub forgotten: usize,
    /// Long-term entries removed to respect the cap.
    pub trimmed: usize,
    /// Errors encountered (non-fatal).
    pub errors: Vec<String>,
}

impl MaintenanceReport {
    pub fn has_changes(&self) -> bool {
        self.consolidation.has_changes()
            || self.overflow.has_changes()
            || self.forgotten > 0
            || self.trimmed > 0
    }
}

#[derive(Deserialize)]
struct AddPayload {
    content: String,
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    context: Option<ContextPayload>,
}

#[derive(Deserialize)]
struct ContextPayload {
    #[serde(default)]
    context_type: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Deserialize)]
struct IdPayload {
    memory_id: String,
}

fn parse_payload<T: for<'de> Deserialize<'de>>(op: MemoryOperation, data: serde_json::Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| MemoryError::invalid(format!("invalid {op} payload: {e}")))
}

/// Hybrid memory for one agent.
pub struct MemoryCoordinator {
    agent_id: String,
    config: MemoryConfig,
    short_term: Arc<dyn MemoryStore>,
    long_term: Arc<dyn MemoryStore>,
}

impl MemoryCoordinator {
    pub fn new(
        agent_id: impl Into<String>,
        config: MemoryConfig,
        short_term: Arc<dyn MemoryStore>,
        long_term: Arc<dyn MemoryStore>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            config,
            short_term,
            long_term,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn config(&self) -> MemoryConfig {
        self.config
    }

    /// The store for an enabled tier.
    fn store(&self, tier: MemoryTier) -> Result<&dyn MemoryStore> {
        if !self.config.is_enabled(tier) {
            return Err(MemoryError::ConfigDisabled { tier });
        }
        Ok(match tier {
            MemoryTier::ShortTerm => self.short_term.as_ref(),
            MemoryTier::LongTerm => self.long_term.as_ref(),
        })
    }

    fn require_both_tiers(&self) -> Result<()> {
        self.store(MemoryTier::ShortTerm)?;
        self.store(MemoryTier::LongTerm)?;
        Ok(())
    }

    /// Store an entry in one tier and return its new id.
    ///
    /// Content larger than [`MAX_CONTENT_BYTES`] is truncated.
    pub async fn add(&self, tier: MemoryTier, entry: MemoryEntry) -> Result<String> {
        let store = self.store(tier)?;
        entry.validate()?;

        let entry = match entry.truncated(MAX_CONTENT_BYTES) {
            Some(cut) => {
                warn!(
                    agent_id = %self.agent_id,
                    original_bytes = entry.content.len(),
                    max_bytes = MAX_CONTENT_BYTES,
                    "Truncating oversized memory content"
                );
                cut
            }
            None => entry,
        };

        let id = store.add(&entry).await?;
        debug!(agent_id = %self.agent_id, %tier, memory_id = %id, "Added memory");
        Ok(id)
    }

    pub async fn retrieve(&self, tier: MemoryTier, id: &str) -> Result<Option<MemoryEntry>> {
        self.store(tier)?.get(id).await
    }

    pub async fn delete(&self, tier: MemoryTier, id: &str) -> Result<()> {
        self.store(tier)?.delete(id).await
    }

    /// Search every enabled tier the query targets.
    ///
    /// Results from both tiers are merged by score (short-term first on ties)
    /// and capped at `max_results`. Naming a disabled tier explicitly is an error.
    pub async fn search(&self, query: &AdvancedSearchQuery) -> Result<Vec<SearchResult>> {
        query.validate()?;
        if let Some(tier) = query.memory_type {
            self.store(tier)?;
        }

        let mut merged = Vec::new();
        for tier in MemoryTier::ALL {
            if !query.targets(tier) || !self.config.is_enabled(tier) {
                continue;
            }
            merged.extend(self.store(tier)?.search(query).await?);
        }

        let results = rank(merged, None, query.max_results);
        debug!(agent_id = %self.agent_id, hits = results.len(), "Searched memory");
        Ok(results)
    }

    /// Dispatch an operation named by string with a JSON payload.
    ///
    /// - `add`: `{content, metadata?, context?}`
    /// - `retrieve` / `delete`: `{memory_id}`
    /// - `search`: an [`AdvancedSearchQuery`]; `memory_type` defaults to `tier`
    pub async fn perform_operation(
        &self,
        operation: &str,
        tier: MemoryTier,
        data: serde_json::Value,
    ) -> Result<OperationOutcome> {
        let op: MemoryOperation = operation.parse()?;

        match op {
            MemoryOperation::Add => {
                let payload: AddPayload = parse_payload(op, data)?;
                let context = match payload.context {
                    Some(ctx) => MemoryContext::new(
                        ctx.context_type.unwrap_or_else(|| DEFAULT_CONTEXT_TYPE.to_string()),
                        ctx.timestamp.unwrap_or_else(Utc::now),
                    )
                    .with_metadata(ctx.metadata),
                    None => MemoryContext::now(DEFAULT_CONTEXT_TYPE),
                };
                let entry = MemoryEntry::new(payload.content, context).with_metadata(payload.metadata);
                let memory_id = self.add(tier, entry).await?;
                Ok(OperationOutcome::Add { memory_id })
            }
            MemoryOperation::Retrieve => {
                let payload: IdPayload = parse_payload(op, data)?;
                let memory = self.retrieve(tier, &payload.memory_id).await?;
                Ok(OperationOutcome::Retrieve { memory })
            }
            MemoryOperation::Search => {
                let mut query: AdvancedSearchQuery = parse_payload(op, data)?;
                query.memory_type.get_or_insert(tier);
                let results = self.search(&query).await?;
                Ok(OperationOutcome::Search { results })
            }
            MemoryOperation::Delete => {
                let payload: IdPayload = parse_payload(op, data)?;
                self.delete(tier, &payload.memory_id).await?;
                Ok(OperationOutcome::Delete {
                    memory_id: payload.memory_id,
                })
            }
        }
    }

    /// Recent short-term entries plus the best long-term matches for `context`,
    /// newest first.
    pub async fn retrieve_relevant(&self, context: &str, limit: usize) -> Result<Vec<RelevantMemory>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut memories = Vec::new();

        if self.config.is_enabled(MemoryTier::ShortTerm) {
            memories.extend(
                self.short_term
                    .get_recent(limit)
                    .await?
                    .into_iter()
                    .map(|stored| RelevantMemory {
                        id: stored.id,
                        tier: MemoryTier::ShortTerm,
                        entry: stored.entry,
                    }),
            );
        }

        if self.config.is_enabled(MemoryTier::LongTerm) {
            let query = AdvancedSearchQuery::new(context)
                .tier(MemoryTier::LongTerm)
                .limit(limit);
            memories.extend(self.long_term.search(&query).await?.into_iter().map(|r| {
                RelevantMemory {
                    id: r.id,
                    tier: MemoryTier::LongTerm,
                    entry: r.memory_entry,
                }
            }));
        }

        memories.sort_by(|a, b| b.entry.timestamp().cmp(&a.entry.timestamp()));
        memories.truncate(limit);
        Ok(memories)
    }

    /// Move short-term entries older than `interval` into long-term memory.
    pub async fn consolidate(&self, interval: Duration) -> Result<ConsolidationReport> {
        self.require_both_tiers()?;
        let threshold = threshold_before(interval)?;
        let harvested = self.short_term.get_older_than(threshold).await?;
        Ok(self.migrate(harvested, "age").await)
    }

    /// Migrate the oldest short-term entries beyond `max_entries`, regardless of age.
    pub async fn force_consolidate(&self, max_entries: usize) -> Result<ConsolidationReport> {
        self.require_both_tiers()?;

        let count = self.short_term.count().await?;
        if count <= max_entries {
            return Ok(ConsolidationReport::default());
        }

        let mut oldest = self.short_term.get_older_than(end_of_time()).await?;
        oldest.truncate(count - max_entries);
        Ok(self.migrate(oldest, "overflow").await)
    }

    /// Copy each entry into long-term memory, then delete the short-term copy.
    ///
    /// A failed copy leaves the short-term entry in place for the next run;
    /// a failed delete is repaired by the next run because imports are keyed
    /// by the short-term id.
    async fn migrate(&self, entries: Vec<StoredEntry>, reason: &str) -> ConsolidationReport {
        let mut report = ConsolidationReport {
            harvested: entries.len(),
            ..Default::default()
        };

        for stored in entries {
            let long_id = match self.long_term.import(&stored.id, &stored.entry).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(agent_id = %self.agent_id, memory_id = %stored.id, error = %e, "Failed to consolidate memory");
                    report.failed += 1;
                    report.errors.push(format!("import {}: {}", stored.id, e));
                    continue;
                }
            };

            if let Err(e) = self.short_term.delete(&stored.id).await {
                warn!(agent_id = %self.agent_id, memory_id = %stored.id, error = %e, "Consolidated memory not removed from short-term");
                report.failed += 1;
                report.errors.push(format!("delete {}: {}", stored.id, e));
                continue;
            }

            debug!(agent_id = %self.agent_id, memory_id = %stored.id, long_term_id = %long_id, "Consolidated memory");
            report.migrated += 1;
        }

        if report.harvested > 0 {
            info!(
                agent_id = %self.agent_id,
                reason,
                harvested = report.harvested,
                migrated = report.migrated,
                failed = report.failed,
                "Consolidation finished"
            );
        }
        report
    }

    /// Delete every entry the agent holds in one tier.
    pub async fn clear(&self, tier: MemoryTier) -> Result<usize> {
        let cleared = self.store(tier)?.clear().await?;
        info!(agent_id = %self.agent_id, %tier, cleared, "Cleared memory tier");
        Ok(cleared)
    }

    /// Delete long-term entries older than `age_limit`.
    pub async fn forget(&self, age_limit: Duration) -> Result<usize> {
        self.forget_before(threshold_before(age_limit)?).await
    }

    /// Delete long-term entries whose timestamp is strictly before `threshold`.
    pub async fn forget_before(&self, threshold: DateTime<Utc>) -> Result<usize> {
        let store = self.store(MemoryTier::LongTerm)?;
        let expired = store.get_older_than(threshold).await?;
        let forgotten = self.delete_all(store, &expired).await?;

        if forgotten > 0 {
            info!(agent_id = %self.agent_id, forgotten, "Forgot old long-term memories");
        }
        Ok(forgotten)
    }

    /// Delete the oldest long-term entries beyond `limit`.
    pub async fn enforce_long_term_limit(&self, limit: usize) -> Result<usize> {
        let store = self.store(MemoryTier::LongTerm)?;
        let count = store.count().await?;
        if count <= limit {
            return Ok(0);
        }

        let mut oldest = store.get_older_than(end_of_time()).await?;
        oldest.truncate(count - limit);
        let trimmed = self.delete_all(store, &oldest).await?;

        info!(agent_id = %self.agent_id, trimmed, limit, "Trimmed long-term memory to its limit");
        Ok(trimmed)
    }

    async fn delete_all(&self, store: &dyn MemoryStore, entries: &[StoredEntry]) -> Result<usize> {
        for stored in entries {
            store.delete(&stored.id).await?;
        }
        Ok(entries.len())
    }

    /// Consolidate, relieve short-term overflow, forget, and cap long-term memory.
    ///
    /// Steps for disabled tiers are skipped; failures are collected in the
    /// report and do not stop later steps.
    pub async fn run_maintenance(&self, policy: &MaintenancePolicy) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let both = self.config.use_short_term_cache && self.config.use_long_term_memory;

        if both {
            match self.consolidate(policy.consolidation_interval).await {
                Ok(r) => report.consolidation = r,
                Err(e) => report.errors.push(format!("consolidation: {e}")),
            }
            match self.force_consolidate(policy.max_short_term_memories).await {
                Ok(r) => report.overflow = r,
                Err(e) => report.errors.push(format!("overflow consolidation: {e}")),
            }
        }

        if self.config.use_long_term_memory {
            match self.forget(policy.forget_age).await {
                Ok(n) => report.forgotten = n,
                Err(e) => report.errors.push(format!("forget: {e}")),
            }
            match self.enforce_long_term_limit(policy.long_term_memory_limit).await {
                Ok(n) => report.trimmed = n,
                Err(e) => report.errors.push(format!("long-term limit: {e}")),
            }
        }

        for error in &report.errors {
            warn!(agent_id = %self.agent_id, error = %error, "Maintenance step failed");
        }
        report
    }

    /// Release both stores.
    pub async fn close(&self) -> Result<()> {
        self.short_term.close().await?;
        self.long_term.close().await?;
        debug!(agent_id = %self.agent_id, "Closed memory coordinator");
        Ok(())
    }
}
