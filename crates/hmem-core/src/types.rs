//! Memory type definitions.
//!
//! Entries are values: once handed to a store they are never updated in place.
//! The store assigns the id, so an entry travels together with its id as a
//! [`StoredEntry`] or [`SearchResult`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};

/// Largest content accepted verbatim; longer content is cut on a char boundary.
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Default number of results for a search.
pub const DEFAULT_MAX_RESULTS: usize = 10;

/// Context type used when a caller does not provide one.
pub const DEFAULT_CONTEXT_TYPE: &str = "general";

/// Reserved metadata key carrying the context type in the long-term index.
pub const CONTEXT_TYPE_KEY: &str = "contextType";
/// Reserved metadata key carrying the context timestamp in the long-term index.
pub const CONTEXT_TIMESTAMP_KEY: &str = "contextTimestamp";

/// String-keyed metadata attached to entries and contexts.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Memory tier (short-term cache or long-term store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    #[serde(alias = "SHORT_TERM")]
    ShortTerm,
    #[serde(alias = "LONG_TERM")]
    LongTerm,
}

impl MemoryTier {
    /// Both tiers, short-term first.
    pub const ALL: [MemoryTier; 2] = [MemoryTier::ShortTerm, MemoryTier::LongTerm];

    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "short_term" | "short" | "s" => Some(Self::ShortTerm),
            "long_term" | "long" | "l" => Some(Self::LongTerm),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::LongTerm => "long_term",
        }
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operations accepted by [`crate::MemoryCoordinator::perform_operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOperation {
    Add,
    Retrieve,
    Search,
    Delete,
}

impl MemoryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Retrieve => "retrieve",
            Self::Search => "search",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for MemoryOperation {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "add" => Ok(Self::Add),
            "retrieve" => Ok(Self::Retrieve),
            "search" => Ok(Self::Search),
            "delete" => Ok(Self::Delete),
            other => Err(MemoryError::invalid(format!("unknown memory operation: {other}"))),
        }
    }
}

impl std::fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-agent switches deciding which tiers take part in each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub use_long_term_memory: bool,
    #[serde(default = "default_true", alias = "use_redis_cache")]
    pub use_short_term_cache: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            use_long_term_memory: true,
            use_short_term_cache: true,
        }
    }
}

impl MemoryConfig {
    /// Only the short-term cache enabled.
    pub fn short_term_only() -> Self {
        Self {
            use_long_term_memory: false,
            use_short_term_cache: true,
        }
    }

    /// Only the long-term store enabled.
    pub fn long_term_only() -> Self {
        Self {
            use_long_term_memory: true,
            use_short_term_cache: false,
        }
    }

    pub fn is_enabled(&self, tier: MemoryTier) -> bool {
        match tier {
            MemoryTier::ShortTerm => self.use_short_term_cache,
            MemoryTier::LongTerm => self.use_long_term_memory,
        }
    }
}

/// Where and when a memory was formed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    pub context_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl MemoryContext {
    pub fn new(context_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            context_type: context_type.into(),
            timestamp,
            metadata: Metadata::new(),
        }
    }

    /// Context of the given type stamped with the current time.
    pub fn now(context_type: impl Into<String>) -> Self {
        Self::new(context_type, Utc::now())
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A single memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub context: MemoryContext,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>, context: MemoryContext) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
            context,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Add a single metadata key.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.context.timestamp
    }

    /// Reject entries that must never be stored.
    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(MemoryError::invalid("memory content must not be empty"));
        }
        if self.context.context_type.is_empty() {
            return Err(MemoryError::invalid("context type must not be empty"));
        }
        for key in [CONTEXT_TYPE_KEY, CONTEXT_TIMESTAMP_KEY] {
            if self.metadata.contains_key(key) {
                return Err(MemoryError::invalid(format!("metadata key {key:?} is reserved")));
            }
        }
        Ok(())
    }

    /// Copy of the entry with content cut to `max_bytes`, or `None` when it already fits.
    pub fn truncated(&self, max_bytes: usize) -> Option<Self> {
        if self.content.len() <= max_bytes {
            return None;
        }
        let mut end = max_bytes;
        while !self.content.is_char_boundary(end) {
            end -= 1;
        }
        Some(Self {
            content: self.content[..end].to_string(),
            ..self.clone()
        })
    }
}

/// An entry together with the id its store assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    pub id: String,
    pub entry: MemoryEntry,
}

/// Inclusive time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

/// Search request shared by both tiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedSearchQuery {
    pub query: String,
    /// `None` searches every enabled tier.
    #[serde(default)]
    pub memory_type: Option<MemoryTier>,
    #[serde(default)]
    pub context_type: Option<String>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub metadata_filters: Option<Metadata>,
    #[serde(default)]
    pub relevance_threshold: Option<f64>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    DEFAULT_MAX_RESULTS
}

impl AdvancedSearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            memory_type: None,
            context_type: None,
            time_range: None,
            metadata_filters: None,
            relevance_threshold: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    pub fn tier(mut self, tier: MemoryTier) -> Self {
        self.memory_type = Some(tier);
        self
    }

    pub fn context_type(mut self, context_type: impl Into<String>) -> Self {
        self.context_type = Some(context_type.into());
        self
    }

    pub fn time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange::new(start, end));
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata_filters
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.relevance_threshold = Some(threshold);
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Whether a tier takes part in this query.
    pub fn targets(&self, tier: MemoryTier) -> bool {
        self.memory_type.is_none_or(|t| t == tier)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_results == 0 {
            return Err(MemoryError::invalid("max_results must be at least 1"));
        }
        if let Some(threshold) = self.relevance_threshold {
            if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
                return Err(MemoryError::invalid(format!(
                    "relevance_threshold must be within [0, 1], got {threshold}"
                )));
            }
        }
        if let Some(range) = &self.time_range {
            if range.start > range.end {
                return Err(MemoryError::invalid("time_range start is after its end"));
            }
        }
        Ok(())
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub tier: MemoryTier,
    pub memory_entry: MemoryEntry,
    /// Always within [0, 1].
    pub relevance_score: f64,
}

/// Entry returned by [`crate::MemoryCoordinator::retrieve_relevant`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantMemory {
    pub id: String,
    pub tier: MemoryTier,
    pub entry: MemoryEntry,
}

/// Result of [`crate::MemoryCoordinator::perform_operation`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum OperationOutcome {
    Add { memory_id: String },
    Retrieve { memory: Option<MemoryEntry> },
    Search { results: Vec<SearchResult> },
    Delete { memory_id: String },
}
