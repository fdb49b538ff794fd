//! Configuration for the memory backends.
//!
//! Settings are loaded from multiple sources with precedence:
//! 1. Environment variables (`SHORT_TERM_MEMORY_TTL`, `REDIS_URL`, ...)
//! 2. Config file (TOML)
//! 3. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Process-wide memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Short-term cache URL (`redis://...` or `memory://`)
    pub redis_url: String,

    /// SQLite file backing the long-term store (`:memory:` for a private in-memory db)
    pub database_path: PathBuf,

    /// Short-term TTL in seconds (default: 3600 = 1 hour)
    pub short_term_ttl: u64,

    /// Age in seconds after which short-term entries are consolidated (default: 3600)
    pub consolidation_interval: u64,

    /// Reserved for importance-weighted consolidation (default: 0.5)
    pub consolidation_importance_threshold: f64,

    /// Short-term entry count that forces consolidation (default: 1000)
    pub max_short_term_memories: usize,

    /// Long-term entry cap per agent (default: 100000)
    pub long_term_memory_limit: usize,

    /// Age in seconds after which long-term entries are forgotten (default: 30 days)
    pub forget_age: u64,

    /// Embedding model identifier (default: all-MiniLM-L6-v2)
    pub embedding_model: String,

    /// Seconds between background maintenance runs (default: 300)
    pub maintenance_period: u64,

    /// Short-term connection pool
    pub pool: PoolConfig,

    /// Blocking worker pool for the long-term store
    pub workers: WorkerConfig,

    /// Retry policy for transient short-term failures
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".into(),
            database_path: PathBuf::from("hmem.db"),
            short_term_ttl: 3600,
            consolidation_interval: 3600,
            consolidation_importance_threshold: 0.5,
            max_short_term_memories: 1000,
            long_term_memory_limit: 100_000,
            forget_age: 30 * 24 * 3600,
            embedding_model: "all-MiniLM-L6-v2".into(),
            maintenance_period: 300,
            pool: PoolConfig::default(),
            workers: WorkerConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Short-term connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum open connections across all agents (default: 16)
    pub max_connections: usize,

    /// Idle seconds after which a connection is pinged before reuse (default: 30)
    pub idle_check_secs: u64,

    /// Per-command timeout in milliseconds (default: 5000)
    pub operation_timeout_ms: u64,

    /// Keys requested per SCAN page (default: 100)
    pub scan_batch_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 16,
            idle_check_secs: 30,
            operation_timeout_ms: 5000,
            scan_batch_size: 100,
        }
    }
}

impl PoolConfig {
    pub fn idle_check(&self) -> Duration {
        Duration::from_secs(self.idle_check_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

/// Blocking worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent blocking calls into SQLite / the embedder (default: 4)
    pub blocking_threads: usize,

    /// Per-call timeout in milliseconds (default: 30000)
    pub operation_timeout_ms: u64,

    /// Rows fetched per page when enumerating (default: 256)
    pub page_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            blocking_threads: 4,
            operation_timeout_ms: 30_000,
            page_size: 256,
        }
    }
}

impl WorkerConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl Settings {
    /// Load settings from an optional TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Parse a TOML file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("REDIS_URL") {
            self.redis_url = url;
        }
        if let Some(path) = lookup("LONG_TERM_DB_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding_model = model;
        }
        override_parsed(&lookup, "SHORT_TERM_MEMORY_TTL", &mut self.short_term_ttl)?;
        override_parsed(&lookup, "CONSOLIDATION_INTERVAL", &mut self.consolidation_interval)?;
        override_parsed(
            &lookup,
            "CONSOLIDATION_IMPORTANCE_THRESHOLD",
            &mut self.consolidation_importance_threshold,
        )?;
        override_parsed(&lookup, "MAX_SHORT_TERM_MEMORIES", &mut self.max_short_term_memories)?;
        override_parsed(&lookup, "LONG_TERM_MEMORY_LIMIT", &mut self.long_term_memory_limit)?;
        override_parsed(&lookup, "FORGET_AGE", &mut self.forget_age)?;
        override_parsed(&lookup, "MAINTENANCE_PERIOD", &mut self.maintenance_period)?;
        override_parsed(&lookup, "REDIS_POOL_SIZE", &mut self.pool.max_connections)?;
        override_parsed(&lookup, "REDIS_TIMEOUT_MS", &mut self.pool.operation_timeout_ms)?;
        override_parsed(&lookup, "MEMORY_WORKER_THREADS", &mut self.workers.blocking_threads)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.redis_url.trim().is_empty() {
            return Err(ConfigError::invalid("redis_url", "must not be empty"));
        }
        if self.short_term_ttl == 0 {
            return Err(ConfigError::invalid("short_term_ttl", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.consolidation_importance_threshold) {
            return Err(ConfigError::invalid(
                "consolidation_importance_threshold",
                "must be between 0 and 1",
            ));
        }
        if self.max_short_term_memories == 0 {
            return Err(ConfigError::invalid("max_short_term_memories", "must be greater than 0"));
        }
        if self.long_term_memory_limit == 0 {
            return Err(ConfigError::invalid("long_term_memory_limit", "must be greater than 0"));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::invalid("embedding_model", "must not be empty"));
        }
        if self.pool.max_connections == 0 {
            return Err(ConfigError::invalid("pool.max_connections", "must be greater than 0"));
        }
        if self.pool.scan_batch_size == 0 {
            return Err(ConfigError::invalid("pool.scan_batch_size", "must be greater than 0"));
        }
        if self.workers.blocking_threads == 0 {
            return Err(ConfigError::invalid("workers.blocking_threads", "must be greater than 0"));
        }
        if self.workers.page_size == 0 {
            return Err(ConfigError::invalid("workers.page_size", "must be greater than 0"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid("retry.max_attempts", "must be greater than 0"));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("retry.backoff_multiplier", "must be at least 1.0"));
        }
        Ok(())
    }

    pub fn consolidation_interval(&self) -> Duration {
        Duration::from_secs(self.consolidation_interval)
    }

    pub fn forget_age(&self) -> Duration {
        Duration::from_secs(self.forget_age)
    }

    pub fn maintenance_period(&self) -> Duration {
        Duration::from_secs(self.maintenance_period)
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string()))?;
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("invalid config file: {0}")]
    Parse(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.short_term_ttl, 3600);
        assert_eq!(settings.consolidation_interval, 3600);
        assert_eq!(settings.forget_age, 2_592_000);
        assert_eq!(settings.pool.max_connections, 16);
        assert_eq!(settings.retry.max_attempts, 3);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_overrides(lookup_from(&[
                ("SHORT_TERM_MEMORY_TTL", "60"),
                ("REDIS_URL", "memory://"),
                ("MAX_SHORT_TERM_MEMORIES", " 25 "),
                ("EMBEDDING_MODEL", "bge-small-en-v1.5"),
            ]))
            .unwrap();

        assert_eq!(settings.short_term_ttl, 60);
        assert_eq!(settings.redis_url, "memory://");
        assert_eq!(settings.max_short_term_memories, 25);
        assert_eq!(settings.embedding_model, "bge-small-en-v1.5");
        // Untouched values keep their defaults
        assert_eq!(settings.consolidation_interval, 3600);
    }

    #[test]
    fn test_unparseable_override_names_the_key() {
        let mut settings = Settings::default();
        let err = settings
            .apply_overrides(lookup_from(&[("CONSOLIDATION_INTERVAL", "hourly")]))
            .unwrap_err();
        assert!(err.to_string().contains("CONSOLIDATION_INTERVAL"));
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.short_term_ttl = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.consolidation_importance_threshold = 1.2;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.workers.blocking_threads = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "redis_url = \"memory://\"\nshort_term_ttl = 120\n\n[pool]\nmax_connections = 4\n"
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.redis_url, "memory://");
        assert_eq!(settings.short_term_ttl, 120);
        assert_eq!(settings.pool.max_connections, 4);
        assert_eq!(settings.pool.scan_batch_size, 100);
        assert_eq!(settings.workers.blocking_threads, 4);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "short_term_ttl = \"soon\"").unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }
}
