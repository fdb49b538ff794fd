//! Process-wide registry of per-agent coordinators.
//!
//! All coordinators share one set of [`MemoryBackends`]: a single short-term
//! connection pool, a single SQLite database, one embedder and one blocking
//! worker pool.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::coordinator::MemoryCoordinator;
use crate::error::{MemoryError, Result};
use crate::long_term::{BlockingPool, Embedder, HashEmbedder, LongTermStore, SqliteIndex, embedder_for};
use crate::short_term::{ConnectionPool, InMemoryKv, KvConnector, ShortTermStore};
use crate::types::MemoryConfig;

/// Pick a short-term connector from the URL scheme.
///
/// `memory://` selects the process-local [`InMemoryKv`]; `redis://`,
/// `rediss://` and `unix://` need the `redis` feature.
pub fn connector_for(url: &str) -> Result<Arc<dyn KvConnector>> {
    let scheme = url.split_once("://").map(|(scheme, _)| scheme).unwrap_or_default();

    match scheme {
        "memory" => Ok(Arc::new(InMemoryKv::new())),
        "redis" | "rediss" | "unix" | "redis+unix" => {
            #[cfg(feature = "redis")]
            {
                Ok(Arc::new(crate::short_term::redis::RedisConnector::new(url)?))
            }
            #[cfg(not(feature = "redis"))]
            {
                Err(MemoryError::invalid(format!(
                    "{scheme}:// requires the redis feature"
                )))
            }
        }
        _ => Err(MemoryError::invalid(format!("unsupported short-term store url: {url}"))),
    }
}

/// Shared resources used to build coordinators.
#[derive(Clone)]
pub struct MemoryBackends {
    pub pool: Arc<ConnectionPool>,
    pub index: Arc<SqliteIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub workers: BlockingPool,
    pub settings: Settings,
}

impl MemoryBackends {
    /// Connector chosen by `redis_url`, database opened (and migrated) at
    /// `database_path`, embedder chosen by `embedding_model`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let connector = connector_for(&settings.redis_url)?;

        let index = if settings.database_path == Path::new(":memory:") {
            SqliteIndex::open_in_memory()?
        } else {
            SqliteIndex::open(&settings.database_path)?
        };
        let embedder = embedder_for(&settings.embedding_model)?;

        info!(
            short_term = connector.backend(),
            database = %settings.database_path.display(),
            embedder = embedder.name(),
            "Memory backends ready"
        );
        Ok(Self::build(settings, connector, Arc::new(index), embedder))
    }

    /// Everything in process: a fresh [`InMemoryKv`], a private in-memory
    /// database and the hash embedder.
    pub fn in_memory(settings: Settings) -> Result<Self> {
        Self::with_kv(settings, InMemoryKv::new())
    }

    /// Like [`in_memory`](Self::in_memory) but sharing the given cache, so the
    /// caller keeps a handle for inspection and fault injection.
    pub fn with_kv(settings: Settings, kv: InMemoryKv) -> Result<Self> {
        settings.validate()?;
        let index = SqliteIndex::open_in_memory()?;
        Ok(Self::build(
            settings,
            Arc::new(kv),
            Arc::new(index),
            Arc::new(HashEmbedder::default()),
        ))
    }

    fn build(
        settings: Settings,
        connector: Arc<dyn KvConnector>,
        index: Arc<SqliteIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let pool = ConnectionPool::new(connector, settings.pool.clone(), settings.retry.clone());
        let workers = BlockingPool::new(&settings.workers);
        Self {
            pool: Arc::new(pool),
            index,
            embedder,
            workers,
            settings,
        }
    }

    /// Build a coordinator for one agent over the shared backends.
    pub fn coordinator(&self, agent_id: &str, config: MemoryConfig) -> MemoryCoordinator {
        let short_term = ShortTermStore::new(
            agent_id,
            Arc::clone(&self.pool),
            Duration::from_secs(self.settings.short_term_ttl),
        );
        let long_term = LongTermStore::new(
            agent_id,
            Arc::clone(&self.index),
            Arc::clone(&self.embedder),
            self.workers.clone(),
            self.settings.workers.page_size,
        );
        MemoryCoordinator::new(agent_id, config, Arc::new(short_term), Arc::new(long_term))
    }
}

/// Agent id to coordinator map, one coordinator per agent.
pub struct Registry {
    backends: MemoryBackends,
    coordinators: RwLock<HashMap<String, Arc<MemoryCoordinator>>>,
}

impl Registry {
    pub fn new(backends: MemoryBackends) -> Self {
        Self {
            backends,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    pub fn backends(&self) -> &MemoryBackends {
        &self.backends
    }

    /// Return the agent's coordinator, creating it with `config` on first use.
    ///
    /// Concurrent first calls for the same agent all receive the same
    /// coordinator. A coordinator that already exists keeps its original config.
    pub async fn get_or_create(&self, agent_id: &str, config: MemoryConfig) -> Result<Arc<MemoryCoordinator>> {
        if agent_id.trim().is_empty() {
            return Err(MemoryError::invalid("agent id must not be empty"));
        }

        if let Some(existing) = self.coordinators.read().await.get(agent_id) {
            if existing.config() != config {
                debug!(agent_id, "Ignoring config for existing coordinator");
            }
            return Ok(Arc::clone(existing));
        }

        let mut coordinators = self.coordinators.write().await;
        if let Some(existing) = coordinators.get(agent_id) {
            return Ok(Arc::clone(existing));
        }

        let coordinator = Arc::new(self.backends.coordinator(agent_id, config));
        coordinators.insert(agent_id.to_string(), Arc::clone(&coordinator));
        info!(
            agent_id,
            short_term = config.use_short_term_cache,
            long_term = config.use_long_term_memory,
            "Created memory coordinator"
        );
        Ok(coordinator)
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<MemoryCoordinator>> {
        self.coordinators.read().await.get(agent_id).cloned()
    }

    /// Unregister and close an agent's coordinator. Returns whether it existed.
    pub async fn remove(&self, agent_id: &str) -> Result<bool> {
        let removed = self.coordinators.write().await.remove(agent_id);
        match removed {
            Some(coordinator) => {
                coordinator.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Registered agent ids, sorted.
    pub async fn agents(&self) -> Vec<String> {
        let mut agents: Vec<String> = self.coordinators.read().await.keys().cloned().collect();
        agents.sort();
        agents
    }

    pub async fn len(&self) -> usize {
        self.coordinators.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every coordinator, then the shared pool, then forget all agents.
    ///
    /// Every coordinator is closed even if one fails; the first error is returned.
    pub async fn close_all(&self) -> Result<()> {
        let mut coordinators = self.coordinators.write().await;
        let mut first_error = None;

        for (agent_id, coordinator) in coordinators.iter() {
            if let Err(e) = coordinator.close().await {
                warn!(agent_id = %agent_id, error = %e, "Failed to close memory coordinator");
                first_error.get_or_insert(e);
            }
        }

        self.backends.pool.close().await;
        let closed = coordinators.len();
        coordinators.clear();
        info!(closed, "Closed all memory coordinators");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
