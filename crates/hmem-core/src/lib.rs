//! hmem-core - Hybrid Agent Memory
//!
//! Two memory tiers behind one per-agent coordinator:
//!
//! - **short_term** - expiring entries in a shared key-value cache (Redis, or
//!   an in-process map), ranked by keyword overlap
//! - **long_term** - durable entries in SQLite, ranked by embedding similarity
//! - **coordinator** - routing, federated search, consolidation and forgetting
//! - **registry** - one coordinator per agent over shared backends
//! - **maintenance** - periodic consolidation and forgetting
//!
//! # Example
//!
//! ```rust,no_run
//! use hmem_core::{
//!     AdvancedSearchQuery, MemoryBackends, MemoryConfig, MemoryContext, MemoryEntry, MemoryTier,
//!     Registry, Settings,
//! };
//!
//! async fn example() -> hmem_core::Result<()> {
//!     let registry = Registry::new(MemoryBackends::from_settings(Settings::from_env()?)?);
//!     let memory = registry.get_or_create("agent-1", MemoryConfig::default()).await?;
//!
//!     let entry = MemoryEntry::new("User prefers dark roast", MemoryContext::now("chat"));
//!     memory.add(MemoryTier::ShortTerm, entry).await?;
//!
//!     let hits = memory.search(&AdvancedSearchQuery::new("roast")).await?;
//!     println!("{} hits", hits.len());
//!
//!     registry.close_all().await
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod long_term;
pub mod maintenance;
pub mod ranking;
pub mod registry;
pub mod retry;
pub mod short_term;
pub mod traits;
pub mod types;

pub use config::{ConfigError, PoolConfig, Settings, WorkerConfig};
pub use coordinator::{ConsolidationReport, MaintenancePolicy, MaintenanceReport, MemoryCoordinator};
pub use error::{MemoryError, Result};
pub use long_term::{BlockingPool, Embedder, HashEmbedder, LongTermStore, SqliteIndex};
pub use maintenance::{MaintenanceHandle, MaintenanceScheduler};
pub use registry::{MemoryBackends, Registry, connector_for};
pub use retry::RetryPolicy;
pub use short_term::{ConnectionPool, InMemoryKv, KvConnection, KvConnector, ShortTermStore};
pub use traits::MemoryStore;
pub use types::*;
