//! Registry sharing and background maintenance.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use hmem_core::maintenance::run_once;
use hmem_core::{
    AdvancedSearchQuery, MaintenancePolicy, MaintenanceScheduler, MemoryBackends, MemoryConfig,
    MemoryTier, Registry, Settings,
};
use tokio_test::assert_ok;

use common::{aged, backends, settings};

fn policy() -> MaintenancePolicy {
    MaintenancePolicy {
        consolidation_interval: Duration::from_secs(3600),
        max_short_term_memories: 100,
        long_term_memory_limit: 100,
        forget_age: Duration::from_secs(30 * 24 * 3600),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_get_or_create_yields_one_coordinator() {
    let registry = Arc::new(Registry::new(backends().0));

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.get_or_create("shared", MemoryConfig::default()).await })
        })
        .collect();

    let mut coordinators = Vec::new();
    for handle in handles {
        coordinators.push(handle.await.unwrap().ok().unwrap());
    }

    assert!(coordinators.iter().all(|c| Arc::ptr_eq(c, &coordinators[0])));
    assert_eq!(registry.len().await, 1);
}

#[tokio::test]
async fn test_agents_share_backends() {
    let (backends, kv) = backends();
    let registry = Registry::new(backends);
    let alpha = registry.get_or_create("alpha", MemoryConfig::default()).await.ok().unwrap();
    let beta = registry.get_or_create("beta", MemoryConfig::default()).await.ok().unwrap();

    alpha
        .add(MemoryTier::ShortTerm, aged("alpha note", ChronoDuration::zero()))
        .await
        .unwrap();
    beta.add(MemoryTier::ShortTerm, aged("beta note", ChronoDuration::zero()))
        .await
        .unwrap();
    beta.add(MemoryTier::LongTerm, aged("beta archive note", ChronoDuration::hours(1)))
        .await
        .unwrap();

    // One pool for everyone
    assert_eq!(kv.len(), 2);
    assert_eq!(kv.connections_opened(), 1);

    let alpha_hits = alpha.search(&AdvancedSearchQuery::new("note")).await.unwrap();
    assert_eq!(alpha_hits.len(), 1);
    assert_eq!(alpha_hits[0].memory_entry.content, "alpha note");
    assert_eq!(beta.search(&AdvancedSearchQuery::new("note")).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_close_all_then_reuse() {
    let (backends, kv) = backends();
    let registry = Registry::new(backends);
    let memory = registry.get_or_create("alpha", MemoryConfig::default()).await.ok().unwrap();
    let id = memory
        .add(MemoryTier::ShortTerm, aged("outlives the pool", ChronoDuration::zero()))
        .await
        .unwrap();

    assert_ok!(registry.close_all().await);
    assert!(registry.is_empty().await);
    assert!(!registry.backends().pool.is_initialized());

    let reopened = registry.get_or_create("alpha", MemoryConfig::default()).await.ok().unwrap();
    assert!(!Arc::ptr_eq(&memory, &reopened));
    let entry = reopened.retrieve(MemoryTier::ShortTerm, &id).await.unwrap();
    assert_eq!(entry.map(|e| e.content), Some("outlives the pool".to_string()));
    assert_eq!(kv.connections_opened(), 2);
}

#[tokio::test]
async fn test_from_settings_with_memory_backends() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings {
        database_path: dir.path().join("hmem.db"),
        ..settings()
    };
    let registry = Registry::new(MemoryBackends::from_settings(settings).unwrap());
    let memory = registry.get_or_create("alpha", MemoryConfig::default()).await.ok().unwrap();

    let id = memory
        .add(MemoryTier::LongTerm, aged("written to disk", ChronoDuration::zero()))
        .await
        .unwrap();
    assert!(memory.retrieve(MemoryTier::LongTerm, &id).await.unwrap().is_some());
    assert!(dir.path().join("hmem.db").exists());
}

#[tokio::test]
async fn test_run_once_covers_every_agent() {
    let registry = Registry::new(backends().0);
    let hybrid = registry.get_or_create("hybrid", MemoryConfig::default()).await.ok().unwrap();
    let cache = registry
        .get_or_create("cache", MemoryConfig::short_term_only())
        .await
        .ok()
        .unwrap();
    let archive = registry
        .get_or_create("archive", MemoryConfig::long_term_only())
        .await
        .ok()
        .unwrap();

    for memory in [&hybrid, &cache] {
        memory
            .add(MemoryTier::ShortTerm, aged("stale", ChronoDuration::hours(2)))
            .await
            .unwrap();
    }
    archive
        .add(MemoryTier::LongTerm, aged("ancient archive", ChronoDuration::days(90)))
        .await
        .unwrap();
    archive
        .add(MemoryTier::LongTerm, aged("recent archive", ChronoDuration::days(1)))
        .await
        .unwrap();

    let mut reports = run_once(&registry, &policy()).await;
    reports.sort_by(|a, b| a.0.cmp(&b.0));
    let agents: Vec<&str> = reports.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(agents, vec!["archive", "cache", "hybrid"]);

    let (_, archived) = &reports[0];
    assert_eq!(archived.forgotten, 1);
    assert!(archived.errors.is_empty());
    let left = archive
        .search(&AdvancedSearchQuery::new("archive").tier(MemoryTier::LongTerm))
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].memory_entry.content, "recent archive");

    // The cache-only agent has nothing to do and keeps its entry until it expires
    let (_, cached) = &reports[1];
    assert!(!cached.has_changes());
    assert!(cached.errors.is_empty());
    let kept = cache.search(&AdvancedSearchQuery::new("stale")).await.unwrap();
    assert_eq!(kept.len(), 1);

    assert_eq!(reports[2].1.consolidation.migrated, 1);
}

#[tokio::test]
async fn test_scheduler_consolidates_in_background() {
    let registry = Arc::new(Registry::new(backends().0));
    let memory = registry.get_or_create("alpha", MemoryConfig::default()).await.ok().unwrap();
    memory
        .add(MemoryTier::ShortTerm, aged("move me later", ChronoDuration::hours(2)))
        .await
        .unwrap();

    let handle = MaintenanceScheduler::spawn(Arc::clone(&registry), policy(), Duration::from_millis(20));

    let migrated = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let long = memory
                .search(&AdvancedSearchQuery::new("move").tier(MemoryTier::LongTerm))
                .await
                .unwrap();
            if !long.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(migrated.is_ok(), "scheduler never consolidated");

    assert!(!handle.is_finished());
    handle.shutdown().await;
}
