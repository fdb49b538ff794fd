//! Consolidation, forgetting and maintenance commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use hmem_core::maintenance::run_once;
use hmem_core::{ConsolidationReport, MaintenancePolicy, MaintenanceScheduler, MemoryCoordinator, Registry, Settings};
use serde_json::json;
use tracing::info;

use super::Output;

pub async fn consolidate(
    memory: &MemoryCoordinator,
    settings: &Settings,
    older_than: Option<u64>,
    keep: Option<usize>,
    out: Output,
) -> Result<()> {
    let report = match keep {
        Some(max) => memory.force_consolidate(max).await,
        None => {
            let interval = older_than
                .map(Duration::from_secs)
                .unwrap_or_else(|| settings.consolidation_interval());
            memory.consolidate(interval).await
        }
    }
    .context("Consolidation failed")?;

    if out.emit_json(&report)? {
        return Ok(());
    }
    print_consolidation("Consolidated", &report);
    Ok(())
}

pub async fn forget(
    memory: &MemoryCoordinator,
    settings: &Settings,
    older_than: Option<u64>,
    out: Output,
) -> Result<()> {
    let age = older_than
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.forget_age());
    let forgotten = memory.forget(age).await.context("Forget failed")?;

    if out.emit_json(&json!({ "forgotten": forgotten }))? {
        return Ok(());
    }
    println!(
        "{} Forgot {} long-term memories older than {}s",
        "✓".green(),
        forgotten,
        age.as_secs()
    );
    Ok(())
}

pub async fn maintain(registry: &Arc<Registry>, settings: &Settings, watch: bool, out: Output) -> Result<()> {
    let policy = MaintenancePolicy::from_settings(settings);

    for (agent_id, report) in run_once(registry, &policy).await {
        if out.emit_json(&json!({ "agent_id": agent_id, "report": report }))? {
            continue;
        }
        println!("{} Maintenance for {}", "✓".green(), agent_id.cyan());
        print_consolidation("  Consolidated", &report.consolidation);
        print_consolidation("  Overflow", &report.overflow);
        println!("  Forgotten: {}", report.forgotten);
        println!("  Trimmed: {}", report.trimmed);
        for error in &report.errors {
            println!("  {} {}", "✗".red(), error);
        }
    }

    if !watch {
        return Ok(());
    }

    let period = settings.maintenance_period();
    let handle = MaintenanceScheduler::spawn(Arc::clone(registry), policy, period);
    info!(period_secs = period.as_secs(), "Watching; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    handle.shutdown().await;
    Ok(())
}

fn print_consolidation(label: &str, report: &ConsolidationReport) {
    println!(
        "{} {} of {} memories",
        label,
        report.migrated.to_string().green(),
        report.harvested
    );
    if report.failed > 0 {
        println!("  {} {} failed, left in short-term memory", "⚠".yellow(), report.failed);
        for error in &report.errors {
            println!("    {}", error.dimmed());
        }
    }
}
