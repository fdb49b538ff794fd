//! Single-agent memory commands: add, get, search, delete, clear, recent.

use anyhow::{Context, Result};
use colored::Colorize;
use hmem_core::{
    AdvancedSearchQuery, DEFAULT_MAX_RESULTS, MemoryContext, MemoryCoordinator, MemoryEntry, MemoryTier,
};
use serde_json::json;

use super::{Output, parse_meta, parse_tier};

/// Filters for `hmem search`.
pub struct SearchArgs {
    pub query: String,
    pub tier: Option<String>,
    pub context_type: Option<String>,
    pub meta: Vec<String>,
    pub threshold: Option<f64>,
    pub limit: usize,
}

pub async fn add(
    memory: &MemoryCoordinator,
    content: &str,
    tier: &str,
    context_type: &str,
    meta: &[String],
    out: Output,
) -> Result<()> {
    let tier = parse_tier(tier)?;
    let entry = MemoryEntry::new(content, MemoryContext::now(context_type)).with_metadata(parse_meta(meta)?);

    let id = memory.add(tier, entry).await.context("Failed to store memory")?;

    if out.emit_json(&json!({ "memory_id": id, "tier": tier }))? {
        return Ok(());
    }
    println!("{} Stored in {} memory", "✓".green(), tier_display(tier).cyan());
    println!("  ID: {}", id);
    Ok(())
}

pub async fn get(memory: &MemoryCoordinator, id: &str, tier: &str, out: Output) -> Result<()> {
    let tier = parse_tier(tier)?;
    let entry = memory
        .retrieve(tier, id)
        .await
        .context("Failed to retrieve memory")?;

    if out.emit_json(&entry)? {
        return Ok(());
    }
    match entry {
        Some(entry) => print_entry(1, id, tier, &entry, None),
        None => println!("{} No {} memory with ID {}", "⚠".yellow(), tier_display(tier), id),
    }
    Ok(())
}

pub async fn search(memory: &MemoryCoordinator, args: SearchArgs, out: Output) -> Result<()> {
    let mut query = AdvancedSearchQuery::new(args.query).limit(if args.limit == 0 {
        DEFAULT_MAX_RESULTS
    } else {
        args.limit
    });
    if let Some(tier) = args.tier.as_deref() {
        query = query.tier(parse_tier(tier)?);
    }
    if let Some(context_type) = args.context_type {
        query = query.context_type(context_type);
    }
    for (key, value) in parse_meta(&args.meta)? {
        query = query.filter(key, value);
    }
    if let Some(threshold) = args.threshold {
        query = query.threshold(threshold);
    }

    let results = memory.search(&query).await.context("Search failed")?;

    if out.emit_json(&results)? {
        return Ok(());
    }
    if results.is_empty() {
        println!("{} No memories found matching criteria", "⚠".yellow());
        return Ok(());
    }

    println!("{} Found {} memories:", "✓".green(), results.len());
    println!();
    for (i, result) in results.iter().enumerate() {
        print_entry(i + 1, &result.id, result.tier, &result.memory_entry, Some(result.relevance_score));
    }
    Ok(())
}

pub async fn delete(memory: &MemoryCoordinator, id: &str, tier: &str, out: Output) -> Result<()> {
    let tier = parse_tier(tier)?;
    memory.delete(tier, id).await.context("Failed to delete memory")?;

    if out.emit_json(&json!({ "memory_id": id, "tier": tier }))? {
        return Ok(());
    }
    println!("{} Deleted {} memory: {}", "✓".green(), tier_display(tier), id);
    Ok(())
}

pub async fn clear(memory: &MemoryCoordinator, tier: &str, out: Output) -> Result<()> {
    let tier = parse_tier(tier)?;
    let cleared = memory.clear(tier).await.context("Failed to clear memory")?;

    if out.emit_json(&json!({ "cleared": cleared, "tier": tier }))? {
        return Ok(());
    }
    println!(
        "{} Cleared {} {} memories for {}",
        "✓".green(),
        cleared,
        tier_display(tier),
        memory.agent_id().cyan()
    );
    Ok(())
}

pub async fn recent(memory: &MemoryCoordinator, context: &str, limit: usize, out: Output) -> Result<()> {
    let memories = memory
        .retrieve_relevant(context, limit)
        .await
        .context("Failed to load recent memories")?;

    if out.emit_json(&memories)? {
        return Ok(());
    }
    if memories.is_empty() {
        println!("{} No memories yet", "⚠".yellow());
        return Ok(());
    }
    for (i, m) in memories.iter().enumerate() {
        print_entry(i + 1, &m.id, m.tier, &m.entry, None);
    }
    Ok(())
}

fn tier_display(tier: MemoryTier) -> &'static str {
    match tier {
        MemoryTier::ShortTerm => "short-term",
        MemoryTier::LongTerm => "long-term",
    }
}

fn print_entry(index: usize, id: &str, tier: MemoryTier, entry: &MemoryEntry, score: Option<f64>) {
    let tier_label = match tier {
        MemoryTier::ShortTerm => "SHORT".yellow(),
        MemoryTier::LongTerm => "LONG".blue(),
    };
    let score = score
        .map(|s| format!(" ({:.2})", s).dimmed().to_string())
        .unwrap_or_default();

    println!("{}. [{}] {}{}", index, tier_label, entry.content.bold(), score);
    println!(
        "   {} {} · {}",
        id.dimmed(),
        entry.context.context_type,
        entry.context.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if !entry.metadata.is_empty() {
        let meta: Vec<String> = entry.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        println!("   {}", meta.join(", ").dimmed());
    }
    println!();
}
