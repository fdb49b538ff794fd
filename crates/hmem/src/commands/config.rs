//! Show the effective settings.

use anyhow::{Context, Result};
use colored::Colorize;
use hmem_core::Settings;

use super::Output;

pub fn show(settings: &Settings, json: bool) -> Result<()> {
    if (Output { json }).emit_json(settings)? {
        return Ok(());
    }

    println!("{}", "Memory settings".bold());
    println!("  Short-term store:   {}", settings.redis_url);
    println!("  Long-term database: {}", settings.database_path.display());
    println!("  Embedding model:    {}", settings.embedding_model);
    println!("  Short-term TTL:     {}s", settings.short_term_ttl);
    println!("  Consolidate after:  {}s", settings.consolidation_interval);
    println!("  Forget after:       {}s", settings.forget_age);
    println!("  Short-term cap:     {}", settings.max_short_term_memories);
    println!("  Long-term cap:      {}", settings.long_term_memory_limit);
    println!("  Maintenance every:  {}s", settings.maintenance_period);
    println!();
    println!("{}", "Full settings".bold());
    println!(
        "{}",
        serde_json::to_string_pretty(settings).context("Failed to encode settings")?
    );
    Ok(())
}
