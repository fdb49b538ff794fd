//! hmem - Hybrid Agent Memory CLI
//!
//! Thin operator tool over hmem-core: one process-wide registry, one agent
//! per invocation.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hmem_core::{MemoryBackends, MemoryConfig, Registry, Settings};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("hmem=info".parse()?)
                .add_directive("hmem_core=warn".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    if let Commands::Config = cli.command {
        return commands::config::show(&settings, cli.json);
    }

    let registry = Arc::new(Registry::new(
        MemoryBackends::from_settings(settings.clone()).context("Failed to open memory backends")?,
    ));
    let memory = registry
        .get_or_create(&cli.agent, MemoryConfig::default())
        .await
        .with_context(|| format!("Failed to open memory for agent {}", cli.agent))?;

    let out = commands::Output { json: cli.json };

    // Execute command
    let result = match cli.command {
        Commands::Add {
            content,
            tier,
            context_type,
            meta,
        } => commands::memory::add(&memory, &content, &tier, &context_type, &meta, out).await,
        Commands::Get { id, tier } => commands::memory::get(&memory, &id, &tier, out).await,
        Commands::Search {
            query,
            tier,
            context_type,
            meta,
            threshold,
            limit,
        } => {
            let filters = commands::memory::SearchArgs {
                query,
                tier,
                context_type,
                meta,
                threshold,
                limit,
            };
            commands::memory::search(&memory, filters, out).await
        }
        Commands::Delete { id, tier } => commands::memory::delete(&memory, &id, &tier, out).await,
        Commands::Clear { tier } => commands::memory::clear(&memory, &tier, out).await,
        Commands::Recent { context, limit } => commands::memory::recent(&memory, &context, limit, out).await,
        Commands::Consolidate { older_than, keep } => {
            commands::lifecycle::consolidate(&memory, &settings, older_than, keep, out).await
        }
        Commands::Forget { older_than } => commands::lifecycle::forget(&memory, &settings, older_than, out).await,
        Commands::Maintain { watch } => commands::lifecycle::maintain(&registry, &settings, watch, out).await,
        Commands::Config => Ok(()),
    };

    // Close the registry even when the command failed
    let closed = registry.close_all().await.context("Failed to close memory backends");
    result.and(closed)
}
