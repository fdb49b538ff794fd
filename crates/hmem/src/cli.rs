//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Hybrid agent memory CLI
///
/// Operates one agent's short-term cache and long-term store through the
/// same coordinator the library exposes.
#[derive(Parser, Debug)]
#[command(name = "hmem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// TOML settings file (environment variables still override it)
    #[arg(short, long, global = true, env = "HMEM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Agent whose memory is used
    #[arg(short, long, global = true, env = "HMEM_AGENT", default_value = "default")]
    pub agent: String,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a memory
    Add {
        /// Content to remember
        content: String,

        /// Memory tier: short or long (default: short)
        #[arg(short, long, default_value = "short")]
        tier: String,

        /// Context type (default: general)
        #[arg(short = 'C', long, default_value = "general")]
        context_type: String,

        /// Metadata as key=value; values are parsed as JSON when possible
        #[arg(short, long = "meta", action = clap::ArgAction::Append)]
        meta: Vec<String>,
    },

    /// Fetch a memory by id
    Get {
        /// Memory ID
        id: String,

        /// Memory tier: short or long (default: short)
        #[arg(short, long, default_value = "short")]
        tier: String,
    },

    /// Search one or both tiers
    Search {
        /// Query text (empty matches everything)
        #[arg(default_value = "")]
        query: String,

        /// Restrict to one tier (default: every enabled tier)
        #[arg(short, long)]
        tier: Option<String>,

        /// Only entries of this context type
        #[arg(short = 'C', long)]
        context_type: Option<String>,

        /// Metadata filter as key=value (repeatable)
        #[arg(short, long = "meta", action = clap::ArgAction::Append)]
        meta: Vec<String>,

        /// Minimum relevance score (0.0 - 1.0)
        #[arg(short = 'r', long)]
        threshold: Option<f64>,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Delete a memory by id
    Delete {
        /// Memory ID
        id: String,

        /// Memory tier: short or long (default: short)
        #[arg(short, long, default_value = "short")]
        tier: String,
    },

    /// Delete every memory the agent holds in one tier
    Clear {
        /// Memory tier to wipe: short or long
        #[arg(short, long)]
        tier: String,
    },

    /// Recent memories from both tiers, newest first
    Recent {
        /// Text used to pick long-term memories
        #[arg(default_value = "")]
        context: String,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Move aging short-term memories into long-term memory
    Consolidate {
        /// Age in seconds (default: consolidation_interval from settings)
        #[arg(long)]
        older_than: Option<u64>,

        /// Instead of age, keep at most this many short-term memories
        #[arg(long, conflicts_with = "older_than")]
        keep: Option<usize>,
    },

    /// Delete long-term memories older than an age limit
    Forget {
        /// Age in seconds (default: forget_age from settings)
        #[arg(long)]
        older_than: Option<u64>,
    },

    /// Run maintenance for the agent
    Maintain {
        /// Keep running on the configured period until interrupted
        #[arg(short, long)]
        watch: bool,
    },

    /// Show the effective settings
    Config,
}
