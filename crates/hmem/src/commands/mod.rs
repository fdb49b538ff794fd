//! Command implementations for the hmem CLI.

pub mod config;
pub mod lifecycle;
pub mod memory;

use anyhow::{Context, Result, bail};
use hmem_core::{MemoryTier, Metadata};
use serde::Serialize;

/// Output mode shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
}

impl Output {
    /// Print `value` as pretty JSON. Returns false in text mode.
    pub fn emit_json<T: Serialize>(&self, value: &T) -> Result<bool> {
        if !self.json {
            return Ok(false);
        }
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to encode output")?
        );
        Ok(true)
    }
}

/// Parse tier string to a memory tier
pub fn parse_tier(tier: &str) -> Result<MemoryTier> {
    match tier {
        "short" | "s" => Ok(MemoryTier::ShortTerm),
        "long" | "l" => Ok(MemoryTier::LongTerm),
        other => match MemoryTier::from_str(other) {
            Some(tier) => Ok(tier),
            None => bail!("Invalid tier: {}. Use: short or long", other),
        },
    }
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type.
pub fn parse_meta(pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("Invalid metadata {:?}: expected key=value", pair);
        };
        if key.is_empty() {
            bail!("Invalid metadata {:?}: empty key", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        metadata.insert(key.to_string(), value);
    }
    Ok(metadata)
}
