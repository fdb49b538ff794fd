//! Long-term store schema migrations
//!
//! SQL is embedded at compile time and applied when the index is opened.

use rusqlite::Connection;

use crate::error::Result;

/// Long-term memory table (001)
pub const LONG_TERM_MEMORIES_SQL: &str = include_str!("001_long_term_memories.sql");

/// Run all long-term migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(LONG_TERM_MEMORIES_SQL)?;
    Ok(())
}
