//! SQLite index backing the long-term tier.
//!
//! All agents share one database; rows are partitioned by `collection`
//! (`agent_{id}`). The index is synchronous and is only called from the
//! blocking worker pool.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use serde_json::Value;
use tracing::{debug, warn};

use super::migrations::run_migrations;
use crate::error::{MemoryError, Result};
use crate::types::{
    AdvancedSearchQuery, CONTEXT_TIMESTAMP_KEY, CONTEXT_TYPE_KEY, MemoryContext, MemoryEntry, Metadata,
    StoredEntry,
};

const COLUMNS: &str =
    "id, content, metadata_json, context_type, context_timestamp, context_metadata_json";

/// Fixed-width RFC 3339 so that text order equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| MemoryError::Serialization(format!("invalid timestamp {raw:?}: {e}")))
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// JSON path selecting a top-level metadata key. SQLite's path syntax has
/// no escape for a quote inside a quoted label, so such keys are refused.
fn json_path(key: &str) -> Result<String> {
    if key.contains(['"', '\\']) {
        return Err(MemoryError::invalid(format!(
            "metadata filter key {key:?} must not contain quotes or backslashes"
        )));
    }
    Ok(format!("$.\"{key}\""))
}

/// A filtered row together with its stored embedding.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: String,
    pub entry: MemoryEntry,
    pub embedding: Vec<f32>,
}

struct RawRow {
    id: String,
    content: String,
    metadata_json: String,
    context_type: String,
    context_timestamp: String,
    context_metadata_json: String,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            metadata_json: row.get(2)?,
            context_type: row.get(3)?,
            context_timestamp: row.get(4)?,
            context_metadata_json: row.get(5)?,
        })
    }

    fn decode(self) -> Result<StoredEntry> {
        let mut metadata: Metadata = serde_json::from_str(&self.metadata_json)?;
        metadata.remove(CONTEXT_TYPE_KEY);
        metadata.remove(CONTEXT_TIMESTAMP_KEY);

        let context_metadata: Metadata = serde_json::from_str(&self.context_metadata_json)?;
        let timestamp = parse_timestamp(&self.context_timestamp)?;

        Ok(StoredEntry {
            id: self.id,
            entry: MemoryEntry {
                content: self.content,
                metadata,
                context: MemoryContext::new(self.context_type, timestamp)
                    .with_metadata(context_metadata),
            },
        })
    }
}

/// Build the `WHERE` clause for a query's filters.
fn filter_clause(collection: &str, query: &AdvancedSearchQuery) -> Result<(String, Vec<Box<dyn ToSql>>)> {
    let mut sql = String::from("collection = ?");
    let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(collection.to_string())];

    if let Some(ref context_type) = query.context_type {
        sql.push_str(" AND context_type = ?");
        params.push(Box::new(context_type.clone()));
    }

    if let Some(range) = &query.time_range {
        sql.push_str(" AND context_timestamp >= ? AND context_timestamp <= ?");
        params.push(Box::new(format_timestamp(range.start)));
        params.push(Box::new(format_timestamp(range.end)));
    }

    if let Some(filters) = &query.metadata_filters {
        for (key, value) in filters {
            let path = json_path(key)?;
            match value {
                Value::Bool(b) => {
                    sql.push_str(" AND json_type(metadata_json, ?) = ?");
                    params.push(Box::new(path));
                    params.push(Box::new(if *b { "true" } else { "false" }));
                }
                Value::Number(n) => {
                    sql.push_str(
                        " AND json_type(metadata_json, ?) IN ('integer', 'real') AND json_extract(metadata_json, ?) = ?",
                    );
                    params.push(Box::new(path.clone()));
                    params.push(Box::new(path));
                    if let Some(i) = n.as_i64() {
                        params.push(Box::new(i));
                    } else if let Some(f) = n.as_f64() {
                        params.push(Box::new(f));
                    } else {
                        return Err(MemoryError::invalid(format!(
                            "metadata filter {key} holds an unsupported number: {n}"
                        )));
                    }
                }
                Value::String(s) => {
                    sql.push_str(
                        " AND json_type(metadata_json, ?) = 'text' AND json_extract(metadata_json, ?) = ?",
                    );
                    params.push(Box::new(path.clone()));
                    params.push(Box::new(path));
                    params.push(Box::new(s.clone()));
                }
                Value::Null => {
                    sql.push_str(" AND json_type(metadata_json, ?) = 'null'");
                    params.push(Box::new(path));
                }
                Value::Array(_) | Value::Object(_) => {
                    sql.push_str(" AND json_extract(metadata_json, ?) = json(?)");
                    params.push(Box::new(path));
                    params.push(Box::new(serde_json::to_string(value)?));
                }
            }
        }
    }

    Ok((sql, params))
}

/// Shared SQLite database for every agent's long-term collection.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (creating if needed) the database file and apply migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=5000;")?;
        debug!(path = %path.display(), "Opened long-term database");
        Self::from_connection(conn)
    }

    /// Private in-memory database, used by tests and `:memory:` paths.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a row, or return the existing id when `origin_id` was already imported.
    pub fn insert(
        &self,
        collection: &str,
        id: &str,
        origin_id: Option<&str>,
        entry: &MemoryEntry,
        embedding: &[f32],
    ) -> Result<String> {
        let conn = self.conn();

        if let Some(origin) = origin_id {
            let existing: Option<String> = conn
                .query_row(
                    "SELECT id FROM long_term_memories WHERE collection = ?1 AND origin_id = ?2",
                    params![collection, origin],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing) = existing {
                debug!(collection, origin_id = origin, memory_id = %existing, "Origin already imported");
                return Ok(existing);
            }
        }

        let timestamp = format_timestamp(entry.context.timestamp);
        let mut flat = entry.metadata.clone();
        flat.insert(
            CONTEXT_TYPE_KEY.to_string(),
            Value::String(entry.context.context_type.clone()),
        );
        flat.insert(CONTEXT_TIMESTAMP_KEY.to_string(), Value::String(timestamp.clone()));

        conn.execute(
            "INSERT INTO long_term_memories
                (id, collection, content, metadata_json, context_type, context_timestamp,
                 context_metadata_json, embedding, origin_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                collection,
                &entry.content,
                serde_json::to_string(&flat)?,
                &entry.context.context_type,
                timestamp,
                serde_json::to_string(&entry.context.metadata)?,
                encode_embedding(embedding),
                origin_id,
                Utc::now().timestamp_millis(),
            ],
        )?;

        Ok(id.to_string())
    }

    pub fn get(&self, collection: &str, id: &str) -> Result<Option<MemoryEntry>> {
        let conn = self.conn();
        let raw = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM long_term_memories WHERE collection = ?1 AND id = ?2"),
                params![collection, id],
                RawRow::from_row,
            )
            .optional()?;

        raw.map(|r| r.decode().map(|stored| stored.entry)).transpose()
    }

    /// Returns whether a row was removed.
    pub fn delete(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = self.conn().execute(
            "DELETE FROM long_term_memories WHERE collection = ?1 AND id = ?2",
            params![collection, id],
        )?;
        Ok(removed > 0)
    }

    /// Delete every row of `collection`, returning how many were removed.
    pub fn clear(&self, collection: &str) -> Result<usize> {
        let removed = self.conn().execute(
            "DELETE FROM long_term_memories WHERE collection = ?1",
            params![collection],
        )?;
        Ok(removed)
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM long_term_memories WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Rows matching the query's filters, with embeddings, newest first.
    pub fn candidates(&self, collection: &str, query: &AdvancedSearchQuery) -> Result<Vec<Candidate>> {
        let (clause, params) = filter_clause(collection, query)?;
        let sql = format!(
            "SELECT {COLUMNS}, embedding FROM long_term_memories WHERE {clause}
             ORDER BY context_timestamp DESC, id"
        );

        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((RawRow::from_row(row)?, row.get::<_, Vec<u8>>(6)?))
        })?;

        let mut candidates = Vec::new();
        for row in rows {
            let (raw, embedding) = row?;
            let id = raw.id.clone();
            match raw.decode() {
                Ok(stored) => candidates.push(Candidate {
                    id: stored.id,
                    entry: stored.entry,
                    embedding: decode_embedding(&embedding),
                }),
                Err(e) => warn!(collection, memory_id = %id, error = %e, "Skipping corrupt long-term row"),
            }
        }
        Ok(candidates)
    }

    /// One page of entries, newest first.
    pub fn recent(&self, collection: &str, limit: usize, offset: usize) -> Result<Vec<StoredEntry>> {
        self.page(
            &format!(
                "SELECT {COLUMNS} FROM long_term_memories WHERE collection = ?1
                 ORDER BY context_timestamp DESC, id LIMIT ?2 OFFSET ?3"
            ),
            params![collection, limit as i64, offset as i64],
            collection,
        )
    }

    /// One page of entries strictly older than `threshold`, oldest first.
    pub fn older_than(
        &self,
        collection: &str,
        threshold: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredEntry>> {
        self.page(
            &format!(
                "SELECT {COLUMNS} FROM long_term_memories WHERE collection = ?1 AND context_timestamp < ?2
                 ORDER BY context_timestamp ASC, id LIMIT ?3 OFFSET ?4"
            ),
            params![collection, format_timestamp(threshold), limit as i64, offset as i64],
            collection,
        )
    }

    fn page(&self, sql: &str, params: &[&dyn ToSql], collection: &str) -> Result<Vec<StoredEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRow::from_row)?;

        let mut entries = Vec::new();
        for row in rows {
            let raw = row?;
            let id = raw.id.clone();
            match raw.decode() {
                Ok(stored) => entries.push(stored),
                Err(e) => warn!(collection, memory_id = %id, error = %e, "Skipping corrupt long-term row"),
            }
        }
        Ok(entries)
    }
}
