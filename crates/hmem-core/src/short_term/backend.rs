//! Key-value backend abstraction for the short-term tier.
//!
//! The tier only needs a handful of commands (`PING`, `SET EX`, `GET`,
//! `MGET`, `DEL`, `SCAN MATCH COUNT`). [`KvConnector`] opens connections,
//! [`KvConnection`] runs the commands. Redis implements both behind the
//! `redis` feature; [`InMemoryKv`] is a process-local stand-in used by tests
//! and by `memory://` URLs.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{MemoryError, Result};

/// One open connection to a key-value server.
#[async_trait]
pub trait KvConnection: Send {
    async fn ping(&mut self) -> Result<()>;

    /// Store `value` under `key`, expiring after `ttl_secs` (must be > 0).
    async fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Values for `keys` in order; `None` for missing keys.
    async fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn del(&mut self, key: &str) -> Result<()>;

    /// One `SCAN` page. A returned cursor of 0 ends the iteration.
    async fn scan(&mut self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;
}

/// Factory for [`KvConnection`]s.
#[async_trait]
pub trait KvConnector: Send + Sync {
    /// Backend name used in errors and logs.
    fn backend(&self) -> &'static str;

    async fn connect(&self) -> Result<Box<dyn KvConnection>>;
}

/// Escape glob metacharacters so `value` matches itself in a `SCAN MATCH` pattern.
pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Glob matching with `*`, `?` and backslash escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    // Position after the last `*` and the text index it was tried against
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    star = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '\\' if p + 1 < pattern.len() && pattern[p + 1] == text[t] => {
                    p += 2;
                    t += 1;
                    continue;
                }
                c if c != '\\' && c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }

        match star {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[derive(Default)]
struct KvState {
    entries: Mutex<BTreeMap<String, (String, Instant)>>,
    /// Open `SCAN` cursors, each mapped to the last key it returned.
    cursors: Mutex<HashMap<u64, String>>,
    next_cursor: AtomicU64,
    offline: AtomicBool,
    failures: AtomicU32,
    latency_ms: AtomicU64,
    connections: AtomicUsize,
}

impl KvState {
    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, (String, Instant)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cursors(&self) -> std::sync::MutexGuard<'_, HashMap<u64, String>> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MemoryError::unavailable("memory", "connection refused"));
        }
        Ok(())
    }

    /// Apply injected latency and failures before a command runs.
    async fn before_command(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_online()?;

        let consumed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(MemoryError::unavailable("memory", "injected failure"));
        }
        Ok(())
    }
}

/// Process-local key-value store with TTLs and fault injection.
///
/// Clones share the same data. Expiry follows tokio's clock, so tests running
/// with paused time can advance past a TTL.
#[derive(Clone, Default)]
pub struct InMemoryKv {
    state: Arc<KvState>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse connections and commands while offline.
    pub fn set_online(&self, online: bool) {
        self.state.offline.store(!online, Ordering::SeqCst);
    }

    /// Fail the next `count` commands with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.state.failures.store(count, Ordering::SeqCst);
    }

    /// Delay every command by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .entries()
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a raw value, bypassing record encoding.
    pub fn insert_raw(&self, key: impl Into<String>, value: impl Into<String>, ttl: Duration) {
        self.state
            .entries()
            .insert(key.into(), (value.into(), Instant::now() + ttl));
    }
}

#[async_trait]
impl KvConnector for InMemoryKv {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn KvConnection>> {
        self.state.check_online()?;
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct InMemoryConnection {
    state: Arc<KvState>,
}

impl InMemoryConnection {
    fn live_value(&self, key: &str, now: Instant) -> Option<String> {
        let mut entries = self.state.entries();
        match entries.get(key) {
            Some((value, expires)) if *expires > now => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KvConnection for InMemoryConnection {
    async fn ping(&mut self) -> Result<()> {
        self.state.before_command().await
    }

    async fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.state.before_command().await?;
        if ttl_secs == 0 {
            return Err(MemoryError::invalid("invalid expire time in 'set' command"));
        }
        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        self.state
            .entries()
            .insert(key.to_string(), (value.to_string(), expires));
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        self.state.before_command().await?;
        Ok(self.live_value(key, Instant::now()))
    }

    async fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.state.before_command().await?;
        let now = Instant::now();
        Ok(keys.iter().map(|k| self.live_value(k, now)).collect())
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        self.state.before_command().await?;
        self.state.entries().remove(key);
        Ok(())
    }

    async fn scan(&mut self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.state.before_command().await?;
        let now = Instant::now();
        let mut entries = self.state.entries();
        entries.retain(|_, (_, expires)| *expires > now);

        // A cursor resumes after the last key it returned, so keys deleted
        // between pages never shift later keys out of the iteration.
        let resume = match cursor {
            0 => None,
            c => match self.state.cursors().remove(&c) {
                Some(last) => Some(last),
                None => return Ok((0, Vec::new())),
            },
        };
        let lower = match &resume {
            Some(last) => Bound::Excluded(last.as_str()),
            None => Bound::Unbounded,
        };

        let mut walked = entries.range::<str, _>((lower, Bound::Unbounded));
        let page: Vec<&String> = walked.by_ref().take(count.max(1)).map(|(k, _)| k).collect();
        let more = walked.next().is_some();

        let keys = page.iter().filter(|k| glob_match(pattern, k)).map(|k| (*k).clone()).collect();
        let next = match page.last() {
            Some(last) if more => {
                let id = self.state.next_cursor.fetch_add(1, Ordering::SeqCst) + 1;
                self.state.cursors().insert(id, (*last).clone());
                id
            }
            _ => 0,
        };
        Ok((next, keys))
    }
}
