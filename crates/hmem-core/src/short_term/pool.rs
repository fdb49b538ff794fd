//! Bounded connection pool for the short-term backend.
//!
//! Connections are created lazily. A connection goes back to the idle list
//! only when the command it ran completed successfully; a guard dropped on
//! error, timeout or cancellation discards its connection, so a half-read
//! reply is never reused.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use super::backend::{KvConnection, KvConnector};
use crate::config::PoolConfig;
use crate::error::{MemoryError, Result};
use crate::retry::RetryPolicy;

/// Boxed future returned by commands run through [`ConnectionPool::with_connection`].
pub type KvFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>>;

struct IdleConnection {
    conn: Box<dyn KvConnection>,
    last_used: Instant,
    generation: u64,
}

/// A checked-out connection.
///
/// Holds one pool permit until dropped. Return it with
/// [`ConnectionPool::release`]; dropping it closes the connection.
pub struct PooledConnection {
    conn: Box<dyn KvConnection>,
    generation: u64,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn connection(&mut self) -> &mut dyn KvConnection {
        self.conn.as_mut()
    }
}

/// Shared pool of connections to one backend.
pub struct ConnectionPool {
    connector: Arc<dyn KvConnector>,
    config: PoolConfig,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConnection>>,
    generation: AtomicU64,
    initialized: AtomicBool,
    init_lock: tokio::sync::Mutex<()>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn KvConnector>, config: PoolConfig, retry: RetryPolicy) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_connections.max(1)));
        Self {
            connector,
            config,
            retry,
            permits,
            idle: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            init_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.connector.backend()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Connections currently parked in the idle list.
    pub fn idle_count(&self) -> usize {
        self.idle_list().len()
    }

    fn idle_list(&self) -> std::sync::MutexGuard<'_, Vec<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn timeout_ms(&self) -> u64 {
        self.config.operation_timeout_ms
    }

    /// Connect and verify the backend, retrying transient failures.
    ///
    /// Runs at most once per pool lifetime; concurrent callers wait for the
    /// first one to finish.
    pub async fn initialize(&self) -> Result<()> {
        self.retry
            .run("initialize", MemoryError::is_transient, || self.ensure_initialized())
            .await
    }

    async fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let mut conn = self.open().await?;
        match timeout(self.config.operation_timeout(), conn.ping()).await {
            Ok(result) => result?,
            Err(_) => return Err(MemoryError::timeout("PING", self.timeout_ms())),
        }

        let generation = self.generation.load(Ordering::SeqCst);
        self.idle_list().push(IdleConnection {
            conn,
            last_used: Instant::now(),
            generation,
        });
        self.initialized.store(true, Ordering::SeqCst);

        info!(
            backend = self.backend(),
            max_connections = self.config.max_connections,
            "Short-term store connected"
        );
        Ok(())
    }

    async fn open(&self) -> Result<Box<dyn KvConnection>> {
        match timeout(self.config.operation_timeout(), self.connector.connect()).await {
            Ok(conn) => conn,
            Err(_) => Err(MemoryError::timeout("connect", self.timeout_ms())),
        }
    }

    /// Check out a connection, opening one if none is idle.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.ensure_initialized().await?;

        let permit = match timeout(
            self.config.operation_timeout(),
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(MemoryError::unavailable(self.backend(), "pool closed")),
            Err(_) => return Err(MemoryError::timeout("acquire connection", self.timeout_ms())),
        };

        let generation = self.generation.load(Ordering::SeqCst);
        while let Some(idle) = self.pop_idle() {
            if idle.generation != generation {
                continue;
            }

            let mut conn = idle.conn;
            if idle.last_used.elapsed() >= self.config.idle_check() {
                let healthy = matches!(
                    timeout(self.config.operation_timeout(), conn.ping()).await,
                    Ok(Ok(()))
                );
                if !healthy {
                    debug!(backend = self.backend(), "Discarding stale idle connection");
                    continue;
                }
            }

            return Ok(PooledConnection {
                conn,
                generation,
                _permit: permit,
            });
        }

        let conn = self.open().await?;
        debug!(backend = self.backend(), "Opened new connection");
        Ok(PooledConnection {
            conn,
            generation,
            _permit: permit,
        })
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        self.idle_list().pop()
    }

    /// Return a healthy connection to the idle list.
    ///
    /// Connections checked out before the last [`close`](Self::close) are dropped.
    pub fn release(&self, pooled: PooledConnection) {
        let PooledConnection {
            conn,
            generation,
            _permit,
        } = pooled;

        if !self.is_initialized() || generation != self.generation.load(Ordering::SeqCst) {
            return;
        }
        self.idle_list().push(IdleConnection {
            conn,
            last_used: Instant::now(),
            generation,
        });
    }

    /// Run one command with a pooled connection.
    ///
    /// The command is bounded by the pool's operation timeout and the whole
    /// checkout is retried for transient failures. `command` may run several
    /// times, so it must not consume its captures.
    pub async fn with_connection<T, F>(&self, operation: &str, command: F) -> Result<T>
    where
        T: Send,
        F: for<'c> Fn(&'c mut dyn KvConnection) -> KvFuture<'c, T> + Send + Sync,
    {
        self.retry
            .run(operation, MemoryError::is_transient, || async {
                let mut pooled = self.acquire().await?;
                let outcome = timeout(
                    self.config.operation_timeout(),
                    command(pooled.connection()),
                )
                .await;

                match outcome {
                    Ok(Ok(value)) => {
                        self.release(pooled);
                        Ok(value)
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => {
                        warn!(
                            backend = self.backend(),
                            operation,
                            timeout_ms = self.timeout_ms(),
                            "Command timed out, discarding connection"
                        );
                        Err(MemoryError::timeout(operation, self.timeout_ms()))
                    }
                }
            })
            .await
    }

    /// Drop idle connections and reset the pool.
    ///
    /// Idempotent. Connections still checked out are discarded when they come
    /// back, and the next command reconnects.
    pub async fn close(&self) {
        let _guard = self.init_lock.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_initialized = self.initialized.swap(false, Ordering::SeqCst);
        let drained = std::mem::take(&mut *self.idle_list());

        if was_initialized {
            info!(
                backend = self.backend(),
                closed = drained.len(),
                "Short-term store pool closed"
            );
        }
    }
}
