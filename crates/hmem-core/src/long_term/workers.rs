//! Bounded pool for blocking work (SQLite queries, embedding inference).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;

use crate::config::WorkerConfig;
use crate::error::{MemoryError, Result};

/// Runs closures on tokio's blocking threads, at most `blocking_threads` at once.
///
/// A call that exceeds the timeout returns [`MemoryError::Timeout`]; the
/// closure keeps its slot until it actually finishes.
#[derive(Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl BlockingPool {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.blocking_threads.max(1))),
            timeout: config.operation_timeout(),
        }
    }

    pub async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let timeout_ms = self.timeout.as_millis() as u64;
        let permits = Arc::clone(&self.permits);

        let job = async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| MemoryError::Worker("worker pool closed".to_string()))?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                work()
            })
            .await
            .map_err(|e| MemoryError::Worker(format!("{operation} failed: {e}")))?
        };

        match timeout(self.timeout, job).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms, "Blocking operation timed out");
                Err(MemoryError::timeout(operation, timeout_ms))
            }
        }
    }
}
