//! Redis backend for the short-term tier.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};

use super::backend::{KvConnection, KvConnector};
use crate::error::{MemoryError, Result};

const BACKEND: &str = "redis";

fn map_redis_error(err: RedisError) -> MemoryError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        MemoryError::unavailable(BACKEND, err.to_string())
    } else {
        MemoryError::Serialization(format!("redis: {err}"))
    }
}

/// Opens multiplexed Redis connections from a `redis://` URL.
pub struct RedisConnector {
    client: Client,
}

impl RedisConnector {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| MemoryError::invalid(format!("invalid redis url: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl KvConnector for RedisConnector {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    async fn connect(&self) -> Result<Box<dyn KvConnection>> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;
        Ok(Box::new(RedisConnection { conn }))
    }
}

struct RedisConnection {
    conn: MultiplexedConnection,
}

#[async_trait]
impl KvConnection for RedisConnection {
    async fn ping(&mut self) -> Result<()> {
        redis::cmd("PING")
            .query_async::<_, String>(&mut self.conn)
            .await
            .map_err(map_redis_error)?;
        Ok(())
    }

    async fn set_ex(&mut self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async::<_, ()>(&mut self.conn)
            .await
            .map_err(map_redis_error)
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn)
            .await
            .map_err(map_redis_error)
    }

    async fn mget(&mut self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut self.conn)
            .await
            .map_err(map_redis_error)
    }

    async fn del(&mut self, key: &str) -> Result<()> {
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut self.conn)
            .await
            .map_err(map_redis_error)
    }

    async fn scan(&mut self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn)
            .await
            .map_err(map_redis_error)
    }
}
