//! Redis implementation of [`KeyValueStore`].
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently, so
//! each operation clones it instead of sharing it behind a lock.
//!
//! The connection URL may carry a password and is never logged.

use super::kv::KeyValueStore;
use crate::errors::StorageError;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, warn};

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: usize = 100;

/// Upper bound on establishing the initial connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis-backed key-value store.
#[derive(Clone)]
pub struct RedisKeyValueStore {
    connection: MultiplexedConnection,
}

impl RedisKeyValueStore {
    /// Open a client and establish the multiplexed connection, giving up
    /// after [`CONNECT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the URL is invalid or the
    /// server cannot be reached in time.
    pub async fn connect(redis_url: &str) -> Result<Self, StorageError> {
        Self::connect_with_timeout(redis_url, CONNECT_TIMEOUT).await
    }

    /// [`connect`](Self::connect) with an explicit deadline.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Unavailable` if the URL is invalid, the server
    /// cannot be reached, or the handshake does not finish within `timeout`.
    pub async fn connect_with_timeout(
        redis_url: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let client = Client::open(redis_url).map_err(|e| {
            error!(
                target: "hub.storage.redis",
                error = %e,
                "Failed to open Redis client"
            );
            StorageError::Unavailable(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| {
                error!(
                    target: "hub.storage.redis",
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Timed out connecting to Redis"
                );
                StorageError::Unavailable(format!(
                    "Timed out connecting to Redis after {}ms",
                    timeout.as_millis()
                ))
            })?
            .map_err(|e| {
                error!(
                    target: "hub.storage.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                StorageError::Unavailable(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }
}

fn unavailable(operation: &'static str, key: &str, e: &redis::RedisError) -> StorageError {
    warn!(
        target: "hub.storage.redis",
        error = %e,
        operation = operation,
        key = %key,
        "Redis operation failed"
    );
    StorageError::Unavailable(format!("{operation} failed: {e}"))
}

fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait::async_trait]
impl KeyValueStore for RedisKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| unavailable("GET", key, &e))?;
        Ok(value)
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .set_ex(key, value, ttl_seconds(ttl))
            .await
            .map_err(|e| unavailable("SETEX", key, &e))?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .del(keys)
            .await
            .map_err(|e| unavailable("DEL", &keys.join(","), &e))?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.connection.clone();
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(|e| unavailable("SCAN", prefix, &e))?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .hset(key, field, value)
            .await
            .map_err(|e| unavailable("HSET", key, &e))?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StorageError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn
            .hget(key, field)
            .await
            .map_err(|e| unavailable("HGET", key, &e))?;
        Ok(value)
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, StorageError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn
            .hdel(key, field)
            .await
            .map_err(|e| unavailable("HDEL", key, &e))?;
        Ok(removed > 0)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StorageError> {
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(key)
            .await
            .map_err(|e| unavailable("HGETALL", key, &e))?;
        Ok(fields)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let seconds = i64::try_from(ttl_seconds(ttl)).unwrap_or(i64::MAX);
        let _: bool = conn
            .expire(key, seconds)
            .await
            .map_err(|e| unavailable("EXPIRE", key, &e))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("PING", "", &e))?;
        Ok(())
    }
}
