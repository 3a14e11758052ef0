//! Redis cache backend
//!
//! One multiplexed connection shared behind a lock, key prefixing for
//! namespacing, SCAN-bounded pattern deletes, and sorted-set sliding
//! windows trimmed and appended in a single atomic pipeline.

use super::{CacheStore, WindowSample};
use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Redis `CacheStore`
pub struct RedisCache {
    connection: RwLock<MultiplexedConnection>,
    key_prefix: String,
}

impl RedisCache {
    /// Connect to Redis
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::Cache {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Cache {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::Cache {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;
        Ok(value)
    }

    async fn set_raw(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        conn.set_ex::<_, _, ()>(&full_key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| AppError::Cache {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs = ttl.as_secs(), "Cache set");
        Ok(())
    }

    async fn get_many_raw(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let mut conn = self.connection.write().await;

        // MGET with a single key returns a scalar, so always pipeline
        let mut pipe = redis::pipe();
        for key in &full_keys {
            pipe.get(key);
        }
        let values: Vec<Option<String>> =
            pipe.query_async(&mut *conn).await.map_err(|e| AppError::Cache {
                message: format!("Batch get failed: {}", e),
            })?;
        Ok(values)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let deleted: i32 = conn.del(&full_key).await.map_err(|e| AppError::Cache {
            message: format!("Failed to delete key '{}': {}", full_key, e),
        })?;
        Ok(deleted > 0)
    }

    async fn delete_pattern(&self, pattern: &str, budget: usize) -> Result<usize> {
        let full_pattern = self.key(pattern);
        let mut conn = self.connection.write().await;

        let mut cursor: u64 = 0;
        let mut scanned = 0usize;
        let mut deleted = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&full_pattern)
                .arg("COUNT")
                .arg(500)
                .query_async(&mut *conn)
                .await
                .map_err(|e| AppError::Cache {
                    message: format!("SCAN failed for '{}': {}", full_pattern, e),
                })?;

            scanned += keys.len();
            if !keys.is_empty() {
                let removed: usize = conn.del(&keys).await.map_err(|e| AppError::Cache {
                    message: format!("Batch delete failed: {}", e),
                })?;
                deleted += removed;
            }

            cursor = next;
            if cursor == 0 || scanned >= budget {
                break;
            }
        }

        debug!(pattern = %full_pattern, scanned, deleted, "Pattern delete");
        Ok(deleted)
    }

    async fn window_trim_and_append(
        &self,
        key: &str,
        window: Duration,
        now_ms: u64,
    ) -> Result<WindowSample> {
        let full_key = self.key(key);
        let cutoff = now_ms.saturating_sub(window.as_millis() as u64);
        // Member must be unique per request even at the same millisecond
        let member = format!("{}:{}", now_ms, Uuid::new_v4().simple());
        let mut conn = self.connection.write().await;

        let (count, oldest): (u64, Vec<(String, f64)>) = redis::pipe()
            .atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&full_key)
            .arg(0)
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(&full_key)
            .arg(now_ms)
            .arg(&member)
            .ignore()
            .cmd("ZCARD")
            .arg(&full_key)
            .cmd("ZRANGE")
            .arg(&full_key)
            .arg(0)
            .arg(0)
            .arg("WITHSCORES")
            .cmd("PEXPIRE")
            .arg(&full_key)
            .arg(window.as_millis() as u64)
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|e| AppError::Cache {
                message: format!("Window update failed for '{}': {}", full_key, e),
            })?;

        Ok(WindowSample {
            count,
            oldest_ms: oldest.first().map(|(_, score)| *score as u64),
        })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::Cache {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}
