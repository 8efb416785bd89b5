// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RedisConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::storage::StorageBackend;

#[derive(Clone)]
pub struct RedisStorage {
    connection: Arc<tokio::sync::Mutex<ConnectionManager>>,
    config: RedisConfig,
}

// ConnectionManager is not Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("url", &self.config.url)
            .field("command_timeout", &self.config.command_timeout)
            .finish()
    }
}

/// Redis expiry is whole seconds and `EX 0` is rejected
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

impl RedisStorage {
    /// Creates a new Redis storage with the given configuration
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| StorageError::RedisConnection(e.to_string()))?;

        let connection_manager =
            match tokio::time::timeout(config.connection_timeout, ConnectionManager::new(client))
                .await
            {
                Ok(result) => result.map_err(RateLimiterError::from)?,
                Err(_) => {
                    return Err(StorageError::RedisConnection(format!(
                        "Connection to Redis at {} timed out after {:?}",
                        config.url, config.connection_timeout
                    ))
                    .into());
                }
            };

        Ok(Self {
            connection: Arc::new(tokio::sync::Mutex::new(connection_manager)),
            config,
        })
    }

    /// Runs one command under the configured command timeout
    async fn bounded<T, F>(&self, operation: &str, command: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.command_timeout, command).await {
            Ok(result) => result.map_err(RateLimiterError::from),
            Err(_) => Err(StorageError::Timeout(format!(
                "Redis {} timed out after {:?}",
                operation, self.config.command_timeout
            ))
            .into()),
        }
    }

    /// Ping Redis to check health
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.lock().await;
        let reply: String = self.bounded("PING", conn.ping()).await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(StorageError::RedisCommand(format!(
                "Unexpected response from Redis PING: {}",
                reply
            ))
            .into())
        }
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    type Config = RedisConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Self::new(config).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.lock().await;
        self.bounded("GET", conn.get(key)).await
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.lock().await;
        self.bounded("SET", conn.set_ex(key, value, ttl_secs(ttl)))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.lock().await;
        let removed: i64 = self.bounded("DEL", conn.del(key)).await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::ttl_secs;
    use std::time::Duration;

    #[test]
    fn test_ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_secs(Duration::from_millis(1_500)), 2);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
