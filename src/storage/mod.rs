// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use self::memory::MemoryStorage;
pub use self::redis::RedisStorage;

use super::error::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Key/value store the limiter persists its state in.
///
/// Values are UTF-8 strings and every write carries a time-to-live after which
/// the store drops the key on its own.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // The type of configuration this storage backend accepts
    type Config: Send + Sync;

    // Creates a new instance of this storage backend with the given configuration
    async fn new(config: Self::Config) -> Result<Self>
    where
        Self: Sized;

    // Retrieves a value by key, `None` when absent or expired
    async fn get(&self, key: &str) -> Result<Option<String>>;

    // Stores a value that expires after `ttl`
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    // Deletes a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;
}
