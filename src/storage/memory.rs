// src/storage/memory.rs

// In-memory storage (for testing and single-process usage)
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::trace;

use crate::config::InMemoryConfig;
use crate::error::{Result, StorageError};
use crate::storage::StorageBackend;

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expiry: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expiry > now
    }
}

// Longest lifetime an entry is given; longer TTLs are clamped to it
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

type Entries = Arc<RwLock<HashMap<String, MemoryEntry>>>;

/// Aborts the sweeper once the last storage handle is dropped
#[derive(Debug)]
struct CleanupTask(JoinHandle<()>);

impl Drop for CleanupTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Entries,
    config: InMemoryConfig,
    _cleanup_task: Option<Arc<CleanupTask>>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration.
    ///
    /// With `use_background_task` set this must be called inside a tokio runtime.
    pub fn new(config: InMemoryConfig) -> Self {
        let data: Entries = Arc::new(RwLock::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        let cleanup_task = if config.use_background_task {
            let data_clone = Arc::clone(&data);
            let period = config.cleanup_interval.max(Duration::from_millis(1));

            let handle = tokio::spawn(async move {
                let mut interval = time::interval(period);
                loop {
                    interval.tick().await;
                    Self::cleanup_expired_entries(&data_clone);
                }
            });

            Some(Arc::new(CleanupTask(handle)))
        } else {
            None
        };

        Self {
            data,
            config,
            _cleanup_task: cleanup_task,
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.read().values().filter(|entry| entry.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries held, expired or not
    #[cfg(test)]
    pub(crate) fn raw_len(&self) -> usize {
        self.read().len()
    }

    // A panic while holding the lock leaves the map itself intact
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, MemoryEntry>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, MemoryEntry>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Clean up expired entries
    fn cleanup_expired_entries(data: &Entries) {
        let now = Instant::now();
        let mut data = data.write().unwrap_or_else(PoisonError::into_inner);
        let before = data.len();

        data.retain(|_, entry| entry.is_live(now));

        let removed = before - data.len();
        if removed > 0 {
            trace!(removed, "Swept expired entries");
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    type Config = InMemoryConfig;

    async fn new(config: Self::Config) -> Result<Self> {
        Ok(Self::new(config))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            let data = self.read();
            match data.get(key) {
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired, drop it eagerly
        let mut data = self.write();
        if data.get(key).is_some_and(|entry| !entry.is_live(now)) {
            data.remove(key);
        }
        Ok(None)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut data = self.write();

        if data.len() >= self.config.max_entries && !data.contains_key(key) {
            // Make room from expired entries before refusing
            data.retain(|_, entry| entry.is_live(now));
            if data.len() >= self.config.max_entries {
                return Err(StorageError::CapacityExceeded(format!(
                    "maximum of {} entries reached",
                    self.config.max_entries
                ))
                .into());
            }
        }

        let expiry = now
            .checked_add(ttl)
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now);

        data.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expiry,
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut data = self.write();
        Ok(data.remove(key).is_some_and(|entry| entry.is_live(now)))
    }
}
