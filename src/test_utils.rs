// src/test_utils.rs

use super::clock::ManualClock;
use super::config::LimiterConfig;
use super::error::{Result, StorageError};
use super::storage::StorageBackend;
use super::SlidingWindow;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A `put` the mock has seen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPut {
    pub key: String,
    pub value: String,
    pub ttl: Duration,
}

/// Mock implementation of the StorageBackend trait for testing.
///
/// TTLs are recorded rather than enforced. Clones share data and switches.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    data: Arc<Mutex<HashMap<String, String>>>,
    puts: Arc<Mutex<Vec<RecordedPut>>>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Seeds a raw value, bypassing failure switches
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().unwrap().get(key).cloned()
    }

    pub fn puts(&self) -> Vec<RecordedPut> {
        self.puts.lock().unwrap().clone()
    }

    pub fn last_put(&self) -> Option<RecordedPut> {
        self.puts.lock().unwrap().last().cloned()
    }

    fn simulated(operation: &str) -> crate::error::RateLimiterError {
        StorageError::RedisConnection(format!("Simulated {} failure", operation)).into()
    }
}

#[async_trait]
impl StorageBackend for MockStorage {
    type Config = ();

    async fn new(_config: Self::Config) -> Result<Self> {
        Ok(Self::new())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::simulated("read"));
        }
        Ok(self.raw(key))
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::simulated("write"));
        }

        self.insert_raw(key, value);
        self.puts.lock().unwrap().push(RecordedPut {
            key: key.to_string(),
            value: value.to_string(),
            ttl,
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(Self::simulated("delete"));
        }
        Ok(self.data.lock().unwrap().remove(key).is_some())
    }
}

/// Limiter over a fresh mock store and a manual clock starting at `start_millis`
pub fn create_test_limiter(
    start_millis: i64,
) -> (SlidingWindow<MockStorage, ManualClock>, MockStorage, ManualClock) {
    let storage = MockStorage::new();
    let clock = ManualClock::new(start_millis);
    let limiter =
        SlidingWindow::with_clock(storage.clone(), clock.clone(), LimiterConfig::default());
    (limiter, storage, clock)
}
