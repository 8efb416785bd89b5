// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{RateLimiterError, Result};

/// Common configuration for the limiter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Namespace placed in front of every storage key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_key_prefix() -> String {
    "ratelimit".to_string()
}

/// Per-call policy for a sliding window check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Maximum number of requests admitted inside one window
    pub max_requests: u32,

    /// Width of the sliding window
    pub window_seconds: u64,

    /// When set, reaching the limit blocks the key for this long
    #[serde(default)]
    pub block_duration_seconds: Option<u64>,

    /// Deny instead of admit when the store cannot be read
    #[serde(default)]
    pub fail_closed: bool,
}

/// Seconds as milliseconds, clamped to what an epoch timestamp can hold
pub(crate) fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
            block_duration_seconds: None,
            fail_closed: false,
        }
    }

    pub fn with_block_duration(mut self, seconds: u64) -> Self {
        self.block_duration_seconds = Some(seconds);
        self
    }

    pub fn with_fail_closed(mut self, fail_closed: bool) -> Self {
        self.fail_closed = fail_closed;
        self
    }

    pub fn window_millis(&self) -> i64 {
        secs_to_millis(self.window_seconds)
    }

    /// Block duration, if one is configured and non-zero
    pub fn active_block_seconds(&self) -> Option<u64> {
        self.block_duration_seconds.filter(|secs| *secs > 0)
    }

    /// Rejects policies that cannot admit anything.
    ///
    /// The limiter does not call this; it is meant for policies that come
    /// from outside the program (flags, files, environment).
    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(RateLimiterError::Config(
                "max_requests must be greater than zero".to_string(),
            ));
        }
        if self.window_seconds == 0 {
            return Err(RateLimiterError::Config(
                "window_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Upper bound for a single command
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_timeout: default_conn_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_millis(500)
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

/// Which store the binaries should talk to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageSettings {
    Memory(InMemoryConfig),
    Redis(RedisConfig),
}

/// Settings assembled from the process environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub limiter: LimiterConfig,
    pub storage: StorageSettings,
}

impl Settings {
    /// Builds settings from environment variables.
    ///
    /// Callers are expected to have loaded a `.env` file already.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with_storage(None)
    }

    /// Like [`Settings::from_env`], with `kind` (`memory` or `redis`) taking
    /// the place of `RATE_LIMITER_STORAGE` when given. The chosen backend
    /// still reads its own variables.
    pub fn from_env_with_storage(kind: Option<&str>) -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok(), kind)
    }

    fn from_lookup<F>(lookup: F, kind: Option<&str>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let limiter = LimiterConfig {
            key_prefix: lookup("RATE_LIMITER_KEY_PREFIX").unwrap_or_else(default_key_prefix),
        };

        let kind = kind
            .map(str::to_string)
            .or_else(|| lookup("RATE_LIMITER_STORAGE"));

        let storage = match kind.as_deref() {
            None | Some("memory") => {
                let mut memory = InMemoryConfig::default();
                if let Some(max) = parse_var::<usize, _>(&lookup, "RATE_LIMITER_MAX_ENTRIES")? {
                    memory.max_entries = max;
                }
                StorageSettings::Memory(memory)
            }
            Some("redis") => {
                let url = lookup("REDIS_URL")
                    .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
                let mut redis = RedisConfig::new(url);
                if let Some(ms) = parse_var::<u64, _>(&lookup, "REDIS_CONNECTION_TIMEOUT_MS")? {
                    redis.connection_timeout = Duration::from_millis(ms);
                }
                if let Some(ms) = parse_var::<u64, _>(&lookup, "REDIS_COMMAND_TIMEOUT_MS")? {
                    redis.command_timeout = Duration::from_millis(ms);
                }
                StorageSettings::Redis(redis)
            }
            Some(other) => {
                return Err(RateLimiterError::Config(format!(
                    "unknown RATE_LIMITER_STORAGE value: {}",
                    other
                )))
            }
        };

        Ok(Self { limiter, storage })
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| RateLimiterError::Config(format!("invalid {}={:?}: {}", name, raw, e))),
    }
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
