// src/algorithms/sliding_window.rs

use crate::algorithms::{RateLimitAlgorithm, RateLimitResult};
use crate::clock::{Clock, SystemClock};
use crate::config::{secs_to_millis, LimiterConfig, RateLimitConfig};
use crate::error::Result;
use crate::storage::StorageBackend;
use crate::{rate_limit_event, storage_op};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Persisted state for one identifier and action.
///
/// Stored as `{"requests":[ms, ...],"blockedUntil":ms|null}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    /// Timestamps (ms since epoch) of admitted requests
    pub requests: Vec<i64>,

    /// Every request is denied until this instant
    #[serde(default)]
    pub blocked_until: Option<i64>,
}

impl RateLimitState {
    /// Parses stored state; anything unreadable counts as no state at all
    pub fn parse(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "Discarding unreadable rate limit state");
                Self::default()
            }
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A state write the limiter owes the store after a decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingWrite {
    pub state: RateLimitState,
    pub ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Evaluation {
    pub result: RateLimitResult,
    pub write: Option<PendingWrite>,
}

/// Whole seconds covering `millis`, never negative
fn ceil_secs(millis: i64) -> u64 {
    if millis <= 0 {
        0
    } else {
        ((millis - 1) / 1000 + 1) as u64
    }
}

/// Applies one check to `state` at time `now`.
///
/// Pure: no I/O, so the window arithmetic can be tested directly.
pub(crate) fn evaluate(state: RateLimitState, now: i64, config: &RateLimitConfig) -> Evaluation {
    if let Some(blocked_until) = state.blocked_until {
        if blocked_until > now {
            return Evaluation {
                result: RateLimitResult::denied(Some(ceil_secs(blocked_until - now))),
                write: None,
            };
        }
    }

    // An expired block is dropped here; it never reaches the store again.
    let window_ms = config.window_millis();
    let cutoff = now.saturating_sub(window_ms);
    let mut active: Vec<i64> = state
        .requests
        .into_iter()
        .filter(|&timestamp| timestamp > cutoff)
        .collect();

    if active.len() >= config.max_requests as usize {
        if let Some(block_secs) = config.active_block_seconds() {
            let blocked_until = now.saturating_add(secs_to_millis(block_secs));
            let ttl = Duration::from_secs(config.window_seconds.max(block_secs));

            return Evaluation {
                result: RateLimitResult::denied(Some(block_secs)),
                write: Some(PendingWrite {
                    state: RateLimitState {
                        requests: active,
                        blocked_until: Some(blocked_until),
                    },
                    ttl,
                }),
            };
        }

        // Denied until the oldest admitted request slides out. With a zero
        // ceiling there is nothing to slide out, so a full window is reported.
        let retry_after = active
            .iter()
            .min()
            .map(|&oldest| ceil_secs(oldest.saturating_add(window_ms) - now))
            .unwrap_or(config.window_seconds);

        return Evaluation {
            result: RateLimitResult::denied(Some(retry_after)),
            write: None,
        };
    }

    active.push(now);
    let used = u32::try_from(active.len()).unwrap_or(u32::MAX);

    Evaluation {
        result: RateLimitResult::allowed(config.max_requests.saturating_sub(used)),
        write: Some(PendingWrite {
            state: RateLimitState {
                requests: active,
                blocked_until: None,
            },
            ttl: Duration::from_secs(config.window_seconds),
        }),
    }
}

/// Sliding window rate limiter backed by a shared key/value store.
///
/// Each check is one read and at most one write against the store with no
/// locking in between, so concurrent checks for the same key may both be
/// admitted against the same prior state. Checks for different keys never
/// interact.
#[derive(Debug, Clone)]
pub struct SlidingWindow<S, C = SystemClock>
where
    S: StorageBackend,
    C: Clock,
{
    storage: S,
    clock: C,
    key_prefix: String,
}

impl<S> SlidingWindow<S, SystemClock>
where
    S: StorageBackend,
{
    /// Creates a limiter that reads the wall clock
    pub fn new(storage: S, config: LimiterConfig) -> Self {
        Self::with_clock(storage, SystemClock, config)
    }
}

impl<S, C> SlidingWindow<S, C>
where
    S: StorageBackend,
    C: Clock,
{
    pub fn with_clock(storage: S, clock: C, config: LimiterConfig) -> Self {
        Self {
            storage,
            clock,
            key_prefix: config.key_prefix,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Storage key for an identifier and action: `prefix:action:identifier`
    pub fn storage_key(&self, identifier: &str, action: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, action, identifier)
    }

    async fn load(&self, key: &str) -> Result<RateLimitState> {
        let started = Instant::now();
        let loaded = self.storage.get(key).await;
        storage_op!("get", key, loaded, started.elapsed().as_millis() as u64);

        Ok(match loaded? {
            Some(raw) => RateLimitState::parse(&raw),
            None => RateLimitState::default(),
        })
    }

    async fn persist(&self, key: &str, write: &PendingWrite) -> Result<()> {
        let payload = write.state.to_json()?;

        let started = Instant::now();
        let stored = self.storage.put(key, &payload, write.ttl).await;
        storage_op!("put", key, stored, started.elapsed().as_millis() as u64);

        stored
    }
}

#[async_trait]
impl<S, C> RateLimitAlgorithm for SlidingWindow<S, C>
where
    S: StorageBackend,
    C: Clock,
{
    async fn check_limit(
        &self,
        identifier: &str,
        action: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult {
        let key = self.storage_key(identifier, action);
        let now = self.clock.now_millis();

        let state = match self.load(&key).await {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    action,
                    identifier,
                    key = %key,
                    error = %e,
                    fail_closed = config.fail_closed,
                    "Rate limit state unavailable, applying failure policy"
                );
                return if config.fail_closed {
                    RateLimitResult::denied(None)
                } else {
                    RateLimitResult::allowed(config.max_requests)
                };
            }
        };

        let evaluation = evaluate(state, now, config);

        if let Some(write) = &evaluation.write {
            // The decision stands even when the write is lost
            if let Err(e) = self.persist(&key, write).await {
                warn!(
                    action,
                    identifier,
                    key = %key,
                    error = %e,
                    "Failed to persist rate limit state"
                );
            }
        }

        rate_limit_event!(action, identifier, evaluation.result);
        evaluation.result
    }

    async fn reset(&self, identifier: &str, action: &str) -> Result<()> {
        let key = self.storage_key(identifier, action);

        let started = Instant::now();
        let deleted = self.storage.delete(&key).await;
        storage_op!("delete", key.as_str(), deleted, started.elapsed().as_millis() as u64);

        let existed = deleted?;
        debug!(action, identifier, existed, "Rate limit state reset");
        Ok(())
    }
}
