// src/algorithms/mod.rs

pub mod sliding_window;

#[cfg(test)]
mod tests;

pub use sliding_window::{RateLimitState, SlidingWindow};

use super::error::Result;
use crate::config::RateLimitConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Outcome of a single admission check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Requests left in the current window
    pub remaining: u32,

    /// Seconds until retrying makes sense, when denied for a known period
    pub retry_after_seconds: Option<u64>,
}

impl RateLimitResult {
    pub(crate) fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after_seconds: None,
        }
    }

    pub(crate) fn denied(retry_after_seconds: Option<u64>) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            retry_after_seconds,
        }
    }
}

/// Core trait for admission control keyed by identifier and action
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + Debug {
    /// Decides whether to admit one request and records it if admitted.
    ///
    /// Never fails: store problems degrade to the policy's fail-open or
    /// fail-closed answer.
    async fn check_limit(
        &self,
        identifier: &str,
        action: &str,
        config: &RateLimitConfig,
    ) -> RateLimitResult;

    /// Forget everything recorded for the identifier and action
    async fn reset(&self, identifier: &str, action: &str) -> Result<()>;
}
