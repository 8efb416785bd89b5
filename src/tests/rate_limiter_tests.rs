// src/tests/rate_limiter_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::algorithms::{RateLimitAlgorithm, SlidingWindow};
use crate::clock::ManualClock;
use crate::config::{InMemoryConfig, LimiterConfig, RateLimitConfig};
use crate::storage::{MemoryStorage, StorageBackend};

fn memory_storage() -> MemoryStorage {
    MemoryStorage::new(InMemoryConfig {
        max_entries: 10_000,
        use_background_task: false,
        cleanup_interval: Duration::from_secs(60),
    })
}

// Limiter, store and clock working together end to end
#[tokio::test]
async fn test_limiter_over_memory_storage() {
    let storage = memory_storage();
    let clock = ManualClock::new(5_000_000);
    let limiter = SlidingWindow::with_clock(storage.clone(), clock.clone(), LimiterConfig::default());
    let config = RateLimitConfig::new(5, 60);

    for i in 0..5 {
        let result = limiter.check_limit("user-1", "login", &config).await;
        assert!(result.allowed, "Request {} should be allowed", i);
        assert_eq!(result.remaining, 4 - i);
        clock.advance(Duration::from_secs(10));
    }

    // First request was at t=0, now t=50s
    let denied = limiter.check_limit("user-1", "login", &config).await;
    assert!(!denied.allowed, "6th request should be denied");
    assert_eq!(denied.retry_after_seconds, Some(10));

    // t=60s: the first request has slid out
    clock.advance(Duration::from_secs(10));
    let result = limiter.check_limit("user-1", "login", &config).await;
    assert!(result.allowed, "Request after the oldest slid out should be allowed");
    assert_eq!(result.remaining, 0);

    let raw = storage.get("ratelimit:login:user-1").await.unwrap().unwrap();
    info!(state = %raw, "Stored state after sliding");
    assert!(raw.contains("\"blockedUntil\":null"));
}

// Custom key prefixes keep separate limiter deployments apart
#[tokio::test]
async fn test_key_prefix_isolation() {
    let storage = memory_storage();
    let clock = ManualClock::new(1_000);
    let config = RateLimitConfig::new(1, 60);

    let web = SlidingWindow::with_clock(
        storage.clone(),
        clock.clone(),
        LimiterConfig {
            key_prefix: "web".to_string(),
        },
    );
    let api = SlidingWindow::with_clock(
        storage.clone(),
        clock,
        LimiterConfig {
            key_prefix: "api".to_string(),
        },
    );

    assert!(web.check_limit("user", "login", &config).await.allowed);
    assert!(api.check_limit("user", "login", &config).await.allowed);
    assert!(!web.check_limit("user", "login", &config).await.allowed);

    assert_eq!(web.storage_key("user", "login"), "web:login:user");
    assert!(storage.get("api:login:user").await.unwrap().is_some());
}

// Identifiers on different keys never interfere, even concurrently
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_independent_keys() {
    let limiter = Arc::new(SlidingWindow::new(memory_storage(), LimiterConfig::default()));
    let config = RateLimitConfig::new(3, 60);

    let mut handles = Vec::with_capacity(20);
    for user in 0..20 {
        let limiter = Arc::clone(&limiter);
        let config = config.clone();

        handles.push(tokio::spawn(async move {
            let identifier = format!("user_{}", user);
            let mut allowed = 0;
            for _ in 0..4 {
                if limiter.check_limit(&identifier, "api", &config).await.allowed {
                    allowed += 1;
                }
            }
            allowed
        }));
    }

    for handle in futures::future::join_all(handles).await {
        assert_eq!(handle.unwrap(), 3, "Each user should get exactly its quota");
    }
}

// Racing checks on one key may over-admit but never under-admit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_same_key_admits_at_least_quota() {
    let limiter = Arc::new(SlidingWindow::new(memory_storage(), LimiterConfig::default()));
    let config = RateLimitConfig::new(5, 60);
    let barrier = Arc::new(tokio::sync::Barrier::new(25));

    let mut handles = Vec::with_capacity(25);
    for _ in 0..25 {
        let limiter = Arc::clone(&limiter);
        let barrier = Arc::clone(&barrier);
        let config = config.clone();

        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            limiter.check_limit("shared", "api", &config).await.allowed
        }));
    }

    let allowed = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();

    assert!(allowed >= 5, "Expected at least the quota, got {}", allowed);
}

// Limiter is usable behind a trait object
#[tokio::test]
async fn test_trait_object_usage() {
    let limiter: Arc<dyn RateLimitAlgorithm> = Arc::new(SlidingWindow::with_clock(
        memory_storage(),
        ManualClock::new(0),
        LimiterConfig::default(),
    ));
    let config = RateLimitConfig::new(1, 60).with_block_duration(120);

    assert!(limiter.check_limit("1.2.3.4", "login", &config).await.allowed);
    let blocked = limiter.check_limit("1.2.3.4", "login", &config).await;
    assert_eq!(blocked.retry_after_seconds, Some(120));

    limiter.reset("1.2.3.4", "login").await.unwrap();
    assert!(limiter.check_limit("1.2.3.4", "login", &config).await.allowed);
}

// Results serialise the way HTTP handlers return them
#[test]
fn test_result_json_shape() {
    let result = crate::RateLimitResult {
        allowed: false,
        remaining: 0,
        retry_after_seconds: Some(42),
    };

    assert_eq!(
        serde_json::to_string(&result).unwrap(),
        r#"{"allowed":false,"remaining":0,"retryAfterSeconds":42}"#
    );
}
