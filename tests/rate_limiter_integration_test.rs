//! Rate Limiter Integration Tests
//!
//! Sliding-window admission against tokio's paused clock, plus property tests for
//! window counting.

use conduit_core::resilience::{
    RateLimitError, RateLimitEventKind, RateLimitHealth, RateLimiter, RateLimiterConfig,
};
use proptest::prelude::*;
use std::time::Duration;

fn limiter(request_limit: u32, window_seconds: u64, threshold: f64) -> RateLimiter {
    RateLimiter::new(RateLimiterConfig {
        request_limit,
        window_seconds,
        threshold,
        ..Default::default()
    })
    .expect("valid limiter config")
}

#[tokio::test(start_paused = true)]
async fn admission_recovers_when_window_slides() {
    let limiter = limiter(10, 60, 0.9);
    for _ in 0..9 {
        limiter.add_request(None);
    }
    assert!(!limiter.can_make_request());
    assert_eq!(limiter.status().status, RateLimitHealth::Throttled);

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(!limiter.can_make_request());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(limiter.get_current_count(), 0);
    assert!(limiter.can_make_request());
    assert_eq!(limiter.status().status, RateLimitHealth::Healthy);
}

#[tokio::test(start_paused = true)]
async fn staggered_requests_expire_individually() {
    let limiter = limiter(10, 10, 1.0);
    limiter.add_request(Some("first".into()));
    tokio::time::advance(Duration::from_secs(5)).await;
    limiter.add_request(Some("second".into()));

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(limiter.get_current_count(), 1);

    tokio::time::advance(Duration::from_secs(5)).await;
    assert_eq!(limiter.get_current_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn wait_for_capacity_returns_once_oldest_request_expires() {
    let limiter = limiter(2, 5, 0.5);
    limiter.add_request(None);
    assert!(!limiter.can_make_request());

    let started = tokio::time::Instant::now();
    limiter
        .wait_for_capacity(Duration::from_secs(30))
        .await
        .expect("capacity frees up within the timeout");
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(limiter.can_make_request());
}

#[tokio::test(start_paused = true)]
async fn wait_for_capacity_times_out() {
    let limiter = limiter(2, 60, 0.5);
    limiter.add_request(None);

    let err = limiter
        .wait_for_capacity(Duration::from_secs(3))
        .await
        .unwrap_err();
    match err {
        RateLimitError::CapacityTimeout { waited } => assert!(waited >= Duration::from_secs(3)),
        other => panic!("expected capacity timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn threshold_events_fire_on_transitions() {
    let limiter = limiter(10, 60, 1.0);
    for _ in 0..10 {
        limiter.add_request(None);
    }

    let kinds: Vec<RateLimitEventKind> = limiter
        .recent_events(10)
        .into_iter()
        .map(|event| event.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![RateLimitEventKind::Approaching, RateLimitEventKind::Throttled]
    );

    let metrics = limiter.metrics();
    assert_eq!(metrics.current_requests, 10);
    assert_eq!(metrics.recent_events.len(), 2);
}

proptest! {
    /// Every request inside the window is counted, and admission follows the threshold
    #[test]
    fn window_counts_every_request(
        limit in 1u32..200,
        threshold in 0.05f64..=1.0,
        requests in 0usize..300,
    ) {
        let limiter = limiter(limit, 3600, threshold);
        for _ in 0..requests {
            limiter.add_request(None);
        }

        prop_assert_eq!(limiter.get_current_count(), requests);
        let expected = (requests as f64) < f64::from(limit) * threshold;
        prop_assert_eq!(limiter.can_make_request(), expected);

        let status = limiter.status();
        prop_assert!(status.utilization <= 100.0);
    }

    /// Reset always returns the limiter to an empty, admitting state
    #[test]
    fn reset_clears_window(limit in 1u32..50, requests in 0usize..100) {
        let limiter = limiter(limit, 3600, 1.0);
        for _ in 0..requests {
            limiter.add_request(None);
        }
        limiter.reset();

        prop_assert_eq!(limiter.get_current_count(), 0);
        prop_assert!(limiter.can_make_request());
        prop_assert!(limiter.recent_events(10).is_empty());
    }
}
