//! # Sliding Window Rate Limiter
//!
//! Advisory, in-process admission control for calls to a quota-limited service.
//!
//! ## Overview
//!
//! The limiter records a timestamp for every request it is told about and admits a
//! new request only while the number of timestamps inside the trailing window stays
//! below `request_limit * threshold`. Expired timestamps are swept lazily on every
//! read and write; there is no background timer.
//!
//! Threshold transitions (entering `approaching` or `throttled`) are appended to a
//! capped event log for observability.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_core::resilience::{RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::new(RateLimiterConfig::default())?;
//!
//! limiter.wait_for_capacity(Duration::from_secs(60)).await?;
//! let request_id = limiter.add_request(None);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{
    APPROACHING_UTILIZATION, MAX_CAPACITY_POLL_INTERVAL, MIN_CAPACITY_POLL_INTERVAL,
    RATE_LIMIT_EVENT_CAPACITY, RATE_LIMIT_METRICS_EVENT_COUNT, THROTTLED_UTILIZATION,
};
use crate::logging::log_rate_limit_event;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RateLimitError {
    #[error("Timeout waiting for rate limit capacity after {waited:?}")]
    CapacityTimeout { waited: Duration },
    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfig(String),
}

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Requests allowed per window by the upstream service
    pub request_limit: u32,
    /// Sliding window length
    pub window_seconds: u64,
    /// Fraction of `request_limit` at which admission stops (0, 1]
    pub threshold: f64,
    /// Pause a queue processor applies when admission is denied
    pub pause_ms: u64,
    /// Upper bound on in-flight requests for queue processors sharing this limiter
    pub max_concurrent_requests: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            request_limit: 50,
            window_seconds: 60,
            threshold: 0.9,
            pause_ms: 5000,
            max_concurrent_requests: 3,
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), RateLimitError> {
        let invalid = |reason: String| Err(RateLimitError::InvalidConfig(reason));
        if self.request_limit == 0 {
            return invalid("request_limit must be greater than 0".to_string());
        }
        if self.window_seconds == 0 {
            return invalid("window_seconds must be greater than 0".to_string());
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return invalid(format!("threshold must be in (0, 1], got {}", self.threshold));
        }
        if self.max_concurrent_requests == 0 {
            return invalid("max_concurrent_requests must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }
}

/// Health bucket derived from utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitHealth {
    Healthy,
    Approaching,
    Throttled,
}

impl RateLimitHealth {
    fn rank(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Approaching => 1,
            Self::Throttled => 2,
        }
    }

    fn from_utilization(utilization: f64) -> Self {
        if utilization < APPROACHING_UTILIZATION {
            Self::Healthy
        } else if utilization < THROTTLED_UTILIZATION {
            Self::Approaching
        } else {
            Self::Throttled
        }
    }
}

/// Snapshot returned by [`RateLimiter::status`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub current_count: usize,
    pub limit: u32,
    /// Percentage of `limit` in use, capped at 100
    pub utilization: f64,
    pub can_make_request: bool,
    pub estimated_wait: Duration,
    pub status: RateLimitHealth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitEventKind {
    Approaching,
    Throttled,
}

impl RateLimitEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approaching => "approaching",
            Self::Throttled => "throttled",
        }
    }
}

/// Threshold transition record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitEvent {
    pub kind: RateLimitEventKind,
    pub timestamp: DateTime<Utc>,
    pub utilization: f64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterMetrics {
    pub current_requests: usize,
    pub limit: u32,
    pub utilization: f64,
    pub status: RateLimitHealth,
    pub window_seconds: u64,
    pub threshold: f64,
    pub recent_events: Vec<RateLimitEvent>,
}

#[derive(Debug, Clone)]
struct RateWindowEntry {
    timestamp: Instant,
    #[allow(dead_code)]
    request_id: String,
}

#[derive(Debug)]
struct LimiterState {
    config: RateLimiterConfig,
    window: VecDeque<RateWindowEntry>,
    events: VecDeque<RateLimitEvent>,
    last_health: RateLimitHealth,
}

impl LimiterState {
    fn evict_expired(&mut self, now: Instant) {
        let window = self.config.window();
        while let Some(oldest) = self.window.front() {
            if now.saturating_duration_since(oldest.timestamp) >= window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn admission_threshold(&self) -> f64 {
        f64::from(self.config.request_limit) * self.config.threshold
    }

    fn can_make_request(&self) -> bool {
        (self.window.len() as f64) < self.admission_threshold()
    }

    fn raw_utilization(&self) -> f64 {
        self.window.len() as f64 / f64::from(self.config.request_limit) * 100.0
    }

    fn status(&self, now: Instant) -> RateLimitStatus {
        let utilization = self.raw_utilization();
        let can_make_request = self.can_make_request();

        let estimated_wait = match (can_make_request, self.window.front()) {
            (false, Some(oldest)) => {
                (oldest.timestamp + self.config.window()).saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        };

        RateLimitStatus {
            current_count: self.window.len(),
            limit: self.config.request_limit,
            utilization: utilization.min(100.0),
            can_make_request,
            estimated_wait,
            status: RateLimitHealth::from_utilization(utilization),
        }
    }

    fn push_event(&mut self, event: RateLimitEvent) {
        self.events.push_back(event);
        while self.events.len() > RATE_LIMIT_EVENT_CAPACITY {
            self.events.pop_front();
        }
    }
}

/// Sliding-window admission controller
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, RateLimitError> {
        config.validate()?;

        info!(
            request_limit = config.request_limit,
            window_seconds = config.window_seconds,
            threshold = config.threshold,
            "Rate limiter initialized"
        );

        Ok(Self {
            state: Mutex::new(LimiterState {
                config,
                window: VecDeque::new(),
                events: VecDeque::new(),
                last_health: RateLimitHealth::Healthy,
            }),
        })
    }

    /// Record a request in the window, generating an id when none is given
    pub fn add_request(&self, request_id: Option<String>) -> String {
        let id = request_id.unwrap_or_else(|| format!("req_{}", Uuid::new_v4()));
        let now = Instant::now();

        let mut state = self.state.lock();
        state.window.push_back(RateWindowEntry {
            timestamp: now,
            request_id: id.clone(),
        });
        state.evict_expired(now);

        let status = state.status(now);
        let previous = state.last_health;
        state.last_health = status.status;

        let event = match (previous, status.status) {
            (RateLimitHealth::Healthy, RateLimitHealth::Approaching) => Some((
                RateLimitEventKind::Approaching,
                "Approaching rate limit threshold",
            )),
            (prev, RateLimitHealth::Throttled) if prev != RateLimitHealth::Throttled => Some((
                RateLimitEventKind::Throttled,
                "Rate limit threshold exceeded",
            )),
            _ => None,
        };

        if let Some((kind, message)) = event {
            log_rate_limit_event(
                kind.as_str(),
                status.current_count,
                status.limit,
                status.utilization,
            );
            warn!(
                request_id = %id,
                utilization = status.utilization,
                current_count = status.current_count,
                limit = status.limit,
                event = ?kind,
                "⚠️ {message}"
            );
            state.push_event(RateLimitEvent {
                kind,
                timestamp: Utc::now(),
                utilization: status.utilization,
                message: message.to_string(),
            });
        }

        id
    }

    pub fn get_current_count(&self) -> usize {
        let mut state = self.state.lock();
        state.evict_expired(Instant::now());
        state.window.len()
    }

    pub fn can_make_request(&self) -> bool {
        let mut state = self.state.lock();
        state.evict_expired(Instant::now());
        state.can_make_request()
    }

    pub fn status(&self) -> RateLimitStatus {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.evict_expired(now);
        let status = state.status(now);
        // Record recovery only, so a later climb re-emits transition events
        if status.status.rank() < state.last_health.rank() {
            state.last_health = status.status;
        }
        status
    }

    /// Admission check that also logs the decision for the given API tier
    pub fn check_rate_limit(&self, api_tier: &str) -> bool {
        let status = self.status();
        debug!(
            api_tier,
            count = status.current_count,
            limit = status.limit,
            utilization = %format!("{:.1}%", status.utilization),
            can_make_request = status.can_make_request,
            "Rate limit check"
        );
        status.can_make_request
    }

    /// Poll until admission is possible or `timeout` elapses
    pub async fn wait_for_capacity(&self, timeout: Duration) -> Result<(), RateLimitError> {
        let started = Instant::now();

        loop {
            let status = self.status();
            if status.can_make_request {
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= timeout {
                warn!(
                    waited_ms = waited.as_millis() as u64,
                    current_count = status.current_count,
                    "Timed out waiting for rate limit capacity"
                );
                return Err(RateLimitError::CapacityTimeout { waited });
            }

            let poll = status
                .estimated_wait
                .clamp(MIN_CAPACITY_POLL_INTERVAL, MAX_CAPACITY_POLL_INTERVAL)
                .min(timeout - waited);
            tokio::time::sleep(poll.max(MIN_CAPACITY_POLL_INTERVAL)).await;
        }
    }

    /// Clear all tracked requests and events
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.window.clear();
        state.events.clear();
        state.last_health = RateLimitHealth::Healthy;
        debug!("Rate limiter reset");
    }

    /// Most recent threshold events, oldest first
    pub fn recent_events(&self, limit: usize) -> Vec<RateLimitEvent> {
        let state = self.state.lock();
        let skip = state.events.len().saturating_sub(limit);
        state.events.iter().skip(skip).cloned().collect()
    }

    pub fn update_config(&self, config: RateLimiterConfig) -> Result<(), RateLimitError> {
        config.validate()?;
        info!(
            request_limit = config.request_limit,
            window_seconds = config.window_seconds,
            threshold = config.threshold,
            "Rate limiter configuration updated"
        );
        self.state.lock().config = config;
        Ok(())
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.state.lock().config.clone()
    }

    pub fn metrics(&self) -> RateLimiterMetrics {
        let status = self.status();
        let config = self.config();
        RateLimiterMetrics {
            current_requests: status.current_count,
            limit: status.limit,
            utilization: status.utilization,
            status: status.status,
            window_seconds: config.window_seconds,
            threshold: config.threshold,
            recent_events: self.recent_events(RATE_LIMIT_METRICS_EVENT_COUNT),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(request_limit: u32, window_seconds: u64, threshold: f64) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig {
            request_limit,
            window_seconds,
            threshold,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_stops_at_threshold() {
        let limiter = limiter(10, 60, 0.5);
        for _ in 0..4 {
            limiter.add_request(None);
        }
        assert!(limiter.can_make_request());

        limiter.add_request(None);
        assert!(!limiter.can_make_request());
        assert_eq!(limiter.get_current_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_window() {
        let limiter = limiter(10, 60, 1.0);
        limiter.add_request(Some("first".to_string()));

        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.add_request(Some("second".to_string()));
        assert_eq!(limiter.get_current_count(), 2);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.get_current_count(), 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(limiter.get_current_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_buckets_and_capped_utilization() {
        let limiter = limiter(10, 60, 1.0);
        for _ in 0..6 {
            limiter.add_request(None);
        }
        assert_eq!(limiter.status().status, RateLimitHealth::Healthy);

        limiter.add_request(None);
        assert_eq!(limiter.status().status, RateLimitHealth::Approaching);

        for _ in 0..2 {
            limiter.add_request(None);
        }
        assert_eq!(limiter.status().status, RateLimitHealth::Throttled);

        for _ in 0..5 {
            limiter.add_request(None);
        }
        let status = limiter.status();
        assert_eq!(status.utilization, 100.0);
        assert_eq!(status.current_count, 14);
        assert!(!status.can_make_request);
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimated_wait_tracks_oldest_entry() {
        let limiter = limiter(2, 60, 1.0);
        limiter.add_request(None);
        assert_eq!(limiter.status().estimated_wait, Duration::ZERO);

        tokio::time::advance(Duration::from_secs(20)).await;
        limiter.add_request(None);
        assert_eq!(limiter.status().estimated_wait, Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_events_are_recorded_once() {
        let limiter = limiter(10, 60, 1.0);
        for _ in 0..10 {
            limiter.add_request(None);
        }

        let events = limiter.recent_events(10);
        let kinds: Vec<_> = events.iter().map(|event| event.kind).collect();
        assert_eq!(
            kinds,
            vec![RateLimitEventKind::Approaching, RateLimitEventKind::Throttled]
        );
        assert_eq!(limiter.metrics().recent_events.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_capacity_succeeds_when_window_slides() {
        let limiter = limiter(1, 5, 1.0);
        limiter.add_request(None);

        limiter
            .wait_for_capacity(Duration::from_secs(10))
            .await
            .unwrap();
        assert!(limiter.can_make_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_capacity_times_out() {
        let limiter = limiter(1, 60, 1.0);
        limiter.add_request(None);

        let err = limiter
            .wait_for_capacity(Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, RateLimitError::CapacityTimeout { .. }));
        assert!(err
            .to_string()
            .contains("Timeout waiting for rate limit capacity"));
    }

    #[test]
    fn test_config_validation() {
        assert!(RateLimiterConfig::default().validate().is_ok());

        let zero_limit = RateLimiterConfig {
            request_limit: 0,
            ..Default::default()
        };
        assert!(RateLimiter::new(zero_limit).is_err());

        let bad_threshold = RateLimiterConfig {
            threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            bad_threshold.validate(),
            Err(RateLimitError::InvalidConfig(reason)) if reason.contains("threshold")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_and_update_config() {
        let limiter = limiter(2, 60, 1.0);
        limiter.add_request(None);
        limiter.add_request(None);
        assert!(!limiter.check_rate_limit("default"));

        limiter
            .update_config(RateLimiterConfig {
                request_limit: 10,
                threshold: 1.0,
                ..Default::default()
            })
            .unwrap();
        assert!(limiter.can_make_request());
        assert_eq!(limiter.config().request_limit, 10);

        limiter.reset();
        assert_eq!(limiter.get_current_count(), 0);
        assert!(limiter.recent_events(10).is_empty());
    }
}
