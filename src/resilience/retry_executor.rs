//! # Retry Executor
//!
//! Runs any asynchronous operation under a [`RetryStrategy`], classifying each
//! failure and collecting [`RetryMetrics`] for the whole execution.
//!
//! ## State Machine
//!
//! ```text
//! Attempting ──ok──▶ Succeeded
//!     │
//!    err ── should_retry? ──no──▶ Failed
//!     │                  yes
//!     ▼                   │
//! WaitingToRetry ◀────────┘ ── sleep(calculate_delay(n)) ──▶ Attempting
//! ```
//!
//! The inter-attempt sleep is the only suspension point owned by the executor.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_core::resilience::{FixedDelayStrategy, RetryContext, RetryExecutor};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let strategy = FixedDelayStrategy::new(Duration::from_millis(500), 3)?;
//! let executor = RetryExecutor::new(Arc::new(strategy));
//!
//! let value = executor
//!     .execute(|| async { Ok::<_, std::io::Error>(42) }, &RetryContext::new("generate-1"))
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use super::error_classifier::{ErrorClassification, ErrorClassifier};
use super::retry_strategy::RetryStrategy;
use crate::logging::log_retry_attempt;

/// Executor lifecycle states, reported in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryState {
    Attempting,
    WaitingToRetry,
    Succeeded,
    Failed,
}

/// Terminal outcome of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryFinalStatus {
    Success,
    Failure,
}

/// Caller-supplied identification for an execution
#[derive(Debug, Clone, Default)]
pub struct RetryContext {
    pub request_id: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetryContext {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Per-execution attempt history
#[derive(Debug, Clone, Serialize)]
pub struct RetryMetrics {
    pub request_id: String,
    pub total_attempts: u32,
    /// 1-based attempt number that succeeded
    pub successful_attempt: Option<u32>,
    pub total_duration: Duration,
    pub delays: Vec<Duration>,
    pub errors: Vec<ErrorClassification>,
    pub final_status: RetryFinalStatus,
}

impl RetryMetrics {
    fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            total_attempts: 0,
            successful_attempt: None,
            total_duration: Duration::ZERO,
            delays: Vec::new(),
            errors: Vec::new(),
            final_status: RetryFinalStatus::Failure,
        }
    }
}

/// Result of [`RetryExecutor::execute_with_metrics`]
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, E>,
    pub metrics: RetryMetrics,
}

/// Generic retry loop over a swappable strategy
pub struct RetryExecutor {
    strategy: RwLock<Arc<dyn RetryStrategy>>,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("strategy", &*self.strategy.read())
            .finish()
    }
}

impl RetryExecutor {
    pub fn new(strategy: Arc<dyn RetryStrategy>) -> Self {
        Self {
            strategy: RwLock::new(strategy),
        }
    }

    /// Replace the strategy; executions already in flight pick it up on their next attempt
    pub fn set_strategy(&self, strategy: Arc<dyn RetryStrategy>) {
        debug!(strategy = ?strategy, "Retry strategy replaced");
        *self.strategy.write() = strategy;
    }

    pub fn strategy(&self) -> Arc<dyn RetryStrategy> {
        Arc::clone(&self.strategy.read())
    }

    /// Run `operation` until it succeeds or the strategy declines another attempt,
    /// classifying failures by message
    pub async fn execute<T, E, F, Fut>(&self, operation: F, context: &RetryContext) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_with_metrics(operation, context).await.result
    }

    pub async fn execute_with_metrics<T, E, F, Fut>(
        &self,
        operation: F,
        context: &RetryContext,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_classified(operation, context, |error: &E| {
            ErrorClassifier::classify_error(error)
        })
        .await
    }

    /// Like [`execute_with_metrics`](Self::execute_with_metrics) with a caller-supplied
    /// classification, for error types that know their own retryability
    pub async fn execute_classified<T, E, F, Fut, C>(
        &self,
        mut operation: F,
        context: &RetryContext,
        classify: C,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        C: Fn(&E) -> ErrorClassification,
    {
        let started = Instant::now();
        let mut metrics = RetryMetrics::new(&context.request_id);
        let mut attempt: u32 = 0;

        loop {
            let strategy = self.strategy();
            metrics.total_attempts = attempt + 1;

            debug!(
                request_id = %context.request_id,
                attempt = attempt + 1,
                max_attempts = strategy.max_attempts().saturating_add(1),
                state = ?RetryState::Attempting,
                "Executing attempt"
            );

            match operation().await {
                Ok(value) => {
                    metrics.successful_attempt = Some(attempt + 1);
                    metrics.final_status = RetryFinalStatus::Success;
                    metrics.total_duration = started.elapsed();

                    if attempt > 0 {
                        info!(
                            request_id = %context.request_id,
                            attempts = metrics.total_attempts,
                            duration_ms = metrics.total_duration.as_millis() as u64,
                            state = ?RetryState::Succeeded,
                            "✅ Operation succeeded after retry"
                        );
                    }

                    return RetryOutcome {
                        result: Ok(value),
                        metrics,
                    };
                }
                Err(err) => {
                    let classification = classify(&err);
                    let will_retry = strategy.should_retry(&classification, attempt);

                    warn!(
                        request_id = %context.request_id,
                        attempt = attempt + 1,
                        category = %classification.category,
                        retryable = classification.is_retryable,
                        will_retry,
                        error = %err,
                        "Attempt failed"
                    );
                    metrics.errors.push(classification);

                    if !will_retry {
                        metrics.final_status = RetryFinalStatus::Failure;
                        metrics.total_duration = started.elapsed();

                        error!(
                            request_id = %context.request_id,
                            attempts = metrics.total_attempts,
                            duration_ms = metrics.total_duration.as_millis() as u64,
                            state = ?RetryState::Failed,
                            error = %err,
                            "❌ Operation failed, no further retries"
                        );

                        return RetryOutcome {
                            result: Err(err),
                            metrics,
                        };
                    }

                    let delay = strategy.calculate_delay(attempt);
                    metrics.delays.push(delay);
                    if let Some(last) = metrics.errors.last() {
                        log_retry_attempt(
                            &context.request_id,
                            attempt + 1,
                            last.category.as_str(),
                            Some(delay.as_millis() as u64),
                            "retrying",
                        );
                    }

                    debug!(
                        request_id = %context.request_id,
                        delay_ms = delay.as_millis() as u64,
                        state = ?RetryState::WaitingToRetry,
                        "Waiting before retry"
                    );

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{ExponentialBackoffStrategy, FixedDelayStrategy};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fixed(delay_ms: u64, max_attempts: u32) -> Arc<dyn RetryStrategy> {
        Arc::new(FixedDelayStrategy::new(Duration::from_millis(delay_ms), max_attempts).unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_two_server_errors() {
        let executor = RetryExecutor::new(fixed(1000, 5));
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_metrics(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if call < 2 {
                            Err("503 Service Unavailable".to_string())
                        } else {
                            Ok("done")
                        }
                    }
                },
                &RetryContext::new("req-1"),
            )
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.metrics.total_attempts, 3);
        assert_eq!(outcome.metrics.successful_attempt, Some(3));
        assert_eq!(outcome.metrics.delays.len(), 2);
        assert_eq!(outcome.metrics.errors.len(), 2);
        assert_eq!(outcome.metrics.final_status, RetryFinalStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_fails_immediately() {
        let executor = RetryExecutor::new(fixed(1000, 5));
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_metrics(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("400 Bad Request: Validation failed".to_string()) }
                },
                &RetryContext::new("req-2"),
            )
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcome.metrics.delays.is_empty());
        assert_eq!(outcome.metrics.final_status, RetryFinalStatus::Failure);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_returns_last_error() {
        let strategy = ExponentialBackoffStrategy::from_millis(100, 2, 10_000, 0.0).unwrap();
        let executor = RetryExecutor::new(Arc::new(strategy));
        let calls = AtomicU32::new(0);

        let outcome = executor
            .execute_with_metrics(
                || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err::<(), _>(format!("network error on call {call}")) }
                },
                &RetryContext::new("req-3"),
            )
            .await;

        assert_eq!(outcome.result.unwrap_err(), "network error on call 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            outcome.metrics.delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_strategy_swaps_policy() {
        let executor = RetryExecutor::new(fixed(1000, 5));
        executor.set_strategy(fixed(10, 0));
        assert_eq!(executor.strategy().max_attempts(), 0);

        let result = executor
            .execute(
                || async { Err::<(), _>("timeout".to_string()) },
                &RetryContext::new("req-4"),
            )
            .await;
        assert!(result.is_err());
    }
}
