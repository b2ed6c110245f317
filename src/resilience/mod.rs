//! # Resilience Module
//!
//! Admission control and retry policy for calls to a quota-limited external service.
//!
//! ## Architecture
//!
//! - **Error Classification**: Message-based mapping of failures to categories and a retry verdict
//! - **Retry Strategies**: Exponential, linear and fixed delay policies behind one trait
//! - **Retry Executor**: Generic attempt loop with per-execution metrics
//! - **Rate Limiter**: Sliding-window admission controller with threshold events
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_core::resilience::{
//!     create_retry_strategy, RateLimiter, RateLimiterConfig, RetryContext, RetryExecutor,
//!     RetryStrategyConfig,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = RateLimiter::new(RateLimiterConfig::default())?;
//! let executor = RetryExecutor::new(create_retry_strategy(&RetryStrategyConfig::default())?);
//!
//! let body = executor
//!     .execute(
//!         || async {
//!             limiter.wait_for_capacity(Duration::from_secs(60)).await?;
//!             limiter.add_request(None);
//!             Ok::<_, Box<dyn std::error::Error>>("generated")
//!         },
//!         &RetryContext::new("generate-42"),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod error_classifier;
pub mod rate_limiter;
pub mod retry_executor;
pub mod retry_strategy;

pub use error_classifier::{
    ClassificationRule, ErrorCategory, ErrorClassification, ErrorClassifier, CLASSIFICATION_RULES,
};
pub use rate_limiter::{
    RateLimitError, RateLimitEvent, RateLimitEventKind, RateLimitHealth, RateLimitStatus,
    RateLimiter, RateLimiterConfig, RateLimiterMetrics,
};
pub use retry_executor::{
    RetryContext, RetryExecutor, RetryFinalStatus, RetryMetrics, RetryOutcome, RetryState,
};
pub use retry_strategy::{
    create_retry_strategy, ExponentialBackoffStrategy, FixedDelayStrategy, LinearBackoffStrategy,
    RetryConfigError, RetryStrategy, RetryStrategyConfig, RetryStrategyKind,
};
