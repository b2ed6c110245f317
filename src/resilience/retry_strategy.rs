//! # Retry Strategies
//!
//! Delay and retry-decision policies used by [`RetryExecutor`](super::RetryExecutor).
//!
//! Three variants are provided:
//!
//! | Strategy | Delay for attempt `n` (0-based) |
//! |----------|---------------------------------|
//! | [`ExponentialBackoffStrategy`] | `min(max, base * 2^n + base * 2^n * jitter * rand)` |
//! | [`LinearBackoffStrategy`] | `min(max, increment * (n + 1))` |
//! | [`FixedDelayStrategy`] | `delay` |
//!
//! All variants share the same retry decision: no retry once `n >= max_attempts`,
//! otherwise retry iff the classified error is retryable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::error_classifier::ErrorClassification;

/// Errors raised when constructing a strategy with invalid parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryConfigError {
    #[error("Base delay must be positive")]
    NonPositiveBaseDelay,
    #[error("Increment must be positive")]
    NonPositiveIncrement,
    #[error("Delay must be positive")]
    NonPositiveDelay,
    #[error("Max delay ({max_delay:?}) must be greater than or equal to {field} ({value:?})")]
    MaxDelayTooSmall {
        field: &'static str,
        value: Duration,
        max_delay: Duration,
    },
    #[error("Jitter factor must be between 0 and 1, got {0}")]
    InvalidJitterFactor(f64),
}

/// Policy computing the wait before a retry and whether to retry at all
pub trait RetryStrategy: Send + Sync + fmt::Debug {
    /// Delay before the retry that follows failed attempt `attempt_number` (0-based)
    fn calculate_delay(&self, attempt_number: u32) -> Duration;

    /// Maximum number of retries; total invocations are `max_attempts + 1`
    fn max_attempts(&self) -> u32;

    fn should_retry(&self, error: &ErrorClassification, attempt_number: u32) -> bool {
        if attempt_number >= self.max_attempts() {
            return false;
        }
        error.is_retryable
    }
}

fn millis_to_duration(millis: f64) -> Duration {
    Duration::from_micros((millis * 1000.0).round() as u64)
}

/// Exponential backoff with proportional random jitter
#[derive(Debug, Clone)]
pub struct ExponentialBackoffStrategy {
    base_delay: Duration,
    max_attempts: u32,
    max_delay: Duration,
    jitter_factor: f64,
}

impl ExponentialBackoffStrategy {
    pub fn new(
        base_delay: Duration,
        max_attempts: u32,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Result<Self, RetryConfigError> {
        if base_delay.is_zero() {
            return Err(RetryConfigError::NonPositiveBaseDelay);
        }
        if max_delay < base_delay {
            return Err(RetryConfigError::MaxDelayTooSmall {
                field: "base delay",
                value: base_delay,
                max_delay,
            });
        }
        if !(0.0..=1.0).contains(&jitter_factor) {
            return Err(RetryConfigError::InvalidJitterFactor(jitter_factor));
        }

        Ok(Self {
            base_delay,
            max_attempts,
            max_delay,
            jitter_factor,
        })
    }

    /// Convenience constructor taking milliseconds
    pub fn from_millis(
        base_delay_ms: u64,
        max_attempts: u32,
        max_delay_ms: u64,
        jitter_factor: f64,
    ) -> Result<Self, RetryConfigError> {
        Self::new(
            Duration::from_millis(base_delay_ms),
            max_attempts,
            Duration::from_millis(max_delay_ms),
            jitter_factor,
        )
    }
}

impl RetryStrategy for ExponentialBackoffStrategy {
    fn calculate_delay(&self, attempt_number: u32) -> Duration {
        let base_ms = self.base_delay.as_secs_f64() * 1000.0;
        let max_ms = self.max_delay.as_secs_f64() * 1000.0;

        let exponential = base_ms * 2f64.powi(attempt_number.min(i32::MAX as u32) as i32);
        let jitter = if self.jitter_factor > 0.0 {
            exponential * self.jitter_factor * fastrand::f64()
        } else {
            0.0
        };

        let total = exponential + jitter;
        if total.is_finite() {
            millis_to_duration(total.min(max_ms))
        } else {
            self.max_delay
        }
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Linearly growing delay
#[derive(Debug, Clone)]
pub struct LinearBackoffStrategy {
    increment: Duration,
    max_attempts: u32,
    max_delay: Duration,
}

impl LinearBackoffStrategy {
    pub fn new(
        increment: Duration,
        max_attempts: u32,
        max_delay: Duration,
    ) -> Result<Self, RetryConfigError> {
        if increment.is_zero() {
            return Err(RetryConfigError::NonPositiveIncrement);
        }
        if max_delay < increment {
            return Err(RetryConfigError::MaxDelayTooSmall {
                field: "increment",
                value: increment,
                max_delay,
            });
        }

        Ok(Self {
            increment,
            max_attempts,
            max_delay,
        })
    }
}

impl RetryStrategy for LinearBackoffStrategy {
    fn calculate_delay(&self, attempt_number: u32) -> Duration {
        self.increment
            .checked_mul(attempt_number.saturating_add(1))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Constant delay between attempts
#[derive(Debug, Clone)]
pub struct FixedDelayStrategy {
    delay: Duration,
    max_attempts: u32,
}

impl FixedDelayStrategy {
    pub fn new(delay: Duration, max_attempts: u32) -> Result<Self, RetryConfigError> {
        if delay.is_zero() {
            return Err(RetryConfigError::NonPositiveDelay);
        }
        Ok(Self {
            delay,
            max_attempts,
        })
    }
}

impl RetryStrategy for FixedDelayStrategy {
    fn calculate_delay(&self, _attempt_number: u32) -> Duration {
        self.delay
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Which strategy family a [`RetryStrategyConfig`] builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategyKind {
    Exponential,
    Linear,
    Fixed,
}

/// Serializable retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryStrategyConfig {
    pub strategy: RetryStrategyKind,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub increment_ms: u64,
    pub fixed_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for RetryStrategyConfig {
    fn default() -> Self {
        Self {
            strategy: RetryStrategyKind::Exponential,
            max_attempts: 3,
            base_delay_ms: 1000,
            increment_ms: 2000,
            fixed_delay_ms: 5000,
            max_delay_ms: 300_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryStrategyConfig {
    /// Validate by attempting construction
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        create_retry_strategy(self).map(|_| ())
    }
}

/// Build a shared strategy from configuration
pub fn create_retry_strategy(
    config: &RetryStrategyConfig,
) -> Result<Arc<dyn RetryStrategy>, RetryConfigError> {
    let strategy: Arc<dyn RetryStrategy> = match config.strategy {
        RetryStrategyKind::Exponential => Arc::new(ExponentialBackoffStrategy::from_millis(
            config.base_delay_ms,
            config.max_attempts,
            config.max_delay_ms,
            config.jitter_factor,
        )?),
        RetryStrategyKind::Linear => Arc::new(LinearBackoffStrategy::new(
            Duration::from_millis(config.increment_ms),
            config.max_attempts,
            Duration::from_millis(config.max_delay_ms),
        )?),
        RetryStrategyKind::Fixed => Arc::new(FixedDelayStrategy::new(
            Duration::from_millis(config.fixed_delay_ms),
            config.max_attempts,
        )?),
    };
    Ok(strategy)
}
