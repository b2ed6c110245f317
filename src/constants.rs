//! # System Constants
//!
//! Fixed limits and defaults shared across the throttling, retry, queueing and
//! checkpointing components. Values that operators are expected to tune live in
//! [`crate::config`]; the values here are structural.

use std::time::Duration;

/// Ring buffer capacity for rate limiter threshold events
pub const RATE_LIMIT_EVENT_CAPACITY: usize = 100;

/// Number of events included in a rate limiter metrics snapshot
pub const RATE_LIMIT_METRICS_EVENT_COUNT: usize = 5;

/// Upper bound on a single `wait_for_capacity` poll sleep
pub const MAX_CAPACITY_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Lower bound on a single `wait_for_capacity` poll sleep
pub const MIN_CAPACITY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Rolling sample size for queue wait-time averaging
pub const QUEUE_WAIT_SAMPLE_CAPACITY: usize = 100;

/// Average wait reported before any item has been dequeued
pub const DEFAULT_AVERAGE_WAIT: Duration = Duration::from_secs(20);

/// Re-poll delay after an item was dispatched, to drain bursts faster
pub const BURST_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause applied when the generation service answers HTTP 429
pub const RATE_LIMITED_RESPONSE_PAUSE: Duration = Duration::from_secs(30);

/// Utilization percentage at which the limiter reports `approaching`
pub const APPROACHING_UTILIZATION: f64 = 70.0;

/// Utilization percentage at which the limiter reports `throttled`
pub const THROTTLED_UTILIZATION: f64 = 90.0;

/// Transaction deadlock retry backoff
pub mod transaction_retry {
    use std::time::Duration;

    pub const INITIAL_DELAY: Duration = Duration::from_millis(100);
    pub const MAX_DELAY: Duration = Duration::from_millis(2000);
    pub const BACKOFF_FACTOR: f64 = 2.0;
}

/// Postgres SQLSTATE codes the transaction wrapper recognizes
pub mod sql_state {
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const FOREIGN_KEY_VIOLATION: &str = "23503";
    pub const NOT_NULL_VIOLATION: &str = "23502";
    pub const CONNECTION_EXCEPTION: &str = "08000";
    pub const CONNECTION_DOES_NOT_EXIST: &str = "08003";
    pub const CONNECTION_FAILURE: &str = "08006";
    /// PostgREST "could not connect" code, kept for RPC-fronted datastores
    pub const GATEWAY_CONNECTION_FAILURE: &str = "PGRST301";

    pub const CONNECTION_CODES: &[&str] = &[
        CONNECTION_EXCEPTION,
        CONNECTION_DOES_NOT_EXIST,
        CONNECTION_FAILURE,
        GATEWAY_CONNECTION_FAILURE,
    ];
}

/// Name of the checkpoint table
pub const CHECKPOINT_TABLE: &str = "batch_checkpoints";
