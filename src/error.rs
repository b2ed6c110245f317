//! Error types for the Conduit execution core.
//!
//! Each component owns a focused error enum; [`ConduitError`] aggregates them for
//! callers that drive several components and want a single error type.

use thiserror::Error;

use crate::batch::{BatchError, CheckpointError};
use crate::config::ConfigurationError;
use crate::database::{DatabaseError, DatastoreError};
use crate::queue::QueueProcessorError;
use crate::resilience::{RateLimitError, RetryConfigError};

#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),
    #[error("Queue processor error: {0}")]
    QueueProcessor(#[from] QueueProcessorError),
    #[error("Retry configuration error: {0}")]
    RetryConfig(#[from] RetryConfigError),
    #[error("Datastore error: {0}")]
    Datastore(#[from] DatastoreError),
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_component_errors_convert_into_conduit_error() {
        let err: ConduitError = RateLimitError::CapacityTimeout {
            waited: Duration::from_millis(250),
        }
        .into();
        assert!(matches!(err, ConduitError::RateLimit(_)));
        assert!(err.to_string().contains("Timeout waiting for rate limit capacity"));

        let err: ConduitError = DatabaseError::Deadlock {
            transaction_id: None,
        }
        .into();
        assert!(matches!(err, ConduitError::Database(_)));
    }
}
