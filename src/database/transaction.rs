//! # Transaction Wrapper
//!
//! Begin/commit/rollback envelope around a unit of datastore work, with a timeout
//! and classification of low-level failures.
//!
//! ## Behavior
//!
//! - `begin` failure: [`DatabaseError::Connection`], nothing to roll back.
//! - Body succeeds: commit. A failed commit triggers a best-effort rollback and
//!   yields [`DatabaseError::CommitFailed`].
//! - Body fails or exceeds `timeout`: exactly one rollback, then the body's
//!   (already classified) error or [`DatabaseError::Timeout`].
//!
//! [`TransactionWrapper::with_transaction_retry`] reruns the whole transaction on
//! deadlock or timeout with exponential backoff (100ms, doubling, capped at 2s).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_core::database::{CheckpointRepository, InMemoryDatastore, TransactionConfig, TransactionWrapper};
//! use conduit_core::batch::CheckpointUpdate;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let wrapper = TransactionWrapper::new(Arc::new(InMemoryDatastore::new()));
//!
//! let saved = wrapper
//!     .with_transaction(
//!         |ctx| async move {
//!             let update = CheckpointUpdate::new("job-1", vec!["a".into()], vec![], 100);
//!             Ok(ctx.client.upsert_checkpoint(&update).await?)
//!         },
//!         &TransactionConfig::default(),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::datastore::{DatastoreError, TransactionalDatastore};
use crate::config::{ConfigResult, ConfigurationError};
use crate::constants::{sql_state, transaction_retry};
use crate::logging::log_database_operation;
use crate::resilience::{
    ErrorCategory, ErrorClassification, ExponentialBackoffStrategy, RetryContext, RetryExecutor,
};

/// SQL transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IsolationLevel {
    #[serde(rename = "READ UNCOMMITTED", alias = "read_uncommitted")]
    ReadUncommitted,
    #[default]
    #[serde(rename = "READ COMMITTED", alias = "read_committed")]
    ReadCommitted,
    #[serde(rename = "REPEATABLE READ", alias = "repeatable_read")]
    RepeatableRead,
    #[serde(rename = "SERIALIZABLE", alias = "serializable")]
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub isolation_level: IsolationLevel,
    pub timeout_ms: u64,
    /// Rerun the transaction on deadlock or timeout
    pub retry_deadlocks: bool,
    pub max_retries: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::ReadCommitted,
            timeout_ms: 30_000,
            retry_deadlocks: true,
            max_retries: 3,
        }
    }
}

impl TransactionConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "transaction.timeout_ms",
                "0",
                "timeout must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Classified datastore failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    #[error("Database deadlock detected. The operation will be retried.")]
    Deadlock { transaction_id: Option<Uuid> },
    #[error("Duplicate entry: {constraint} already exists")]
    UniqueViolation { constraint: String },
    #[error("Referenced record not found: {constraint}")]
    ForeignKeyViolation { constraint: String },
    #[error("Required field missing: {column}")]
    NotNullViolation { column: String },
    #[error("Database connection failed: {reason}")]
    Connection { reason: String },
    #[error("Transaction timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },
    #[error("Failed to commit transaction: {reason}")]
    CommitFailed { reason: String },
    #[error("Database query failed: {message}")]
    Query {
        code: Option<String>,
        message: String,
    },
}

fn unique_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Key \((.*?)\)").expect("valid unique key pattern"))
}

fn foreign_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"violates foreign key constraint "(.*?)""#).expect("valid foreign key pattern")
    })
}

fn column_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"column "(.*?)""#).expect("valid column pattern"))
}

/// First capture of `pattern` in the error detail, then the message, else `unknown`
fn extract_name(pattern: &Regex, err: &DatastoreError) -> String {
    err.detail
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(err.message.as_str()))
        .find_map(|text| pattern.captures(text))
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

impl DatabaseError {
    /// Map a raw datastore failure onto the classified taxonomy by its error code
    pub fn classify(err: &DatastoreError, transaction_id: Option<Uuid>) -> Self {
        match err.code() {
            Some(sql_state::DEADLOCK_DETECTED) => Self::Deadlock { transaction_id },
            Some(sql_state::UNIQUE_VIOLATION) => Self::UniqueViolation {
                constraint: extract_name(unique_key_pattern(), err),
            },
            Some(sql_state::FOREIGN_KEY_VIOLATION) => Self::ForeignKeyViolation {
                constraint: extract_name(foreign_key_pattern(), err),
            },
            Some(sql_state::NOT_NULL_VIOLATION) => Self::NotNullViolation {
                column: extract_name(column_pattern(), err),
            },
            Some(code) if sql_state::CONNECTION_CODES.contains(&code) => Self::Connection {
                reason: err.message.clone(),
            },
            code => Self::Query {
                code: code.map(str::to_string),
                message: err.message.clone(),
            },
        }
    }

    /// Stable application error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Deadlock { .. } => "ERR_DB_DEADLOCK",
            Self::UniqueViolation { .. }
            | Self::ForeignKeyViolation { .. }
            | Self::NotNullViolation { .. } => "ERR_DB_CONSTRAINT",
            Self::Connection { .. } => "ERR_DB_CONNECTION",
            Self::Timeout { .. } => "ERR_DB_TIMEOUT",
            Self::CommitFailed { .. } | Self::Query { .. } => "ERR_DB_QUERY",
        }
    }

    /// Only deadlocks and timeouts are worth rerunning a transaction for
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Deadlock { .. } | Self::Timeout { .. })
    }

    pub fn classification(&self) -> ErrorClassification {
        let category = match self {
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Connection { .. } => ErrorCategory::Network,
            Self::UniqueViolation { .. }
            | Self::ForeignKeyViolation { .. }
            | Self::NotNullViolation { .. } => ErrorCategory::Validation,
            Self::Deadlock { .. } | Self::CommitFailed { .. } | Self::Query { .. } => {
                ErrorCategory::Unknown
            }
        };

        ErrorClassification {
            category,
            is_retryable: self.is_retryable(),
            status_code: None,
            original_message: self.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl From<DatastoreError> for DatabaseError {
    fn from(err: DatastoreError) -> Self {
        Self::classify(&err, None)
    }
}

/// Per-transaction context handed to the body of `with_transaction`
#[derive(Debug)]
pub struct TransactionContext<H> {
    pub client: Arc<H>,
    pub transaction_id: Uuid,
    pub start_time: DateTime<Utc>,
}

impl<H> Clone for TransactionContext<H> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            transaction_id: self.transaction_id,
            start_time: self.start_time,
        }
    }
}

/// Transaction envelope over a shared datastore
pub struct TransactionWrapper<S> {
    datastore: Arc<S>,
}

impl<S> Clone for TransactionWrapper<S> {
    fn clone(&self) -> Self {
        Self {
            datastore: Arc::clone(&self.datastore),
        }
    }
}

impl<S> fmt::Debug for TransactionWrapper<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionWrapper").finish_non_exhaustive()
    }
}

impl<S: TransactionalDatastore> TransactionWrapper<S> {
    pub fn new(datastore: Arc<S>) -> Self {
        Self { datastore }
    }

    pub fn datastore(&self) -> &Arc<S> {
        &self.datastore
    }

    /// Run `body` inside a transaction
    #[instrument(skip(self, body, config), fields(transaction_id = tracing::field::Empty, isolation_level = %config.isolation_level))]
    pub async fn with_transaction<T, F, Fut>(
        &self,
        body: F,
        config: &TransactionConfig,
    ) -> Result<T, DatabaseError>
    where
        F: FnOnce(TransactionContext<S::Handle>) -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        let transaction_id = Uuid::new_v4();
        tracing::Span::current().record("transaction_id", tracing::field::display(transaction_id));
        let started = Instant::now();

        debug!(timeout_ms = config.timeout_ms, "Starting transaction");

        let handle = self
            .datastore
            .begin(config.isolation_level)
            .await
            .map_err(|err| DatabaseError::Connection {
                reason: format!("Failed to begin transaction: {err}"),
            })?;

        let context = TransactionContext {
            client: Arc::new(handle),
            transaction_id,
            start_time: Utc::now(),
        };
        let handle = Arc::clone(&context.client);

        let outcome = match tokio::time::timeout(config.timeout(), body(context)).await {
            Ok(result) => result,
            Err(_) => Err(DatabaseError::Timeout {
                timeout: config.timeout(),
            }),
        };

        match outcome {
            Ok(value) => {
                if let Err(commit_err) = self.datastore.commit(&handle).await {
                    if let Err(rollback_err) = self.datastore.rollback(&handle).await {
                        debug!(error = %rollback_err, "Rollback after failed commit also failed");
                    }
                    error!(error = %commit_err, "❌ Transaction commit failed");
                    return Err(DatabaseError::CommitFailed {
                        reason: commit_err.to_string(),
                    });
                }

                let duration_ms = started.elapsed().as_millis() as u64;
                log_database_operation(
                    "commit",
                    None,
                    Some(&transaction_id.to_string()),
                    "success",
                    Some(duration_ms),
                    None,
                );
                Ok(value)
            }
            Err(err) => {
                match self.datastore.rollback(&handle).await {
                    Ok(()) => warn!(
                        error = %err,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "Transaction rolled back due to error"
                    ),
                    Err(rollback_err) => error!(
                        error = %rollback_err,
                        original_error = %err,
                        "Failed to rollback transaction"
                    ),
                }

                Err(match err {
                    DatabaseError::Deadlock {
                        transaction_id: None,
                    } => DatabaseError::Deadlock {
                        transaction_id: Some(transaction_id),
                    },
                    other => other,
                })
            }
        }
    }

    /// [`with_transaction`](Self::with_transaction) rerun on deadlock or timeout,
    /// up to `config.max_retries` additional attempts
    pub async fn with_transaction_retry<T, F, Fut>(
        &self,
        body: F,
        config: &TransactionConfig,
    ) -> Result<T, DatabaseError>
    where
        F: Fn(TransactionContext<S::Handle>) -> Fut,
        Fut: Future<Output = Result<T, DatabaseError>>,
    {
        if !config.retry_deadlocks {
            return self.with_transaction(body, config).await;
        }

        let strategy = ExponentialBackoffStrategy::new(
            transaction_retry::INITIAL_DELAY,
            config.max_retries,
            transaction_retry::MAX_DELAY,
            0.0,
        )
        .map_err(|err| DatabaseError::Query {
            code: None,
            message: err.to_string(),
        })?;
        let executor = RetryExecutor::new(Arc::new(strategy));
        let context = RetryContext::new(format!("transaction_retry_{}", Uuid::new_v4()));

        executor
            .execute_classified(
                || self.with_transaction(&body, config),
                &context,
                DatabaseError::classification,
            )
            .await
            .result
    }
}
