//! Datastore abstractions used by the transaction wrapper and checkpoint manager.
//!
//! A datastore hands out a transaction handle from [`TransactionalDatastore::begin`];
//! work inside `with_transaction` runs against that handle, and the wrapper later
//! commits or rolls it back. Checkpoint reads, deletes and listings go straight to
//! the datastore.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use super::transaction::IsolationLevel;
use crate::batch::{BatchCheckpoint, CheckpointUpdate};
#[cfg(feature = "postgres")]
use crate::constants::sql_state;

/// Raw, unclassified datastore failure carrying the backend's error code and detail
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct DatastoreError {
    pub code: Option<String>,
    pub message: String,
    pub detail: Option<String>,
}

impl fmt::Display for DatastoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl DatastoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            detail: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for DatastoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => {
                let detail = db_err
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                    .map(str::to_string);

                Self {
                    code: db_err.code().map(|code| code.into_owned()),
                    message: db_err.message().to_string(),
                    detail,
                }
            }
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::new(err.to_string()).with_code(sql_state::CONNECTION_FAILURE)
            }
            _ => Self::new(err.to_string()),
        }
    }
}

/// Begin/commit/rollback control over a transactional datastore
#[async_trait]
pub trait TransactionalDatastore: Send + Sync + 'static {
    /// Handle through which work inside the transaction reaches the datastore
    type Handle: Send + Sync + 'static;

    async fn begin(&self, isolation_level: IsolationLevel) -> Result<Self::Handle, DatastoreError>;

    async fn commit(&self, handle: &Self::Handle) -> Result<(), DatastoreError>;

    async fn rollback(&self, handle: &Self::Handle) -> Result<(), DatastoreError>;
}

/// Persistence for batch checkpoints, keyed by `job_id`
#[async_trait]
pub trait CheckpointRepository: Send + Sync {
    /// Insert, or update the existing row on `job_id` conflict
    async fn upsert_checkpoint(
        &self,
        update: &CheckpointUpdate,
    ) -> Result<BatchCheckpoint, DatastoreError>;

    async fn find_checkpoint(&self, job_id: &str)
        -> Result<Option<BatchCheckpoint>, DatastoreError>;

    /// Returns whether a row was deleted
    async fn delete_checkpoint(&self, job_id: &str) -> Result<bool, DatastoreError>;

    /// Checkpoints below 100% progress, most recently updated first
    async fn find_incomplete_checkpoints(&self) -> Result<Vec<BatchCheckpoint>, DatastoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let err = DatastoreError::new("deadlock detected").with_code("40P01");
        assert_eq!(err.to_string(), "[40P01] deadlock detected");
        assert_eq!(DatastoreError::new("boom").to_string(), "boom");
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_pool_failures_map_to_connection_code() {
        let err: DatastoreError = sqlx::Error::PoolTimedOut.into();
        assert_eq!(err.code(), Some(sql_state::CONNECTION_FAILURE));

        let err: DatastoreError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), None);
    }
}
