//! # Batch Checkpoints
//!
//! Durable per-job record of which items a batch has completed or failed, used
//! to resume a batch after a restart without redoing finished work.
//!
//! ## Overview
//!
//! A checkpoint is keyed by `job_id`. It is created by the first
//! [`CheckpointManager::save_checkpoint`] for a job and upserted after every
//! processed item. Saves run inside a transaction through
//! [`TransactionWrapper::with_transaction_retry`], so a deadlocked upsert is
//! retried before it surfaces as a [`CheckpointError::Save`].
//!
//! Loading a job with no checkpoint is not an error. Cleanup failures are logged
//! and swallowed; a stale checkpoint only makes a finished job look resumable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::database::{
    CheckpointRepository, DatabaseError, TransactionConfig, TransactionWrapper,
    TransactionalDatastore,
};
use crate::logging::log_database_operation;

/// An item that failed processing, with the error text reported for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub item_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl FailedItem {
    pub fn new(item_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Stored checkpoint row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCheckpoint {
    pub id: Uuid,
    pub job_id: String,
    pub completed_items: Vec<String>,
    pub failed_items: Vec<FailedItem>,
    /// 0-100
    pub progress_percentage: i32,
    pub last_checkpoint_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchCheckpoint {
    pub fn is_completed(&self, item_id: &str) -> bool {
        self.completed_items.iter().any(|id| id == item_id)
    }

    pub fn is_failed(&self, item_id: &str) -> bool {
        self.failed_items.iter().any(|failed| failed.item_id == item_id)
    }

    /// Whether the item was already handled, successfully or not
    pub fn is_processed(&self, item_id: &str) -> bool {
        self.is_completed(item_id) || self.is_failed(item_id)
    }
}

/// Values written by a checkpoint upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointUpdate {
    pub job_id: String,
    pub completed_items: Vec<String>,
    pub failed_items: Vec<FailedItem>,
    pub progress_percentage: i32,
}

impl CheckpointUpdate {
    pub fn new(
        job_id: impl Into<String>,
        completed_items: Vec<String>,
        failed_items: Vec<FailedItem>,
        progress_percentage: i32,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            completed_items,
            failed_items,
            progress_percentage,
        }
    }
}

/// Progress summary derived from a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub pending_items: usize,
    pub progress_percentage: i32,
}

#[derive(Debug, Clone, Error)]
pub enum CheckpointError {
    #[error("Failed to save batch checkpoint for job {job_id}: {source}")]
    Save {
        job_id: String,
        #[source]
        source: DatabaseError,
    },
    #[error("Failed to load batch checkpoint for job {job_id}: {source}")]
    Load {
        job_id: String,
        #[source]
        source: DatabaseError,
    },
    #[error("Failed to load incomplete checkpoints: {0}")]
    List(#[source] DatabaseError),
}

impl CheckpointError {
    pub fn database_error(&self) -> &DatabaseError {
        match self {
            Self::Save { source, .. } | Self::Load { source, .. } => source,
            Self::List(source) => source,
        }
    }
}

/// `round(100 * processed / total)`, clamped to 0-100; an empty batch is complete
pub fn progress_percentage(completed: usize, failed: usize, total_items: usize) -> i32 {
    if total_items == 0 {
        return 100;
    }
    let processed = (completed + failed) as f64;
    let percentage = (processed / total_items as f64 * 100.0).round();
    percentage.clamp(0.0, 100.0) as i32
}

/// Summarize `checkpoint` against the batch size
pub fn calculate_progress(checkpoint: &BatchCheckpoint, total_items: usize) -> BatchProgress {
    let completed_items = checkpoint.completed_items.len();
    let failed_items = checkpoint.failed_items.len();

    BatchProgress {
        total_items,
        completed_items,
        failed_items,
        pending_items: total_items.saturating_sub(completed_items + failed_items),
        progress_percentage: checkpoint.progress_percentage,
    }
}

/// Whether `item_id` is recorded as completed; failures do not count
pub fn is_item_completed(item_id: &str, checkpoint: Option<&BatchCheckpoint>) -> bool {
    checkpoint.is_some_and(|checkpoint| checkpoint.is_completed(item_id))
}

/// Checkpoint persistence over a transactional datastore
pub struct CheckpointManager<S> {
    transactions: TransactionWrapper<S>,
    config: TransactionConfig,
}

impl<S> Clone for CheckpointManager<S> {
    fn clone(&self) -> Self {
        Self {
            transactions: self.transactions.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> std::fmt::Debug for CheckpointManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S> CheckpointManager<S>
where
    S: TransactionalDatastore + CheckpointRepository,
    S::Handle: CheckpointRepository,
{
    pub fn new(datastore: Arc<S>, config: TransactionConfig) -> Self {
        Self {
            transactions: TransactionWrapper::new(datastore),
            config,
        }
    }

    pub fn datastore(&self) -> &Arc<S> {
        self.transactions.datastore()
    }

    pub fn transaction_config(&self) -> &TransactionConfig {
        &self.config
    }

    /// Upsert the checkpoint for `job_id` inside a transaction
    #[instrument(skip(self, completed_items, failed_items), fields(
        completed = completed_items.len(),
        failed = failed_items.len()
    ))]
    pub async fn save_checkpoint(
        &self,
        job_id: &str,
        completed_items: &[String],
        failed_items: &[FailedItem],
        total_items: usize,
    ) -> Result<BatchCheckpoint, CheckpointError> {
        let progress =
            progress_percentage(completed_items.len(), failed_items.len(), total_items);
        let update = CheckpointUpdate::new(
            job_id,
            completed_items.to_vec(),
            failed_items.to_vec(),
            progress,
        );
        let update = &update;

        debug!(progress, "Saving batch checkpoint");

        let checkpoint = self
            .transactions
            .with_transaction_retry(
                |ctx| async move {
                    ctx.client
                        .upsert_checkpoint(update)
                        .await
                        .map_err(|err| DatabaseError::classify(&err, Some(ctx.transaction_id)))
                },
                &self.config,
            )
            .await
            .map_err(|source| CheckpointError::Save {
                job_id: job_id.to_string(),
                source,
            })?;

        log_database_operation(
            "upsert_checkpoint",
            Some(crate::constants::CHECKPOINT_TABLE),
            Some(job_id),
            "success",
            None,
            Some(&format!("progress={progress}")),
        );
        Ok(checkpoint)
    }

    /// Stored checkpoint for `job_id`, or `None` when the job has none
    #[instrument(skip(self))]
    pub async fn load_checkpoint(
        &self,
        job_id: &str,
    ) -> Result<Option<BatchCheckpoint>, CheckpointError> {
        let checkpoint = self
            .datastore()
            .find_checkpoint(job_id)
            .await
            .map_err(|err| CheckpointError::Load {
                job_id: job_id.to_string(),
                source: DatabaseError::from(err),
            })?;

        match &checkpoint {
            Some(found) => info!(
                progress = found.progress_percentage,
                completed = found.completed_items.len(),
                failed = found.failed_items.len(),
                "Batch checkpoint loaded"
            ),
            None => debug!("No checkpoint found for batch"),
        }
        Ok(checkpoint)
    }

    /// Delete the checkpoint for `job_id`; failures are logged, never returned
    #[instrument(skip(self))]
    pub async fn cleanup_checkpoint(&self, job_id: &str) {
        match self.datastore().delete_checkpoint(job_id).await {
            Ok(deleted) => info!(deleted, "🧹 Batch checkpoint cleaned up"),
            Err(err) => warn!(
                error = %err,
                "Failed to clean up batch checkpoint (non-critical)"
            ),
        }
    }

    /// Checkpoints below 100% progress, most recently updated first
    #[instrument(skip(self))]
    pub async fn get_incomplete_checkpoints(&self) -> Result<Vec<BatchCheckpoint>, CheckpointError> {
        let checkpoints = self
            .datastore()
            .find_incomplete_checkpoints()
            .await
            .map_err(|err| CheckpointError::List(DatabaseError::from(err)))?;

        info!(count = checkpoints.len(), "Incomplete checkpoints loaded");
        Ok(checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatastoreError, InMemoryDatastore, MemoryOperation};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|id| id.to_string()).collect()
    }

    fn manager(store: &InMemoryDatastore) -> CheckpointManager<InMemoryDatastore> {
        CheckpointManager::new(Arc::new(store.clone()), TransactionConfig::default())
    }

    #[test]
    fn test_failed_item_uses_camel_case_json() {
        let stored = serde_json::json!({
            "itemId": "conv-2",
            "error": "boom",
            "timestamp": "2025-01-01T00:00:00Z"
        });
        let item: FailedItem = serde_json::from_value(stored.clone()).unwrap();
        assert_eq!(item.item_id, "conv-2");
        assert_eq!(item.error, "boom");

        let written = serde_json::to_value(&item).unwrap();
        assert_eq!(written, stored);
        assert!(written.get("item_id").is_none());
    }

    #[test]
    fn test_progress_percentage_rounding() {
        assert_eq!(progress_percentage(5, 0, 5), 100);
        assert_eq!(progress_percentage(1, 0, 3), 33);
        assert_eq!(progress_percentage(1, 1, 3), 67);
        assert_eq!(progress_percentage(0, 0, 0), 100);
        assert_eq!(progress_percentage(4, 4, 3), 100);
    }

    #[test]
    fn test_calculate_progress_counts_pending() {
        let now = Utc::now();
        let checkpoint = BatchCheckpoint {
            id: Uuid::new_v4(),
            job_id: "job".to_string(),
            completed_items: ids(&["a", "b"]),
            failed_items: vec![FailedItem::new("c", "boom")],
            progress_percentage: 30,
            last_checkpoint_at: now,
            created_at: now,
            updated_at: now,
        };

        let progress = calculate_progress(&checkpoint, 10);
        assert_eq!(progress.completed_items, 2);
        assert_eq!(progress.failed_items, 1);
        assert_eq!(progress.pending_items, 7);
        assert_eq!(progress.progress_percentage, 30);

        assert!(is_item_completed("a", Some(&checkpoint)));
        assert!(!is_item_completed("c", Some(&checkpoint)));
        assert!(!is_item_completed("a", None));
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let store = InMemoryDatastore::new();
        let checkpoints = manager(&store);

        let saved = checkpoints
            .save_checkpoint("job-1", &ids(&["x1", "x2", "x3", "x4", "x5"]), &[], 5)
            .await
            .unwrap();
        assert_eq!(saved.progress_percentage, 100);
        assert_eq!(store.commit_calls(), 1);

        let loaded = checkpoints.load_checkpoint("job-1").await.unwrap().unwrap();
        assert_eq!(loaded.id, saved.id);
        assert_eq!(loaded.completed_items.len(), 5);
    }

    #[tokio::test]
    async fn test_load_missing_checkpoint_is_none() {
        let store = InMemoryDatastore::new();
        assert!(manager(&store).load_checkpoint("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_failure_is_classified_and_rolled_back() {
        let store = InMemoryDatastore::new();
        store.fail_next(
            MemoryOperation::Upsert,
            DatastoreError::new("duplicate key value")
                .with_code("23505")
                .with_detail("Key (job_id)=(job-1) already exists."),
        );

        let err = manager(&store)
            .save_checkpoint("job-1", &ids(&["a"]), &[], 2)
            .await
            .unwrap_err();

        assert!(matches!(
            err.database_error(),
            DatabaseError::UniqueViolation { constraint } if constraint == "job_id"
        ));
        assert_eq!(store.rollback_calls(), 1);
        assert_eq!(store.checkpoint_count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_swallows_failures() {
        let store = InMemoryDatastore::new();
        let checkpoints = manager(&store);
        checkpoints
            .save_checkpoint("job-1", &ids(&["a"]), &[], 2)
            .await
            .unwrap();

        store.fail_next(MemoryOperation::Delete, DatastoreError::new("connection reset"));
        checkpoints.cleanup_checkpoint("job-1").await;
        assert_eq!(store.checkpoint_count(), 1);

        checkpoints.cleanup_checkpoint("job-1").await;
        assert_eq!(store.checkpoint_count(), 0);
    }

    #[tokio::test]
    async fn test_incomplete_checkpoints_exclude_finished_jobs() {
        let store = InMemoryDatastore::new();
        let checkpoints = manager(&store);
        checkpoints
            .save_checkpoint("finished", &ids(&["a", "b"]), &[], 2)
            .await
            .unwrap();
        checkpoints
            .save_checkpoint("partial", &ids(&["a"]), &[], 4)
            .await
            .unwrap();

        let incomplete = checkpoints.get_incomplete_checkpoints().await.unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].job_id, "partial");
        assert_eq!(incomplete[0].progress_percentage, 25);

        store.fail_next(MemoryOperation::ListIncomplete, DatastoreError::new("boom"));
        assert!(matches!(
            checkpoints.get_incomplete_checkpoints().await,
            Err(CheckpointError::List(_))
        ));
    }
}
