//! # Resumable Batch Processor
//!
//! Drives a caller-supplied per-item function over a batch, persisting a
//! checkpoint after every item so an interrupted job resumes where it stopped.
//!
//! ## Resume Flow
//!
//! 1. Load the job's checkpoint (absent on the first run)
//! 2. Skip every item already recorded as completed or failed
//! 3. Process the remaining items one at a time; a failing item is recorded and
//!    the loop continues
//! 4. Save a checkpoint and report progress after each item
//!
//! The returned [`BatchResult`] merges the previous checkpoint with this run's
//! outcomes. An item whose checkpoint write fails is not counted as completed and
//! is processed again on the next resume, so `process_fn` should be idempotent.
//!
//! Only one resume per `job_id` may run at a time within a process; a second call
//! fails with [`BatchError::JobAlreadyRunning`]. Separate processes sharing a
//! datastore are not coordinated.
//!
//! ## Example
//!
//! ```rust
//! use conduit_core::batch::{BatchConfig, BatchProcessor, CheckpointManager};
//! use conduit_core::database::{InMemoryDatastore, TransactionConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let checkpoints = CheckpointManager::new(
//!     Arc::new(InMemoryDatastore::new()),
//!     TransactionConfig::default(),
//! );
//! let processor = BatchProcessor::new(checkpoints, BatchConfig::default());
//!
//! let conversations = vec!["conv-1".to_string(), "conv-2".to_string()];
//! let result = processor
//!     .resume_batch_processing(
//!         "nightly-export",
//!         &conversations,
//!         |_id: &String| async { Ok::<_, anyhow::Error>(()) },
//!         None,
//!     )
//!     .await
//!     .unwrap();
//! assert_eq!(result.completed.len(), 2);
//! # });
//! ```

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use super::checkpoint::{BatchCheckpoint, CheckpointError, CheckpointManager, FailedItem};
use crate::config::ConfigResult;
use crate::database::{CheckpointRepository, TransactionalDatastore};
use crate::logging::{log_batch_operation, log_error};

/// Anything with a stable identifier can be a batch item
pub trait BatchItem {
    fn item_id(&self) -> &str;
}

impl BatchItem for String {
    fn item_id(&self) -> &str {
        self
    }
}

impl BatchItem for &str {
    fn item_id(&self) -> &str {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Delete the checkpoint once a run has processed every pending item
    pub cleanup_on_completion: bool,
}

impl BatchConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

/// Counts passed to the progress callback after each item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

/// Completed ids and failures across every run of a job
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub completed: Vec<String>,
    pub failed: Vec<FailedItem>,
}

#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error("Batch job {0} is already running in this process")]
    JobAlreadyRunning(String),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
}

/// Items not yet recorded in `checkpoint`, in their original order
pub fn filter_pending_items<'a, I: BatchItem>(
    all_items: &'a [I],
    checkpoint: Option<&BatchCheckpoint>,
) -> Vec<&'a I> {
    match checkpoint {
        None => all_items.iter().collect(),
        Some(checkpoint) => all_items
            .iter()
            .filter(|item| !checkpoint.is_processed(item.item_id()))
            .collect(),
    }
}

/// Removes the job from the running set when the resume ends, however it ends
struct JobGuard {
    running: Arc<DashMap<String, Instant>>,
    job_id: String,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.running.remove(&self.job_id);
    }
}

/// Checkpointed, sequential batch driver
pub struct BatchProcessor<S> {
    checkpoints: CheckpointManager<S>,
    config: BatchConfig,
    running: Arc<DashMap<String, Instant>>,
}

impl<S> fmt::Debug for BatchProcessor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("config", &self.config)
            .field("running_jobs", &self.running.len())
            .finish_non_exhaustive()
    }
}

impl<S> BatchProcessor<S>
where
    S: TransactionalDatastore + CheckpointRepository,
    S::Handle: CheckpointRepository,
{
    pub fn new(checkpoints: CheckpointManager<S>, config: BatchConfig) -> Self {
        Self {
            checkpoints,
            config,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn checkpoints(&self) -> &CheckpointManager<S> {
        &self.checkpoints
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running.contains_key(job_id)
    }

    fn claim(&self, job_id: &str) -> Result<JobGuard, BatchError> {
        match self.running.entry(job_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                warn!(job_id, "Batch job already running, refusing concurrent resume");
                Err(BatchError::JobAlreadyRunning(job_id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(Instant::now());
                Ok(JobGuard {
                    running: Arc::clone(&self.running),
                    job_id: job_id.to_string(),
                })
            }
        }
    }

    /// Process every item of `all_items` not already recorded for `job_id`
    #[instrument(skip(self, all_items, process_fn, on_progress), fields(total = all_items.len()))]
    pub async fn resume_batch_processing<I, F, Fut, E>(
        &self,
        job_id: &str,
        all_items: &[I],
        mut process_fn: F,
        on_progress: Option<&(dyn Fn(ProgressUpdate) + Send + Sync)>,
    ) -> Result<BatchResult, BatchError>
    where
        I: BatchItem,
        F: FnMut(&I) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: fmt::Display,
    {
        let _guard = self.claim(job_id)?;
        let started = Instant::now();
        let total = all_items.len();

        let checkpoint = self.checkpoints.load_checkpoint(job_id).await?;
        let pending = filter_pending_items(all_items, checkpoint.as_ref());

        let (mut completed, mut failed) = match checkpoint {
            Some(checkpoint) => (checkpoint.completed_items, checkpoint.failed_items),
            None => (Vec::new(), Vec::new()),
        };

        log_batch_operation(
            "resume",
            job_id,
            completed.len(),
            failed.len(),
            total,
            &format!("{} pending", pending.len()),
        );

        for item in pending {
            let item_id = item.item_id();

            match process_fn(item).await {
                Ok(()) => {
                    debug!(item_id, "Batch item processed");
                    completed.push(item_id.to_string());
                }
                Err(err) => {
                    let message = err.to_string();
                    log_error("batch_processor", "process_item", &message, Some(item_id));
                    failed.push(FailedItem::new(item_id, message));
                }
            }

            if let Err(err) = self
                .checkpoints
                .save_checkpoint(job_id, &completed, &failed, total)
                .await
            {
                log_error(
                    "batch_processor",
                    "save_checkpoint",
                    &err.to_string(),
                    Some(item_id),
                );
                log_batch_operation(
                    "resume",
                    job_id,
                    completed.len(),
                    failed.len(),
                    total,
                    "checkpoint_failed",
                );
                return Err(err.into());
            }

            if let Some(on_progress) = on_progress {
                on_progress(ProgressUpdate {
                    completed: completed.len(),
                    failed: failed.len(),
                    total,
                });
            }
        }

        info!(
            job_id,
            completed = completed.len(),
            failed = failed.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "✅ Batch processing finished"
        );
        log_batch_operation(
            "resume",
            job_id,
            completed.len(),
            failed.len(),
            total,
            "finished",
        );

        if self.config.cleanup_on_completion {
            self.checkpoints.cleanup_checkpoint(job_id).await;
        }

        Ok(BatchResult { completed, failed })
    }
}
