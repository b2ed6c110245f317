//! In-process datastore with transaction semantics, for tests and local runs.
//!
//! `begin` snapshots the checkpoint table and `rollback` restores the snapshot.
//! Every operation is counted and any operation can be made to fail a given number
//! of times through [`InMemoryDatastore::inject_failure`].
//!
//! Sessions write straight to the shared table, so two overlapping transactions
//! that both roll back restore whichever snapshot lands last.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::datastore::{CheckpointRepository, DatastoreError, TransactionalDatastore};
use super::transaction::IsolationLevel;
use crate::batch::{BatchCheckpoint, CheckpointUpdate};

/// Operations that can be counted and made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOperation {
    Begin,
    Commit,
    Rollback,
    Upsert,
    Find,
    Delete,
    ListIncomplete,
}

const OPERATION_COUNT: usize = 7;

impl MemoryOperation {
    fn index(self) -> usize {
        match self {
            Self::Begin => 0,
            Self::Commit => 1,
            Self::Rollback => 2,
            Self::Upsert => 3,
            Self::Find => 4,
            Self::Delete => 5,
            Self::ListIncomplete => 6,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    checkpoints: Mutex<HashMap<String, BatchCheckpoint>>,
    failures: Mutex<HashMap<MemoryOperation, (DatastoreError, usize)>>,
    calls: [AtomicU64; OPERATION_COUNT],
}

impl MemoryInner {
    fn record(&self, operation: MemoryOperation) -> Result<(), DatastoreError> {
        self.calls[operation.index()].fetch_add(1, Ordering::SeqCst);

        let mut failures = self.failures.lock();
        if let Some((error, remaining)) = failures.get_mut(&operation) {
            let error = error.clone();
            *remaining -= 1;
            if *remaining == 0 {
                failures.remove(&operation);
            }
            debug!(operation = ?operation, error = %error, "Injected datastore failure");
            return Err(error);
        }
        Ok(())
    }

    fn upsert(&self, update: &CheckpointUpdate) -> Result<BatchCheckpoint, DatastoreError> {
        self.record(MemoryOperation::Upsert)?;

        let now = Utc::now();
        let mut checkpoints = self.checkpoints.lock();
        let checkpoint = checkpoints
            .entry(update.job_id.clone())
            .and_modify(|existing| {
                existing.completed_items = update.completed_items.clone();
                existing.failed_items = update.failed_items.clone();
                existing.progress_percentage = update.progress_percentage;
                existing.last_checkpoint_at = now;
                existing.updated_at = now;
            })
            .or_insert_with(|| BatchCheckpoint {
                id: Uuid::new_v4(),
                job_id: update.job_id.clone(),
                completed_items: update.completed_items.clone(),
                failed_items: update.failed_items.clone(),
                progress_percentage: update.progress_percentage,
                last_checkpoint_at: now,
                created_at: now,
                updated_at: now,
            });
        Ok(checkpoint.clone())
    }

    fn find(&self, job_id: &str) -> Result<Option<BatchCheckpoint>, DatastoreError> {
        self.record(MemoryOperation::Find)?;
        Ok(self.checkpoints.lock().get(job_id).cloned())
    }

    fn delete(&self, job_id: &str) -> Result<bool, DatastoreError> {
        self.record(MemoryOperation::Delete)?;
        Ok(self.checkpoints.lock().remove(job_id).is_some())
    }

    fn incomplete(&self) -> Result<Vec<BatchCheckpoint>, DatastoreError> {
        self.record(MemoryOperation::ListIncomplete)?;
        let mut incomplete: Vec<BatchCheckpoint> = self
            .checkpoints
            .lock()
            .values()
            .filter(|checkpoint| checkpoint.progress_percentage < 100)
            .cloned()
            .collect();
        incomplete.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(incomplete)
    }
}

/// Shared in-memory datastore; clones share the same table and counters
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatastore {
    inner: Arc<MemoryInner>,
}

/// Transaction handle holding the table snapshot taken at `begin`
#[derive(Debug)]
pub struct MemorySession {
    inner: Arc<MemoryInner>,
    snapshot: Mutex<Option<HashMap<String, BatchCheckpoint>>>,
}

impl InMemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `operation` with `error`
    pub fn inject_failure(&self, operation: MemoryOperation, error: DatastoreError, times: usize) {
        if times == 0 {
            return;
        }
        self.inner.failures.lock().insert(operation, (error, times));
    }

    pub fn fail_next(&self, operation: MemoryOperation, error: DatastoreError) {
        self.inject_failure(operation, error, 1);
    }

    pub fn call_count(&self, operation: MemoryOperation) -> u64 {
        self.inner.calls[operation.index()].load(Ordering::SeqCst)
    }

    pub fn begin_calls(&self) -> u64 {
        self.call_count(MemoryOperation::Begin)
    }

    pub fn commit_calls(&self) -> u64 {
        self.call_count(MemoryOperation::Commit)
    }

    pub fn rollback_calls(&self) -> u64 {
        self.call_count(MemoryOperation::Rollback)
    }

    pub fn checkpoint_count(&self) -> usize {
        self.inner.checkpoints.lock().len()
    }

    /// Insert a checkpoint directly, bypassing counters and failure injection
    pub fn seed_checkpoint(&self, checkpoint: BatchCheckpoint) {
        self.inner
            .checkpoints
            .lock()
            .insert(checkpoint.job_id.clone(), checkpoint);
    }
}

#[async_trait]
impl TransactionalDatastore for InMemoryDatastore {
    type Handle = MemorySession;

    async fn begin(&self, isolation_level: IsolationLevel) -> Result<MemorySession, DatastoreError> {
        self.inner.record(MemoryOperation::Begin)?;
        debug!(isolation_level = %isolation_level, "In-memory transaction started");
        Ok(MemorySession {
            inner: Arc::clone(&self.inner),
            snapshot: Mutex::new(Some(self.inner.checkpoints.lock().clone())),
        })
    }

    async fn commit(&self, handle: &MemorySession) -> Result<(), DatastoreError> {
        self.inner.record(MemoryOperation::Commit)?;
        handle.snapshot.lock().take();
        Ok(())
    }

    async fn rollback(&self, handle: &MemorySession) -> Result<(), DatastoreError> {
        self.inner.record(MemoryOperation::Rollback)?;
        if let Some(snapshot) = handle.snapshot.lock().take() {
            *self.inner.checkpoints.lock() = snapshot;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointRepository for InMemoryDatastore {
    async fn upsert_checkpoint(
        &self,
        update: &CheckpointUpdate,
    ) -> Result<BatchCheckpoint, DatastoreError> {
        self.inner.upsert(update)
    }

    async fn find_checkpoint(
        &self,
        job_id: &str,
    ) -> Result<Option<BatchCheckpoint>, DatastoreError> {
        self.inner.find(job_id)
    }

    async fn delete_checkpoint(&self, job_id: &str) -> Result<bool, DatastoreError> {
        self.inner.delete(job_id)
    }

    async fn find_incomplete_checkpoints(&self) -> Result<Vec<BatchCheckpoint>, DatastoreError> {
        self.inner.incomplete()
    }
}

#[async_trait]
impl CheckpointRepository for MemorySession {
    async fn upsert_checkpoint(
        &self,
        update: &CheckpointUpdate,
    ) -> Result<BatchCheckpoint, DatastoreError> {
        self.inner.upsert(update)
    }

    async fn find_checkpoint(
        &self,
        job_id: &str,
    ) -> Result<Option<BatchCheckpoint>, DatastoreError> {
        self.inner.find(job_id)
    }

    async fn delete_checkpoint(&self, job_id: &str) -> Result<bool, DatastoreError> {
        self.inner.delete(job_id)
    }

    async fn find_incomplete_checkpoints(&self) -> Result<Vec<BatchCheckpoint>, DatastoreError> {
        self.inner.incomplete()
    }
}
