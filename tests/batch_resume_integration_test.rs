//! Batch Resume Integration Tests
//!
//! Interrupted batch jobs resumed from their checkpoints against the in-memory
//! datastore.

use conduit_core::batch::{
    calculate_progress, BatchConfig, BatchError, BatchProcessor, CheckpointError,
    CheckpointManager, ProgressUpdate,
};
use conduit_core::database::{
    DatabaseError, DatastoreError, InMemoryDatastore, MemoryOperation, TransactionConfig,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn processor(store: &InMemoryDatastore) -> BatchProcessor<InMemoryDatastore> {
    let checkpoints = CheckpointManager::new(Arc::new(store.clone()), TransactionConfig::default());
    BatchProcessor::new(checkpoints, BatchConfig::default())
}

fn conversations(count: usize) -> Vec<String> {
    (1..=count).map(|n| format!("conv-{n}")).collect()
}

#[tokio::test]
async fn interrupted_batch_resumes_without_redoing_work() {
    let store = InMemoryDatastore::new();
    let items = conversations(5);
    let processed = Mutex::new(Vec::new());

    // First run: the checkpoint write for the third item fails, ending the run
    let batch = processor(&store);
    let mut saves = 0;
    let first = batch
        .resume_batch_processing(
            "job-1",
            &items,
            |item: &String| {
                processed.lock().push(item.clone());
                saves += 1;
                if saves == 3 {
                    store.fail_next(
                        MemoryOperation::Upsert,
                        DatastoreError::new("connection reset").with_code("08006"),
                    );
                }
                async { Ok::<_, anyhow::Error>(()) }
            },
            None,
        )
        .await;
    assert!(matches!(
        first,
        Err(BatchError::Checkpoint(CheckpointError::Save { .. }))
    ));

    let stored = batch
        .checkpoints()
        .load_checkpoint("job-1")
        .await
        .unwrap()
        .expect("checkpoint from first run");
    assert_eq!(stored.completed_items, vec!["conv-1", "conv-2"]);
    assert_eq!(stored.progress_percentage, 40);

    // Second run picks up at the item whose checkpoint was lost
    processed.lock().clear();
    let result = batch
        .resume_batch_processing(
            "job-1",
            &items,
            |item: &String| {
                processed.lock().push(item.clone());
                async { Ok::<_, anyhow::Error>(()) }
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(processed.lock().clone(), vec!["conv-3", "conv-4", "conv-5"]);
    assert_eq!(result.completed, items);
    assert!(result.failed.is_empty());

    let stored = batch.checkpoints().load_checkpoint("job-1").await.unwrap().unwrap();
    assert_eq!(stored.progress_percentage, 100);
    assert!(batch
        .checkpoints()
        .get_incomplete_checkpoints()
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn failures_persist_across_resumes() {
    let store = InMemoryDatastore::new();
    let items = conversations(4);
    let batch = processor(&store);
    let updates = Mutex::new(Vec::new());
    let record = |update: ProgressUpdate| updates.lock().push(update);

    let result = batch
        .resume_batch_processing(
            "job-2",
            &items,
            |item: &String| {
                let fail = item == "conv-2";
                async move {
                    if fail {
                        anyhow::bail!("Generation rejected: invalid parameters");
                    }
                    Ok(())
                }
            },
            Some(&record),
        )
        .await
        .unwrap();

    assert_eq!(result.completed.len(), 3);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(
        updates.lock().last().copied(),
        Some(ProgressUpdate {
            completed: 3,
            failed: 1,
            total: 4
        })
    );

    // A later resume does not retry the recorded failure
    let result = batch
        .resume_batch_processing(
            "job-2",
            &items,
            |_item: &String| async { Err::<(), _>(anyhow::anyhow!("should not run")) },
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].item_id, "conv-2");
    assert_eq!(result.failed[0].error, "Generation rejected: invalid parameters");

    let stored = batch.checkpoints().load_checkpoint("job-2").await.unwrap().unwrap();
    let progress = calculate_progress(&stored, items.len());
    assert_eq!(progress.pending_items, 0);
    assert_eq!(progress.failed_items, 1);
}

#[tokio::test(start_paused = true)]
async fn deadlocked_checkpoint_write_is_retried() {
    let store = InMemoryDatastore::new();
    store.inject_failure(
        MemoryOperation::Upsert,
        DatastoreError::new("deadlock detected").with_code("40P01"),
        2,
    );
    let checkpoints = CheckpointManager::new(Arc::new(store.clone()), TransactionConfig::default());

    let saved = checkpoints
        .save_checkpoint("job-3", &conversations(1), &[], 2)
        .await
        .unwrap();

    assert_eq!(saved.progress_percentage, 50);
    assert_eq!(store.begin_calls(), 3);
    assert_eq!(store.rollback_calls(), 2);
    assert_eq!(store.commit_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadlock_retries_respect_the_budget() {
    let store = InMemoryDatastore::new();
    store.inject_failure(
        MemoryOperation::Upsert,
        DatastoreError::new("deadlock detected").with_code("40P01"),
        10,
    );
    let config = TransactionConfig {
        max_retries: 1,
        ..TransactionConfig::default()
    };
    let checkpoints = CheckpointManager::new(Arc::new(store.clone()), config);

    let err = checkpoints
        .save_checkpoint("job-4", &conversations(1), &[], 1)
        .await
        .unwrap_err();

    assert!(matches!(
        err.database_error(),
        DatabaseError::Deadlock {
            transaction_id: Some(_)
        }
    ));
    assert_eq!(store.begin_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_resume_of_one_job_is_rejected() {
    let store = InMemoryDatastore::new();
    let batch = processor(&store);
    let items = conversations(2);

    let first = batch.resume_batch_processing(
        "job-5",
        &items,
        |_item: &String| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, anyhow::Error>(())
        },
        None,
    );
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(batch.is_running("job-5"));
        batch
            .resume_batch_processing(
                "job-5",
                &items,
                |_item: &String| async { Ok::<_, anyhow::Error>(()) },
                None,
            )
            .await
    };

    let (first, second) = tokio::join!(first, second);
    assert!(matches!(second, Err(BatchError::JobAlreadyRunning(_))));
    assert_eq!(first.unwrap().completed.len(), 2);
    assert!(!batch.is_running("job-5"));
}

#[tokio::test]
async fn cleanup_on_completion_removes_checkpoint() {
    let store = InMemoryDatastore::new();
    let checkpoints = CheckpointManager::new(Arc::new(store.clone()), TransactionConfig::default());
    let batch = BatchProcessor::new(
        checkpoints,
        BatchConfig {
            cleanup_on_completion: true,
        },
    );

    let result = batch
        .resume_batch_processing(
            "job-6",
            &conversations(3),
            |_item: &String| async { Ok::<_, anyhow::Error>(()) },
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.completed.len(), 3);
    assert_eq!(store.checkpoint_count(), 0);
}
