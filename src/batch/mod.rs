//! # Batch Jobs
//!
//! Checkpointed execution of long-running batches.
//!
//! - [`checkpoint`] - [`BatchCheckpoint`] persistence through [`CheckpointManager`]
//! - [`processor`] - [`BatchProcessor`], which resumes a job from its last checkpoint

pub mod checkpoint;
pub mod processor;

pub use checkpoint::{
    calculate_progress, is_item_completed, progress_percentage, BatchCheckpoint, BatchProgress,
    CheckpointError, CheckpointManager, CheckpointUpdate, FailedItem,
};
pub use processor::{
    filter_pending_items, BatchConfig, BatchError, BatchItem, BatchProcessor, BatchResult,
    ProgressUpdate,
};
