//! # System Context
//!
//! Dependency container for the shared, process-wide components. A context is
//! built once from [`ConduitConfig`]; every [`QueueProcessor`] it hands out works
//! against the same [`RateLimiter`] and [`PriorityRequestQueue`], so admission and
//! ordering stay consistent across the process.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::batch::{BatchProcessor, CheckpointManager};
use crate::config::{ConduitConfig, ConfigManager};
use crate::database::{CheckpointRepository, TransactionWrapper, TransactionalDatastore};
use crate::error::Result;
use crate::queue::{PriorityRequestQueue, QueueProcessor};
use crate::resilience::{create_retry_strategy, RateLimiter, RetryExecutor};

/// Shared components for one payload type `T`
pub struct SystemContext<T> {
    /// System instance ID
    pub system_id: Uuid,
    config: ConduitConfig,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<PriorityRequestQueue<T>>,
}

impl<T> std::fmt::Debug for SystemContext<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemContext")
            .field("system_id", &self.system_id)
            .field("rate_limiter", &"Arc<RateLimiter>")
            .field("queue", &"Arc<PriorityRequestQueue>")
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> SystemContext<T> {
    /// Build from `conduit-config.yaml` with the auto-detected environment
    pub fn new() -> Result<Self> {
        let config_manager = ConfigManager::load()?;
        Self::from_config(config_manager.config().clone())
    }

    pub fn from_config(config: ConduitConfig) -> Result<Self> {
        config.validate()?;

        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limiter.clone())?);
        let queue = Arc::new(PriorityRequestQueue::new());
        let system_id = Uuid::new_v4();

        info!(
            %system_id,
            request_limit = config.rate_limiter.request_limit,
            max_concurrent = config.queue_processor.max_concurrent,
            "🔧 SystemContext initialized"
        );

        Ok(Self {
            system_id,
            config,
            rate_limiter,
            queue,
        })
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn queue(&self) -> &Arc<PriorityRequestQueue<T>> {
        &self.queue
    }

    /// Processor over the shared limiter and queue, bounded by the limiter's
    /// concurrency and pause settings; started when `auto_start` is set
    pub fn queue_processor(&self) -> Result<QueueProcessor<T>> {
        let config = self
            .config
            .queue_processor
            .constrained_by(&self.config.rate_limiter);
        let processor =
            QueueProcessor::new(Arc::clone(&self.rate_limiter), Arc::clone(&self.queue), config)?;

        if self.config.queue_processor.auto_start {
            processor.start();
        }
        Ok(processor)
    }

    /// Executor using the configured retry strategy
    pub fn retry_executor(&self) -> Result<RetryExecutor> {
        let strategy = create_retry_strategy(&self.config.retry)?;
        Ok(RetryExecutor::new(strategy))
    }

    pub fn transaction_wrapper<S: TransactionalDatastore>(
        &self,
        datastore: Arc<S>,
    ) -> TransactionWrapper<S> {
        TransactionWrapper::new(datastore)
    }

    /// Batch processor persisting checkpoints to `datastore` with the configured transaction settings
    pub fn batch_processor<S>(&self, datastore: Arc<S>) -> BatchProcessor<S>
    where
        S: TransactionalDatastore + CheckpointRepository,
        S::Handle: CheckpointRepository,
    {
        let checkpoints = CheckpointManager::new(datastore, self.config.transaction.clone());
        BatchProcessor::new(checkpoints, self.config.batch.clone())
    }

    /// Clear the limiter window and the queue, keeping both instances
    pub fn reset(&self) {
        self.rate_limiter.reset();
        self.queue.reset();
        info!(system_id = %self.system_id, "SystemContext reset");
    }
}
