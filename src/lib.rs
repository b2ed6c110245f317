#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conduit Core
//!
//! Resilient, throttled batch execution for bulk calls to a rate-limited
//! generation service.
//!
//! ## Overview
//!
//! Conduit coordinates four concerns that interact closely:
//!
//! - **Admission control**: a sliding-window [`RateLimiter`] that never lets the
//!   process exceed the upstream request quota
//! - **Retry policy**: pluggable [`RetryStrategy`] implementations applied by a
//!   [`RetryExecutor`] to any async operation, with message-based
//!   [`ErrorClassifier`] deciding what is worth retrying
//! - **Prioritized work**: a [`PriorityRequestQueue`] drained by a
//!   [`QueueProcessor`] under a concurrency cap
//! - **Durable batches**: a [`BatchProcessor`] that checkpoints after every item
//!   through a [`TransactionWrapper`], so an interrupted job resumes where it stopped
//!
//! The limiter and queue are single-process structures. They do not coordinate
//! across processes.
//!
//! ## Module Organization
//!
//! - [`resilience`] - Rate limiting, error classification, retry strategies and executor
//! - [`queue`] - Priority queue and the polling queue processor
//! - [`database`] - Datastore traits, transaction wrapper, PostgreSQL and in-memory stores
//! - [`batch`] - Checkpoints and the resumable batch processor
//! - [`config`] - YAML configuration with environment overrides
//! - [`system_context`] - Shared component wiring
//! - [`logging`] - Structured logging setup and domain log helpers
//! - [`error`] - Crate-wide error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conduit_core::config::ConduitConfig;
//! use conduit_core::queue::{EnqueueOptions, QueuePriority};
//! use conduit_core::SystemContext;
//!
//! # async fn example() -> conduit_core::Result<()> {
//! conduit_core::logging::init_structured_logging();
//!
//! let context: SystemContext<String> = SystemContext::from_config(ConduitConfig::default())?;
//! let options = EnqueueOptions::new().on_complete(|topic: String| async move {
//!     println!("generated {topic}");
//!     Ok(())
//! });
//! context
//!     .queue()
//!     .enqueue("Onboarding".to_string(), QueuePriority::High, options);
//!
//! let processor = context.queue_processor()?;
//! processor.start();
//! # processor.stop().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod batch;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod logging;
pub mod queue;
pub mod resilience;
pub mod system_context;

pub use batch::{
    BatchCheckpoint, BatchConfig, BatchError, BatchItem, BatchProcessor, BatchResult,
    CheckpointError, CheckpointManager, FailedItem,
};
pub use config::{ConduitConfig, ConfigManager, ConfigurationError, DatabaseConfig};
pub use database::{
    CheckpointRepository, DatabaseError, DatastoreError, InMemoryDatastore, IsolationLevel,
    TransactionConfig, TransactionWrapper, TransactionalDatastore,
};
#[cfg(feature = "postgres")]
pub use database::PgDatastore;
pub use error::{ConduitError, Result};
pub use queue::{EnqueueOptions, PriorityRequestQueue, QueuePriority, QueueProcessor};
pub use resilience::{
    ErrorCategory, ErrorClassification, ErrorClassifier, RateLimiter, RateLimiterConfig,
    RetryExecutor, RetryStrategy, RetryStrategyConfig,
};
pub use system_context::SystemContext;
