//! # Queue Module
//!
//! Priority-ordered work queue and the polling processor that drains it under
//! rate limiter admission and a concurrency cap.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_core::queue::{EnqueueOptions, PriorityRequestQueue, QueuePriority, QueueProcessor, QueueProcessorConfig};
//! use conduit_core::resilience::{RateLimiter, RateLimiterConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::default())?);
//! let queue = Arc::new(PriorityRequestQueue::<String>::new());
//!
//! queue.enqueue(
//!     "generate chapter 1".to_string(),
//!     QueuePriority::High,
//!     EnqueueOptions::new().on_complete(|prompt| async move {
//!         println!("calling service with {prompt}");
//!         Ok(())
//!     }),
//! );
//!
//! let processor = QueueProcessor::new(limiter, queue, QueueProcessorConfig::default())?;
//! processor.start();
//! # processor.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod priority_queue;
pub mod processor;

pub use priority_queue::{
    CompletionHandler, EnqueueOptions, ErrorHandler, PriorityCounts, PriorityRequestQueue,
    QueueInfo, QueueItem, QueuePriority, QueueStats,
};
pub use processor::{
    QueueProcessor, QueueProcessorConfig, QueueProcessorError, QueueProcessorStatus, TickOutcome,
};
