//! # Priority Request Queue
//!
//! In-memory queue of pending work ordered by priority band, FIFO within a band.
//!
//! Insertion scans for the first item whose priority is worse than the new item's
//! and inserts before it, so dequeue order is fully determined by insertion
//! history. Requeued items go to the tail of their band with a fresh enqueue time.
//!
//! The queue also tracks lifecycle counters (enqueued, processed, failed, peak size)
//! and a rolling sample of enqueue-to-dequeue wait times.

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::constants::{DEFAULT_AVERAGE_WAIT, QUEUE_WAIT_SAMPLE_CAPACITY};

/// Priority band; `High` is served first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    High,
    #[default]
    Normal,
    Low,
}

impl QueuePriority {
    /// Lower rank is served first
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Normal => "normal",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for QueuePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work invoked by the processor with the item's payload
pub type CompletionHandler<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Notified when an item fails with a non rate-limit error
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

/// A queued unit of work
pub struct QueueItem<T> {
    pub id: String,
    pub priority: QueuePriority,
    pub payload: T,
    pub enqueued_at: Instant,
    pub retry_count: u32,
    pub on_complete: Option<CompletionHandler<T>>,
    pub on_error: Option<ErrorHandler>,
}

impl<T: Clone> Clone for QueueItem<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            priority: self.priority,
            payload: self.payload.clone(),
            enqueued_at: self.enqueued_at,
            retry_count: self.retry_count,
            on_complete: self.on_complete.clone(),
            on_error: self.on_error.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for QueueItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueItem")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("enqueued_at", &self.enqueued_at)
            .field("retry_count", &self.retry_count)
            .field("has_on_complete", &self.on_complete.is_some())
            .field("has_on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Optional id and callbacks supplied at enqueue time
pub struct EnqueueOptions<T> {
    pub id: Option<String>,
    pub on_complete: Option<CompletionHandler<T>>,
    pub on_error: Option<ErrorHandler>,
}

impl<T> Default for EnqueueOptions<T> {
    fn default() -> Self {
        Self {
            id: None,
            on_complete: None,
            on_error: None,
        }
    }
}

impl<T: Send + 'static> EnqueueOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn on_complete<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.on_complete = Some(Arc::new(move |payload| handler(payload).boxed()));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }
}

/// Lifecycle summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueInfo {
    pub size: usize,
    pub total_enqueued: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub is_processing: bool,
    /// Mean enqueue-to-dequeue wait over the rolling sample
    pub average_processing_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PriorityCounts {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    pub current_size: usize,
    pub peak_size: usize,
    pub average_wait_time: Duration,
    pub items_by_priority: PriorityCounts,
}

struct QueueState<T> {
    items: VecDeque<QueueItem<T>>,
    total_enqueued: u64,
    total_processed: u64,
    total_failed: u64,
    is_processing: bool,
    wait_samples: VecDeque<Duration>,
    peak_size: usize,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
            total_enqueued: 0,
            total_processed: 0,
            total_failed: 0,
            is_processing: false,
            wait_samples: VecDeque::new(),
            peak_size: 0,
        }
    }
}

impl<T> QueueState<T> {
    fn insert_position(&self, priority: QueuePriority) -> usize {
        let rank = priority.rank();
        self.items
            .iter()
            .position(|item| item.priority.rank() > rank)
            .unwrap_or(self.items.len())
    }

    fn insert(&mut self, item: QueueItem<T>) {
        let index = self.insert_position(item.priority);
        self.items.insert(index, item);
        self.peak_size = self.peak_size.max(self.items.len());
    }

    fn average_wait(&self) -> Duration {
        if self.wait_samples.is_empty() {
            return DEFAULT_AVERAGE_WAIT;
        }
        let total: Duration = self.wait_samples.iter().sum();
        total / self.wait_samples.len() as u32
    }
}

/// Priority-ordered in-memory work queue
pub struct PriorityRequestQueue<T> {
    state: Mutex<QueueState<T>>,
}

impl<T> fmt::Debug for PriorityRequestQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PriorityRequestQueue")
            .field("size", &state.items.len())
            .field("total_enqueued", &state.total_enqueued)
            .field("is_processing", &state.is_processing)
            .finish()
    }
}

impl<T> Default for PriorityRequestQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
        }
    }
}

impl<T: Clone + Send + 'static> PriorityRequestQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `payload` behind every item of equal or better priority
    pub fn enqueue(&self, payload: T, priority: QueuePriority, options: EnqueueOptions<T>) -> String {
        let id = options
            .id
            .unwrap_or_else(|| format!("queue_{}", Uuid::new_v4()));

        let item = QueueItem {
            id: id.clone(),
            priority,
            payload,
            enqueued_at: Instant::now(),
            retry_count: 0,
            on_complete: options.on_complete,
            on_error: options.on_error,
        };

        let mut state = self.state.lock();
        state.total_enqueued += 1;
        state.insert(item);

        debug!(item_id = %id, priority = %priority, size = state.items.len(), "Item enqueued");
        id
    }

    /// Remove the head, recording its wait time
    pub fn dequeue(&self) -> Option<QueueItem<T>> {
        let mut state = self.state.lock();
        let item = state.items.pop_front()?;

        state.wait_samples.push_back(item.enqueued_at.elapsed());
        while state.wait_samples.len() > QUEUE_WAIT_SAMPLE_CAPACITY {
            state.wait_samples.pop_front();
        }

        Some(item)
    }

    pub fn peek(&self) -> Option<QueueItem<T>> {
        self.state.lock().items.front().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn size(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Counter update only; the item already left the queue at dequeue
    pub fn mark_completed(&self, item_id: &str) {
        self.state.lock().total_processed += 1;
        debug!(item_id, "Item marked completed");
    }

    pub fn mark_failed(&self, item_id: &str) {
        self.state.lock().total_failed += 1;
        debug!(item_id, "Item marked failed");
    }

    pub fn remove(&self, item_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.items.iter().position(|item| item.id == item_id) {
            Some(index) => {
                state.items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.state.lock().items.clear();
    }

    pub fn find<P>(&self, predicate: P) -> Vec<QueueItem<T>>
    where
        P: Fn(&QueueItem<T>) -> bool,
    {
        self.state
            .lock()
            .items
            .iter()
            .filter(|item| predicate(item))
            .cloned()
            .collect()
    }

    pub fn get_by_priority(&self, priority: QueuePriority) -> Vec<QueueItem<T>> {
        self.find(|item| item.priority == priority)
    }

    pub fn get_all(&self) -> Vec<QueueItem<T>> {
        self.state.lock().items.iter().cloned().collect()
    }

    /// Reinsert at the tail of the item's priority band with a fresh enqueue time
    pub fn requeue(&self, mut item: QueueItem<T>, increment_retry: bool) {
        if increment_retry {
            item.retry_count += 1;
        }
        item.enqueued_at = Instant::now();

        debug!(
            item_id = %item.id,
            priority = %item.priority,
            retry_count = item.retry_count,
            "Item requeued"
        );
        self.state.lock().insert(item);
    }

    pub fn set_processing(&self, is_processing: bool) {
        self.state.lock().is_processing = is_processing;
    }

    pub fn info(&self) -> QueueInfo {
        let state = self.state.lock();
        QueueInfo {
            size: state.items.len(),
            total_enqueued: state.total_enqueued,
            total_processed: state.total_processed,
            total_failed: state.total_failed,
            is_processing: state.is_processing,
            average_processing_time: state.average_wait(),
        }
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        let mut counts = PriorityCounts::default();
        for item in &state.items {
            match item.priority {
                QueuePriority::High => counts.high += 1,
                QueuePriority::Normal => counts.normal += 1,
                QueuePriority::Low => counts.low += 1,
            }
        }

        QueueStats {
            current_size: state.items.len(),
            peak_size: state.peak_size,
            average_wait_time: state.average_wait(),
            items_by_priority: counts,
        }
    }

    /// Drop all items and zero every counter
    pub fn reset(&self) {
        *self.state.lock() = QueueState::default();
        debug!("Queue reset");
    }
}
