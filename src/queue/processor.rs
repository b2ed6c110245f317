//! # Queue Processor
//!
//! Polling scheduler that drains a [`PriorityRequestQueue`] under the admission
//! decisions of a shared [`RateLimiter`] and a concurrency cap.
//!
//! ## Scheduling
//!
//! Each [`tick`](QueueProcessor::tick) makes exactly one decision:
//!
//! 1. Paused and the pause has not elapsed: wait a poll interval.
//! 2. `active_requests >= max_concurrent`: wait a poll interval without dequeuing.
//! 3. Rate limiter denies admission: pause for `rate_limit_pause_ms`.
//! 4. Queue empty: wait a poll interval.
//! 5. Otherwise dispatch the head item and re-poll after a short burst interval.
//!
//! The background loop started by [`start`](QueueProcessor::start) is `tick`
//! followed by a sleep that a shutdown notification interrupts.
//!
//! Concurrency is bounded by a plain counter rather than a semaphore: excess work
//! simply stays in the queue until a slot frees up.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::priority_queue::{PriorityRequestQueue, QueueItem};
use crate::constants::{BURST_POLL_INTERVAL, RATE_LIMITED_RESPONSE_PAUSE};
use crate::logging::log_queue_operation;
use crate::resilience::{RateLimiter, RateLimiterConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueProcessorError {
    #[error("Invalid queue processor configuration: {0}")]
    InvalidConfig(String),
}

/// Processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueProcessorConfig {
    pub max_concurrent: usize,
    pub poll_interval_ms: u64,
    pub rate_limit_pause_ms: u64,
    /// Start the loop as soon as the processor is built by a `SystemContext`
    pub auto_start: bool,
}

impl Default for QueueProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval_ms: 1000,
            rate_limit_pause_ms: 5000,
            auto_start: false,
        }
    }
}

impl QueueProcessorConfig {
    pub fn validate(&self) -> Result<(), QueueProcessorError> {
        if self.max_concurrent == 0 {
            return Err(QueueProcessorError::InvalidConfig(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(QueueProcessorError::InvalidConfig(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// This configuration narrowed to a shared limiter's settings: concurrency is
    /// capped at `max_concurrent_requests` and admission denials pause for the
    /// limiter's `pause_ms`
    pub fn constrained_by(&self, limiter: &RateLimiterConfig) -> Self {
        Self {
            max_concurrent: self.max_concurrent.min(limiter.max_concurrent_requests),
            rate_limit_pause_ms: limiter.pause_ms,
            ..self.clone()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn rate_limit_pause(&self) -> Duration {
        Duration::from_millis(self.rate_limit_pause_ms)
    }
}

/// Decision made by a single scheduling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickOutcome {
    Paused,
    AtCapacity,
    RateLimited,
    Idle,
    Dispatched,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueProcessorStatus {
    pub is_running: bool,
    pub is_paused: bool,
    pub active_requests: usize,
    pub max_concurrent: usize,
    /// Time left until the current pause ends
    pub pause_remaining: Option<Duration>,
}

struct ProcessorInner<T> {
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<PriorityRequestQueue<T>>,
    config: RwLock<QueueProcessorConfig>,
    running: AtomicBool,
    active_requests: AtomicUsize,
    pause_until: Mutex<Option<Instant>>,
    shutdown_notify: Notify,
}

/// Decrements the active counter even if the handler panics
struct ActiveRequestGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveRequestGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T: Clone + Send + Sync + 'static> ProcessorInner<T> {
    fn pause(&self, duration: Option<Duration>) {
        let duration = duration.unwrap_or_else(|| self.config.read().rate_limit_pause());
        *self.pause_until.lock() = Some(Instant::now() + duration);
        info!(pause_ms = duration.as_millis() as u64, "⏸️ Queue processor paused");
    }

    fn resume(&self) {
        if self.pause_until.lock().take().is_some() {
            info!("▶️ Queue processor resumed");
        }
    }

    fn tick(self: &Arc<Self>) -> (TickOutcome, Duration) {
        let config = self.config.read().clone();
        let poll_interval = config.poll_interval();

        let pause_until = *self.pause_until.lock();
        if let Some(until) = pause_until {
            if Instant::now() < until {
                return (TickOutcome::Paused, poll_interval);
            }
            self.resume();
        }

        if self.active_requests.load(Ordering::Acquire) >= config.max_concurrent {
            return (TickOutcome::AtCapacity, poll_interval);
        }

        if !self.rate_limiter.check_rate_limit("default") {
            info!("Rate limit threshold reached, pausing queue processing");
            self.pause(None);
            return (TickOutcome::RateLimited, poll_interval);
        }

        match self.queue.dequeue() {
            None => (TickOutcome::Idle, poll_interval),
            Some(item) => {
                self.active_requests.fetch_add(1, Ordering::AcqRel);
                let inner = Arc::clone(self);
                tokio::spawn(async move {
                    inner.process_item(item).await;
                });
                (TickOutcome::Dispatched, BURST_POLL_INTERVAL)
            }
        }
    }

    /// Caller must have incremented `active_requests`
    async fn process_item(&self, item: QueueItem<T>) {
        let _active = ActiveRequestGuard(&self.active_requests);

        debug!(item_id = %item.id, priority = %item.priority, "Processing queue item");
        self.rate_limiter.add_request(Some(item.id.clone()));

        let result = match &item.on_complete {
            Some(handler) => handler(item.payload.clone()).await,
            None => Ok(()),
        };

        match result {
            Ok(()) => {
                self.queue.mark_completed(&item.id);
                log_queue_operation("complete", &item.id, self.queue.size(), "success");
            }
            Err(err) => {
                let message = format!("{err:#}");
                if message.contains("429") {
                    warn!(item_id = %item.id, error = %message, "Received 429 response, pausing and requeueing");
                    self.pause(Some(RATE_LIMITED_RESPONSE_PAUSE));
                    self.queue.requeue(item, true);
                } else {
                    error!(item_id = %item.id, error = %message, "❌ Queue item failed");
                    if let Some(on_error) = &item.on_error {
                        on_error(&err);
                    }
                    self.queue.mark_failed(&item.id);
                    log_queue_operation("fail", &item.id, self.queue.size(), "failed");
                }
            }
        }
    }

    async fn run(self: Arc<Self>) {
        info!("🚀 Queue processing loop started");

        while self.running.load(Ordering::Acquire) {
            let (outcome, delay) = self.tick();
            debug!(outcome = ?outcome, delay_ms = delay.as_millis() as u64, "Queue tick");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = self.shutdown_notify.notified() => {
                    debug!("Shutdown notification received");
                    break;
                }
            }
        }

        info!("Queue processing loop ended");
    }
}

/// Drains a shared queue under rate limiter and concurrency constraints
pub struct QueueProcessor<T> {
    inner: Arc<ProcessorInner<T>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T> fmt::Debug for QueueProcessor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProcessor")
            .field("running", &self.inner.running.load(Ordering::Acquire))
            .field("active_requests", &self.inner.active_requests.load(Ordering::Acquire))
            .field("config", &*self.inner.config.read())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> QueueProcessor<T> {
    pub fn new(
        rate_limiter: Arc<RateLimiter>,
        queue: Arc<PriorityRequestQueue<T>>,
        config: QueueProcessorConfig,
    ) -> Result<Self, QueueProcessorError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(ProcessorInner {
                rate_limiter,
                queue,
                config: RwLock::new(config),
                running: AtomicBool::new(false),
                active_requests: AtomicUsize::new(0),
                pause_until: Mutex::new(None),
                shutdown_notify: Notify::new(),
            }),
            handle: Mutex::new(None),
        })
    }

    /// Spawn the polling loop on the current runtime
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("Queue processor already running");
            return;
        }

        info!("Starting queue processor");
        self.inner.queue.set_processing(true);
        let inner = Arc::clone(&self.inner);
        *self.handle.lock() = Some(tokio::spawn(inner.run()));
    }

    /// Signal the loop and wait for it to exit; in-flight items keep running
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }

        info!("Stopping queue processor");
        self.inner.queue.set_processing(false);
        self.inner.shutdown_notify.notify_one();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Queue processing loop terminated abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// One scheduling decision; dispatched work runs on a spawned task
    pub fn tick(&self) -> (TickOutcome, Duration) {
        self.inner.tick()
    }

    /// Pause for `duration`, or the configured rate-limit pause when `None`
    pub fn pause(&self, duration: Option<Duration>) {
        self.inner.pause(duration);
    }

    pub fn resume(&self) {
        self.inner.resume();
    }

    pub fn status(&self) -> QueueProcessorStatus {
        let now = Instant::now();
        // An elapsed pause is only cleared by the next tick
        let pause_until = (*self.inner.pause_until.lock()).filter(|until| now < *until);
        QueueProcessorStatus {
            is_running: self.is_running(),
            is_paused: pause_until.is_some(),
            active_requests: self.inner.active_requests.load(Ordering::Acquire),
            max_concurrent: self.inner.config.read().max_concurrent,
            pause_remaining: pause_until.map(|until| until - now),
        }
    }

    pub fn update_config(&self, config: QueueProcessorConfig) -> Result<(), QueueProcessorError> {
        config.validate()?;
        info!(
            max_concurrent = config.max_concurrent,
            poll_interval_ms = config.poll_interval_ms,
            "Queue processor configuration updated"
        );
        *self.inner.config.write() = config;
        Ok(())
    }

    pub fn config(&self) -> QueueProcessorConfig {
        self.inner.config.read().clone()
    }
}

impl<T> Drop for QueueProcessor<T> {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        self.inner.shutdown_notify.notify_one();
    }
}
