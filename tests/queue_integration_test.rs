//! Queue Integration Tests
//!
//! Priority ordering properties of `PriorityRequestQueue` and end-to-end draining
//! through a `QueueProcessor` sharing a rate limiter.

use conduit_core::queue::{
    EnqueueOptions, PriorityRequestQueue, QueuePriority, QueueProcessor, QueueProcessorConfig,
};
use conduit_core::resilience::{RateLimiter, RateLimiterConfig};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn priority_strategy() -> impl Strategy<Value = QueuePriority> {
    prop_oneof![
        Just(QueuePriority::High),
        Just(QueuePriority::Normal),
        Just(QueuePriority::Low),
    ]
}

fn open_limiter() -> Arc<RateLimiter> {
    Arc::new(
        RateLimiter::new(RateLimiterConfig {
            request_limit: 1000,
            ..Default::default()
        })
        .expect("valid limiter config"),
    )
}

proptest! {
    /// Dequeue order is priority first, then insertion order
    #[test]
    fn dequeue_order_is_priority_then_fifo(priorities in prop::collection::vec(priority_strategy(), 0..60)) {
        let queue = PriorityRequestQueue::new();
        for (index, priority) in priorities.iter().enumerate() {
            queue.enqueue(index, *priority, EnqueueOptions::new());
        }

        let mut expected: Vec<(QueuePriority, usize)> = priorities
            .iter()
            .enumerate()
            .map(|(index, priority)| (*priority, index))
            .collect();
        expected.sort_by_key(|(priority, _)| priority.rank());

        let mut drained = Vec::new();
        while let Some(item) = queue.dequeue() {
            drained.push((item.priority, item.payload));
        }

        prop_assert_eq!(drained, expected);
        prop_assert!(queue.is_empty());
    }

    /// Peak size tracks the largest backlog and counters match activity
    #[test]
    fn counters_track_activity(count in 1usize..50, take in 0usize..50) {
        let queue = PriorityRequestQueue::new();
        for index in 0..count {
            queue.enqueue(index, QueuePriority::Normal, EnqueueOptions::new());
        }

        let take = take.min(count);
        for _ in 0..take {
            let item = queue.dequeue().expect("item available");
            queue.mark_completed(&item.id);
        }

        let info = queue.info();
        prop_assert_eq!(info.size, count - take);
        prop_assert_eq!(info.total_enqueued, count as u64);
        prop_assert_eq!(info.total_processed, take as u64);
        prop_assert_eq!(queue.stats().peak_size, count);
    }
}

#[tokio::test(start_paused = true)]
async fn processor_drains_queue_in_priority_order() {
    let queue = Arc::new(PriorityRequestQueue::new());
    let order = Arc::new(Mutex::new(Vec::new()));

    for (name, priority) in [
        ("low", QueuePriority::Low),
        ("normal", QueuePriority::Normal),
        ("high", QueuePriority::High),
    ] {
        let order = Arc::clone(&order);
        let options = EnqueueOptions::new().on_complete(move |payload: String| {
            let order = Arc::clone(&order);
            async move {
                order.lock().push(payload);
                Ok(())
            }
        });
        queue.enqueue(name.to_string(), priority, options);
    }

    let processor = QueueProcessor::new(
        open_limiter(),
        Arc::clone(&queue),
        QueueProcessorConfig {
            max_concurrent: 1,
            poll_interval_ms: 50,
            ..Default::default()
        },
    )
    .expect("valid processor config");

    processor.start();
    tokio::time::sleep(Duration::from_secs(2)).await;
    processor.stop().await;

    assert_eq!(order.lock().clone(), vec!["high", "normal", "low"]);
    assert!(queue.is_empty());
    assert_eq!(queue.info().total_processed, 3);
}

#[tokio::test(start_paused = true)]
async fn processor_pauses_when_limiter_denies_admission() {
    let limiter = Arc::new(
        RateLimiter::new(RateLimiterConfig {
            request_limit: 2,
            window_seconds: 60,
            threshold: 1.0,
            ..Default::default()
        })
        .expect("valid limiter config"),
    );
    let queue = Arc::new(PriorityRequestQueue::new());
    let calls = Arc::new(AtomicUsize::new(0));

    for index in 0..4 {
        let calls = Arc::clone(&calls);
        let options = EnqueueOptions::new().on_complete(move |_payload: usize| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        queue.enqueue(index, QueuePriority::Normal, options);
    }

    let processor = QueueProcessor::new(
        Arc::clone(&limiter),
        Arc::clone(&queue),
        QueueProcessorConfig::default(),
    )
    .expect("valid processor config");

    processor.start();
    tokio::time::sleep(Duration::from_secs(3)).await;

    // Two requests fill the window; the rest wait for it to slide
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.size(), 2);
    assert!(processor.status().is_paused);

    tokio::time::sleep(Duration::from_secs(70)).await;
    processor.stop().await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn rate_limited_response_requeues_item() {
    let queue = Arc::new(PriorityRequestQueue::new());
    let attempts = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&attempts);
    let options = EnqueueOptions::new()
        .with_id("generate-1")
        .on_complete(move |_payload: String| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("429 Too Many Requests");
                }
                Ok(())
            }
        });
    queue.enqueue("topic".to_string(), QueuePriority::High, options);

    let processor = QueueProcessor::new(
        open_limiter(),
        Arc::clone(&queue),
        QueueProcessorConfig::default(),
    )
    .expect("valid processor config");

    processor.start();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(queue.size(), 1);
    assert_eq!(queue.peek().map(|item| item.retry_count), Some(1));

    tokio::time::sleep(Duration::from_secs(30)).await;
    processor.stop().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(queue.is_empty());
    assert_eq!(queue.info().total_failed, 0);
}
