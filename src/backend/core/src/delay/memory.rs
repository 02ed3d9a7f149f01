//! In-memory delayed-queue backend for testing and development.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::Result;
use crate::events::event::{StreamKey, UncommittedEvent};

use super::{DelayedEvent, DelayedQueue};

/// Call statistics, useful for assertions and observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pushes: u64,
    pub pulls: u64,
    pub requeues: u64,
}

/// In-memory [`DelayedQueue`] keyed by stream.
///
/// Each stream maps to an ordered deque of parked events. `pull` removes
/// the whole entry in one shot, so concurrent pulls cannot split a batch;
/// `requeue` prepends, keeping requeued (older) events ahead of anything
/// pushed while the failed resolution was in flight.
pub struct InMemoryDelayedQueue {
    queues: DashMap<StreamKey, VecDeque<DelayedEvent>>,
    pushes: AtomicU64,
    pulls: AtomicU64,
    requeues: AtomicU64,
}

impl InMemoryDelayedQueue {
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
            pushes: AtomicU64::new(0),
            pulls: AtomicU64::new(0),
            requeues: AtomicU64::new(0),
        }
    }

    /// Get call statistics.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushes: self.pushes.load(Ordering::Relaxed),
            pulls: self.pulls.load(Ordering::Relaxed),
            requeues: self.requeues.load(Ordering::Relaxed),
        }
    }
}

impl Default for InMemoryDelayedQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DelayedQueue for InMemoryDelayedQueue {
    async fn push(&self, key: &StreamKey, event: UncommittedEvent) -> Result<()> {
        self.pushes.fetch_add(1, Ordering::Relaxed);

        self.queues
            .entry(key.clone())
            .or_default()
            .push_back(DelayedEvent::new(event));

        tracing::debug!(stream = %key, "Event parked on delayed queue");
        Ok(())
    }

    async fn age(&self, key: &StreamKey) -> Result<Duration> {
        let age = self
            .queues
            .get(key)
            .and_then(|queue| queue.front().map(|entry| entry.enqueued_at.elapsed()))
            .unwrap_or(Duration::ZERO);
        Ok(age)
    }

    async fn pull(&self, key: &StreamKey) -> Result<Vec<DelayedEvent>> {
        self.pulls.fetch_add(1, Ordering::Relaxed);

        let batch = self
            .queues
            .remove(key)
            .map(|(_, queue)| queue.into_iter().collect::<Vec<_>>())
            .unwrap_or_default();

        tracing::debug!(stream = %key, events = batch.len(), "Delayed batch pulled");
        Ok(batch)
    }

    async fn requeue(&self, key: &StreamKey, batch: Vec<DelayedEvent>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.requeues.fetch_add(1, Ordering::Relaxed);

        let mut queue = self.queues.entry(key.clone()).or_default();
        for entry in batch.into_iter().rev() {
            queue.push_front(entry);
        }

        tracing::debug!(stream = %key, depth = queue.len(), "Delayed batch requeued");
        Ok(())
    }

    async fn len(&self, key: &StreamKey) -> Result<usize> {
        Ok(self.queues.get(key).map(|queue| queue.len()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::{Bucket, StreamId};

    fn key() -> StreamKey {
        StreamKey::new(Bucket::new("default"), StreamId::new("cart-1"))
    }

    fn event(name: &str) -> UncommittedEvent {
        UncommittedEvent::new(name, serde_json::json!({}))
    }

    #[tokio::test]
    async fn test_push_pull_preserves_order() {
        let queue = InMemoryDelayedQueue::new();
        queue.push(&key(), event("A")).await.unwrap();
        queue.push(&key(), event("B")).await.unwrap();

        let batch = queue.pull(&key()).await.unwrap();
        let types: Vec<&str> = batch.iter().map(|e| e.event.event_type.as_str()).collect();
        assert_eq!(types, vec!["A", "B"]);

        // Pull drains the whole batch.
        assert_eq!(queue.len(&key()).await.unwrap(), 0);
        assert!(queue.pull(&key()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_age_of_empty_stream_is_zero() {
        let queue = InMemoryDelayedQueue::new();
        assert_eq!(queue.age(&key()).await.unwrap(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_age_tracks_oldest_entry() {
        let queue = InMemoryDelayedQueue::new();
        queue.push(&key(), event("A")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(&key(), event("B")).await.unwrap();

        let age = queue.age(&key()).await.unwrap();
        assert!(age >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_requeue_preserves_age_and_ordering() {
        let queue = InMemoryDelayedQueue::new();
        queue.push(&key(), event("old")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let batch = queue.pull(&key()).await.unwrap();
        assert_eq!(queue.age(&key()).await.unwrap(), Duration::ZERO);

        // A new writer parks while the resolution is failing.
        queue.push(&key(), event("new")).await.unwrap();
        queue.requeue(&key(), batch).await.unwrap();

        // Age reflects the oldest still-pending item again.
        assert!(queue.age(&key()).await.unwrap() >= Duration::from_millis(20));

        let drained = queue.pull(&key()).await.unwrap();
        let types: Vec<&str> = drained.iter().map(|e| e.event.event_type.as_str()).collect();
        assert_eq!(types, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let queue = InMemoryDelayedQueue::new();
        let other = StreamKey::new(Bucket::new("default"), StreamId::new("cart-2"));

        queue.push(&key(), event("A")).await.unwrap();
        queue.push(&other, event("B")).await.unwrap();

        assert_eq!(queue.pull(&key()).await.unwrap().len(), 1);
        assert_eq!(queue.len(&other).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats_count_calls() {
        let queue = InMemoryDelayedQueue::new();
        queue.push(&key(), event("A")).await.unwrap();
        let batch = queue.pull(&key()).await.unwrap();
        queue.requeue(&key(), batch).await.unwrap();

        let stats = queue.stats();
        assert_eq!(stats.pushes, 1);
        assert_eq!(stats.pulls, 1);
        assert_eq!(stats.requeues, 1);
    }
}
