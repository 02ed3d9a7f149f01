//! Delayed-queue boundary used by the weak conflict strategy.
//!
//! Conflicting writers park their uncommitted events here, keyed by
//! stream, until the batch is old enough to be worth one strong
//! resolution. The queue is an external collaborator (durable in
//! production); Strand ships an in-memory reference backend.
//!
//! Contract highlights:
//! - `push` appends one event for a stream; any number of concurrent
//!   producers may push.
//! - `age` is the time since the oldest still-queued event was enqueued,
//!   a non-blocking poll, never a sleep.
//! - `pull` drains the whole batch atomically; concurrent pulls for the
//!   same stream must not split or duplicate entries.
//! - `requeue` restores a pulled batch with its original enqueue
//!   timestamps, so a failed resolution never loses events nor resets
//!   the age clock.

pub mod memory;

use async_trait::async_trait;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::events::event::{StreamKey, UncommittedEvent};

pub use memory::{InMemoryDelayedQueue, QueueStats};

// =============================================================================
// Delayed Events
// =============================================================================

/// A parked event together with its enqueue time.
///
/// The timestamp travels with the event through `pull` / `requeue` so the
/// age clock keeps reflecting the oldest still-pending item across failed
/// resolution attempts.
#[derive(Debug, Clone)]
pub struct DelayedEvent {
    pub event: UncommittedEvent,
    pub enqueued_at: Instant,
}

impl DelayedEvent {
    pub fn new(event: UncommittedEvent) -> Self {
        Self {
            event,
            enqueued_at: Instant::now(),
        }
    }
}

// =============================================================================
// Delayed Queue Trait
// =============================================================================

/// Per-stream FIFO of parked uncommitted events.
#[async_trait]
pub trait DelayedQueue: Send + Sync {
    /// Park one event for a stream.
    async fn push(&self, key: &StreamKey, event: UncommittedEvent) -> Result<()>;

    /// Time since the oldest still-queued event for the stream was
    /// enqueued; zero when nothing is queued.
    async fn age(&self, key: &StreamKey) -> Result<Duration>;

    /// Atomically drain the stream's whole batch, in enqueue order.
    async fn pull(&self, key: &StreamKey) -> Result<Vec<DelayedEvent>>;

    /// Restore a pulled batch at the front of the queue, preserving the
    /// original enqueue timestamps.
    async fn requeue(&self, key: &StreamKey, batch: Vec<DelayedEvent>) -> Result<()>;

    /// Number of events currently queued for the stream.
    async fn len(&self, key: &StreamKey) -> Result<usize>;

    /// Whether nothing is queued for the stream.
    async fn is_empty(&self, key: &StreamKey) -> Result<bool> {
        Ok(self.len(key).await? == 0)
    }
}
