//! Weak conflict resolution: batch conflicting writers, merge once.
//!
//! Every conflicting writer parks its events on the per-stream delayed
//! queue; only once the oldest parked event crosses the age threshold
//! does one caller run the strong merge over the whole drained batch.
//! Multiple callers may cross the threshold together -- the stream freeze
//! serializes them, and a loser's pull simply finds the queue empty.
//!
//! Only safe for aggregates whose merge hook never fails routing: a
//! routing failure here is terminal and the pulled batch is not
//! retained. A version race, by contrast, requeues the batch with its
//! original enqueue times, so conflicting writes survive resolution
//! attempts at-least-once.

use metrics::counter;
use uuid::Uuid;

use crate::delay::DelayedQueue as _;
use crate::error::{ErrorCode, Result};
use crate::events::aggregate::Aggregate;
use crate::events::event::{Headers, StreamKey, UncommittedEvent};
use crate::events::stream::EventStream;
use crate::log::EventLog as _;

use super::ConflictResolver;

impl ConflictResolver {
    /// Park the batch; run a batched strong merge once it is old enough.
    pub(super) async fn resolve_weakly<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
        uncommitted: Vec<UncommittedEvent>,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        let key = stream.key().clone();

        // Park independently of any resolution already in flight for the
        // same stream.
        let parked = uncommitted.len() as u64;
        for event in uncommitted {
            self.queue.push(&key, event).await?;
        }
        counter!("strand_parked_events_total").increment(parked);

        // Non-blocking poll: below the threshold nothing was durably
        // written, so the caller's id counter is returned unchanged.
        let age = self.queue.age(&key).await?;
        if age < self.delay_threshold {
            tracing::debug!(
                stream = %key,
                age_ms = age.as_millis() as u64,
                threshold_ms = self.delay_threshold.as_millis() as u64,
                "Conflict parked below batching threshold"
            );
            return Ok(starting_event_id);
        }

        tracing::debug!(
            stream = %key,
            age_ms = age.as_millis() as u64,
            "Batching threshold crossed, starting batched resolution"
        );

        self.log.freeze(&key).await?;
        let outcome = self
            .merge_delayed(aggregate, stream, &key, commit_id, starting_event_id, headers)
            .await;
        self.release(&key).await;
        outcome
    }

    /// The strong algorithm over the queue's drained batch.
    async fn merge_delayed<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
        key: &StreamKey,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        self.catch_up(aggregate, stream).await?;

        // Transactional drain: the batch leaves the queue whole, and goes
        // back whole if the commit races.
        let batch = self.queue.pull(key).await?;
        let events: Vec<UncommittedEvent> =
            batch.iter().map(|entry| entry.event.clone()).collect();

        let outcome = async {
            self.merge_batch(aggregate, stream, &events)?;
            self.maybe_snapshot(aggregate, stream, headers);
            stream
                .commit(self.log.as_ref(), commit_id, starting_event_id, headers)
                .await
        }
        .await;

        match outcome {
            Err(error) if error.code() == ErrorCode::VersionConflict => {
                // Only a version race keeps the batch; a routing failure
                // is terminal. The queue becomes the sole holder again,
                // so the stream's re-applied copies are dropped.
                let _ = stream.take_uncommitted();
                counter!("strand_requeued_events_total").increment(batch.len() as u64);
                tracing::warn!(
                    stream = %key,
                    events = batch.len(),
                    "Commit raced during batched resolution, requeueing batch"
                );
                self.queue.requeue(key, batch).await?;
                Err(error)
            }
            other => other,
        }
    }
}
