//! Strong conflict resolution: deterministic merge-then-recommit.
//!
//! The stream is frozen for the whole merge window; the freeze is the
//! sole per-stream mutual exclusion, so release must happen on every
//! exit path -- success, routing failure, and races the log itself
//! detects. Release is therefore an explicit step after the merge
//! outcome is known, not a drop guard.

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::events::aggregate::Aggregate;
use crate::events::event::{Headers, StreamKey, UncommittedEvent};
use crate::events::stream::{EventStream, StreamSnapshot};
use crate::log::EventLog as _;

use super::ConflictResolver;

impl ConflictResolver {
    /// Merge the conflicting batch under the stream freeze and recommit.
    ///
    /// A version conflict raised by the final guarded append means a
    /// third writer raced in between the tail read and the commit; it is
    /// surfaced as-is, never retried here -- the caller re-drives
    /// resolution from a fresh load.
    pub(super) async fn resolve_strongly<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
        uncommitted: Vec<UncommittedEvent>,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        let key = stream.key().clone();
        self.log.freeze(&key).await?;

        let outcome = async {
            self.catch_up(aggregate, stream).await?;
            self.merge_batch(aggregate, stream, &uncommitted)?;
            self.maybe_snapshot(aggregate, stream, headers);
            stream
                .commit(self.log.as_ref(), commit_id, starting_event_id, headers)
                .await
        }
        .await;

        self.release(&key).await;
        outcome
    }

    /// Splice the tail the stream missed and replay it onto the aggregate.
    pub(super) async fn catch_up<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
    ) -> Result<()> {
        let tail = self
            .log
            .read_from(stream.key(), stream.commit_version() + 1)
            .await?;
        if tail.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            stream = %stream.key(),
            missed = tail.len(),
            to_version = stream.commit_version() + tail.len() as u64,
            "Catching up with missed tail"
        );

        let spliced_from = stream.committed().len();
        stream.concat(tail)?;
        aggregate.hydrate(&stream.committed()[spliced_from..]);
        Ok(())
    }

    /// Run the aggregate's merge hook for each event, in submission
    /// order, re-recording merged events on the stream.
    ///
    /// A missing merge route aborts the whole batch with a terminal
    /// resolution failure; nothing is committed.
    pub(super) fn merge_batch<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
        events: &[UncommittedEvent],
    ) -> Result<()> {
        for event in events {
            aggregate.merge(&event.event_type, &event.data).map_err(|route| {
                StoreError::resolution_failed(stream.key(), &route.event_type).with_source(route)
            })?;
            stream.apply(event.clone());
        }
        Ok(())
    }

    /// Attach a snapshot at the post-merge version when the aggregate's
    /// policy asks for one. Consulted only after versions actually moved.
    pub(super) fn maybe_snapshot<A: Aggregate>(
        &self,
        aggregate: &A,
        stream: &mut EventStream,
        headers: &Headers,
    ) {
        if stream.stream_version() == stream.commit_version() {
            return;
        }
        if !aggregate.should_snapshot() {
            return;
        }
        let Some(data) = aggregate.take_snapshot() else {
            return;
        };

        tracing::debug!(
            stream = %stream.key(),
            version = stream.stream_version(),
            "Attaching post-merge snapshot"
        );
        stream.add_snapshot(StreamSnapshot {
            version: stream.stream_version(),
            data,
            headers: headers.clone(),
        });
    }

    /// Release the stream freeze; never lets a cleanup failure mask the
    /// merge outcome.
    pub(super) async fn release(&self, key: &StreamKey) {
        if let Err(error) = self.log.unfreeze(key).await {
            tracing::warn!(stream = %key, %error, "Failed to release stream freeze");
        }
    }
}
