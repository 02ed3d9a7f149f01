//! Conflict Resolution Engine
//!
//! When a version-guarded append is rejected because another writer
//! committed first, the store hands the conflicting batch to a
//! [`ConflictResolver`]. Four strategies cover the spectrum from "the
//! conflict does not matter" to "batch writers and merge once":
//!
//! - **`Ignore`**: append anyway, trusting the log. For streams where
//!   version conflicts are not meaningful (append-only audit logs).
//! - **`Discard`**: drop the batch. For idempotent or best-effort
//!   projections where losing the writer's data is acceptable.
//! - **`Strong`**: freeze the stream, splice in the missed tail, run the
//!   aggregate's merge hook per event, recommit. Deterministic, resolves
//!   before returning.
//! - **`Weak`**: park events on the per-stream delayed queue and only run
//!   the strong path once the batch is old enough, amortizing resolution
//!   cost across writers.
//!
//! The strategies form a closed set dispatched by one resolver value,
//! configured per aggregate kind. Within one stream, the log's
//! freeze/unfreeze advisory lock is the sole mutual exclusion: at most
//! one merge is in flight per stream, and the freeze is released on every
//! exit path.

pub mod strong;
pub mod weak;

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use uuid::Uuid;

use crate::delay::DelayedQueue;
use crate::error::Result;
use crate::events::aggregate::Aggregate;
use crate::events::event::{Headers, UncommittedEvent};
use crate::events::stream::EventStream;
use crate::log::{EventLog, ExpectedVersion};

// =============================================================================
// Strategy
// =============================================================================

/// The closed set of conflict-resolution strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Accept the conflict as irrelevant and append unconditionally.
    Ignore,

    /// Treat every uncommitted event as void; lose the writer's data.
    Discard,

    /// Merge-then-recommit under the stream freeze, every time.
    Strong,

    /// Batch conflicting writers on the delayed queue, then merge once.
    Weak,
}

impl ConflictStrategy {
    /// Stable label for logs and metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ignore => "ignore",
            Self::Discard => "discard",
            Self::Strong => "strong",
            Self::Weak => "weak",
        }
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        Self::Strong
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Executes one configured strategy against a conflicting batch.
///
/// The resolver owns handles to the two collaborators the strategies
/// need: the event log (freeze, tail reads, guarded appends) and the
/// delayed queue (weak batching). It carries no per-stream state of its
/// own; the keyed queue is the only cross-call state and is injected so
/// tests can fake it.
pub struct ConflictResolver {
    strategy: ConflictStrategy,
    log: Arc<dyn EventLog>,
    queue: Arc<dyn DelayedQueue>,
    delay_threshold: Duration,
}

impl ConflictResolver {
    /// Create a resolver for the given strategy and collaborators.
    pub fn new(
        strategy: ConflictStrategy,
        log: Arc<dyn EventLog>,
        queue: Arc<dyn DelayedQueue>,
        delay_threshold: Duration,
    ) -> Self {
        Self {
            strategy,
            log,
            queue,
            delay_threshold,
        }
    }

    /// The strategy this resolver executes.
    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Resolve a version conflict for one aggregate.
    ///
    /// `uncommitted` is the stream's drained pending buffer, in
    /// submission order; the stream arrives with an empty buffer and
    /// `stream_version == commit_version`, and the aggregate reflects
    /// durable state only -- the merge hook is where the batch re-enters
    /// the projection. On success the next unused event id for the
    /// caller's batch-id sequence is returned. On failure the stream's
    /// durable state is unchanged and the caller is expected to reload
    /// and re-drive the operation.
    #[instrument(
        skip_all,
        fields(
            stream = %stream.key(),
            strategy = self.strategy.as_str(),
            events = uncommitted.len(),
            commit_id = %commit_id,
        )
    )]
    pub async fn resolve<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
        uncommitted: Vec<UncommittedEvent>,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        let result = match self.strategy {
            ConflictStrategy::Ignore => {
                self.resolve_ignoring(
                    aggregate,
                    stream,
                    uncommitted,
                    commit_id,
                    starting_event_id,
                    headers,
                )
                .await
            }
            ConflictStrategy::Discard => {
                self.resolve_discarding(stream, uncommitted, starting_event_id)
            }
            ConflictStrategy::Strong => {
                self.resolve_strongly(
                    aggregate,
                    stream,
                    uncommitted,
                    commit_id,
                    starting_event_id,
                    headers,
                )
                .await
            }
            ConflictStrategy::Weak => {
                self.resolve_weakly(
                    aggregate,
                    stream,
                    uncommitted,
                    commit_id,
                    starting_event_id,
                    headers,
                )
                .await
            }
        };

        let outcome = match &result {
            Ok(_) => "resolved".to_string(),
            Err(error) => error.code().to_string(),
        };
        counter!(
            "strand_resolutions_total",
            "strategy" => self.strategy.as_str(),
            "outcome" => outcome,
        )
        .increment(1);

        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ignore
    // ─────────────────────────────────────────────────────────────────────────

    /// Accept the conflict: assign ids, project, append unconditionally.
    ///
    /// The log receives a second write in addition to whatever produced
    /// the original conflict; preventing duplicate appends is the
    /// caller's responsibility.
    async fn resolve_ignoring<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
        uncommitted: Vec<UncommittedEvent>,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        let mut next_id = starting_event_id;
        for mut event in uncommitted {
            next_id = event.assign_id(next_id) + 1;
            aggregate.apply(&event.event_type, &event.data);
            stream.apply(event);
        }

        stream
            .commit_with(
                self.log.as_ref(),
                ExpectedVersion::Any,
                commit_id,
                starting_event_id,
                headers,
            )
            .await?;

        Ok(next_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Discard
    // ─────────────────────────────────────────────────────────────────────────

    /// Void the batch: no log I/O, no aggregate mutation.
    fn resolve_discarding(
        &self,
        stream: &EventStream,
        uncommitted: Vec<UncommittedEvent>,
        starting_event_id: u64,
    ) -> Result<u64> {
        counter!("strand_discarded_events_total").increment(uncommitted.len() as u64);
        tracing::warn!(
            stream = %stream.key(),
            discarded = uncommitted.len(),
            "Discarding conflicting events"
        );
        Ok(starting_event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delay::InMemoryDelayedQueue;
    use crate::events::aggregate::NoRoute;
    use crate::events::event::{Bucket, StreamId, StreamKey};
    use crate::log::{EventLog as _, InMemoryLog};

    #[derive(Debug, Default)]
    struct Audit {
        entries: Vec<String>,
    }

    impl Aggregate for Audit {
        const KIND: &'static str = "audit";

        fn apply(&mut self, event_type: &str, _data: &serde_json::Value) {
            self.entries.push(event_type.to_string());
        }

        fn merge(&mut self, event_type: &str, data: &serde_json::Value) -> std::result::Result<(), NoRoute> {
            self.apply(event_type, data);
            Ok(())
        }
    }

    fn key() -> StreamKey {
        StreamKey::new(Bucket::new("default"), StreamId::new("audit-1"))
    }

    fn resolver(strategy: ConflictStrategy, log: Arc<InMemoryLog>) -> ConflictResolver {
        ConflictResolver::new(
            strategy,
            log,
            Arc::new(InMemoryDelayedQueue::new()),
            Duration::from_secs(30),
        )
    }

    fn batch(n: usize) -> Vec<UncommittedEvent> {
        (0..n)
            .map(|i| UncommittedEvent::new("Logged", serde_json::json!({ "n": i })))
            .collect()
    }

    #[tokio::test]
    async fn test_ignore_assigns_contiguous_ids_and_appends() {
        let log = Arc::new(InMemoryLog::new());
        let resolver = resolver(ConflictStrategy::Ignore, log.clone());

        let mut audit = Audit::default();
        let mut stream = EventStream::new(key());

        let next = resolver
            .resolve(
                &mut audit,
                &mut stream,
                batch(3),
                Uuid::new_v4(),
                100,
                &Headers::new(),
            )
            .await
            .unwrap();

        assert_eq!(next, 103);
        assert_eq!(audit.entries.len(), 3);
        assert!(stream.uncommitted().is_empty());

        let recorded = log.read_from(&key(), 1).await.unwrap();
        let ids: Vec<u64> = recorded.iter().map(|e| e.event_id).collect();
        assert_eq!(ids, vec![100, 101, 102]);
    }

    #[tokio::test]
    async fn test_ignore_appends_even_when_log_moved() {
        let log = Arc::new(InMemoryLog::new());

        // A competing writer got version 1 in first.
        let mut winner = EventStream::new(key());
        winner.apply(UncommittedEvent::new("Logged", serde_json::json!({})));
        winner
            .commit(log.as_ref(), Uuid::new_v4(), 1, &Headers::new())
            .await
            .unwrap();

        let resolver = resolver(ConflictStrategy::Ignore, log.clone());
        let mut audit = Audit::default();
        let mut stream = EventStream::new(key());

        resolver
            .resolve(
                &mut audit,
                &mut stream,
                batch(2),
                Uuid::new_v4(),
                100,
                &Headers::new(),
            )
            .await
            .unwrap();

        // The log accepted the append on top of the winner's commit.
        assert_eq!(log.version_of(&key()), 2);
        assert_eq!(log.read_from(&key(), 1).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_discard_returns_starting_id_untouched() {
        let log = Arc::new(InMemoryLog::new());
        let resolver = resolver(ConflictStrategy::Discard, log.clone());

        let mut audit = Audit::default();
        let mut stream = EventStream::new(key());

        let next = resolver
            .resolve(
                &mut audit,
                &mut stream,
                batch(5),
                Uuid::new_v4(),
                100,
                &Headers::new(),
            )
            .await
            .unwrap();

        assert_eq!(next, 100);
        assert!(audit.entries.is_empty());
        assert_eq!(stream.stream_version(), 0);

        // Zero log interaction of any kind.
        assert_eq!(log.stats(), crate::log::LogStats::default());
    }

    #[test]
    fn test_strategy_serde_names() {
        let strategy: ConflictStrategy = serde_json::from_str("\"weak\"").unwrap();
        assert_eq!(strategy, ConflictStrategy::Weak);
        assert_eq!(
            serde_json::to_string(&ConflictStrategy::Ignore).unwrap(),
            "\"ignore\""
        );
    }
}
