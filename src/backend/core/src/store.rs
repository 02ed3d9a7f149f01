//! Aggregate store: the layer that loads aggregates, commits streams,
//! and drives conflict resolution.
//!
//! A commit first attempts a version-guarded append. When the log
//! rejects it, the store drains the pending batch, selects the strategy
//! configured for the aggregate kind, and hands the batch to a
//! [`ConflictResolver`]. What happens when resolution itself loses a
//! version race is a policy decision (`VersionRacePolicy`), not
//! something the strategies decide.

use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::config::{StoreConfig, VersionRacePolicy};
use crate::delay::{DelayedQueue, InMemoryDelayedQueue};
use crate::error::{ErrorCode, Result, StoreError};
use crate::events::aggregate::Aggregate;
use crate::events::event::{Headers, StreamKey};
use crate::events::stream::EventStream;
use crate::log::{EventLog, InMemoryLog};
use crate::resolve::ConflictResolver;

/// Event-sourced aggregate store with pluggable conflict resolution.
pub struct AggregateStore {
    log: Arc<dyn EventLog>,
    queue: Arc<dyn DelayedQueue>,
    config: StoreConfig,
}

impl AggregateStore {
    /// Create a store over the given collaborators.
    pub fn new(
        log: Arc<dyn EventLog>,
        queue: Arc<dyn DelayedQueue>,
        config: StoreConfig,
    ) -> Self {
        Self { log, queue, config }
    }

    /// Create a store over in-memory backends (for testing).
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(
            Arc::new(InMemoryLog::new()),
            Arc::new(InMemoryDelayedQueue::new()),
            config,
        )
    }

    /// The store's configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Build the resolver configured for an aggregate kind.
    pub fn resolver_for(&self, kind: &str) -> ConflictResolver {
        ConflictResolver::new(
            self.config.strategy_for(kind),
            self.log.clone(),
            self.queue.clone(),
            self.config.delay_threshold,
        )
    }

    /// Load an aggregate by replaying its stream from the log.
    #[instrument(skip(self), fields(stream = %key))]
    pub async fn load<A: Aggregate>(&self, key: StreamKey) -> Result<(A, EventStream)> {
        let events = self.log.read_from(&key, 1).await?;
        let mut aggregate = A::default();
        aggregate.hydrate(&events);
        let stream = EventStream::hydrated(key, events)?;
        Ok((aggregate, stream))
    }

    /// Commit the stream's pending events, resolving conflicts per the
    /// configured strategy.
    ///
    /// Returns the next unused event id for the caller's batch-id
    /// sequence. On a terminal failure the aggregate's durable state is
    /// unchanged and the caller should reload and re-drive the whole
    /// operation.
    #[instrument(
        skip_all,
        fields(
            stream = %stream.key(),
            kind = A::KIND,
            commit_id = %commit_id,
            events = stream.uncommitted().len(),
        )
    )]
    pub async fn commit<A: Aggregate>(
        &self,
        aggregate: &mut A,
        stream: &mut EventStream,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        match stream
            .commit(self.log.as_ref(), commit_id, starting_event_id, headers)
            .await
        {
            Ok(next) => return Ok(next),
            Err(error) if error.code() == ErrorCode::VersionConflict => {
                tracing::debug!(
                    stream = %stream.key(),
                    "Append raced, dispatching conflict resolution"
                );
            }
            Err(error) => return Err(error),
        }

        let resolver = self.resolver_for(A::KIND);
        let max_attempts = match self.config.race_policy {
            VersionRacePolicy::Surface => 0,
            VersionRacePolicy::Reresolve { max_attempts } => max_attempts,
        };

        // Resolution merges against durable state only: the batch is
        // drained and the aggregate reloaded clean, so the merge hook is
        // the single place the batch re-enters the projection.
        let mut batch = stream.take_uncommitted();
        let (fresh_aggregate, fresh_stream) = self.load::<A>(stream.key().clone()).await?;
        *aggregate = fresh_aggregate;
        *stream = fresh_stream;

        let mut attempts: u32 = 0;
        loop {
            match resolver
                .resolve(
                    aggregate,
                    stream,
                    batch,
                    commit_id,
                    starting_event_id,
                    headers,
                )
                .await
            {
                Err(error) if error.code() == ErrorCode::VersionConflict => {
                    if attempts >= max_attempts {
                        if max_attempts == 0 {
                            return Err(error);
                        }
                        return Err(StoreError::resolution_exhausted(
                            stream.key(),
                            attempts,
                        )
                        .with_source(error));
                    }
                    attempts += 1;
                    tracing::debug!(
                        stream = %stream.key(),
                        attempt = attempts,
                        "Resolution raced, reloading and re-driving"
                    );

                    // Recover the batch before discarding the stale
                    // stream. A strong race leaves it re-applied on the
                    // stream; a weak race left it on the delayed queue.
                    batch = stream.take_uncommitted();
                    let (fresh_aggregate, fresh_stream) =
                        self.load::<A>(stream.key().clone()).await?;
                    *aggregate = fresh_aggregate;
                    *stream = fresh_stream;
                }
                other => return other,
            }
        }
    }
}
