//! In-memory representation of one aggregate's event stream.
//!
//! Versions number commits (atomic append batches), not individual
//! events; every event recorded by one commit carries that commit's
//! version. An `EventStream` tracks two version counters:
//!
//! - `commit_version`: the last version known to be durably persisted
//! - `stream_version`: the version the stream is at in memory -- equal to
//!   `commit_version`, plus one while a commit is pending
//!
//! Committing advances `commit_version` to `stream_version`. The stream
//! is owned exclusively by one logical operation; it is never shared
//! across concurrent operations on the same stream.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::log::{EventLog, ExpectedVersion};

use super::event::{Headers, RecordedEvent, StreamKey, UncommittedEvent};

// =============================================================================
// Snapshot
// =============================================================================

/// A point-in-time serialized projection attached to a stream before commit.
///
/// Snapshot persistence is the snapshot store's concern; the stream only
/// carries the attachment so the invoking layer can hand it off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSnapshot {
    /// Stream version the projection reflects.
    pub version: u64,

    /// Serialized aggregate state.
    pub data: serde_json::Value,

    /// Headers of the commit that produced the snapshot.
    pub headers: Headers,
}

// =============================================================================
// Event Stream
// =============================================================================

/// One aggregate's event history window plus pending uncommitted events.
#[derive(Debug, Clone)]
pub struct EventStream {
    key: StreamKey,

    /// Last version durably persisted.
    commit_version: u64,

    /// Version materialized in memory; `commit_version + 1` while a
    /// commit is pending, equal otherwise.
    stream_version: u64,

    /// In-memory window of durable events (hydration plus splices).
    committed: Vec<RecordedEvent>,

    /// Ordered pending uncommitted events, versionless until commit.
    uncommitted: Vec<UncommittedEvent>,

    /// Snapshot attached for the next commit, if any.
    snapshot: Option<StreamSnapshot>,
}

impl EventStream {
    /// Create an empty stream at version 0.
    pub fn new(key: StreamKey) -> Self {
        Self {
            key,
            commit_version: 0,
            stream_version: 0,
            committed: Vec::new(),
            uncommitted: Vec::new(),
            snapshot: None,
        }
    }

    /// Create a stream hydrated from durable events.
    ///
    /// The events must form a contiguous run of commits starting at
    /// version 1.
    pub fn hydrated(key: StreamKey, events: Vec<RecordedEvent>) -> Result<Self> {
        let mut stream = Self::new(key);
        stream.concat(events)?;
        Ok(stream)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn commit_version(&self) -> u64 {
        self.commit_version
    }

    pub fn stream_version(&self) -> u64 {
        self.stream_version
    }

    /// The in-memory window of durable events.
    pub fn committed(&self) -> &[RecordedEvent] {
        &self.committed
    }

    /// Pending uncommitted events in application order.
    pub fn uncommitted(&self) -> &[UncommittedEvent] {
        &self.uncommitted
    }

    /// Snapshot attached for the next commit, if any.
    pub fn snapshot(&self) -> Option<&StreamSnapshot> {
        self.snapshot.as_ref()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation primitives
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a new local event.
    ///
    /// Pending events are versionless; they all ride the next commit, so
    /// the in-memory version sits one past the durable one for any
    /// number of pending events.
    pub fn apply(&mut self, event: UncommittedEvent) {
        self.uncommitted.push(event);
        self.stream_version = self.commit_version + 1;
    }

    /// Splice in a contiguous tail of durable events fetched from the log.
    ///
    /// The tail must start at `commit_version + 1`; events of the same
    /// commit share a version and successive commits step by one. A
    /// gapped tail indicates a log contract violation and is rejected
    /// without mutating the stream. Pending uncommitted events keep
    /// their place after the spliced tail.
    pub fn concat(&mut self, tail: Vec<RecordedEvent>) -> Result<()> {
        let mut last = self.commit_version;
        for event in &tail {
            let expected = last + 1;
            let within_same_commit = event.version == last && last > self.commit_version;
            if event.version != expected && !within_same_commit {
                return Err(StoreError::gapped_tail(&self.key, expected, event.version));
            }
            last = event.version;
        }

        self.committed.extend(tail);
        self.commit_version = last;
        self.stream_version = if self.uncommitted.is_empty() {
            last
        } else {
            last + 1
        };
        Ok(())
    }

    /// Drain the pending uncommitted events, rolling the in-memory
    /// version back to the durable one.
    pub fn take_uncommitted(&mut self) -> Vec<UncommittedEvent> {
        self.stream_version = self.commit_version;
        std::mem::take(&mut self.uncommitted)
    }

    /// Attach a snapshot to be handed off with the next commit.
    pub fn add_snapshot(&mut self, snapshot: StreamSnapshot) {
        self.snapshot = Some(snapshot);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commit
    // ─────────────────────────────────────────────────────────────────────────

    /// Durably append the pending events, guarded against `commit_version`.
    ///
    /// On success the pending buffer is flushed, `commit_version`
    /// advances to `stream_version`, and the next unused event id is
    /// returned. On failure (including a version conflict raced in by
    /// another writer) the stream is left unchanged and the error
    /// propagates.
    pub async fn commit(
        &mut self,
        log: &dyn EventLog,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        let expected = ExpectedVersion::Exact(self.commit_version);
        self.commit_with(log, expected, commit_id, starting_event_id, headers)
            .await
    }

    /// Durably append the pending events with an explicit version guard.
    ///
    /// `ExpectedVersion::Any` trusts the log to accept the append at
    /// whatever version it is at; only the ignore strategy does this.
    pub async fn commit_with(
        &mut self,
        log: &dyn EventLog,
        expected: ExpectedVersion,
        commit_id: Uuid,
        starting_event_id: u64,
        headers: &Headers,
    ) -> Result<u64> {
        if self.uncommitted.is_empty() {
            tracing::debug!(stream = %self.key, "Commit with no pending events is a no-op");
            return Ok(starting_event_id);
        }

        // Build the durable batch without touching the pending buffer, so
        // a rejected append leaves the stream exactly as it was. The
        // whole batch is one commit: every event carries its version.
        let version = self.commit_version + 1;
        let mut next_id = starting_event_id;
        let mut batch = Vec::with_capacity(self.uncommitted.len());
        for event in &self.uncommitted {
            let event_id = event.event_id().unwrap_or(next_id);
            next_id = event_id + 1;
            batch.push(RecordedEvent::from_uncommitted(
                event.clone(),
                event_id,
                version,
                headers,
            ));
        }

        log.append(&self.key, expected, batch.clone(), commit_id, headers)
            .await?;

        tracing::debug!(
            stream = %self.key,
            commit_id = %commit_id,
            events = batch.len(),
            version = version,
            "Stream committed"
        );

        self.committed.extend(batch);
        self.commit_version = self.stream_version;
        self.uncommitted.clear();
        Ok(next_id)
    }
}
