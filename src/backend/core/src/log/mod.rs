//! Append-only event log client boundary.
//!
//! The log is an external collaborator: Strand consumes it through the
//! [`EventLog`] trait and ships only an in-memory reference backend for
//! development and tests. A production backend implements the same
//! contract against a real event store.
//!
//! Contract highlights:
//! - `append` is atomic across the whole batch and guarded by an
//!   [`ExpectedVersion`]; a mismatch surfaces as a version conflict.
//! - `read_from` returns a gap-free contiguous tail in version order.
//! - `freeze` / `unfreeze` implement a per-stream advisory lock used to
//!   serialize conflict resolutions; `unfreeze` must be callable even
//!   after a prior failure and always succeeds as a cleanup step.

pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::events::event::{Headers, RecordedEvent, StreamKey};

pub use memory::{InMemoryLog, LogStats};

// =============================================================================
// Expected Version
// =============================================================================

/// Version guard for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Append at whatever version the log is at, trusting the log.
    Any,

    /// Append only if the stream's current version matches exactly;
    /// otherwise the append is rejected with a version conflict.
    Exact(u64),
}

// =============================================================================
// Event Log Trait
// =============================================================================

/// Client contract for the append-only, versioned event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append a batch of events to a stream, atomically.
    ///
    /// The log is authoritative for versions: accepted events occupy the
    /// next contiguous run after the stream's current version. Fails with
    /// a `VersionConflict` when the guard does not hold, or an
    /// infrastructure error when the log is unreachable.
    async fn append(
        &self,
        key: &StreamKey,
        expected: ExpectedVersion,
        events: Vec<RecordedEvent>,
        commit_id: Uuid,
        headers: &Headers,
    ) -> Result<()>;

    /// Read the contiguous run of events at `from_version` and after.
    ///
    /// Returns an empty vector when the stream has nothing at or past
    /// that version.
    async fn read_from(&self, key: &StreamKey, from_version: u64) -> Result<Vec<RecordedEvent>>;

    /// Acquire the per-stream advisory lock.
    ///
    /// At most one holder per stream; a competing resolution observes
    /// `FreezeBusy` (or blocks, depending on the backend) and must not
    /// proceed to merge.
    async fn freeze(&self, key: &StreamKey) -> Result<()>;

    /// Release the per-stream advisory lock.
    ///
    /// Idempotent: releasing an unfrozen stream succeeds, so cleanup
    /// paths can call it unconditionally.
    async fn unfreeze(&self, key: &StreamKey) -> Result<()>;
}
