//! In-memory event log backend for testing and development.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::events::event::{Headers, RecordedEvent, StreamKey};

use super::{EventLog, ExpectedVersion};

/// Call statistics, useful for assertions and observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    pub appends: u64,
    pub reads: u64,
    pub freezes: u64,
    pub unfreezes: u64,
}

/// Per-stream storage: the durable event run, the version of the last
/// accepted commit, and the advisory lock flag.
#[derive(Debug, Default)]
struct StreamRecord {
    version: u64,
    events: Vec<RecordedEvent>,
    frozen: bool,
}

/// In-memory [`EventLog`] with fail-fast freeze semantics.
///
/// Freeze contention is reported as `FreezeBusy` rather than blocking;
/// callers decide whether to back off and retry. The log is
/// authoritative for versions: each accepted batch is one commit, its
/// events all stamped with the next version, so the monotonic,
/// contiguous invariant holds even for unguarded
/// (`ExpectedVersion::Any`) appends.
pub struct InMemoryLog {
    streams: RwLock<HashMap<StreamKey, StreamRecord>>,
    appends: AtomicU64,
    reads: AtomicU64,
    freezes: AtomicU64,
    unfreezes: AtomicU64,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            appends: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            freezes: AtomicU64::new(0),
            unfreezes: AtomicU64::new(0),
        }
    }

    /// Version of the last accepted commit for a stream (0 if absent).
    pub fn version_of(&self, key: &StreamKey) -> u64 {
        self.streams
            .read()
            .get(key)
            .map(|record| record.version)
            .unwrap_or(0)
    }

    /// Whether the stream's advisory lock is currently held.
    pub fn is_frozen(&self, key: &StreamKey) -> bool {
        self.streams
            .read()
            .get(key)
            .map(|record| record.frozen)
            .unwrap_or(false)
    }

    /// Get call statistics.
    pub fn stats(&self) -> LogStats {
        LogStats {
            appends: self.appends.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            freezes: self.freezes.load(Ordering::Relaxed),
            unfreezes: self.unfreezes.load(Ordering::Relaxed),
        }
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryLog {
    async fn append(
        &self,
        key: &StreamKey,
        expected: ExpectedVersion,
        events: Vec<RecordedEvent>,
        commit_id: Uuid,
        _headers: &Headers,
    ) -> Result<()> {
        self.appends.fetch_add(1, Ordering::Relaxed);

        let mut streams = self.streams.write();
        let record = streams.entry(key.clone()).or_default();

        if let ExpectedVersion::Exact(version) = expected {
            if version != record.version {
                return Err(StoreError::version_conflict(key, version, record.version));
            }
        }

        // One batch, one commit: the log is authoritative for versions.
        record.version += 1;
        let version = record.version;
        for mut event in events {
            event.version = version;
            record.events.push(event);
        }

        tracing::debug!(
            stream = %key,
            commit_id = %commit_id,
            version = version,
            "Batch appended"
        );
        Ok(())
    }

    async fn read_from(&self, key: &StreamKey, from_version: u64) -> Result<Vec<RecordedEvent>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let streams = self.streams.read();
        let Some(record) = streams.get(key) else {
            return Ok(Vec::new());
        };

        Ok(record
            .events
            .iter()
            .filter(|event| event.version >= from_version)
            .cloned()
            .collect())
    }

    async fn freeze(&self, key: &StreamKey) -> Result<()> {
        self.freezes.fetch_add(1, Ordering::Relaxed);

        let mut streams = self.streams.write();
        let record = streams.entry(key.clone()).or_default();
        if record.frozen {
            return Err(StoreError::freeze_busy(key));
        }
        record.frozen = true;

        tracing::debug!(stream = %key, "Stream frozen");
        Ok(())
    }

    async fn unfreeze(&self, key: &StreamKey) -> Result<()> {
        self.unfreezes.fetch_add(1, Ordering::Relaxed);

        let mut streams = self.streams.write();
        if let Some(record) = streams.get_mut(key) {
            record.frozen = false;
        }

        tracing::debug!(stream = %key, "Stream unfrozen");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::events::event::{Bucket, StreamId};

    fn key() -> StreamKey {
        StreamKey::new(Bucket::new("default"), StreamId::new("cart-1"))
    }

    fn batch(n: usize) -> Vec<RecordedEvent> {
        (0..n)
            .map(|i| RecordedEvent {
                event_id: i as u64,
                version: 0,
                event_type: "Test".to_string(),
                data: serde_json::json!({}),
                headers: Headers::new(),
                recorded_at: chrono::Utc::now(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_guarded_append_and_read() {
        let log = InMemoryLog::new();

        log.append(
            &key(),
            ExpectedVersion::Exact(0),
            batch(2),
            Uuid::new_v4(),
            &Headers::new(),
        )
        .await
        .unwrap();

        // Two events, one commit.
        assert_eq!(log.version_of(&key()), 1);
        let events = log.read_from(&key(), 1).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.version == 1));
    }

    #[tokio::test]
    async fn test_stale_guard_is_rejected() {
        let log = InMemoryLog::new();

        log.append(
            &key(),
            ExpectedVersion::Exact(0),
            batch(1),
            Uuid::new_v4(),
            &Headers::new(),
        )
        .await
        .unwrap();

        let err = log
            .append(
                &key(),
                ExpectedVersion::Exact(0),
                batch(1),
                Uuid::new_v4(),
                &Headers::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::VersionConflict);
        assert_eq!(log.version_of(&key()), 1);
    }

    #[tokio::test]
    async fn test_unguarded_append_reversions() {
        let log = InMemoryLog::new();

        log.append(
            &key(),
            ExpectedVersion::Exact(0),
            batch(1),
            Uuid::new_v4(),
            &Headers::new(),
        )
        .await
        .unwrap();

        // A batch built against a stale view still lands contiguously.
        log.append(
            &key(),
            ExpectedVersion::Any,
            batch(2),
            Uuid::new_v4(),
            &Headers::new(),
        )
        .await
        .unwrap();

        let all = log.read_from(&key(), 1).await.unwrap();
        let versions: Vec<u64> = all.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2, 2]);
        assert_eq!(log.version_of(&key()), 2);
    }

    #[tokio::test]
    async fn test_freeze_is_exclusive_and_unfreeze_idempotent() {
        let log = InMemoryLog::new();

        log.freeze(&key()).await.unwrap();
        let err = log.freeze(&key()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::FreezeBusy);

        log.unfreeze(&key()).await.unwrap();
        assert!(!log.is_frozen(&key()));

        // Cleanup paths may unfreeze unconditionally.
        log.unfreeze(&key()).await.unwrap();

        // Other streams are unaffected.
        let other = StreamKey::new(Bucket::new("default"), StreamId::new("cart-2"));
        log.freeze(&other).await.unwrap();
    }

    #[tokio::test]
    async fn test_stats_count_calls() {
        let log = InMemoryLog::new();

        log.freeze(&key()).await.unwrap();
        log.unfreeze(&key()).await.unwrap();
        log.read_from(&key(), 1).await.unwrap();

        let stats = log.stats();
        assert_eq!(stats.freezes, 1);
        assert_eq!(stats.unfreezes, 1);
        assert_eq!(stats.reads, 1);
        assert_eq!(stats.appends, 0);
    }
}
