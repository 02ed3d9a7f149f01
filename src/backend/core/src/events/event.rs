//! Event definitions for the aggregate store.
//!
//! This module provides:
//! - Identity newtypes for streams (`Bucket`, `StreamId`, `StreamKey`)
//! - Commit and event headers
//! - `UncommittedEvent` for locally produced, not-yet-durable events
//! - `RecordedEvent` for events as the log persists them
//!
//! Payloads are type-erased (`serde_json::Value` plus a type name); the
//! store never interprets them. Polymorphic mapping back to domain types
//! is the aggregate's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Stream Identity
// =============================================================================

/// Partition namespace under which stream identities are scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bucket(pub String);

impl Bucket {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self(bucket.into())
    }
}

impl Default for Bucket {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a stream (one aggregate instance's history).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a stream ID for an aggregate kind and instance id.
    pub fn for_aggregate(kind: &str, id: impl fmt::Display) -> Self {
        Self(format!("{}-{}", kind, id))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified stream identity: the unit of mutual exclusion.
///
/// All log and queue operations are keyed by `(bucket, stream_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamKey {
    pub bucket: Bucket,
    pub stream_id: StreamId,
}

impl StreamKey {
    pub fn new(bucket: Bucket, stream_id: StreamId) -> Self {
        Self { bucket, stream_id }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.stream_id)
    }
}

// =============================================================================
// Headers
// =============================================================================

/// Metadata headers attached to commits and individual events.
pub type Headers = HashMap<String, serde_json::Value>;

// =============================================================================
// Uncommitted Events
// =============================================================================

/// A locally produced domain event not yet durably appended.
///
/// The event id is assigned lazily: absent until commit, then filled in
/// from a monotonically incrementing starting id in application order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UncommittedEvent {
    /// Batch-unique event id, assigned at commit when absent.
    pub event_id: Option<u64>,

    /// Event type name, used for merge routing.
    pub event_type: String,

    /// Type-erased event payload.
    pub data: serde_json::Value,

    /// Per-event metadata headers.
    #[serde(default)]
    pub headers: Headers,
}

impl UncommittedEvent {
    /// Create a new uncommitted event with no id assigned.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_id: None,
            event_type: event_type.into(),
            data,
            headers: Headers::new(),
        }
    }

    /// Attach a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.headers.insert(key.into(), v);
        }
        self
    }

    /// The id assigned to this event, if any.
    pub fn event_id(&self) -> Option<u64> {
        self.event_id
    }

    /// Assign an id if none is present, returning the id in effect.
    pub fn assign_id(&mut self, id: u64) -> u64 {
        *self.event_id.get_or_insert(id)
    }
}

// =============================================================================
// Recorded Events
// =============================================================================

/// An event as durably recorded in the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Batch-assigned event id.
    pub event_id: u64,

    /// Position of this event in its stream (1-based, contiguous).
    pub version: u64,

    /// Event type name.
    pub event_type: String,

    /// Type-erased event payload.
    pub data: serde_json::Value,

    /// Metadata headers (event headers merged with commit headers).
    #[serde(default)]
    pub headers: Headers,

    /// When the log recorded the event.
    pub recorded_at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Build the durable form of an uncommitted event.
    ///
    /// Commit headers are merged under the event's own headers; the
    /// event's headers win on key collisions.
    pub fn from_uncommitted(
        event: UncommittedEvent,
        event_id: u64,
        version: u64,
        commit_headers: &Headers,
    ) -> Self {
        let mut headers = commit_headers.clone();
        headers.extend(event.headers);
        Self {
            event_id,
            version,
            event_type: event.event_type,
            data: event.data,
            headers,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_key_display() {
        let key = StreamKey::new(Bucket::new("orders"), StreamId::new("order-42"));
        assert_eq!(key.to_string(), "orders/order-42");
    }

    #[test]
    fn test_stream_id_for_aggregate() {
        let id = StreamId::for_aggregate("cart", 7);
        assert_eq!(id.0, "cart-7");
    }

    #[test]
    fn test_assign_id_is_lazy() {
        let mut event = UncommittedEvent::new("ItemAdded", serde_json::json!({"sku": "a"}));
        assert_eq!(event.event_id(), None);

        assert_eq!(event.assign_id(100), 100);
        // A second assignment must not overwrite.
        assert_eq!(event.assign_id(999), 100);
        assert_eq!(event.event_id(), Some(100));
    }

    #[test]
    fn test_recorded_event_merges_commit_headers() {
        let event = UncommittedEvent::new("ItemAdded", serde_json::json!({}))
            .with_header("source", "writer-a");

        let mut commit_headers = Headers::new();
        commit_headers.insert("commit".into(), serde_json::json!("c-1"));
        commit_headers.insert("source".into(), serde_json::json!("commit-level"));

        let recorded = RecordedEvent::from_uncommitted(event, 100, 6, &commit_headers);
        assert_eq!(recorded.event_id, 100);
        assert_eq!(recorded.version, 6);
        assert_eq!(recorded.headers["commit"], serde_json::json!("c-1"));
        // Event-level header wins over the commit-level one.
        assert_eq!(recorded.headers["source"], serde_json::json!("writer-a"));
    }
}
