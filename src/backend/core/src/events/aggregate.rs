//! Aggregate trait for event-sourced state reconstruction and merging.
//!
//! Aggregates are domain objects rebuilt from a stream of events. Each
//! aggregate starts at its `Default` state and folds events via `apply`.
//! During conflict resolution the store additionally calls `merge`, the
//! domain-specific hook that reconciles an uncommitted event against
//! state that has moved underneath it.

use thiserror::Error;

use super::event::RecordedEvent;

// =============================================================================
// Merge Routing Failure
// =============================================================================

/// Raised by [`Aggregate::merge`] when an event's type has no applicable
/// merge routing.
///
/// This is the only expected merge failure; the resolver translates it to
/// a terminal resolution failure rather than retrying.
#[derive(Debug, Clone, Error)]
#[error("no merge route for event type `{event_type}`")]
pub struct NoRoute {
    pub event_type: String,
}

impl NoRoute {
    pub fn for_type(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
        }
    }
}

// =============================================================================
// Aggregate Trait
// =============================================================================

/// Trait for aggregates that can be reconstructed from a sequence of
/// events and merged under conflict.
///
/// An aggregate starts at its `Default` state and folds each event via
/// `apply`. Given the same event stream, the resulting state is
/// deterministic. Payloads are type-erased; routing happens on the event
/// type name.
pub trait Aggregate: Default {
    /// Aggregate kind name, used to select the configured conflict
    /// strategy and to derive stream identities.
    const KIND: &'static str;

    /// Project one event onto in-memory state.
    ///
    /// Implementations must be pure functions of `(self, event) -> self'`.
    /// They must not perform I/O or fail: every persisted event is valid
    /// by definition, and unknown types are ignored.
    fn apply(&mut self, event_type: &str, data: &serde_json::Value);

    /// Reconcile one uncommitted event against state that already moved.
    ///
    /// Called by the strong and weak strategies for each conflicting
    /// event, in submission order, after the aggregate has been caught up
    /// with the log's tail. Returns [`NoRoute`] when the event type has
    /// no applicable merge routing; any other behavior (including simply
    /// delegating to `apply`) is a domain decision.
    fn merge(&mut self, event_type: &str, data: &serde_json::Value) -> Result<(), NoRoute>;

    /// Replay a batch of durable events to catch the aggregate up.
    fn hydrate(&mut self, events: &[RecordedEvent]) {
        for event in events {
            self.apply(&event.event_type, &event.data);
        }
    }

    /// Whether a snapshot should be captured after a successful merge.
    ///
    /// Consulted only post-merge, and only when versions actually moved.
    fn should_snapshot(&self) -> bool {
        false
    }

    /// Serialize the current projection for snapshotting.
    ///
    /// Returning `None` opts out even when `should_snapshot` said yes.
    fn take_snapshot(&self) -> Option<serde_json::Value> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::Headers;

    /// Running total that accepts `Added` events and merges them
    /// commutatively; anything else has no merge route.
    #[derive(Debug, Default)]
    struct Tally {
        total: i64,
        applied: u64,
    }

    impl Aggregate for Tally {
        const KIND: &'static str = "tally";

        fn apply(&mut self, event_type: &str, data: &serde_json::Value) {
            if event_type == "Added" {
                self.total += data["amount"].as_i64().unwrap_or(0);
            }
            self.applied += 1;
        }

        fn merge(&mut self, event_type: &str, data: &serde_json::Value) -> Result<(), NoRoute> {
            match event_type {
                "Added" => {
                    self.apply(event_type, data);
                    Ok(())
                }
                other => Err(NoRoute::for_type(other)),
            }
        }

        fn should_snapshot(&self) -> bool {
            self.applied >= 3
        }

        fn take_snapshot(&self) -> Option<serde_json::Value> {
            Some(serde_json::json!({ "total": self.total }))
        }
    }

    fn recorded(version: u64, event_type: &str, amount: i64) -> RecordedEvent {
        RecordedEvent {
            event_id: version,
            version,
            event_type: event_type.to_string(),
            data: serde_json::json!({ "amount": amount }),
            headers: Headers::new(),
            recorded_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_hydrate_folds_in_order() {
        let mut tally = Tally::default();
        tally.hydrate(&[recorded(1, "Added", 5), recorded(2, "Added", 7)]);

        assert_eq!(tally.total, 12);
        assert_eq!(tally.applied, 2);
    }

    #[test]
    fn test_merge_routes_known_types() {
        let mut tally = Tally::default();
        tally
            .merge("Added", &serde_json::json!({ "amount": 3 }))
            .unwrap();
        assert_eq!(tally.total, 3);
    }

    #[test]
    fn test_merge_rejects_unknown_types() {
        let mut tally = Tally::default();
        let err = tally
            .merge("Renamed", &serde_json::json!({}))
            .unwrap_err();
        assert_eq!(err.event_type, "Renamed");
    }

    #[test]
    fn test_snapshot_capability() {
        let mut tally = Tally::default();
        assert!(!tally.should_snapshot());

        tally.hydrate(&[
            recorded(1, "Added", 1),
            recorded(2, "Added", 1),
            recorded(3, "Added", 1),
        ]);
        assert!(tally.should_snapshot());
        assert_eq!(
            tally.take_snapshot(),
            Some(serde_json::json!({ "total": 3 }))
        );
    }
}
