#![allow(clippy::result_large_err)]
//! # Strand Core
//!
//! Event-sourced aggregate store with pluggable conflict resolution.
//!
//! ## Architecture
//!
//! - **Events**: stream identities, uncommitted/recorded events, the
//!   `EventStream` version machinery, and the `Aggregate` trait
//! - **Log**: the append-only event log client boundary with a
//!   version-guarded append and the per-stream freeze advisory lock
//! - **Delay**: the per-stream delayed queue used to batch conflicting
//!   writers for the weak strategy
//! - **Resolve**: the four conflict strategies (ignore, discard, strong,
//!   weak) behind one resolver, configured per aggregate kind
//! - **Store**: the invoking layer that commits streams and drives
//!   resolution when an append races
//! - **Telemetry**: tracing subscriber wiring

pub mod config;
pub mod delay;
pub mod error;
pub mod events;
pub mod log;
pub mod resolve;
pub mod store;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, Result, StoreError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{StoreConfig, VersionRacePolicy};
    pub use crate::delay::{DelayedEvent, DelayedQueue, InMemoryDelayedQueue, QueueStats};
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, Result, StoreError};
    pub use crate::events::aggregate::{Aggregate, NoRoute};
    pub use crate::events::event::{
        Bucket, Headers, RecordedEvent, StreamId, StreamKey, UncommittedEvent,
    };
    pub use crate::events::stream::{EventStream, StreamSnapshot};
    pub use crate::log::{EventLog, ExpectedVersion, InMemoryLog, LogStats};
    pub use crate::resolve::{ConflictResolver, ConflictStrategy};
    pub use crate::store::AggregateStore;
}
