//! Event Sourcing Primitives
//!
//! This module provides the event-sourcing core of Strand:
//!
//! - **`event`**: stream identity newtypes, headers, and the uncommitted /
//!   recorded event types.
//! - **`stream`**: the `EventStream` with its version counters and the
//!   `apply` / `concat` / `commit` primitives.
//! - **`aggregate`**: the `Aggregate` trait for state reconstruction,
//!   conflict merging, and the optional snapshot capability.

pub mod aggregate;
pub mod event;
pub mod stream;

pub use aggregate::*;
pub use event::*;
pub use stream::*;
