//! Instance streams for weft.
//!
//! A stream has two storage areas. *Pending* is split into lanes, one per
//! worker, so producers append in parallel without contending. *Current* is
//! a flat snapshot rebuilt from pending by consolidation and otherwise
//! immutable, so any number of readers can index it at once.
//!
//! Streams are resources: every touch goes through the stream's
//! [`AccessController`](weft_access::AccessController). Appends take
//! SharedWrite, reads take SharedRead, consolidation and in-place updates
//! take ExclusiveWrite.
//!
//! # Key Types
//!
//! - [`LaneStream`] — Lane-partitioned append buffer
//! - [`InstanceStream`] — Pending lanes + consolidated snapshot
//! - [`CancelRequestSet`] — Pending cancellation ids + per-pass lookup
//! - [`TaskStream`] — Data stream paired with its pending-cancel stream
//! - [`ResolveTargets`] — Destination streams keyed by driver context
//! - [`ManagedStream`] — What a node needs to consolidate and dispose its streams

pub mod cancel;
pub mod error;
pub mod instance_stream;
pub mod lanes;
pub mod lease;
pub mod managed;
pub mod resolve;
pub mod task_stream;

pub use cancel::{CancelRequestReader, CancelRequestSet, CancelRequestWriter};
pub use error::{StreamError, StreamResult};
pub use instance_stream::{ConsumeMode, InstanceStream, StreamAppender, StreamConsumer};
pub use lanes::LaneStream;
pub use lease::StreamLease;
pub use managed::ManagedStream;
pub use resolve::{ResolveLease, ResolveTargets, ResolveWriter};
pub use task_stream::TaskStream;

/// Whether expensive validation (duplicate cancellation detection) runs.
///
/// On in debug builds, and in release builds with the `expensive-checks`
/// feature.
pub const EXPENSIVE_CHECKS: bool = cfg!(any(debug_assertions, feature = "expensive-checks"));
