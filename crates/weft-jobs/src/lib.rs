//! Job scheduling primitives for weft.
//!
//! Nothing in weft blocks its caller waiting for work to finish. Every
//! operation takes a [`JobHandle`] to wait behind and returns a new one
//! representing its own completion; callers chain and [`JobHandle::combine`]
//! handles to express ordering. Work runs on a [`JobScheduler`], a rayon
//! pool whose threads map onto dense lane indices.
//!
//! # Key Types
//!
//! - [`JobHandle`] — Dependency token for a future point in the schedule
//! - [`JobCompleter`] — Write side of a pending handle
//! - [`JobScheduler`] — Worker pool running jobs once their dependencies complete
//! - [`JobContext`] — What a running job knows about itself (name, lane)
//! - [`BatchStrategy`] — How parallel-for jobs split their items

pub mod batch;
pub mod config;
pub mod error;
pub mod handle;
pub mod scheduler;

pub use batch::{BatchStrategy, CHUNK_BYTES};
pub use config::SchedulerConfig;
pub use error::{JobError, JobOutcome, SchedulerError};
pub use handle::{JobCompleter, JobHandle};
pub use scheduler::{current_lane, JobContext, JobScheduler};
