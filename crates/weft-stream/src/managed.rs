use weft_jobs::{JobHandle, JobScheduler};

use crate::error::StreamResult;

/// A stream a driver or system owns and maintains each pass.
///
/// Object-safe so a node can hold streams of different instance types.
pub trait ManagedStream: Send + Sync {
    fn label(&self) -> &str;

    /// Schedule this pass's consolidation behind `depends_on`.
    fn consolidate(&self, depends_on: &JobHandle, scheduler: &JobScheduler) -> StreamResult<JobHandle>;

    /// Wait for outstanding users and release the stream's storage.
    fn dispose(&self) -> StreamResult<()>;
}
