use weft_jobs::{JobHandle, JobScheduler};
use weft_types::Instance;

use crate::error::StreamResult;
use crate::instance_stream::InstanceStream;
use crate::managed::ManagedStream;

/// The streams behind one kind of task: live instances, and the instances
/// whose owners asked to cancel them.
///
/// The update job moves instances with a pending cancellation out of
/// `data` into `pending_cancel`; the cancel job drains `pending_cancel` the
/// following pass.
pub struct TaskStream<T> {
    pub data: InstanceStream<Instance<T>>,
    pub pending_cancel: InstanceStream<Instance<T>>,
}

impl<T> Clone for TaskStream<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            pending_cancel: self.pending_cancel.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> TaskStream<T> {
    pub fn new(label: impl Into<String>, lane_count: usize) -> Self {
        let label = label.into();
        Self {
            pending_cancel: InstanceStream::new(format!("{label}:pending-cancel"), lane_count),
            data: InstanceStream::new(label, lane_count),
        }
    }

    pub fn label(&self) -> &str {
        self.data.label()
    }
}

impl<T: Send + Sync + 'static> ManagedStream for TaskStream<T> {
    fn label(&self) -> &str {
        self.data.label()
    }

    fn consolidate(&self, depends_on: &JobHandle, scheduler: &JobScheduler) -> StreamResult<JobHandle> {
        let data = self.data.consolidate(depends_on, scheduler)?;
        let cancel = self.pending_cancel.consolidate(depends_on, scheduler)?;
        Ok(JobHandle::combine([&data, &cancel]))
    }

    fn dispose(&self) -> StreamResult<()> {
        self.data.dispose()?;
        self.pending_cancel.dispose()
    }
}
