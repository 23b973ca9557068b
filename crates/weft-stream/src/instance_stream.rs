//! Append/consolidate instance stream.
//!
//! # Invariants
//!
//! - Current is replaced only by consolidation, which holds ExclusiveWrite.
//! - Between consolidations Current is immutable; readers share one
//!   `Arc<[T]>` snapshot.
//! - Pending accepts appends only through an appender obtained under
//!   SharedWrite (or a consumer obtained under ExclusiveWrite).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;
use weft_access::{AccessController, AccessType};
use weft_jobs::{JobHandle, JobScheduler};

use crate::error::{StreamError, StreamResult};
use crate::lanes::LaneStream;
use crate::lease::StreamLease;
use crate::managed::ManagedStream;

struct StreamCore<T> {
    label: Arc<str>,
    controller: AccessController,
    pending: LaneStream<T>,
    current: RwLock<Arc<[T]>>,
    disposed: AtomicBool,
}

impl<T> StreamCore<T> {
    fn ensure_live(&self) -> StreamResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(StreamError::Disposed {
                stream: self.label.to_string(),
            });
        }
        Ok(())
    }

    fn current(&self) -> StreamResult<Arc<[T]>> {
        self.current
            .read()
            .map(|current| Arc::clone(&*current))
            .map_err(|_| StreamError::Poisoned(self.label.to_string()))
    }

    fn consolidate_now(&self) -> StreamResult<usize> {
        let mut next = Vec::with_capacity(self.pending.len()?);
        self.pending.drain_into(&mut next)?;
        let count = next.len();
        *self
            .current
            .write()
            .map_err(|_| StreamError::Poisoned(self.label.to_string()))? = next.into();
        Ok(count)
    }
}

/// Stream of instances: parallel appends into lanes, consolidated into a
/// flat snapshot once per pass.
///
/// Cloning shares the same stream.
pub struct InstanceStream<T> {
    core: Arc<StreamCore<T>>,
}

impl<T> Clone for InstanceStream<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Send + Sync + 'static> InstanceStream<T> {
    /// Create a stream with `lane_count` pending lanes. Use the scheduler's
    /// [`lane_count`](JobScheduler::lane_count) so every worker has a lane.
    pub fn new(label: impl Into<String>, lane_count: usize) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        Self {
            core: Arc::new(StreamCore {
                controller: AccessController::new(label.to_string()),
                pending: LaneStream::new(Arc::clone(&label), lane_count),
                current: RwLock::new(Arc::from(Vec::new())),
                disposed: AtomicBool::new(false),
                label,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    pub fn controller(&self) -> &AccessController {
        &self.core.controller
    }

    pub fn lane_count(&self) -> usize {
        self.core.pending.lane_count()
    }

    /// Number of instances in the current snapshot.
    pub fn len(&self) -> StreamResult<usize> {
        Ok(self.core.current()?.len())
    }

    pub fn is_empty(&self) -> StreamResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of instances waiting for the next consolidation.
    pub fn pending_len(&self) -> StreamResult<usize> {
        self.core.pending.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.core.disposed.load(Ordering::Acquire)
    }

    /// The current snapshot without going through access control.
    ///
    /// Only meaningful from outside the schedule, once the last
    /// consolidation's handle has completed.
    pub fn snapshot(&self) -> StreamResult<Arc<[T]>> {
        self.core.current()
    }

    /// Acquire SharedWrite and get an appender for the pending lanes.
    pub fn acquire_for_append(&self) -> StreamResult<StreamLease<StreamAppender<T>>> {
        self.core.ensure_live()?;
        let grant = self.core.controller.acquire_async(AccessType::SharedWrite)?;
        let appender = StreamAppender {
            core: Arc::clone(&self.core),
        };
        Ok(StreamLease::new(appender, grant))
    }

    /// Acquire access to the current snapshot.
    ///
    /// [`ConsumeMode::Read`] takes SharedRead. [`ConsumeMode::Update`] takes
    /// ExclusiveWrite and also lets the consumer continue instances into
    /// pending for the next pass.
    pub fn acquire_for_consume(&self, mode: ConsumeMode) -> StreamResult<StreamLease<StreamConsumer<T>>> {
        self.core.ensure_live()?;
        let grant = self.core.controller.acquire_async(mode.access_type())?;
        let consumer = StreamConsumer {
            core: Arc::clone(&self.core),
            mode,
        };
        Ok(StreamLease::new(consumer, grant))
    }

    /// Flip pending into a fresh current snapshot once `depends_on` and
    /// every outstanding user of the stream have finished.
    pub fn consolidate(&self, depends_on: &JobHandle, scheduler: &JobScheduler) -> StreamResult<JobHandle> {
        self.core.ensure_live()?;
        let grant = self.core.controller.acquire_async(AccessType::ExclusiveWrite)?;
        let dependency = JobHandle::combine([grant.dependency(), depends_on]);

        let core = Arc::clone(&self.core);
        let name = format!("consolidate:{}", self.core.label);
        let job = scheduler.schedule(&name, &dependency, move |ctx| {
            let count = core
                .consolidate_now()
                .map_err(|e| e.into_job_error(ctx.job_name()))?;
            debug!(stream = %core.label, count, "stream consolidated");
            Ok(())
        });
        grant.release(&job);
        Ok(job)
    }

    /// Wait for every outstanding user, then drop all contents. Further
    /// acquisitions fail.
    pub fn dispose(&self) -> StreamResult<()> {
        let grant = self.core.controller.acquire(AccessType::Disposal)?;
        self.core.disposed.store(true, Ordering::Release);
        self.core.pending.clear()?;
        *self
            .core
            .current
            .write()
            .map_err(|_| StreamError::Poisoned(self.core.label.to_string()))? = Arc::from(Vec::new());
        grant.release(&JobHandle::completed());
        debug!(stream = %self.core.label, "stream disposed");
        Ok(())
    }
}

impl<T: Send + Sync + 'static> ManagedStream for InstanceStream<T> {
    fn label(&self) -> &str {
        InstanceStream::label(self)
    }

    fn consolidate(&self, depends_on: &JobHandle, scheduler: &JobScheduler) -> StreamResult<JobHandle> {
        InstanceStream::consolidate(self, depends_on, scheduler)
    }

    fn dispose(&self) -> StreamResult<()> {
        InstanceStream::dispose(self)
    }
}

impl<T> fmt::Debug for InstanceStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceStream")
            .field("label", &self.core.label)
            .field("lanes", &self.core.pending.lane_count())
            .finish()
    }
}

/// Job-side append handle for a stream's pending lanes.
pub struct StreamAppender<T> {
    core: Arc<StreamCore<T>>,
}

impl<T> Clone for StreamAppender<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> StreamAppender<T> {
    pub fn append(&self, lane: usize, value: T) -> StreamResult<()> {
        self.core.ensure_live()?;
        self.core.pending.push(lane, value)
    }

    pub fn append_all(&self, lane: usize, values: impl IntoIterator<Item = T>) -> StreamResult<()> {
        self.core.ensure_live()?;
        self.core.pending.extend(lane, values)
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }
}

impl<T> fmt::Debug for StreamAppender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamAppender")
            .field("stream", &self.core.label)
            .finish()
    }
}

/// How a consumer intends to use a stream's current snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsumeMode {
    /// Look at instances only.
    Read,
    /// Process instances and continue the ones still alive into the next pass.
    Update,
}

impl ConsumeMode {
    pub fn access_type(self) -> AccessType {
        match self {
            Self::Read => AccessType::SharedRead,
            Self::Update => AccessType::ExclusiveWrite,
        }
    }
}

/// Job-side view of a stream's current snapshot.
pub struct StreamConsumer<T> {
    core: Arc<StreamCore<T>>,
    mode: ConsumeMode,
}

impl<T> Clone for StreamConsumer<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            mode: self.mode,
        }
    }
}

impl<T> StreamConsumer<T> {
    pub fn mode(&self) -> ConsumeMode {
        self.mode
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    /// The current snapshot. Index it freely; it does not change until the
    /// next consolidation.
    pub fn current(&self) -> StreamResult<Arc<[T]>> {
        self.core.current()
    }

    /// Re-append an instance to pending so it is processed again next pass.
    pub fn continue_with(&self, lane: usize, value: T) -> StreamResult<()> {
        if self.mode != ConsumeMode::Update {
            return Err(StreamError::ReadOnlyConsumer {
                stream: self.core.label.to_string(),
            });
        }
        self.core.ensure_live()?;
        self.core.pending.push(lane, value)
    }
}

impl<T> fmt::Debug for StreamConsumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("stream", &self.core.label)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use weft_jobs::SchedulerConfig;

    fn scheduler(workers: usize) -> JobScheduler {
        JobScheduler::new(SchedulerConfig::with_workers(workers)).unwrap()
    }

    #[test]
    fn consolidating_empty_stream_yields_empty_current() {
        let s = scheduler(1);
        let stream = InstanceStream::<u32>::new("empty", s.lane_count());
        stream
            .consolidate(&JobHandle::completed(), &s)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(stream.len().unwrap(), 0);
    }

    #[test]
    fn append_then_consolidate() {
        let s = scheduler(2);
        let stream = InstanceStream::new("numbers", s.lane_count());

        let lease = stream.acquire_for_append().unwrap();
        let appender = lease.handle().clone();
        let job = s.schedule("produce", lease.dependency(), move |ctx| {
            for i in 0..10u32 {
                appender
                    .append(ctx.lane(), i)
                    .map_err(|e| e.into_job_error(ctx.job_name()))?;
            }
            Ok(())
        });
        lease.release(&job);

        let done = stream.consolidate(&job, &s).unwrap();
        done.wait().unwrap();
        let mut values = stream.snapshot().unwrap().to_vec();
        values.sort_unstable();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
        assert_eq!(stream.pending_len().unwrap(), 0);
    }

    #[test]
    fn second_consolidation_is_empty_delta() {
        let s = scheduler(1);
        let stream = InstanceStream::new("twice", s.lane_count());
        let lease = stream.acquire_for_append().unwrap();
        lease.handle().append(0, 1u8).unwrap();
        lease.release(&JobHandle::completed());

        let first = stream.consolidate(&JobHandle::completed(), &s).unwrap();
        let second = stream.consolidate(&first, &s).unwrap();
        second.wait().unwrap();
        assert_eq!(stream.len().unwrap(), 0);
    }

    #[test]
    fn read_consumer_cannot_continue() {
        let stream = InstanceStream::<u8>::new("ro", 2);
        let lease = stream.acquire_for_consume(ConsumeMode::Read).unwrap();
        assert!(matches!(
            lease.handle().continue_with(0, 1),
            Err(StreamError::ReadOnlyConsumer { .. })
        ));
        lease.release(&JobHandle::completed());
    }

    #[test]
    fn update_consumer_continues_into_next_pass() {
        let s = scheduler(2);
        let stream = InstanceStream::new("countdown", s.lane_count());
        let lease = stream.acquire_for_append().unwrap();
        lease.handle().append_all(0, [3u32, 1, 2]).unwrap();
        lease.release(&JobHandle::completed());
        stream
            .consolidate(&JobHandle::completed(), &s)
            .unwrap()
            .wait()
            .unwrap();

        let lease = stream.acquire_for_consume(ConsumeMode::Update).unwrap();
        let consumer = lease.handle().clone();
        let job = s.schedule("tick", lease.dependency(), move |ctx| {
            for value in consumer.current().map_err(|e| e.into_job_error("tick"))?.iter() {
                if *value > 1 {
                    consumer
                        .continue_with(ctx.lane(), value - 1)
                        .map_err(|e| e.into_job_error("tick"))?;
                }
            }
            Ok(())
        });
        lease.release(&job);

        stream.consolidate(&job, &s).unwrap().wait().unwrap();
        let mut values = stream.snapshot().unwrap().to_vec();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn consolidation_waits_for_readers() {
        let s = scheduler(2);
        let stream = InstanceStream::new("guarded", s.lane_count());
        let append = stream.acquire_for_append().unwrap();
        append.handle().append(0, 7u8).unwrap();
        append.release(&JobHandle::completed());
        stream
            .consolidate(&JobHandle::completed(), &s)
            .unwrap()
            .wait()
            .unwrap();

        let (reader_done, finish_reader) = JobHandle::pending("reader");
        let read = stream.acquire_for_consume(ConsumeMode::Read).unwrap();
        read.release(&reader_done);

        let consolidated = stream.consolidate(&JobHandle::completed(), &s).unwrap();
        assert!(consolidated
            .wait_timeout(std::time::Duration::from_millis(20))
            .is_none());
        assert_eq!(stream.len().unwrap(), 1);
        finish_reader.complete(Ok(()));
        consolidated.wait().unwrap();
        assert_eq!(stream.len().unwrap(), 0);
    }

    #[test]
    fn append_after_dispose_fails() {
        let stream = InstanceStream::<u8>::new("gone", 2);
        let lease = stream.acquire_for_append().unwrap();
        let appender = lease.handle().clone();
        lease.release(&JobHandle::completed());

        stream.dispose().unwrap();
        assert!(stream.is_disposed());
        assert!(matches!(
            appender.append(0, 1),
            Err(StreamError::Disposed { ref stream }) if stream == "gone"
        ));
        assert!(matches!(
            stream.acquire_for_append(),
            Err(StreamError::Disposed { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn concurrent_producers_lose_nothing(producers in 1usize..6, per_producer in 0usize..200) {
            let s = scheduler(4);
            let stream = InstanceStream::new("prop", s.lane_count());
            let lease = stream.acquire_for_append().unwrap();
            let jobs: Vec<JobHandle> = (0..producers)
                .map(|p| {
                    let appender = lease.handle().clone();
                    s.schedule("produce", lease.dependency(), move |ctx| {
                        for k in 0..per_producer {
                            appender
                                .append(ctx.lane(), (p, k))
                                .map_err(|e| e.into_job_error(ctx.job_name()))?;
                        }
                        Ok(())
                    })
                })
                .collect();
            let produced = JobHandle::combine(jobs.iter());
            lease.release(&produced);
            stream.consolidate(&produced, &s).unwrap().wait().unwrap();

            let current = stream.snapshot().unwrap();
            prop_assert_eq!(current.len(), producers * per_producer);
            // Each producer ran as one job on one lane, so its values stay
            // in append order.
            for p in 0..producers {
                let seen: Vec<usize> = current.iter().filter(|(q, _)| *q == p).map(|(_, k)| *k).collect();
                prop_assert_eq!(seen, (0..per_producer).collect::<Vec<_>>());
            }
        }
    }
}
