//! Cancellation request sets.
//!
//! A set collects [`InstanceId`]s in lane-partitioned pending storage and,
//! once per pass, moves them into a lookup that jobs query to decide
//! whether an instance should be cancelled. A driver's set is drained by
//! its propagator, which also forwards every id to the system's set and to
//! each child driver's set. A system's set is drained by plain
//! consolidation.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;
use weft_access::{AccessController, AccessType};
use weft_jobs::{JobHandle, JobScheduler};
use weft_types::{DriverContext, InstanceId, OwnerKey};

use crate::error::{StreamError, StreamResult};
use crate::lanes::LaneStream;
use crate::lease::StreamLease;
use crate::managed::ManagedStream;
use crate::EXPENSIVE_CHECKS;

struct CancelCore {
    label: Arc<str>,
    context: DriverContext,
    controller: AccessController,
    pending: LaneStream<InstanceId>,
    lookup: RwLock<HashSet<InstanceId>>,
}

impl CancelCore {
    fn lookup_read(&self) -> StreamResult<RwLockReadGuard<'_, HashSet<InstanceId>>> {
        self.lookup
            .read()
            .map_err(|_| StreamError::Poisoned(self.label.to_string()))
    }

    fn lookup_write(&self) -> StreamResult<RwLockWriteGuard<'_, HashSet<InstanceId>>> {
        self.lookup
            .write()
            .map_err(|_| StreamError::Poisoned(self.label.to_string()))
    }
}

/// Pending cancellation requests plus the lookup of this pass's requests.
///
/// Cloning shares the same set.
#[derive(Clone)]
pub struct CancelRequestSet {
    core: Arc<CancelCore>,
}

impl CancelRequestSet {
    /// Create a set for the node with the given context. Requests written
    /// through [`CancelRequestWriter::request_cancel`] are tagged with it.
    pub fn new(label: impl Into<String>, context: DriverContext, lane_count: usize) -> Self {
        let label: Arc<str> = Arc::from(label.into());
        Self {
            core: Arc::new(CancelCore {
                controller: AccessController::new(label.to_string()),
                pending: LaneStream::new(Arc::clone(&label), lane_count),
                lookup: RwLock::new(HashSet::new()),
                context,
                label,
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    pub fn context(&self) -> DriverContext {
        self.core.context
    }

    pub fn controller(&self) -> &AccessController {
        &self.core.controller
    }

    pub fn lane_count(&self) -> usize {
        self.core.pending.lane_count()
    }

    /// Writer over the pending lanes. Callers must hold SharedWrite.
    pub fn writer(&self) -> CancelRequestWriter {
        CancelRequestWriter {
            pending: self.core.pending.clone(),
            context: self.core.context,
        }
    }

    /// Reader over this pass's lookup. Callers must hold SharedRead.
    pub fn reader(&self) -> CancelRequestReader {
        CancelRequestReader {
            core: Arc::clone(&self.core),
        }
    }

    /// Acquire SharedWrite and get a writer.
    pub fn acquire_for_request(&self) -> StreamResult<StreamLease<CancelRequestWriter>> {
        let grant = self.core.controller.acquire_async(AccessType::SharedWrite)?;
        Ok(StreamLease::new(self.writer(), grant))
    }

    /// Acquire SharedRead and get a reader.
    pub fn acquire_for_lookup(&self) -> StreamResult<StreamLease<CancelRequestReader>> {
        let grant = self.core.controller.acquire_async(AccessType::SharedRead)?;
        Ok(StreamLease::new(self.reader(), grant))
    }

    /// Move pending ids into a fresh lookup and forward each distinct id to
    /// every writer in `sinks`, appending on `lane`. Callers must hold
    /// ExclusiveWrite: both pending and the lookup change.
    ///
    /// Every id is forwarded and the lookup is replaced before a duplicate
    /// is reported, so nothing is lost. With expensive checks enabled an id
    /// submitted twice in one pass then fails the drain with
    /// [`StreamError::DuplicateCancelRequest`]; otherwise it is kept once.
    pub fn drain_into(&self, sinks: &[CancelRequestWriter], lane: usize) -> StreamResult<usize> {
        let mut ids = Vec::new();
        self.core.pending.drain_into(&mut ids)?;

        let mut fresh = HashSet::with_capacity(ids.len());
        let mut duplicate = None;
        for id in ids {
            if !fresh.insert(id) {
                duplicate.get_or_insert(id);
                continue;
            }
            for sink in sinks {
                sink.forward(lane, id)?;
            }
        }
        let forwarded = fresh.len();
        *self.core.lookup_write()? = fresh;

        match duplicate {
            Some(id) if EXPENSIVE_CHECKS => Err(StreamError::DuplicateCancelRequest {
                set: self.core.label.to_string(),
                id,
            }),
            _ => Ok(forwarded),
        }
    }

    /// Move pending ids into a fresh lookup without forwarding.
    ///
    /// Used for sets that receive requests from several sources, where the
    /// same id arriving twice is expected.
    pub fn consolidate_now(&self) -> StreamResult<usize> {
        let mut ids = Vec::new();
        self.core.pending.drain_into(&mut ids)?;
        let mut lookup = self.core.lookup_write()?;
        lookup.clear();
        lookup.extend(ids);
        Ok(lookup.len())
    }

    /// Schedule [`consolidate_now`](Self::consolidate_now) under
    /// ExclusiveWrite behind `depends_on`.
    pub fn consolidate(&self, depends_on: &JobHandle, scheduler: &JobScheduler) -> StreamResult<JobHandle> {
        let grant = self.core.controller.acquire_async(AccessType::ExclusiveWrite)?;
        let dependency = JobHandle::combine([grant.dependency(), depends_on]);
        let set = self.clone();
        let name = format!("consolidate:{}", self.core.label);
        let job = scheduler.schedule(&name, &dependency, move |ctx| {
            let count = set
                .consolidate_now()
                .map_err(|e| e.into_job_error(ctx.job_name()))?;
            debug!(set = %set.core.label, count, "cancel requests consolidated");
            Ok(())
        });
        grant.release(&job);
        Ok(job)
    }

    /// Ids waiting in pending, lane by lane. For inspection outside the
    /// schedule.
    pub fn pending_snapshot(&self) -> StreamResult<Vec<InstanceId>> {
        let mut out = Vec::new();
        for lane in 0..self.core.pending.lane_count() {
            out.extend(self.core.pending.lane_snapshot(lane)?);
        }
        Ok(out)
    }

    /// Ids in this pass's lookup. For inspection outside the schedule.
    pub fn lookup_snapshot(&self) -> StreamResult<HashSet<InstanceId>> {
        Ok(self.core.lookup_read()?.clone())
    }

    pub fn dispose(&self) -> StreamResult<()> {
        let grant = self.core.controller.acquire(AccessType::Disposal)?;
        self.core.pending.clear()?;
        self.core.lookup_write()?.clear();
        grant.release(&JobHandle::completed());
        Ok(())
    }
}

impl ManagedStream for CancelRequestSet {
    fn label(&self) -> &str {
        CancelRequestSet::label(self)
    }

    fn consolidate(&self, depends_on: &JobHandle, scheduler: &JobScheduler) -> StreamResult<JobHandle> {
        CancelRequestSet::consolidate(self, depends_on, scheduler)
    }

    fn dispose(&self) -> StreamResult<()> {
        CancelRequestSet::dispose(self)
    }
}

impl fmt::Debug for CancelRequestSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRequestSet")
            .field("label", &self.core.label)
            .field("context", &self.core.context)
            .finish()
    }
}

/// Append side of a [`CancelRequestSet`].
#[derive(Clone, Debug)]
pub struct CancelRequestWriter {
    pending: LaneStream<InstanceId>,
    context: DriverContext,
}

impl CancelRequestWriter {
    /// Ask for the instance owned by `owner` in this set's context to be
    /// cancelled.
    pub fn request_cancel(&self, lane: usize, owner: OwnerKey) -> StreamResult<()> {
        self.pending.push(lane, InstanceId::new(owner, self.context))
    }

    /// Append an id as-is, keeping its original context.
    pub fn forward(&self, lane: usize, id: InstanceId) -> StreamResult<()> {
        self.pending.push(lane, id)
    }

    pub fn context(&self) -> DriverContext {
        self.context
    }
}

/// Lookup side of a [`CancelRequestSet`].
#[derive(Clone)]
pub struct CancelRequestReader {
    core: Arc<CancelCore>,
}

impl CancelRequestReader {
    pub fn is_requested(&self, id: &InstanceId) -> StreamResult<bool> {
        Ok(self.core.lookup_read()?.contains(id))
    }

    pub fn len(&self) -> StreamResult<usize> {
        Ok(self.core.lookup_read()?.len())
    }

    pub fn is_empty(&self) -> StreamResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl fmt::Debug for CancelRequestReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelRequestReader")
            .field("set", &self.core.label)
            .finish()
    }
}
