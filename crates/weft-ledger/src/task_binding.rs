//! Parallel bindings over task streams.
//!
//! [`UpdateBinding`] runs once per live instance. Instances whose owner
//! asked to cancel are moved to the pending-cancel stream untouched; the
//! rest are handed to the update function, which either continues them
//! into the next pass or resolves them into a result. [`CancelBinding`]
//! runs once per instance in the pending-cancel snapshot so the task can
//! report the cancellation.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use weft_jobs::{BatchStrategy, JobError, JobHandle, JobScheduler};
use weft_stream::{
    CancelRequestReader, CancelRequestSet, ResolveTargets, ResolveWriter, StreamAppender, StreamConsumer,
    TaskStream,
};
use weft_types::{DriverContext, Instance, InstanceId};

use crate::binding::ScheduleBinding;
use crate::error::LedgerResult;
use crate::job_data::JobData;
use crate::ledger::RequirementLedger;
use crate::usage::{RequirementKey, Usage};

/// Per-instance handle given to an update function.
pub struct TaskUpdater<'a, T, R> {
    id: InstanceId,
    lane: usize,
    job: &'a str,
    data: &'a JobData,
    consumer: &'a StreamConsumer<Instance<T>>,
    resolver: &'a ResolveWriter<R>,
}

impl<'a, T, R> TaskUpdater<'a, T, R> {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Every resource the ledger declared, for lookups beyond the task
    /// streams.
    pub fn data(&self) -> &'a JobData {
        self.data
    }

    /// Keep the instance alive for another pass with an updated payload.
    pub fn continue_with(&self, payload: T) -> Result<(), JobError> {
        self.consumer
            .continue_with(self.lane, Instance::with_id(self.id, payload))
            .map_err(|e| e.into_job_error(self.job))
    }

    /// Finish the instance, sending `result` to the driver that started it.
    pub fn resolve(&self, result: R) -> Result<(), JobError> {
        self.resolver
            .resolve(self.lane, self.id, result)
            .map_err(|e| e.into_job_error(self.job))
    }
}

type UpdateFn<T, R> = dyn Fn(&T, &TaskUpdater<'_, T, R>) -> Result<(), JobError> + Send + Sync;

/// Parallel update over a task stream's live instances.
pub struct UpdateBinding<T, R> {
    name: String,
    batch: BatchStrategy,
    update: Arc<UpdateFn<T, R>>,
}

impl<T, R> UpdateBinding<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new<F>(name: impl Into<String>, batch: BatchStrategy, update: F) -> Self
    where
        F: Fn(&T, &TaskUpdater<'_, T, R>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            batch,
            update: Arc::new(update),
        }
    }
}

struct UpdateState<T, R> {
    data: Arc<JobData>,
    current: Arc<[Instance<T>]>,
    consumer: StreamConsumer<Instance<T>>,
    pending_cancel: StreamAppender<Instance<T>>,
    cancelled: CancelRequestReader,
    resolver: ResolveWriter<R>,
}

impl<T, R> ScheduleBinding for UpdateBinding<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn expects(&self) -> Vec<RequirementKey> {
        vec![
            RequirementKey::of::<TaskStream<T>>(Usage::Update),
            RequirementKey::of::<TaskStream<T>>(Usage::WritePendingCancel),
            RequirementKey::of::<CancelRequestSet>(Usage::Read),
            RequirementKey::of::<ResolveTargets<R>>(Usage::Resolve),
        ]
    }

    fn schedule(&mut self, data: JobData, depends_on: &JobHandle, scheduler: &JobScheduler) -> LedgerResult<JobHandle> {
        let consumer = data.task_updater::<T>()?.clone();
        let pending_cancel = data.pending_cancel_writer::<T>()?.clone();
        let cancelled = data.cancel_reader()?.clone();
        let resolver = data.resolve_writer::<R>()?.clone();
        let data = Arc::new(data);
        let update = Arc::clone(&self.update);
        let name = self.name.clone();

        Ok(scheduler.schedule_parallel_deferred(
            &self.name,
            depends_on,
            self.batch.batch_size::<Instance<T>>(),
            move || {
                let current = consumer.current().map_err(|e| e.into_job_error(&name))?;
                let len = current.len();
                let state = UpdateState {
                    data,
                    current,
                    consumer,
                    pending_cancel,
                    cancelled,
                    resolver,
                };
                Ok((state, len))
            },
            move |state: &UpdateState<T, R>, index, ctx| {
                let instance = &state.current[index];
                let requested = state
                    .cancelled
                    .is_requested(&instance.id)
                    .map_err(|e| e.into_job_error(ctx.job_name()))?;
                if requested {
                    return state
                        .pending_cancel
                        .append(ctx.lane(), instance.clone())
                        .map_err(|e| e.into_job_error(ctx.job_name()));
                }
                let updater = TaskUpdater {
                    id: instance.id,
                    lane: ctx.lane(),
                    job: ctx.job_name(),
                    data: &state.data,
                    consumer: &state.consumer,
                    resolver: &state.resolver,
                };
                update(&instance.payload, &updater)
            },
        ))
    }
}

impl<T, R> fmt::Debug for UpdateBinding<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateBinding")
            .field("name", &self.name)
            .field("batch", &self.batch)
            .finish()
    }
}

/// Per-instance handle given to a cancel function.
pub struct TaskCanceller<'a, R> {
    id: InstanceId,
    lane: usize,
    job: &'a str,
    data: &'a JobData,
    resolver: &'a ResolveWriter<R>,
}

impl<'a, R> TaskCanceller<'a, R> {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn data(&self) -> &'a JobData {
        self.data
    }

    /// Report the cancelled instance to the driver that started it.
    pub fn resolve(&self, result: R) -> Result<(), JobError> {
        self.resolver
            .resolve(self.lane, self.id, result)
            .map_err(|e| e.into_job_error(self.job))
    }
}

type CancelFn<T, R> = dyn Fn(&T, &TaskCanceller<'_, R>) -> Result<(), JobError> + Send + Sync;

/// Parallel pass over a task stream's pending-cancel snapshot.
///
/// Instances are dropped once processed: nothing is continued, so the next
/// consolidation leaves the snapshot empty.
pub struct CancelBinding<T, R> {
    name: String,
    batch: BatchStrategy,
    cancel: Arc<CancelFn<T, R>>,
    _instances: PhantomData<fn(T)>,
}

impl<T, R> CancelBinding<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    pub fn new<F>(name: impl Into<String>, batch: BatchStrategy, cancel: F) -> Self
    where
        F: Fn(&T, &TaskCanceller<'_, R>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            batch,
            cancel: Arc::new(cancel),
            _instances: PhantomData,
        }
    }
}

struct CancelState<T, R> {
    data: Arc<JobData>,
    current: Arc<[Instance<T>]>,
    resolver: ResolveWriter<R>,
}

impl<T, R> ScheduleBinding for CancelBinding<T, R>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn expects(&self) -> Vec<RequirementKey> {
        vec![
            RequirementKey::of::<TaskStream<T>>(Usage::Cancelling),
            RequirementKey::of::<ResolveTargets<R>>(Usage::Resolve),
        ]
    }

    fn schedule(&mut self, data: JobData, depends_on: &JobHandle, scheduler: &JobScheduler) -> LedgerResult<JobHandle> {
        let consumer = data.cancelling::<T>()?.clone();
        let resolver = data.resolve_writer::<R>()?.clone();
        let data = Arc::new(data);
        let cancel = Arc::clone(&self.cancel);
        let name = self.name.clone();

        Ok(scheduler.schedule_parallel_deferred(
            &self.name,
            depends_on,
            self.batch.batch_size::<Instance<T>>(),
            move || {
                let current = consumer.current().map_err(|e| e.into_job_error(&name))?;
                let len = current.len();
                Ok((CancelState { data, current, resolver }, len))
            },
            move |state: &CancelState<T, R>, index, ctx| {
                let instance = &state.current[index];
                let canceller = TaskCanceller {
                    id: instance.id,
                    lane: ctx.lane(),
                    job: ctx.job_name(),
                    data: &state.data,
                    resolver: &state.resolver,
                };
                cancel(&instance.payload, &canceller)
            },
        ))
    }
}

impl<T, R> fmt::Debug for CancelBinding<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelBinding")
            .field("name", &self.name)
            .field("batch", &self.batch)
            .finish()
    }
}

/// Build an update ledger for `stream`: declares the task stream update,
/// the cancellation lookup, and the resolve targets the binding needs.
pub fn update_ledger<T, R, F>(
    label: impl Into<String>,
    stream: &TaskStream<T>,
    cancel_requests: &CancelRequestSet,
    targets: &ResolveTargets<R>,
    batch: BatchStrategy,
    update: F,
) -> LedgerResult<RequirementLedger>
where
    T: Clone + Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: Fn(&T, &TaskUpdater<'_, T, R>) -> Result<(), JobError> + Send + Sync + 'static,
{
    let label = label.into();
    let binding = UpdateBinding::new(label.clone(), batch, update);
    let mut ledger = RequirementLedger::new(label, cancel_requests.context(), binding);
    ledger
        .require_task_stream_for_update(stream)?
        .require_cancel_requests_for_read(cancel_requests)?
        .require_resolve_targets(targets)?;
    Ok(ledger)
}

/// Build a cancel ledger for `stream`.
pub fn cancel_ledger<T, R, F>(
    label: impl Into<String>,
    stream: &TaskStream<T>,
    targets: &ResolveTargets<R>,
    batch: BatchStrategy,
    cancel: F,
) -> LedgerResult<RequirementLedger>
where
    T: Send + Sync + 'static,
    R: Send + Sync + 'static,
    F: Fn(&T, &TaskCanceller<'_, R>) -> Result<(), JobError> + Send + Sync + 'static,
{
    let label = label.into();
    let binding = CancelBinding::new(label.clone(), batch, cancel);
    let mut ledger = RequirementLedger::new(label, DriverContext::SYSTEM, binding);
    ledger
        .require_task_stream_for_cancelling(stream)?
        .require_resolve_targets(targets)?;
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_jobs::SchedulerConfig;
    use weft_stream::{InstanceStream, ManagedStream};
    use weft_types::OwnerKey;

    struct Fixture {
        scheduler: JobScheduler,
        tasks: TaskStream<u32>,
        cancel: CancelRequestSet,
        results: InstanceStream<Instance<&'static str>>,
        targets: ResolveTargets<&'static str>,
    }

    fn fixture() -> Fixture {
        let scheduler = JobScheduler::new(SchedulerConfig::with_workers(2)).unwrap();
        let lanes = scheduler.lane_count();
        let results = InstanceStream::new("driver-1:results", lanes);
        let mut targets = ResolveTargets::new("countdown-results");
        targets.register(DriverContext(1), results.clone());
        Fixture {
            tasks: TaskStream::new("countdown", lanes),
            cancel: CancelRequestSet::new("system:cancel", DriverContext::SYSTEM, lanes),
            results,
            targets,
            scheduler,
        }
    }

    fn seed(f: &Fixture, tasks: &[(u64, u32)]) {
        let lease = f.tasks.data.acquire_for_append().unwrap();
        for &(owner, ticks) in tasks {
            lease
                .handle()
                .append(0, Instance::new(OwnerKey(owner), DriverContext(1), ticks))
                .unwrap();
        }
        lease.release(&JobHandle::completed());
        f.tasks.consolidate(&JobHandle::completed(), &f.scheduler).unwrap().wait().unwrap();
    }

    fn countdown(f: &Fixture) -> RequirementLedger {
        update_ledger(
            "countdown:update",
            &f.tasks,
            &f.cancel,
            &f.targets,
            BatchStrategy::MaximizeThreads,
            |ticks: &u32, task: &TaskUpdater<'_, u32, &'static str>| {
                if *ticks <= 1 {
                    task.resolve("done")
                } else {
                    task.continue_with(ticks - 1)
                }
            },
        )
        .unwrap()
    }

    fn report_cancelled(f: &Fixture) -> RequirementLedger {
        cancel_ledger(
            "countdown:cancel",
            &f.tasks,
            &f.targets,
            BatchStrategy::MaximizeChunk,
            |_: &u32, task: &TaskCanceller<'_, &'static str>| task.resolve("cancelled"),
        )
        .unwrap()
    }

    /// Run one pass and return the results resolved during it.
    fn pass(f: &Fixture, update: &mut RequirementLedger, cancel: &mut RequirementLedger) -> Vec<(u64, &'static str)> {
        let s = &f.scheduler;
        let updated = update.execute(&JobHandle::completed(), s).unwrap();
        let cancelled = cancel.execute(&JobHandle::completed(), s).unwrap();
        let done = JobHandle::combine([&updated, &cancelled]);
        let tasks = f.tasks.consolidate(&done, s).unwrap();
        let results = f.results.consolidate(&done, s).unwrap();
        JobHandle::combine([&tasks, &results]).wait().unwrap();

        let mut out: Vec<_> = f
            .results
            .snapshot()
            .unwrap()
            .iter()
            .map(|r| (r.owner().raw(), r.payload))
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn update_continues_and_resolves() {
        let f = fixture();
        seed(&f, &[(1, 1), (2, 3)]);
        let mut update = countdown(&f);
        let mut cancel = report_cancelled(&f);
        update.harden().unwrap();
        cancel.harden().unwrap();

        assert_eq!(pass(&f, &mut update, &mut cancel), vec![(1, "done")]);
        assert_eq!(f.tasks.data.snapshot().unwrap()[0].payload, 2);
        assert!(pass(&f, &mut update, &mut cancel).is_empty());
        assert_eq!(pass(&f, &mut update, &mut cancel), vec![(2, "done")]);
        assert!(f.tasks.data.snapshot().unwrap().is_empty());
    }

    #[test]
    fn requested_instances_move_to_pending_cancel() {
        let f = fixture();
        seed(&f, &[(1, 10), (2, 10)]);
        f.cancel
            .writer()
            .forward(0, InstanceId::new(OwnerKey(2), DriverContext(1)))
            .unwrap();
        f.cancel.consolidate_now().unwrap();

        let mut update = countdown(&f);
        let mut cancel = report_cancelled(&f);
        update.harden().unwrap();
        cancel.harden().unwrap();

        assert!(pass(&f, &mut update, &mut cancel).is_empty());
        let live = f.tasks.data.snapshot().unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].owner(), OwnerKey(1));
        let pending = f.tasks.pending_cancel.snapshot().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].payload, 10);

        // The cancel pass reports it and nothing continues it.
        f.cancel.consolidate_now().unwrap();
        assert_eq!(pass(&f, &mut update, &mut cancel), vec![(2, "cancelled")]);
        assert!(f.tasks.pending_cancel.snapshot().unwrap().is_empty());
    }

    #[test]
    fn unregistered_context_fails_the_job() {
        let f = fixture();
        let lease = f.tasks.data.acquire_for_append().unwrap();
        lease
            .handle()
            .append(0, Instance::new(OwnerKey(9), DriverContext(7), 1))
            .unwrap();
        lease.release(&JobHandle::completed());
        f.tasks.consolidate(&JobHandle::completed(), &f.scheduler).unwrap().wait().unwrap();

        let mut update = countdown(&f);
        update.harden().unwrap();
        let err = update
            .execute(&JobHandle::completed(), &f.scheduler)
            .unwrap()
            .wait()
            .unwrap_err();
        assert!(matches!(err, JobError::Failed { ref job, .. } if job == "countdown:update"));
    }

    #[test]
    fn update_binding_expects_cancel_lookup() {
        let f = fixture();
        let binding = UpdateBinding::new("bare", BatchStrategy::default(), |_: &u32, _: &TaskUpdater<'_, u32, ()>| {
            Ok(())
        });
        let mut ledger = RequirementLedger::new("bare", DriverContext::SYSTEM, binding);
        ledger.require_task_stream_for_update(&f.tasks).unwrap();
        assert!(matches!(ledger.harden(), Err(crate::LedgerError::Binding { .. })));
    }
}
