//! Requirement ledgers.
//!
//! A ledger starts soft: requirements are declared one by one and checked
//! against each other as they arrive. [`RequirementLedger::harden`] freezes
//! it into an ordered handle list with a preallocated dependency buffer.
//! From then on every [`RequirementLedger::execute`] acquires each handle,
//! dispatches the binding behind the combined dependency, and releases each
//! handle with the binding's token.
//!
//! # Invariants
//!
//! - No (resource type, usage) pair is declared twice.
//! - Two usages on one resource type must be able to coexist.
//! - Hardening happens exactly once; nothing is declared afterwards.
//! - A disabled ledger passes the incoming token through untouched.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};
use weft_access::AccessControlledValue;
use weft_jobs::{JobHandle, JobScheduler};
use weft_stream::{CancelRequestSet, ConsumeMode, InstanceStream, ResolveTargets, TaskStream};
use weft_types::{DriverContext, Instance};

use crate::binding::{self, ScheduleBinding};
use crate::error::{LedgerError, LedgerResult};
use crate::handle::{GrantedRequirement, ResourceHandle};
use crate::job_data::JobData;
use crate::usage::{RequirementKey, Usage};

struct Hardened {
    handles: Vec<Box<dyn ResourceHandle>>,
    dependencies: Vec<JobHandle>,
}

enum LedgerState {
    Soft(Vec<Box<dyn ResourceHandle>>),
    Hardened(Hardened),
}

/// Declared resource requirements of one unit of work, and the binding that
/// dispatches it.
pub struct RequirementLedger {
    label: Arc<str>,
    context: DriverContext,
    binding: Box<dyn ScheduleBinding>,
    state: LedgerState,
    enabled: bool,
    run_once: bool,
    spent: bool,
    executions: u64,
}

impl RequirementLedger {
    pub fn new(label: impl Into<String>, context: DriverContext, binding: impl ScheduleBinding + 'static) -> Self {
        Self {
            label: Arc::from(label.into()),
            context,
            binding: Box::new(binding),
            state: LedgerState::Soft(Vec::new()),
            enabled: true,
            run_once: false,
            spent: false,
            executions: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn context(&self) -> DriverContext {
        self.context
    }

    pub fn binding_name(&self) -> &str {
        self.binding.name()
    }

    pub fn is_hardened(&self) -> bool {
        matches!(self.state, LedgerState::Hardened(_))
    }

    /// Whether the next [`execute`](Self::execute) will dispatch.
    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.spent
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Disable the ledger permanently after its first successful execution.
    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    /// Number of executions that dispatched the binding.
    pub fn execution_count(&self) -> u64 {
        self.executions
    }

    /// Declared requirements, in declaration order.
    pub fn requirements(&self) -> Vec<RequirementKey> {
        let handles = match &self.state {
            LedgerState::Soft(handles) => handles,
            LedgerState::Hardened(hardened) => &hardened.handles,
        };
        handles.iter().map(|h| h.key()).collect()
    }

    // -----------------------------------------------------------------------
    // Declaration
    // -----------------------------------------------------------------------

    /// Declare a requirement.
    ///
    /// Fails if the exact (type, usage) pair is already declared, if the
    /// usage cannot coexist with another usage already declared for the
    /// same type, or if the ledger is hardened.
    pub fn require(&mut self, handle: Box<dyn ResourceHandle>) -> LedgerResult<&mut Self> {
        let LedgerState::Soft(handles) = &mut self.state else {
            return Err(LedgerError::AlreadyHardened {
                ledger: self.label.to_string(),
            });
        };

        let key = handle.key();
        for existing in handles.iter().map(|h| h.key()) {
            if existing.resource != key.resource {
                continue;
            }
            if existing.usage == key.usage {
                return Err(LedgerError::DuplicateRequirement {
                    ledger: self.label.to_string(),
                    resource: key.resource.to_string(),
                    usage: key.usage,
                });
            }
            if !key.usage.can_coexist(existing.usage) {
                return Err(LedgerError::ConflictingUsage {
                    ledger: self.label.to_string(),
                    resource: key.resource.to_string(),
                    usage: key.usage,
                    existing: existing.usage,
                });
            }
        }

        debug!(ledger = %self.label, requirement = %key, resource = handle.label(), "requirement declared");
        handles.push(handle);
        Ok(self)
    }

    /// Append instances into a stream's pending lanes.
    pub fn require_stream_for_write<T: Send + Sync + 'static>(
        &mut self,
        stream: &InstanceStream<T>,
    ) -> LedgerResult<&mut Self> {
        let s = stream.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<InstanceStream<T>>(Usage::Write),
            stream.label(),
            move || {
                let (appender, grant) = s.acquire_for_append()?.into_parts();
                Ok((appender, vec![grant]))
            },
        )))
    }

    /// Read a stream's current snapshot.
    pub fn require_stream_for_read<T: Send + Sync + 'static>(
        &mut self,
        stream: &InstanceStream<T>,
    ) -> LedgerResult<&mut Self> {
        self.require_stream_consumer(stream, ConsumeMode::Read, Usage::Read)
    }

    /// Process a stream's current snapshot, continuing instances into the
    /// next pass.
    pub fn require_stream_for_update<T: Send + Sync + 'static>(
        &mut self,
        stream: &InstanceStream<T>,
    ) -> LedgerResult<&mut Self> {
        self.require_stream_consumer(stream, ConsumeMode::Update, Usage::Update)
    }

    fn require_stream_consumer<T: Send + Sync + 'static>(
        &mut self,
        stream: &InstanceStream<T>,
        mode: ConsumeMode,
        usage: Usage,
    ) -> LedgerResult<&mut Self> {
        let s = stream.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<InstanceStream<T>>(usage),
            stream.label(),
            move || {
                let (consumer, grant) = s.acquire_for_consume(mode)?.into_parts();
                Ok((consumer, vec![grant]))
            },
        )))
    }

    /// Seed new task instances.
    pub fn require_task_stream_for_write<T: Send + Sync + 'static>(
        &mut self,
        stream: &TaskStream<T>,
    ) -> LedgerResult<&mut Self> {
        let s = stream.data.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<TaskStream<T>>(Usage::Write),
            stream.label(),
            move || {
                let (appender, grant) = s.acquire_for_append()?.into_parts();
                Ok((appender, vec![grant]))
            },
        )))
    }

    /// Look at live task instances.
    pub fn require_task_stream_for_read<T: Send + Sync + 'static>(
        &mut self,
        stream: &TaskStream<T>,
    ) -> LedgerResult<&mut Self> {
        let s = stream.data.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<TaskStream<T>>(Usage::Read),
            stream.label(),
            move || {
                let (consumer, grant) = s.acquire_for_consume(ConsumeMode::Read)?.into_parts();
                Ok((consumer, vec![grant]))
            },
        )))
    }

    /// Update live task instances. Declares both the update of the data
    /// stream and the write into its pending-cancel stream, where instances
    /// with a cancellation request are moved.
    pub fn require_task_stream_for_update<T: Send + Sync + 'static>(
        &mut self,
        stream: &TaskStream<T>,
    ) -> LedgerResult<&mut Self> {
        let data = stream.data.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<TaskStream<T>>(Usage::Update),
            stream.label(),
            move || {
                let (consumer, grant) = data.acquire_for_consume(ConsumeMode::Update)?.into_parts();
                Ok((consumer, vec![grant]))
            },
        )))?;

        let pending_cancel: InstanceStream<Instance<T>> = stream.pending_cancel.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<TaskStream<T>>(Usage::WritePendingCancel),
            stream.pending_cancel.label(),
            move || {
                let (appender, grant) = pending_cancel.acquire_for_append()?.into_parts();
                Ok((appender, vec![grant]))
            },
        )))
    }

    /// Process task instances waiting in the pending-cancel stream.
    pub fn require_task_stream_for_cancelling<T: Send + Sync + 'static>(
        &mut self,
        stream: &TaskStream<T>,
    ) -> LedgerResult<&mut Self> {
        let s = stream.pending_cancel.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<TaskStream<T>>(Usage::Cancelling),
            stream.pending_cancel.label(),
            move || {
                let (consumer, grant) = s.acquire_for_consume(ConsumeMode::Update)?.into_parts();
                Ok((consumer, vec![grant]))
            },
        )))
    }

    /// Submit cancellation requests.
    pub fn require_cancel_requests_for_write(&mut self, set: &CancelRequestSet) -> LedgerResult<&mut Self> {
        let s = set.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<CancelRequestSet>(Usage::Write),
            set.label(),
            move || {
                let (writer, grant) = s.acquire_for_request()?.into_parts();
                Ok((writer, vec![grant]))
            },
        )))
    }

    /// Look up this pass's cancellation requests.
    pub fn require_cancel_requests_for_read(&mut self, set: &CancelRequestSet) -> LedgerResult<&mut Self> {
        let s = set.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<CancelRequestSet>(Usage::Read),
            set.label(),
            move || {
                let (reader, grant) = s.acquire_for_lookup()?.into_parts();
                Ok((reader, vec![grant]))
            },
        )))
    }

    /// Use a plain access-controlled value. Only `Read`, `Write`, and
    /// `ExclusiveWrite` make sense for values, and only `ExclusiveWrite`
    /// may replace or mutate the value through [`ValueAccess::write`](weft_access::ValueAccess::write).
    /// `Write` suits values that synchronize internally.
    pub fn require_value<V: Send + Sync + 'static>(
        &mut self,
        value: &AccessControlledValue<V>,
        usage: Usage,
    ) -> LedgerResult<&mut Self> {
        if !matches!(usage, Usage::Read | Usage::Write | Usage::ExclusiveWrite) {
            return Err(LedgerError::InvalidUsage {
                ledger: self.label.to_string(),
                resource: value.controller().label().to_string(),
                usage,
            });
        }
        let v = value.clone();
        let access = usage.access_type();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<AccessControlledValue<V>>(usage),
            value.controller().label(),
            move || {
                let (grant, view) = v.acquire_async(access)?;
                Ok((view, vec![grant]))
            },
        )))
    }

    /// Append results into the streams registered in `targets`. Targets
    /// registered after this call are not seen.
    pub fn require_resolve_targets<R: Send + Sync + 'static>(
        &mut self,
        targets: &ResolveTargets<R>,
    ) -> LedgerResult<&mut Self> {
        let t = targets.clone();
        self.require(Box::new(GrantedRequirement::new(
            RequirementKey::of::<ResolveTargets<R>>(Usage::Resolve),
            targets.label(),
            move || {
                let (writer, grants) = t.acquire_for_resolve()?.into_parts();
                Ok((writer, grants))
            },
        )))
    }

    // -----------------------------------------------------------------------
    // Hardening and execution
    // -----------------------------------------------------------------------

    /// Freeze the declared requirements and validate the binding against
    /// them. Must be called exactly once, before the first execution.
    pub fn harden(&mut self) -> LedgerResult<()> {
        let LedgerState::Soft(handles) = &mut self.state else {
            return Err(LedgerError::AlreadyHardened {
                ledger: self.label.to_string(),
            });
        };

        let declared: Vec<RequirementKey> = handles.iter().map(|h| h.key()).collect();
        binding::validate(&self.label, self.binding.as_ref(), &declared)?;

        let handles = std::mem::take(handles);
        let dependencies = Vec::with_capacity(handles.len() + 1);
        debug!(ledger = %self.label, requirements = handles.len(), "ledger hardened");
        self.state = LedgerState::Hardened(Hardened {
            handles,
            dependencies,
        });
        Ok(())
    }

    /// Acquire every declared resource, dispatch the binding behind them
    /// and `depends_on`, and release every resource with the binding's
    /// token. Returns that token.
    ///
    /// A disabled ledger returns `depends_on` unchanged without touching
    /// any resource.
    pub fn execute(&mut self, depends_on: &JobHandle, scheduler: &JobScheduler) -> LedgerResult<JobHandle> {
        let LedgerState::Hardened(hardened) = &mut self.state else {
            return Err(LedgerError::NotHardened {
                ledger: self.label.to_string(),
            });
        };
        if !self.enabled || self.spent {
            return Ok(depends_on.clone());
        }

        let mut data = JobData::new(Arc::clone(&self.label), self.context, hardened.handles.len());
        hardened.dependencies.clear();
        for i in 0..hardened.handles.len() {
            match hardened.handles[i].acquire() {
                Ok(acquired) => {
                    hardened.dependencies.push(acquired.dependency);
                    data.insert(hardened.handles[i].key(), acquired.resource);
                }
                Err(err) => {
                    let done = JobHandle::completed();
                    for handle in &mut hardened.handles[..i] {
                        handle.release(&done);
                    }
                    hardened.dependencies.clear();
                    return Err(err);
                }
            }
        }
        hardened.dependencies.push(depends_on.clone());
        let combined = JobHandle::combine(hardened.dependencies.iter());
        hardened.dependencies.clear();

        let token = match self.binding.schedule(data, &combined, scheduler) {
            Ok(token) => token,
            Err(err) => {
                let done = JobHandle::completed();
                for handle in &mut hardened.handles {
                    handle.release(&done);
                }
                return Err(err);
            }
        };
        for handle in &mut hardened.handles {
            handle.release(&token);
        }

        self.executions += 1;
        if self.run_once {
            self.spent = true;
            info!(ledger = %self.label, "run-once ledger executed; now disabled");
        }
        Ok(token)
    }
}

impl fmt::Debug for RequirementLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequirementLedger")
            .field("label", &self.label)
            .field("context", &self.context)
            .field("binding", &self.binding.name())
            .field("hardened", &self.is_hardened())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{EntryPoint, SingleJob};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use weft_access::AccessType;
    use weft_jobs::SchedulerConfig;
    use weft_types::OwnerKey;

    fn scheduler() -> JobScheduler {
        JobScheduler::new(SchedulerConfig::with_workers(2)).unwrap()
    }

    fn noop(name: &str) -> SingleJob {
        SingleJob::new(name, |_, _| Ok(()))
    }

    fn counting(counter: &Arc<AtomicUsize>) -> SingleJob {
        let counter = Arc::clone(counter);
        SingleJob::new("count", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Declaration
    // -----------------------------------------------------------------------

    #[test]
    fn duplicate_requirement_rejected() {
        let value = AccessControlledValue::new("x", 0u32);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        ledger.require_value(&value, Usage::Write).unwrap();
        let err = ledger.require_value(&value, Usage::Write).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DuplicateRequirement { ref ledger, usage: Usage::Write, .. } if ledger == "l"
        ));
    }

    #[test]
    fn write_then_read_allowed() {
        let value = AccessControlledValue::new("x", 0u32);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        ledger.require_value(&value, Usage::Write).unwrap();
        ledger.require_value(&value, Usage::Read).unwrap();
        assert_eq!(ledger.requirements().len(), 2);
    }

    #[test]
    fn write_then_exclusive_conflicts() {
        let value = AccessControlledValue::new("x", 0u32);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        ledger.require_value(&value, Usage::Write).unwrap();
        let err = ledger.require_value(&value, Usage::ExclusiveWrite).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ConflictingUsage {
                usage: Usage::ExclusiveWrite,
                existing: Usage::Write,
                ..
            }
        ));
    }

    #[test]
    fn same_usage_on_different_types_is_fine() {
        let a = AccessControlledValue::new("a", 0u32);
        let b = AccessControlledValue::new("b", 0u64);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        ledger.require_value(&a, Usage::ExclusiveWrite).unwrap();
        ledger.require_value(&b, Usage::ExclusiveWrite).unwrap();
    }

    #[test]
    fn task_update_declares_pending_cancel_write() {
        let stream = TaskStream::<u8>::new("tasks", 2);
        let mut ledger = RequirementLedger::new("update", DriverContext::SYSTEM, noop("j"));
        ledger.require_task_stream_for_update(&stream).unwrap();
        assert_eq!(
            ledger.requirements(),
            vec![
                RequirementKey::of::<TaskStream<u8>>(Usage::Update),
                RequirementKey::of::<TaskStream<u8>>(Usage::WritePendingCancel),
            ]
        );
        assert!(matches!(
            ledger.require_task_stream_for_cancelling(&stream),
            Err(LedgerError::ConflictingUsage { .. })
        ));
    }

    #[test]
    fn cancelling_and_read_share_a_task_stream_in_either_order() {
        let stream = TaskStream::<u8>::new("tasks", 2);
        let expected = [
            RequirementKey::of::<TaskStream<u8>>(Usage::Cancelling),
            RequirementKey::of::<TaskStream<u8>>(Usage::Read),
        ];

        let mut cancelling_first = RequirementLedger::new("a", DriverContext::SYSTEM, noop("a"));
        cancelling_first.require_task_stream_for_cancelling(&stream).unwrap();
        cancelling_first.require_task_stream_for_read(&stream).unwrap();
        assert_eq!(cancelling_first.requirements(), expected.to_vec());

        let mut read_first = RequirementLedger::new("b", DriverContext::SYSTEM, noop("b"));
        read_first.require_task_stream_for_read(&stream).unwrap();
        read_first.require_task_stream_for_cancelling(&stream).unwrap();
        assert_eq!(read_first.requirements(), vec![expected[1], expected[0]]);
    }

    #[test]
    fn unlisted_pair_conflicts() {
        let stream = TaskStream::<u8>::new("tasks", 2);
        let mut ledger = RequirementLedger::new("a", DriverContext::SYSTEM, noop("a"));
        ledger.require_task_stream_for_read(&stream).unwrap();
        assert!(matches!(
            ledger.require_task_stream_for_update(&stream),
            Err(LedgerError::ConflictingUsage { usage: Usage::Update, existing: Usage::Read, .. })
        ));
    }

    #[test]
    fn values_reject_stream_usages() {
        let value = AccessControlledValue::new("x", 0u32);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        assert!(matches!(
            ledger.require_value(&value, Usage::Resolve),
            Err(LedgerError::InvalidUsage { usage: Usage::Resolve, .. })
        ));
    }

    // -----------------------------------------------------------------------
    // Hardening
    // -----------------------------------------------------------------------

    #[test]
    fn execute_before_harden_fails() {
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        let err = ledger.execute(&JobHandle::completed(), &scheduler()).unwrap_err();
        assert!(matches!(err, LedgerError::NotHardened { ref ledger } if ledger == "l"));
    }

    #[test]
    fn harden_twice_fails() {
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        ledger.harden().unwrap();
        assert!(matches!(ledger.harden(), Err(LedgerError::AlreadyHardened { .. })));
    }

    #[test]
    fn require_after_harden_fails() {
        let value = AccessControlledValue::new("x", 0u32);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        ledger.harden().unwrap();
        assert!(matches!(
            ledger.require_value(&value, Usage::Read),
            Err(LedgerError::AlreadyHardened { .. })
        ));
    }

    #[test]
    fn binding_expectations_checked_at_harden() {
        let binding = noop("needs-cancel").expecting(RequirementKey::of::<CancelRequestSet>(Usage::Read));
        let mut ledger = RequirementLedger::new("l", DriverContext(1), binding);
        let err = ledger.harden().unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Binding { ref binding, .. } if binding == "needs-cancel"
        ));
        assert!(!ledger.is_hardened());
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    #[test]
    fn execute_dispatches_after_dependencies() {
        let s = scheduler();
        let value = AccessControlledValue::new("total", 0u32);
        let mut ledger = RequirementLedger::new(
            "add",
            DriverContext(1),
            SingleJob::new("add", |data, _| {
                let total = data.value::<u32>(Usage::ExclusiveWrite).map_err(|e| e.into_job_error("add"))?;
                *total
                    .write()
                    .map_err(|e| LedgerError::from(e).into_job_error("add"))? += 3;
                Ok(())
            }),
        );
        ledger.require_value(&value, Usage::ExclusiveWrite).unwrap();
        ledger.harden().unwrap();

        let (gate, open) = JobHandle::pending("gate");
        let token = ledger.execute(&gate, &s).unwrap();
        assert!(!token.is_completed());
        open.complete(Ok(()));
        token.wait().unwrap();
        assert_eq!(value.with_read(|v| *v).unwrap(), 3);
        assert_eq!(value.controller().outstanding(), 0);
    }

    #[test]
    fn disabled_ledger_passes_token_through() {
        let s = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let value = AccessControlledValue::new("x", 0u32);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), counting(&counter));
        ledger.require_value(&value, Usage::ExclusiveWrite).unwrap();
        ledger.harden().unwrap();
        ledger.set_enabled(false);

        // Hold the value exclusively; a disabled ledger must not try to
        // acquire it.
        let held = value.controller().acquire_async(AccessType::ExclusiveWrite).unwrap();
        let (incoming, _complete) = JobHandle::pending("incoming");
        let out = ledger.execute(&incoming, &s).unwrap();
        assert!(out.ptr_eq(&incoming));
        assert_eq!(ledger.execution_count(), 0);
        assert_eq!(value.controller().outstanding(), 1);
        held.release(&JobHandle::completed());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn run_once_executes_once() {
        let s = scheduler();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut ledger = RequirementLedger::new("seed", DriverContext(1), counting(&counter)).run_once();
        ledger.harden().unwrap();

        let first = ledger.execute(&JobHandle::completed(), &s).unwrap();
        first.wait().unwrap();
        assert!(!ledger.is_enabled());

        for _ in 0..5 {
            let incoming = JobHandle::completed();
            let out = ledger.execute(&incoming, &s).unwrap();
            assert!(out.ptr_eq(&incoming));
        }
        ledger.set_enabled(true);
        ledger.execute(&JobHandle::completed(), &s).unwrap().wait().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(ledger.execution_count(), 1);
    }

    #[test]
    fn failed_acquisition_releases_earlier_grants() {
        let s = scheduler();
        let free = AccessControlledValue::new("free", 0u8);
        let held = AccessControlledValue::new("held", 0u16);
        let mut ledger = RequirementLedger::new("l", DriverContext(1), noop("j"));
        ledger.require_value(&free, Usage::ExclusiveWrite).unwrap();
        ledger.require_value(&held, Usage::ExclusiveWrite).unwrap();
        ledger.harden().unwrap();

        let blocker = held.controller().acquire_async(AccessType::ExclusiveWrite).unwrap();
        let err = ledger.execute(&JobHandle::completed(), &s).unwrap_err();
        assert!(matches!(err, LedgerError::Access(_)));
        assert_eq!(free.controller().outstanding(), 0);
        blocker.release(&JobHandle::completed());
    }

    #[test]
    fn entry_point_sees_declared_streams() {
        let s = scheduler();
        let stream = InstanceStream::<Instance<u32>>::new("numbers", s.lane_count());
        let mut ledger = RequirementLedger::new(
            "produce",
            DriverContext(4),
            EntryPoint::new("produce", |data, deps, scheduler| {
                let writer = data.stream_writer::<Instance<u32>>()?.clone();
                let context = data.context();
                Ok(scheduler.schedule("produce", deps, move |ctx| {
                    writer
                        .append(ctx.lane(), Instance::new(OwnerKey(1), context, 10))
                        .map_err(|e| e.into_job_error(ctx.job_name()))
                }))
            })
            .expecting(RequirementKey::of::<InstanceStream<Instance<u32>>>(Usage::Write)),
        );
        ledger.require_stream_for_write(&stream).unwrap();
        ledger.harden().unwrap();

        let token = ledger.execute(&JobHandle::completed(), &s).unwrap();
        stream.consolidate(&token, &s).unwrap().wait().unwrap();
        let snapshot = stream.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].context(), DriverContext(4));
    }
}
