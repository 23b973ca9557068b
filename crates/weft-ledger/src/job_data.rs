use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use weft_access::{AccessControlledValue, ValueAccess};
use weft_stream::{
    CancelRequestReader, CancelRequestSet, CancelRequestWriter, InstanceStream, ResolveTargets,
    ResolveWriter, StreamAppender, StreamConsumer, TaskStream,
};
use weft_types::{DriverContext, Instance};

use crate::error::{LedgerError, LedgerResult};
use crate::usage::{RequirementKey, Usage};

/// Resources a dispatched job may touch, keyed by the requirement that
/// declared them.
///
/// Built fresh for every execution from the handles the ledger acquired;
/// nothing outside the declared requirements is reachable.
pub struct JobData {
    ledger: Arc<str>,
    context: DriverContext,
    resources: HashMap<RequirementKey, Box<dyn Any + Send + Sync>>,
}

impl JobData {
    pub(crate) fn new(ledger: Arc<str>, context: DriverContext, capacity: usize) -> Self {
        Self {
            ledger,
            context,
            resources: HashMap::with_capacity(capacity),
        }
    }

    pub(crate) fn insert(&mut self, key: RequirementKey, resource: Box<dyn Any + Send + Sync>) {
        self.resources.insert(key, resource);
    }

    pub fn ledger(&self) -> &str {
        &self.ledger
    }

    /// Context of the node that owns the ledger.
    pub fn context(&self) -> DriverContext {
        self.context
    }

    pub fn contains(&self, key: &RequirementKey) -> bool {
        self.resources.contains_key(key)
    }

    /// The job-side view stored for `key`.
    pub fn get<H: 'static>(&self, key: RequirementKey) -> LedgerResult<&H> {
        self.resources
            .get(&key)
            .and_then(|resource| resource.downcast_ref::<H>())
            .ok_or_else(|| LedgerError::MissingRequirement {
                ledger: self.ledger.to_string(),
                resource: key.resource.to_string(),
                usage: key.usage,
            })
    }

    pub fn stream_writer<T: 'static>(&self) -> LedgerResult<&StreamAppender<T>> {
        self.get(RequirementKey::of::<InstanceStream<T>>(Usage::Write))
    }

    pub fn stream_reader<T: 'static>(&self) -> LedgerResult<&StreamConsumer<T>> {
        self.get(RequirementKey::of::<InstanceStream<T>>(Usage::Read))
    }

    pub fn stream_updater<T: 'static>(&self) -> LedgerResult<&StreamConsumer<T>> {
        self.get(RequirementKey::of::<InstanceStream<T>>(Usage::Update))
    }

    pub fn task_writer<T: 'static>(&self) -> LedgerResult<&StreamAppender<Instance<T>>> {
        self.get(RequirementKey::of::<TaskStream<T>>(Usage::Write))
    }

    pub fn task_reader<T: 'static>(&self) -> LedgerResult<&StreamConsumer<Instance<T>>> {
        self.get(RequirementKey::of::<TaskStream<T>>(Usage::Read))
    }

    pub fn task_updater<T: 'static>(&self) -> LedgerResult<&StreamConsumer<Instance<T>>> {
        self.get(RequirementKey::of::<TaskStream<T>>(Usage::Update))
    }

    pub fn pending_cancel_writer<T: 'static>(&self) -> LedgerResult<&StreamAppender<Instance<T>>> {
        self.get(RequirementKey::of::<TaskStream<T>>(Usage::WritePendingCancel))
    }

    pub fn cancelling<T: 'static>(&self) -> LedgerResult<&StreamConsumer<Instance<T>>> {
        self.get(RequirementKey::of::<TaskStream<T>>(Usage::Cancelling))
    }

    pub fn cancel_writer(&self) -> LedgerResult<&CancelRequestWriter> {
        self.get(RequirementKey::of::<CancelRequestSet>(Usage::Write))
    }

    pub fn cancel_reader(&self) -> LedgerResult<&CancelRequestReader> {
        self.get(RequirementKey::of::<CancelRequestSet>(Usage::Read))
    }

    pub fn value<V: 'static>(&self, usage: Usage) -> LedgerResult<&ValueAccess<V>> {
        self.get(RequirementKey::of::<AccessControlledValue<V>>(usage))
    }

    pub fn resolve_writer<R: 'static>(&self) -> LedgerResult<&ResolveWriter<R>> {
        self.get(RequirementKey::of::<ResolveTargets<R>>(Usage::Resolve))
    }
}

impl fmt::Debug for JobData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobData")
            .field("ledger", &self.ledger)
            .field("context", &self.context)
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .finish()
    }
}
