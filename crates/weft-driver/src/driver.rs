//! Task drivers.
//!
//! A driver is a node below a [`TaskSystem`](crate::TaskSystem). It owns its
//! streams, ledgers, cancellation set, and child drivers, and refers back to
//! its system without owning it.

use std::sync::{Arc, Weak};

use tracing::{debug, info};
use weft_jobs::{JobHandle, JobScheduler};
use weft_ledger::RequirementLedger;
use weft_stream::{CancelRequestSet, InstanceStream, ManagedStream, TaskStream};
use weft_types::DriverContext;

use crate::error::{DriverError, DriverResult};
use crate::propagator::CancellationPropagator;
use crate::system::SystemCore;

pub struct TaskDriver {
    name: Arc<str>,
    context: DriverContext,
    system: Weak<SystemCore>,
    lane_count: usize,
    cancel_requests: CancelRequestSet,
    children: Vec<TaskDriver>,
    streams: Vec<Box<dyn ManagedStream>>,
    ledgers: Vec<RequirementLedger>,
    propagator: Option<CancellationPropagator>,
    disposed: bool,
}

impl TaskDriver {
    pub(crate) fn new(name: &str, context: DriverContext, system: &Arc<SystemCore>) -> Self {
        let lane_count = system.lane_count;
        Self {
            name: Arc::from(name),
            context,
            system: Arc::downgrade(system),
            lane_count,
            cancel_requests: CancelRequestSet::new(format!("{name}:cancel"), context, lane_count),
            children: Vec::new(),
            streams: Vec::new(),
            ledgers: Vec::new(),
            propagator: None,
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> DriverContext {
        self.context
    }

    pub fn lane_count(&self) -> usize {
        self.lane_count
    }

    /// Requests written here are tagged with this driver's context and
    /// delivered to the system and every child on the next pass.
    pub fn cancel_requests(&self) -> &CancelRequestSet {
        &self.cancel_requests
    }

    pub fn children(&self) -> &[TaskDriver] {
        &self.children
    }

    pub fn ledgers(&self) -> &[RequirementLedger] {
        &self.ledgers
    }

    pub fn ledgers_mut(&mut self) -> &mut [RequirementLedger] {
        &mut self.ledgers
    }

    pub fn is_hardened(&self) -> bool {
        self.propagator.is_some()
    }

    fn system(&self) -> DriverResult<Arc<SystemCore>> {
        self.system.upgrade().ok_or_else(|| DriverError::SystemDropped {
            driver: self.name.to_string(),
        })
    }

    fn ensure_soft(&self) -> DriverResult<()> {
        if self.disposed {
            return Err(DriverError::Disposed {
                node: self.name.to_string(),
            });
        }
        if self.is_hardened() {
            return Err(DriverError::AlreadyHardened {
                node: self.name.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Create a child driver with its own context from the system registry.
    pub fn create_child(&mut self, name: &str) -> DriverResult<&mut TaskDriver> {
        self.ensure_soft()?;
        let system = self.system()?;
        let context = system.register(name)?;
        self.children.push(TaskDriver::new(name, context, &system));
        let index = self.children.len() - 1;
        Ok(&mut self.children[index])
    }

    /// Create a stream owned, consolidated, and disposed by this driver.
    pub fn create_stream<T: Send + Sync + 'static>(&mut self, label: &str) -> DriverResult<InstanceStream<T>> {
        self.ensure_soft()?;
        let stream = InstanceStream::new(format!("{}:{label}", self.name), self.lane_count);
        self.streams.push(Box::new(stream.clone()));
        Ok(stream)
    }

    pub fn create_task_stream<T: Send + Sync + 'static>(&mut self, label: &str) -> DriverResult<TaskStream<T>> {
        self.ensure_soft()?;
        let stream = TaskStream::new(format!("{}:{label}", self.name), self.lane_count);
        self.streams.push(Box::new(stream.clone()));
        Ok(stream)
    }

    /// Attach a ledger. Ledgers run in the order they were added.
    pub fn add_ledger(&mut self, ledger: RequirementLedger) -> DriverResult<()> {
        self.ensure_soft()?;
        if ledger.context() != self.context {
            return Err(DriverError::ContextMismatch {
                ledger: ledger.label().to_string(),
                expected: self.context,
                found: ledger.context(),
            });
        }
        self.ledgers.push(ledger);
        Ok(())
    }

    /// Find this driver or a descendant by context.
    pub fn find(&self, context: DriverContext) -> Option<&TaskDriver> {
        if self.context == context {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(context))
    }

    pub fn find_mut(&mut self, context: DriverContext) -> Option<&mut TaskDriver> {
        if self.context == context {
            return Some(self);
        }
        self.children.iter_mut().find_map(|c| c.find_mut(context))
    }

    // -----------------------------------------------------------------------
    // Hardening
    // -----------------------------------------------------------------------

    /// Harden this driver's ledgers, then its children, then build its
    /// propagator.
    pub fn harden(&mut self) -> DriverResult<()> {
        self.ensure_soft()?;
        let system = self.system()?;

        for ledger in &mut self.ledgers {
            ledger.harden()?;
        }
        for child in &mut self.children {
            child.harden()?;
        }

        let children = self.children.iter().map(|c| c.cancel_requests.clone()).collect();
        self.propagator = Some(CancellationPropagator::new(
            self.cancel_requests.clone(),
            system.cancel_requests.clone(),
            children,
        ));
        debug!(
            driver = %self.name,
            context = %self.context,
            ledgers = self.ledgers.len(),
            children = self.children.len(),
            "driver hardened"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Pass stages
    // -----------------------------------------------------------------------

    /// Propagate this driver's requests, then each child's behind it so the
    /// requests forwarded here are delivered onward in the same pass.
    pub fn propagate(&mut self, depends_on: &JobHandle, scheduler: &JobScheduler) -> DriverResult<JobHandle> {
        let name = &self.name;
        let propagator = self.propagator.as_mut().ok_or_else(|| DriverError::NotHardened {
            node: name.to_string(),
        })?;
        let own = propagator.propagate(depends_on, scheduler)?;
        if self.children.is_empty() {
            return Ok(own);
        }

        let mut tokens = Vec::with_capacity(self.children.len() + 1);
        for child in &mut self.children {
            tokens.push(child.propagate(&own, scheduler)?);
        }
        tokens.push(own);
        Ok(JobHandle::combine(tokens.iter()))
    }

    /// Consolidate this driver's streams and its descendants', pushing
    /// each token onto `out`.
    pub(crate) fn consolidate(
        &self,
        depends_on: &JobHandle,
        scheduler: &JobScheduler,
        out: &mut Vec<JobHandle>,
    ) -> DriverResult<()> {
        for stream in &self.streams {
            out.push(stream.consolidate(depends_on, scheduler)?);
        }
        for child in &self.children {
            child.consolidate(depends_on, scheduler, out)?;
        }
        Ok(())
    }

    /// Execute this driver's ledgers, then its descendants'.
    pub(crate) fn execute(
        &mut self,
        depends_on: &JobHandle,
        scheduler: &JobScheduler,
        out: &mut Vec<JobHandle>,
    ) -> DriverResult<()> {
        for ledger in &mut self.ledgers {
            out.push(ledger.execute(depends_on, scheduler)?);
        }
        for child in &mut self.children {
            child.execute(depends_on, scheduler, out)?;
        }
        Ok(())
    }

    /// Dispose children first, then this driver's streams and cancellation
    /// set. Blocks until outstanding users of each resource finish.
    pub fn dispose(&mut self) -> DriverResult<()> {
        if self.disposed {
            return Ok(());
        }
        for child in &mut self.children {
            child.dispose()?;
        }
        for stream in &self.streams {
            stream.dispose()?;
        }
        self.cancel_requests.dispose()?;
        self.propagator = None;
        self.ledgers.clear();
        self.disposed = true;
        info!(driver = %self.name, context = %self.context, "driver disposed");
        Ok(())
    }
}

impl std::fmt::Debug for TaskDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDriver")
            .field("name", &self.name)
            .field("context", &self.context)
            .field("children", &self.children.len())
            .field("streams", &self.streams.len())
            .field("ledgers", &self.ledgers.len())
            .field("hardened", &self.is_hardened())
            .finish()
    }
}
