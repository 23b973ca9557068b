//! Task systems.
//!
//! A system is the root of a driver tree. It owns its drivers outright;
//! drivers hold only a weak reference back to the shared core, for the
//! context registry and the system's cancellation set.
//!
//! # Pass order
//!
//! 1. Every driver propagates its cancellation requests, parents before
//!    children.
//! 2. The system's cancellation set and every stream in the tree are
//!    consolidated behind the propagation.
//! 3. System ledgers execute, then driver ledgers, behind the
//!    consolidation. The access controllers order conflicting ledgers by
//!    the order they execute in.

use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use weft_jobs::{JobHandle, JobScheduler};
use weft_ledger::RequirementLedger;
use weft_stream::{CancelRequestSet, InstanceStream, ManagedStream, TaskStream};
use weft_types::DriverContext;

use crate::driver::TaskDriver;
use crate::error::{DriverError, DriverResult};
use crate::registry::ContextRegistry;

/// State shared between a system and its drivers.
pub(crate) struct SystemCore {
    pub(crate) name: Arc<str>,
    pub(crate) lane_count: usize,
    pub(crate) cancel_requests: CancelRequestSet,
    registry: Mutex<ContextRegistry>,
}

impl SystemCore {
    pub(crate) fn register(&self, driver: &str) -> DriverResult<DriverContext> {
        self.registry
            .lock()
            .map_err(|_| DriverError::Poisoned(format!("{}:contexts", self.name)))?
            .register(driver)
    }
}

pub struct TaskSystem {
    core: Arc<SystemCore>,
    drivers: Vec<TaskDriver>,
    streams: Vec<Box<dyn ManagedStream>>,
    ledgers: Vec<RequirementLedger>,
    hardened: bool,
    disposed: bool,
    passes: u64,
}

impl TaskSystem {
    /// Create a system whose streams have `lane_count` lanes. Use
    /// [`JobScheduler::lane_count`] of the scheduler that will run it.
    pub fn new(name: &str, lane_count: usize) -> Self {
        let core = SystemCore {
            name: Arc::from(name),
            lane_count,
            cancel_requests: CancelRequestSet::new(format!("{name}:cancel"), DriverContext::SYSTEM, lane_count),
            registry: Mutex::new(ContextRegistry::new()),
        };
        Self {
            core: Arc::new(core),
            drivers: Vec::new(),
            streams: Vec::new(),
            ledgers: Vec::new(),
            hardened: false,
            disposed: false,
            passes: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    pub fn context(&self) -> DriverContext {
        DriverContext::SYSTEM
    }

    pub fn lane_count(&self) -> usize {
        self.core.lane_count
    }

    /// Every request from every driver in the tree lands here. Consolidated
    /// once per pass, after propagation; the same id arriving from several
    /// drivers is kept once.
    pub fn cancel_requests(&self) -> &CancelRequestSet {
        &self.core.cancel_requests
    }

    pub fn drivers(&self) -> &[TaskDriver] {
        &self.drivers
    }

    pub fn ledgers_mut(&mut self) -> &mut [RequirementLedger] {
        &mut self.ledgers
    }

    pub fn is_hardened(&self) -> bool {
        self.hardened
    }

    pub fn pass_count(&self) -> u64 {
        self.passes
    }

    fn ensure_soft(&self) -> DriverResult<()> {
        if self.disposed {
            return Err(DriverError::Disposed {
                node: self.core.name.to_string(),
            });
        }
        if self.hardened {
            return Err(DriverError::AlreadyHardened {
                node: self.core.name.to_string(),
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Create a top-level driver.
    pub fn create_driver(&mut self, name: &str) -> DriverResult<&mut TaskDriver> {
        self.ensure_soft()?;
        let context = self.core.register(name)?;
        self.drivers.push(TaskDriver::new(name, context, &self.core));
        let index = self.drivers.len() - 1;
        Ok(&mut self.drivers[index])
    }

    /// Find a driver anywhere in the tree.
    pub fn driver(&self, context: DriverContext) -> Option<&TaskDriver> {
        self.drivers.iter().find_map(|d| d.find(context))
    }

    pub fn driver_mut(&mut self, context: DriverContext) -> Option<&mut TaskDriver> {
        self.drivers.iter_mut().find_map(|d| d.find_mut(context))
    }

    /// Detach a top-level driver from the system. It keeps its context but
    /// no longer takes part in passes.
    pub fn remove_driver(&mut self, context: DriverContext) -> Option<TaskDriver> {
        let index = self.drivers.iter().position(|d| d.context() == context)?;
        Some(self.drivers.remove(index))
    }

    pub fn create_stream<T: Send + Sync + 'static>(&mut self, label: &str) -> DriverResult<InstanceStream<T>> {
        self.ensure_soft()?;
        let stream = InstanceStream::new(format!("{}:{label}", self.core.name), self.core.lane_count);
        self.streams.push(Box::new(stream.clone()));
        Ok(stream)
    }

    pub fn create_task_stream<T: Send + Sync + 'static>(&mut self, label: &str) -> DriverResult<TaskStream<T>> {
        self.ensure_soft()?;
        let stream = TaskStream::new(format!("{}:{label}", self.core.name), self.core.lane_count);
        self.streams.push(Box::new(stream.clone()));
        Ok(stream)
    }

    /// Attach a system ledger. System ledgers run before driver ledgers,
    /// in the order they were added.
    pub fn add_ledger(&mut self, ledger: RequirementLedger) -> DriverResult<()> {
        self.ensure_soft()?;
        if !ledger.context().is_system() {
            return Err(DriverError::ContextMismatch {
                ledger: ledger.label().to_string(),
                expected: DriverContext::SYSTEM,
                found: ledger.context(),
            });
        }
        self.ledgers.push(ledger);
        Ok(())
    }

    /// Harden system ledgers, then every driver.
    pub fn harden(&mut self) -> DriverResult<()> {
        self.ensure_soft()?;
        for ledger in &mut self.ledgers {
            ledger.harden()?;
        }
        for driver in &mut self.drivers {
            driver.harden()?;
        }
        self.hardened = true;
        info!(
            system = %self.core.name,
            drivers = self.drivers.len(),
            ledgers = self.ledgers.len(),
            streams = self.streams.len(),
            "task system hardened"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Schedule one pass behind `depends_on` and return its token.
    ///
    /// Pass the previous pass's token (or wait on it) so a pass never
    /// overlaps the one before it.
    pub fn run_pass(&mut self, depends_on: &JobHandle, scheduler: &JobScheduler) -> DriverResult<JobHandle> {
        if self.disposed {
            return Err(DriverError::Disposed {
                node: self.core.name.to_string(),
            });
        }
        if !self.hardened {
            return Err(DriverError::NotHardened {
                node: self.core.name.to_string(),
            });
        }

        let mut propagation = Vec::with_capacity(self.drivers.len() + 1);
        for driver in &mut self.drivers {
            propagation.push(driver.propagate(depends_on, scheduler)?);
        }
        propagation.push(depends_on.clone());
        let propagated = JobHandle::combine(propagation.iter());

        let mut consolidation = Vec::with_capacity(self.streams.len() + 1);
        consolidation.push(self.core.cancel_requests.consolidate(&propagated, scheduler)?);
        for stream in &self.streams {
            consolidation.push(stream.consolidate(&propagated, scheduler)?);
        }
        for driver in &self.drivers {
            driver.consolidate(&propagated, scheduler, &mut consolidation)?;
        }
        let consolidated = JobHandle::combine(consolidation.iter());

        let mut work = Vec::with_capacity(self.ledgers.len() + 1);
        for ledger in &mut self.ledgers {
            work.push(ledger.execute(&consolidated, scheduler)?);
        }
        for driver in &mut self.drivers {
            driver.execute(&consolidated, scheduler, &mut work)?;
        }
        work.push(consolidated);

        self.passes += 1;
        debug!(system = %self.core.name, pass = self.passes, jobs = work.len(), "pass scheduled");
        Ok(JobHandle::combine(work.iter()))
    }

    /// Dispose every driver, then the system's streams and cancellation
    /// set. Blocks until outstanding users of each resource finish.
    pub fn dispose(&mut self) -> DriverResult<()> {
        if self.disposed {
            return Ok(());
        }
        for driver in &mut self.drivers {
            driver.dispose()?;
        }
        for stream in &self.streams {
            stream.dispose()?;
        }
        self.core.cancel_requests.dispose()?;
        self.ledgers.clear();
        self.disposed = true;
        info!(system = %self.core.name, passes = self.passes, "task system disposed");
        Ok(())
    }
}

impl std::fmt::Debug for TaskSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSystem")
            .field("name", &self.core.name)
            .field("drivers", &self.drivers.len())
            .field("streams", &self.streams.len())
            .field("ledgers", &self.ledgers.len())
            .field("hardened", &self.hardened)
            .field("passes", &self.passes)
            .finish()
    }
}
