//! Cancellation propagation.
//!
//! Once per pass, every request a driver accumulated is delivered to the
//! system's set and to each direct child's set. The driver's own pending
//! requests become its lookup for the pass.

use std::sync::Arc;

use tracing::debug;
use weft_access::{AccessGrant, AccessType};
use weft_jobs::{JobHandle, JobScheduler};
use weft_stream::{CancelRequestSet, CancelRequestWriter};

use crate::error::DriverResult;

/// Fans one driver's cancellation requests out to its system and children.
pub struct CancellationPropagator {
    job_name: String,
    source: CancelRequestSet,
    system: CancelRequestSet,
    children: Vec<CancelRequestSet>,
    sinks: Arc<[CancelRequestWriter]>,
    dependencies: Vec<JobHandle>,
    grants: Vec<AccessGrant>,
}

impl CancellationPropagator {
    pub fn new(source: CancelRequestSet, system: CancelRequestSet, children: Vec<CancelRequestSet>) -> Self {
        let sinks: Vec<CancelRequestWriter> = std::iter::once(system.writer())
            .chain(children.iter().map(CancelRequestSet::writer))
            .collect();
        // Children, the system, the driver's own set, and the incoming token.
        let dependencies = Vec::with_capacity(children.len() + 3);
        let grants = Vec::with_capacity(children.len() + 2);
        Self {
            job_name: format!("propagate:{}", source.label()),
            sinks: sinks.into(),
            source,
            system,
            children,
            dependencies,
            grants,
        }
    }

    pub fn source(&self) -> &CancelRequestSet {
        &self.source
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Schedule this pass's propagation behind `depends_on` and return its
    /// token.
    pub fn propagate(&mut self, depends_on: &JobHandle, scheduler: &JobScheduler) -> DriverResult<JobHandle> {
        self.dependencies.clear();
        if let Err(err) = self.acquire_all() {
            let done = JobHandle::completed();
            for grant in self.grants.drain(..) {
                grant.release(&done);
            }
            self.dependencies.clear();
            return Err(err);
        }
        self.dependencies.push(depends_on.clone());
        let combined = JobHandle::combine(self.dependencies.iter());
        self.dependencies.clear();

        let source = self.source.clone();
        let sinks = Arc::clone(&self.sinks);
        let job = scheduler.schedule(&self.job_name, &combined, move |ctx| {
            let forwarded = source
                .drain_into(&sinks, ctx.lane())
                .map_err(|e| e.into_job_error(ctx.job_name()))?;
            if forwarded > 0 {
                debug!(set = source.label(), forwarded, sinks = sinks.len(), "cancel requests propagated");
            }
            Ok(())
        });

        for grant in self.grants.drain(..) {
            grant.release(&job);
        }
        Ok(job)
    }

    fn acquire_all(&mut self) -> DriverResult<()> {
        for set in self.children.iter().chain(std::iter::once(&self.system)) {
            let grant = set.controller().acquire_async(AccessType::SharedWrite)?;
            self.dependencies.push(grant.dependency().clone());
            self.grants.push(grant);
        }
        // Draining rewrites the lookup that SharedRead holders query.
        let grant = self.source.controller().acquire_async(AccessType::ExclusiveWrite)?;
        self.dependencies.push(grant.dependency().clone());
        self.grants.push(grant);
        Ok(())
    }
}

impl std::fmt::Debug for CancellationPropagator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationPropagator")
            .field("source", &self.source.label())
            .field("system", &self.system.label())
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use weft_jobs::SchedulerConfig;
    use weft_types::{DriverContext, InstanceId, OwnerKey};

    fn scheduler() -> JobScheduler {
        JobScheduler::new(SchedulerConfig::with_workers(2)).unwrap()
    }

    fn set(label: &str, context: u8, lanes: usize) -> CancelRequestSet {
        CancelRequestSet::new(label, DriverContext(context), lanes)
    }

    fn ids(owners: &[u64], context: u8) -> HashSet<InstanceId> {
        owners
            .iter()
            .map(|&o| InstanceId::new(OwnerKey(o), DriverContext(context)))
            .collect()
    }

    #[test]
    fn requests_reach_system_and_every_child() {
        let s = scheduler();
        let lanes = s.lane_count();
        let driver = set("driver", 1, lanes);
        let system = set("system", 0, lanes);
        let children = vec![set("child-a", 2, lanes), set("child-b", 3, lanes)];
        let mut propagator = CancellationPropagator::new(driver.clone(), system.clone(), children.clone());
        assert_eq!(propagator.child_count(), 2);

        let writer = driver.writer();
        for owner in [10, 11, 12] {
            writer.request_cancel(0, OwnerKey(owner)).unwrap();
        }

        propagator.propagate(&JobHandle::completed(), &s).unwrap().wait().unwrap();

        let expected = ids(&[10, 11, 12], 1);
        assert!(driver.pending_snapshot().unwrap().is_empty());
        assert_eq!(driver.lookup_snapshot().unwrap(), expected);
        for sink in std::iter::once(&system).chain(children.iter()) {
            let pending = sink.pending_snapshot().unwrap();
            assert_eq!(pending.len(), 3, "{}", sink.label());
            assert_eq!(pending.into_iter().collect::<HashSet<_>>(), expected);
        }
    }

    #[test]
    fn empty_pass_resets_lookup() {
        let s = scheduler();
        let driver = set("driver", 1, s.lane_count());
        let system = set("system", 0, s.lane_count());
        let mut propagator = CancellationPropagator::new(driver.clone(), system.clone(), Vec::new());

        driver.writer().request_cancel(0, OwnerKey(5)).unwrap();
        propagator.propagate(&JobHandle::completed(), &s).unwrap().wait().unwrap();
        assert_eq!(driver.lookup_snapshot().unwrap().len(), 1);

        propagator.propagate(&JobHandle::completed(), &s).unwrap().wait().unwrap();
        assert!(driver.lookup_snapshot().unwrap().is_empty());
        assert_eq!(system.pending_snapshot().unwrap().len(), 1);
    }

    #[test]
    fn waits_for_incoming_token() {
        let s = scheduler();
        let driver = set("driver", 1, s.lane_count());
        let system = set("system", 0, s.lane_count());
        let mut propagator = CancellationPropagator::new(driver.clone(), system.clone(), Vec::new());
        driver.writer().request_cancel(0, OwnerKey(1)).unwrap();

        let (gate, open) = JobHandle::pending("frame");
        let token = propagator.propagate(&gate, &s).unwrap();
        assert!(!token.is_completed());
        assert_eq!(driver.pending_snapshot().unwrap().len(), 1);

        open.complete(Ok(()));
        token.wait().unwrap();
        assert_eq!(system.pending_snapshot().unwrap().len(), 1);
        assert_eq!(system.controller().outstanding(), 0);
        assert_eq!(driver.controller().outstanding(), 0);
    }

    #[test]
    fn lookup_readers_finish_before_the_next_drain() {
        let s = scheduler();
        let driver = set("driver", 1, s.lane_count());
        let system = set("system", 0, s.lane_count());
        let mut propagator = CancellationPropagator::new(driver.clone(), system, Vec::new());

        driver.writer().request_cancel(0, OwnerKey(8)).unwrap();
        propagator.propagate(&JobHandle::completed(), &s).unwrap().wait().unwrap();

        let lookup = driver.acquire_for_lookup().unwrap();
        let token = propagator.propagate(&JobHandle::completed(), &s).unwrap();
        assert!(token.wait_timeout(Duration::from_millis(50)).is_none());
        let requested = InstanceId::new(OwnerKey(8), DriverContext(1));
        assert!(lookup.handle().is_requested(&requested).unwrap());

        lookup.release(&JobHandle::completed());
        token.wait().unwrap();
        assert!(driver.lookup_snapshot().unwrap().is_empty());
    }

    #[test]
    fn disposed_child_fails_without_leaking_grants() {
        let s = scheduler();
        let driver = set("driver", 1, s.lane_count());
        let system = set("system", 0, s.lane_count());
        let child = set("child", 2, s.lane_count());
        let mut propagator = CancellationPropagator::new(driver.clone(), system.clone(), vec![child.clone()]);

        system.dispose().unwrap();
        assert!(propagator.propagate(&JobHandle::completed(), &s).is_err());
        assert_eq!(child.controller().outstanding(), 0);
    }

    #[cfg(any(debug_assertions, feature = "expensive-checks"))]
    #[test]
    fn duplicate_request_in_one_pass_fails() {
        let s = scheduler();
        let driver = set("driver", 1, s.lane_count());
        let system = set("system", 0, s.lane_count());
        let mut propagator = CancellationPropagator::new(driver.clone(), system, Vec::new());

        let writer = driver.writer();
        writer.request_cancel(0, OwnerKey(2)).unwrap();
        writer.request_cancel(0, OwnerKey(2)).unwrap();

        let err = propagator.propagate(&JobHandle::completed(), &s).unwrap().wait().unwrap_err();
        assert!(err.to_string().contains("2@1"), "{err}");
    }
}
