use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::config::SchedulerConfig;
use crate::error::{JobError, SchedulerError};
use crate::handle::JobHandle;

/// Lane index of the calling thread for a scheduler with `lane_count` lanes.
///
/// Pool workers map to `1..lane_count`; every other thread shares lane `0`.
pub fn current_lane(lane_count: usize) -> usize {
    let lane = rayon::current_thread_index().map_or(0, |index| index + 1);
    lane % lane_count.max(1)
}

/// What a running job knows about itself.
#[derive(Debug)]
pub struct JobContext<'a> {
    job: &'a str,
    lane: usize,
}

impl<'a> JobContext<'a> {
    fn new(job: &'a str, lane_count: usize) -> Self {
        Self {
            job,
            lane: current_lane(lane_count),
        }
    }

    /// Dense index of the worker running this job. Lane writers use it to
    /// pick the partition they append into.
    pub fn lane(&self) -> usize {
        self.lane
    }

    pub fn job_name(&self) -> &str {
        self.job
    }

    /// Build a failure attributed to this job.
    pub fn fail(&self, reason: impl Into<String>) -> JobError {
        JobError::failed(self.job, reason)
    }
}

/// Worker pool that runs jobs once their dependencies complete.
///
/// Scheduling never blocks: [`schedule`](Self::schedule) registers the job
/// behind its dependency and returns the job's own handle immediately.
#[derive(Clone)]
pub struct JobScheduler {
    pool: Arc<rayon::ThreadPool>,
    workers: usize,
}

impl JobScheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        let workers = config.resolved_workers()?;
        let prefix = config.thread_name_prefix.clone();
        let mut builder = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(move |i| format!("{prefix}-{i}"));
        if let Some(stack_size) = config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let pool = builder
            .build()
            .map_err(|e| SchedulerError::PoolBuild(e.to_string()))?;

        info!(workers, "job scheduler started");
        Ok(Self {
            pool: Arc::new(pool),
            workers,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers
    }

    /// Number of lanes a lane-partitioned buffer needs to serve this pool:
    /// one per worker plus lane `0` for threads outside the pool.
    pub fn lane_count(&self) -> usize {
        self.workers + 1
    }

    /// Run `job` on the pool after `depends_on` completes.
    ///
    /// If `depends_on` fails the job is skipped and the returned handle
    /// fails with the same error.
    pub fn schedule<F>(&self, name: &str, depends_on: &JobHandle, job: F) -> JobHandle
    where
        F: FnOnce(&JobContext<'_>) -> Result<(), JobError> + Send + 'static,
    {
        let (handle, completer) = JobHandle::pending(name);
        let pool = Arc::clone(&self.pool);
        let lanes = self.lane_count();
        let name = name.to_string();

        depends_on.on_complete(move |outcome| {
            if let Err(err) = outcome {
                debug!(job = %name, %err, "skipping job after upstream failure");
                completer.complete(Err(err.clone()));
                return;
            }
            pool.spawn(move || {
                let result = run_guarded(&name, || job(&JobContext::new(&name, lanes)));
                completer.complete(result);
            });
        });
        handle
    }

    /// Parallel-for over a length only known once the job starts.
    ///
    /// `prepare` runs first and returns shared state plus the item count;
    /// `job` then runs once per index, with at least `batch_size` consecutive
    /// indices handed to a worker at a time.
    pub fn schedule_parallel_deferred<S, P, F>(
        &self,
        name: &str,
        depends_on: &JobHandle,
        batch_size: usize,
        prepare: P,
        job: F,
    ) -> JobHandle
    where
        S: Send + Sync + 'static,
        P: FnOnce() -> Result<(S, usize), JobError> + Send + 'static,
        F: Fn(&S, usize, &JobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        let lanes = self.lane_count();
        let batch_size = batch_size.max(1);
        self.schedule(name, depends_on, move |ctx| {
            let (state, len) = prepare()?;
            let name = ctx.job_name();
            debug!(job = %name, len, batch_size, "parallel job starting");
            (0..len)
                .into_par_iter()
                .with_min_len(batch_size)
                .try_for_each(|index| job(&state, index, &JobContext::new(name, lanes)))
        })
    }
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobScheduler")
            .field("workers", &self.workers)
            .finish()
    }
}

fn run_guarded<F>(name: &str, f: F) -> Result<(), JobError>
where
    F: FnOnce() -> Result<(), JobError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            error!(job = %name, %err, "job failed");
            Err(err)
        }
        Err(_) => {
            error!(job = %name, "job panicked");
            Err(JobError::Panicked {
                job: name.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn scheduler(workers: usize) -> JobScheduler {
        JobScheduler::new(SchedulerConfig::with_workers(workers)).unwrap()
    }

    #[test]
    fn lane_count_reserves_external_lane() {
        let s = scheduler(3);
        assert_eq!(s.worker_count(), 3);
        assert_eq!(s.lane_count(), 4);
        assert_eq!(current_lane(s.lane_count()), 0);
    }

    #[test]
    fn job_runs_after_dependency() {
        let s = scheduler(2);
        let log = Arc::new(Mutex::new(Vec::new()));

        let (gate, open) = JobHandle::pending("gate");
        let l = Arc::clone(&log);
        let first = s.schedule("first", &gate, move |_| {
            l.lock().unwrap().push("first");
            Ok(())
        });
        let l = Arc::clone(&log);
        let second = s.schedule("second", &first, move |_| {
            l.lock().unwrap().push("second");
            Ok(())
        });

        assert!(log.lock().unwrap().is_empty());
        open.complete(Ok(()));
        assert_eq!(second.wait(), Ok(()));
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn failure_skips_dependents() {
        let s = scheduler(2);
        let ran = Arc::new(AtomicUsize::new(0));
        let failing = s.schedule("failing", &JobHandle::completed(), |ctx| {
            Err(ctx.fail("nope"))
        });
        let r = Arc::clone(&ran);
        let after = s.schedule("after", &failing, move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(after.wait(), Err(JobError::failed("failing", "nope")));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panic_is_captured() {
        let s = scheduler(1);
        let handle = s.schedule("explodes", &JobHandle::completed(), |_| {
            panic!("kaboom");
        });
        assert_eq!(
            handle.wait(),
            Err(JobError::Panicked {
                job: "explodes".into()
            })
        );
    }

    #[test]
    fn jobs_see_worker_lanes() {
        let s = scheduler(4);
        let lanes = s.lane_count();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let seen = Arc::clone(&seen);
                s.schedule("lane", &JobHandle::completed(), move |ctx| {
                    seen.lock().unwrap().push(ctx.lane());
                    Ok(())
                })
            })
            .collect();
        JobHandle::combine(handles.iter()).wait().unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 32);
        assert!(seen.iter().all(|&lane| lane >= 1 && lane < lanes));
    }

    #[test]
    fn parallel_deferred_visits_every_index() {
        let s = scheduler(4);
        let sum = Arc::new(AtomicUsize::new(0));
        let total = Arc::clone(&sum);
        let handle = s.schedule_parallel_deferred(
            "sum",
            &JobHandle::completed(),
            8,
            || Ok(((0..1000usize).collect::<Vec<_>>(), 1000)),
            move |values, index, _| {
                total.fetch_add(values[index], Ordering::Relaxed);
                Ok(())
            },
        );
        handle.wait().unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), (0..1000).sum::<usize>());
    }

    #[test]
    fn parallel_deferred_prepare_failure() {
        let s = scheduler(2);
        let handle = s.schedule_parallel_deferred(
            "prep",
            &JobHandle::completed(),
            1,
            || Err::<((), usize), _>(JobError::failed("prep", "no data")),
            |_, _, _| Ok(()),
        );
        assert_eq!(handle.wait(), Err(JobError::failed("prep", "no data")));
    }

    #[test]
    fn parallel_deferred_empty_range() {
        let s = scheduler(2);
        let handle = s.schedule_parallel_deferred(
            "empty",
            &JobHandle::completed(),
            16,
            || Ok(((), 0)),
            |_, _, ctx| Err(ctx.fail("should not run")),
        );
        assert_eq!(handle.wait(), Ok(()));
    }
}
