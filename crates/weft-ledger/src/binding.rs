//! Schedule bindings.
//!
//! A binding is what a hardened ledger dispatches: it receives the
//! acquired [`JobData`] and the combined dependency, schedules its work,
//! and returns the work's handle. Bindings are supplied explicitly when the
//! ledger is built and validated once against the declared requirements
//! when the ledger hardens.

use std::sync::Arc;

use weft_jobs::{JobContext, JobError, JobHandle, JobScheduler};

use crate::error::{LedgerError, LedgerResult};
use crate::job_data::JobData;
use crate::usage::RequirementKey;

pub trait ScheduleBinding: Send {
    fn name(&self) -> &str;

    /// Requirements the binding reads from [`JobData`]. Hardening fails if
    /// any of them was not declared.
    fn expects(&self) -> Vec<RequirementKey> {
        Vec::new()
    }

    /// Schedule the work behind `depends_on` and return its handle.
    fn schedule(&mut self, data: JobData, depends_on: &JobHandle, scheduler: &JobScheduler)
        -> LedgerResult<JobHandle>;
}

/// Check that every requirement `binding` expects was declared.
pub(crate) fn validate(
    ledger: &str,
    binding: &dyn ScheduleBinding,
    declared: &[RequirementKey],
) -> LedgerResult<()> {
    for expected in binding.expects() {
        if !declared.contains(&expected) {
            return Err(LedgerError::Binding {
                ledger: ledger.to_string(),
                binding: binding.name().to_string(),
                reason: format!("expects {expected}, which is not required"),
            });
        }
    }
    Ok(())
}

type EntryFn = Box<dyn FnMut(JobData, &JobHandle, &JobScheduler) -> LedgerResult<JobHandle> + Send>;

/// A binding around an arbitrary scheduling closure.
///
/// The closure owns the whole dispatch: it may schedule several jobs and
/// must return a handle covering all of them.
pub struct EntryPoint {
    name: String,
    expects: Vec<RequirementKey>,
    entry: EntryFn,
}

impl EntryPoint {
    pub fn new<F>(name: impl Into<String>, entry: F) -> Self
    where
        F: FnMut(JobData, &JobHandle, &JobScheduler) -> LedgerResult<JobHandle> + Send + 'static,
    {
        Self {
            name: name.into(),
            expects: Vec::new(),
            entry: Box::new(entry),
        }
    }

    /// Declare a requirement the closure reads.
    pub fn expecting(mut self, key: RequirementKey) -> Self {
        self.expects.push(key);
        self
    }
}

impl ScheduleBinding for EntryPoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn expects(&self) -> Vec<RequirementKey> {
        self.expects.clone()
    }

    fn schedule(&mut self, data: JobData, depends_on: &JobHandle, scheduler: &JobScheduler) -> LedgerResult<JobHandle> {
        (self.entry)(data, depends_on, scheduler)
    }
}

type SingleFn = Arc<dyn Fn(&JobData, &JobContext<'_>) -> Result<(), JobError> + Send + Sync>;

/// A binding that runs one job per execution.
pub struct SingleJob {
    name: String,
    expects: Vec<RequirementKey>,
    job: SingleFn,
}

impl SingleJob {
    pub fn new<F>(name: impl Into<String>, job: F) -> Self
    where
        F: Fn(&JobData, &JobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            expects: Vec::new(),
            job: Arc::new(job),
        }
    }

    pub fn expecting(mut self, key: RequirementKey) -> Self {
        self.expects.push(key);
        self
    }
}

impl ScheduleBinding for SingleJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn expects(&self) -> Vec<RequirementKey> {
        self.expects.clone()
    }

    fn schedule(&mut self, data: JobData, depends_on: &JobHandle, scheduler: &JobScheduler) -> LedgerResult<JobHandle> {
        let job = Arc::clone(&self.job);
        Ok(scheduler.schedule(&self.name, depends_on, move |ctx| job(&data, ctx)))
    }
}
