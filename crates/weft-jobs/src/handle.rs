//! Dependency tokens.
//!
//! A [`JobHandle`] stands for a point in the schedule. It is either already
//! complete or backed by a shared completion cell that a [`JobCompleter`]
//! fills exactly once. Dependents register continuations instead of
//! blocking; [`JobHandle::wait`] exists for hosts and tests that sit outside
//! the schedule.
//!
//! # Invariants
//!
//! - A handle completes at most once; later completions are ignored.
//! - Continuations run exactly once, after the outcome is visible.
//! - A completer dropped without completing resolves its handle with
//!   [`JobError::Abandoned`], so nothing waits forever on a lost job.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{JobError, JobOutcome};

type Continuation = Box<dyn FnOnce(&JobOutcome) + Send>;

struct CompletionState {
    outcome: Option<JobOutcome>,
    continuations: Vec<Continuation>,
}

struct Completion {
    name: String,
    state: Mutex<CompletionState>,
    done: Condvar,
}

impl Completion {
    fn new(name: String, outcome: Option<JobOutcome>) -> Self {
        Self {
            name,
            state: Mutex::new(CompletionState {
                outcome,
                continuations: Vec::new(),
            }),
            done: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CompletionState> {
        self.state.lock().expect("job completion mutex poisoned")
    }

    fn finish(&self, outcome: JobOutcome) {
        let continuations = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.continuations)
        };
        self.done.notify_all();
        for continuation in continuations {
            continuation(&outcome);
        }
    }
}

/// Dependency token for a future point in the schedule.
///
/// Cloning is cheap; all clones observe the same completion.
#[derive(Clone, Default)]
pub struct JobHandle {
    inner: Option<Arc<Completion>>,
}

impl JobHandle {
    /// A handle that is already complete. Waiting behind it costs nothing.
    pub fn completed() -> Self {
        Self { inner: None }
    }

    /// A handle that is already complete with an error.
    pub fn failed(error: JobError) -> Self {
        let name = error.job().to_string();
        Self {
            inner: Some(Arc::new(Completion::new(name, Some(Err(error))))),
        }
    }

    /// A pending handle and the completer that resolves it.
    pub fn pending(name: impl Into<String>) -> (JobHandle, JobCompleter) {
        let completion = Arc::new(Completion::new(name.into(), None));
        (
            JobHandle {
                inner: Some(Arc::clone(&completion)),
            },
            JobCompleter {
                completion: Some(completion),
            },
        )
    }

    pub fn is_completed(&self) -> bool {
        self.outcome().is_some()
    }

    /// The outcome if the handle has completed, `None` while pending.
    pub fn outcome(&self) -> Option<JobOutcome> {
        match &self.inner {
            None => Some(Ok(())),
            Some(completion) => completion.lock().outcome.clone(),
        }
    }

    /// Run `f` once the handle completes. Runs inline if it already has.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&JobOutcome) + Send + 'static,
    {
        let Some(completion) = &self.inner else {
            f(&Ok(()));
            return;
        };
        let outcome = {
            let mut state = completion.lock();
            match &state.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    state.continuations.push(Box::new(f));
                    return;
                }
            }
        };
        f(&outcome);
    }

    /// Block the calling thread until the handle completes.
    ///
    /// Never call this from inside a job: a worker parked here cannot run
    /// the work it is waiting for.
    pub fn wait(&self) -> JobOutcome {
        let Some(completion) = &self.inner else {
            return Ok(());
        };
        let mut state = completion.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = completion
                .done
                .wait(state)
                .expect("job completion mutex poisoned");
        }
    }

    /// Like [`wait`](Self::wait), giving up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        let Some(completion) = &self.inner else {
            return Some(Ok(()));
        };
        let state = completion.lock();
        let (state, _) = completion
            .done
            .wait_timeout_while(state, timeout, |s| s.outcome.is_none())
            .expect("job completion mutex poisoned");
        state.outcome.clone()
    }

    /// Whether both handles refer to the same completion.
    pub fn ptr_eq(&self, other: &JobHandle) -> bool {
        match (&self.inner, &other.inner) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A handle that completes once every input has.
    ///
    /// Inputs that already succeeded are dropped. With nothing left the
    /// result is [`completed`](Self::completed); with one left it is that
    /// handle itself. The first error observed wins.
    pub fn combine<'a, I>(handles: I) -> JobHandle
    where
        I: IntoIterator<Item = &'a JobHandle>,
    {
        let mut pending = Vec::new();
        for handle in handles {
            match handle.outcome() {
                Some(Ok(())) => {}
                Some(Err(err)) => return JobHandle::failed(err),
                None => pending.push(handle.clone()),
            }
        }

        match pending.len() {
            0 => return JobHandle::completed(),
            1 => return pending.remove(0),
            _ => {}
        }

        let (combined, completer) = JobHandle::pending("combine");
        let remaining = Arc::new(AtomicUsize::new(pending.len()));
        let completer = Arc::new(Mutex::new(Some(completer)));
        for handle in pending {
            let remaining = Arc::clone(&remaining);
            let completer = Arc::clone(&completer);
            handle.on_complete(move |outcome| {
                let finished = match outcome {
                    Err(_) => true,
                    Ok(()) => remaining.fetch_sub(1, Ordering::AcqRel) == 1,
                };
                if finished {
                    let taken = completer
                        .lock()
                        .expect("combine completer mutex poisoned")
                        .take();
                    if let Some(completer) = taken {
                        completer.complete(outcome.clone());
                    }
                }
            });
        }
        combined
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.inner.as_ref().map_or("completed", |c| c.name.as_str());
        f.debug_struct("JobHandle")
            .field("name", &name)
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// Write side of a pending [`JobHandle`].
pub struct JobCompleter {
    completion: Option<Arc<Completion>>,
}

impl JobCompleter {
    /// Resolve the handle. Continuations run on the calling thread.
    pub fn complete(mut self, outcome: JobOutcome) {
        if let Some(completion) = self.completion.take() {
            completion.finish(outcome);
        }
    }

    /// Resolve the handle with whatever `dependency` resolves to, once it does.
    pub fn complete_after(self, dependency: &JobHandle) {
        dependency.on_complete(move |outcome| self.complete(outcome.clone()));
    }
}

impl Drop for JobCompleter {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            let job = completion.name.clone();
            completion.finish(Err(JobError::Abandoned { job }));
        }
    }
}

impl fmt::Debug for JobCompleter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.completion.as_ref().map(|c| c.name.as_str());
        f.debug_struct("JobCompleter").field("name", &name).finish()
    }
}
