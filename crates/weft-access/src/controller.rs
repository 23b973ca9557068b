//! Per-resource ordering of access grants.
//!
//! The controller tracks two things: the release handle of the last
//! exclusive grant, and the release handles of every shared grant issued
//! since. A shared acquisition waits only behind the last exclusive
//! release. An exclusive acquisition waits behind all of them and then
//! becomes the new last exclusive release, so everything acquired after
//! it is ordered behind it.
//!
//! # Invariants
//!
//! - At most one ExclusiveWrite/Disposal grant is outstanding at a time.
//! - Once Disposal has been granted, every further acquisition fails.
//! - Acquiring never blocks; the grant's dependency carries the ordering.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};
use weft_jobs::{JobCompleter, JobHandle};

use crate::access::AccessType;
use crate::error::{AccessError, AccessResult};

struct ControllerState {
    last_exclusive: JobHandle,
    shared: Vec<JobHandle>,
    exclusive_outstanding: bool,
    shared_outstanding: usize,
    disposed: bool,
    issued: u64,
}

struct ControllerCore {
    label: String,
    state: Mutex<ControllerState>,
}

impl ControllerCore {
    fn lock(&self) -> AccessResult<MutexGuard<'_, ControllerState>> {
        self.state
            .lock()
            .map_err(|_| AccessError::Poisoned(self.label.clone()))
    }
}

/// Asynchronous lock for one resource.
///
/// Cloning shares the same controller.
#[derive(Clone)]
pub struct AccessController {
    core: Arc<ControllerCore>,
}

impl AccessController {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            core: Arc::new(ControllerCore {
                label: label.into(),
                state: Mutex::new(ControllerState {
                    last_exclusive: JobHandle::completed(),
                    shared: Vec::new(),
                    exclusive_outstanding: false,
                    shared_outstanding: 0,
                    disposed: false,
                    issued: 0,
                }),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.core.label
    }

    /// Acquire `access`, returning immediately.
    ///
    /// The grant's [`dependency`](AccessGrant::dependency) must complete
    /// before the holder touches the resource.
    pub fn acquire_async(&self, access: AccessType) -> AccessResult<AccessGrant> {
        let mut state = self.core.lock()?;
        if state.disposed {
            return Err(AccessError::Disposed {
                controller: self.core.label.clone(),
                requested: access,
            });
        }
        if state.exclusive_outstanding {
            return Err(AccessError::ExclusiveOutstanding {
                controller: self.core.label.clone(),
                requested: access,
            });
        }

        let (release, completer) = JobHandle::pending(format!("{}:{access}", self.core.label));
        let dependency = if access.is_exclusive() {
            let dependency = JobHandle::combine(
                std::iter::once(&state.last_exclusive).chain(state.shared.iter()),
            );
            state.shared.clear();
            state.last_exclusive = release;
            state.exclusive_outstanding = true;
            if access == AccessType::Disposal {
                state.disposed = true;
            }
            dependency
        } else {
            state.shared.retain(|h| !h.is_completed());
            state.shared.push(release);
            state.shared_outstanding += 1;
            state.last_exclusive.clone()
        };
        state.issued += 1;
        let id = state.issued;
        drop(state);

        debug!(controller = %self.core.label, %access, grant = id, "access acquired");
        Ok(AccessGrant {
            core: Arc::clone(&self.core),
            id,
            access,
            dependency,
            completer: Some(completer),
        })
    }

    /// Acquire `access` and block until it is usable.
    ///
    /// For code running outside the schedule, such as teardown.
    pub fn acquire(&self, access: AccessType) -> AccessResult<AccessGrant> {
        let grant = self.acquire_async(access)?;
        grant.dependency.wait()?;
        Ok(grant)
    }

    pub fn is_disposed(&self) -> bool {
        self.core.lock().map(|s| s.disposed).unwrap_or(true)
    }

    /// Number of grants currently held and not yet released.
    pub fn outstanding(&self) -> usize {
        self.core
            .lock()
            .map(|s| s.shared_outstanding + usize::from(s.exclusive_outstanding))
            .unwrap_or(0)
    }
}

impl fmt::Debug for AccessController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessController")
            .field("label", &self.core.label)
            .finish()
    }
}

/// One outstanding acquisition.
///
/// Release it with the handle of the work that used the resource. A grant
/// dropped without release is released immediately with a warning.
pub struct AccessGrant {
    core: Arc<ControllerCore>,
    id: u64,
    access: AccessType,
    dependency: JobHandle,
    completer: Option<JobCompleter>,
}

impl AccessGrant {
    pub fn access(&self) -> AccessType {
        self.access
    }

    /// Handle that must complete before the resource may be used.
    pub fn dependency(&self) -> &JobHandle {
        &self.dependency
    }

    pub fn controller_label(&self) -> &str {
        &self.core.label
    }

    /// Release the grant once `token` completes.
    ///
    /// The resource is freed for later acquirers whether `token` succeeds or
    /// fails; failures travel along the caller's own handles instead.
    pub fn release(mut self, token: &JobHandle) {
        self.finish(token);
    }

    fn finish(&mut self, token: &JobHandle) {
        let Some(completer) = self.completer.take() else {
            return;
        };
        token.on_complete(move |_| completer.complete(Ok(())));

        // A poisoned controller refuses further acquisitions anyway.
        if let Ok(mut state) = self.core.lock() {
            if self.access.is_exclusive() {
                state.exclusive_outstanding = false;
            } else {
                state.shared_outstanding = state.shared_outstanding.saturating_sub(1);
            }
        }
        debug!(controller = %self.core.label, access = %self.access, grant = self.id, "access released");
    }
}

impl Drop for AccessGrant {
    fn drop(&mut self) {
        if self.completer.is_some() {
            warn!(
                controller = %self.core.label,
                access = %self.access,
                grant = self.id,
                "access grant dropped without release"
            );
            self.finish(&JobHandle::completed());
        }
    }
}

impl fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGrant")
            .field("controller", &self.core.label)
            .field("id", &self.id)
            .field("access", &self.access)
            .finish()
    }
}
