use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use weft_jobs::JobHandle;

use crate::access::AccessType;
use crate::controller::{AccessController, AccessGrant};
use crate::error::{AccessError, AccessResult};

/// A plain value arbitrated by an [`AccessController`].
///
/// Lets typed buffers, lookup tables, and result snapshots take part in the
/// same scheduling as streams. Cloning shares the same value.
pub struct AccessControlledValue<T> {
    value: Arc<RwLock<T>>,
    controller: AccessController,
}

impl<T> Clone for AccessControlledValue<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            controller: self.controller.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> AccessControlledValue<T> {
    pub fn new(label: impl Into<String>, value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            controller: AccessController::new(label),
        }
    }

    pub fn controller(&self) -> &AccessController {
        &self.controller
    }

    /// Acquire `access` and get a handle to the value for use once the
    /// grant's dependency completes.
    pub fn acquire_async(&self, access: AccessType) -> AccessResult<(AccessGrant, ValueAccess<T>)> {
        let grant = self.controller.acquire_async(access)?;
        let handle = ValueAccess {
            value: Arc::clone(&self.value),
            label: Arc::from(self.controller.label()),
            access,
        };
        Ok((grant, handle))
    }

    /// Read the value from outside the schedule, waiting for pending writers.
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> AccessResult<R> {
        let (grant, handle) = self.acquire_async(AccessType::SharedRead)?;
        grant.dependency().wait()?;
        let result = handle.read().map(|guard| f(&*guard));
        grant.release(&JobHandle::completed());
        result
    }

    /// Wait for every outstanding user and take the value's final state.
    pub fn dispose(self) -> AccessResult<T>
    where
        T: Clone,
    {
        let grant = self.controller.acquire(AccessType::Disposal)?;
        let value = self
            .value
            .read()
            .map_err(|_| AccessError::Poisoned(self.controller.label().to_string()))?
            .clone();
        grant.release(&JobHandle::completed());
        Ok(value)
    }
}

impl<T> fmt::Debug for AccessControlledValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessControlledValue")
            .field("controller", &self.controller)
            .finish()
    }
}

/// Job-side view of an [`AccessControlledValue`], limited to the mode it
/// was acquired with.
pub struct ValueAccess<T> {
    value: Arc<RwLock<T>>,
    label: Arc<str>,
    access: AccessType,
}

impl<T> Clone for ValueAccess<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            label: Arc::clone(&self.label),
            access: self.access,
        }
    }
}

impl<T> ValueAccess<T> {
    pub fn access(&self) -> AccessType {
        self.access
    }

    pub fn read(&self) -> AccessResult<RwLockReadGuard<'_, T>> {
        self.value
            .read()
            .map_err(|_| AccessError::Poisoned(self.label.to_string()))
    }

    /// Write the whole value. Only exclusive grants may do this: shared
    /// writers are not ordered against each other by the controller, so a
    /// SharedWrite holder only gets [`read`](Self::read) and must rely on
    /// `T`'s own synchronization (atomics, per-lane buffers) to mutate.
    pub fn write(&self) -> AccessResult<RwLockWriteGuard<'_, T>> {
        if !self.access.is_exclusive() {
            let controller = self.label.to_string();
            let access = self.access;
            return Err(if access.permits_write() {
                AccessError::NotExclusive { controller, access }
            } else {
                AccessError::ReadOnly { controller, access }
            });
        }
        self.value
            .write()
            .map_err(|_| AccessError::Poisoned(self.label.to_string()))
    }
}

impl<T> fmt::Debug for ValueAccess<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueAccess")
            .field("label", &self.label)
            .field("access", &self.access)
            .finish()
    }
}
