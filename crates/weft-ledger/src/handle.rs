use std::any::Any;

use weft_access::AccessGrant;
use weft_jobs::JobHandle;

use crate::error::LedgerResult;
use crate::usage::RequirementKey;

/// A resource as acquired for one dispatch.
pub struct Acquired {
    /// Must complete before the job touches the resource.
    pub dependency: JobHandle,
    /// Job-side view placed into [`JobData`](crate::JobData).
    pub resource: Box<dyn Any + Send + Sync>,
}

/// One declared requirement of a ledger.
///
/// The ledger acquires every handle before dispatch and releases every
/// handle with the dispatched job's token afterwards.
pub trait ResourceHandle: Send {
    fn key(&self) -> RequirementKey;

    /// Label of the underlying resource, for logs and errors.
    fn label(&self) -> &str;

    fn acquire(&mut self) -> LedgerResult<Acquired>;

    /// Release what the last [`acquire`](Self::acquire) took once `token`
    /// completes. Does nothing if nothing is held.
    fn release(&mut self, token: &JobHandle);
}

type AcquireFn<H> = Box<dyn FnMut() -> LedgerResult<(H, Vec<AccessGrant>)> + Send>;

/// A [`ResourceHandle`] built from an acquisition closure.
///
/// The closure takes the grants and produces the job-side view `H`; this
/// type keeps the grants between acquire and release.
pub struct GrantedRequirement<H> {
    key: RequirementKey,
    label: String,
    acquire: AcquireFn<H>,
    held: Vec<AccessGrant>,
}

impl<H: Send + Sync + 'static> GrantedRequirement<H> {
    pub fn new<F>(key: RequirementKey, label: impl Into<String>, acquire: F) -> Self
    where
        F: FnMut() -> LedgerResult<(H, Vec<AccessGrant>)> + Send + 'static,
    {
        Self {
            key,
            label: label.into(),
            acquire: Box::new(acquire),
            held: Vec::new(),
        }
    }
}

impl<H: Send + Sync + 'static> ResourceHandle for GrantedRequirement<H> {
    fn key(&self) -> RequirementKey {
        self.key
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn acquire(&mut self) -> LedgerResult<Acquired> {
        let (resource, grants) = (self.acquire)()?;
        let dependency = JobHandle::combine(grants.iter().map(|g| g.dependency()));
        self.held = grants;
        Ok(Acquired {
            dependency,
            resource: Box::new(resource),
        })
    }

    fn release(&mut self, token: &JobHandle) {
        for grant in self.held.drain(..) {
            grant.release(token);
        }
    }
}
