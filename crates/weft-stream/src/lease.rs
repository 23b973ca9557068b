use weft_access::{AccessGrant, AccessType};
use weft_jobs::JobHandle;

/// A stream handle paired with the access grant that makes it valid.
///
/// Schedule the work that uses [`handle`](Self::handle) behind
/// [`dependency`](Self::dependency), then [`release`](Self::release) the
/// lease with that work's handle.
#[derive(Debug)]
pub struct StreamLease<H> {
    handle: H,
    grant: AccessGrant,
}

impl<H> StreamLease<H> {
    pub(crate) fn new(handle: H, grant: AccessGrant) -> Self {
        Self { handle, grant }
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn access(&self) -> AccessType {
        self.grant.access()
    }

    pub fn dependency(&self) -> &JobHandle {
        self.grant.dependency()
    }

    pub fn release(self, token: &JobHandle) {
        self.grant.release(token);
    }

    /// Split into the handle and the grant, for callers that manage them
    /// separately.
    pub fn into_parts(self) -> (H, AccessGrant) {
        (self.handle, self.grant)
    }
}
