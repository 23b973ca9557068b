use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use weft_access::{AccessGrant, AccessType};
use weft_jobs::JobHandle;
use weft_types::{DriverContext, Instance, InstanceId};

use crate::error::{StreamError, StreamResult};
use crate::instance_stream::{InstanceStream, StreamAppender};

/// Destination streams for resolved results, keyed by the context of the
/// driver that asked for them.
///
/// A system job finishing an instance looks at the instance's origin
/// context and appends the result to that driver's stream.
pub struct ResolveTargets<R> {
    label: String,
    targets: BTreeMap<DriverContext, InstanceStream<Instance<R>>>,
}

impl<R> Clone for ResolveTargets<R> {
    fn clone(&self) -> Self {
        Self {
            label: self.label.clone(),
            targets: self.targets.clone(),
        }
    }
}

impl<R: Send + Sync + 'static> ResolveTargets<R> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            targets: BTreeMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Route results for `context` into `stream`. Replaces any earlier
    /// registration for the same context.
    pub fn register(&mut self, context: DriverContext, stream: InstanceStream<Instance<R>>) {
        self.targets.insert(context, stream);
    }

    pub fn get(&self, context: DriverContext) -> Option<&InstanceStream<Instance<R>>> {
        self.targets.get(&context)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Acquire SharedWrite on every target stream.
    pub fn acquire_for_resolve(&self) -> StreamResult<ResolveLease<R>> {
        let mut grants = Vec::with_capacity(self.targets.len());
        let mut appenders = BTreeMap::new();
        for (context, stream) in &self.targets {
            let (appender, grant) = stream.acquire_for_append()?.into_parts();
            grants.push(grant);
            appenders.insert(*context, appender);
        }
        Ok(ResolveLease {
            grants,
            writer: ResolveWriter {
                label: Arc::from(self.label.as_str()),
                appenders: Arc::new(appenders),
            },
        })
    }
}

impl<R> fmt::Debug for ResolveTargets<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveTargets")
            .field("label", &self.label)
            .field("contexts", &self.targets.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// SharedWrite grants on every resolve target, plus the writer they allow.
#[derive(Debug)]
pub struct ResolveLease<R> {
    grants: Vec<AccessGrant>,
    writer: ResolveWriter<R>,
}

impl<R> ResolveLease<R> {
    pub fn writer(&self) -> &ResolveWriter<R> {
        &self.writer
    }

    pub fn access(&self) -> AccessType {
        AccessType::SharedWrite
    }

    /// Combined dependency of every target grant.
    pub fn dependency(&self) -> JobHandle {
        JobHandle::combine(self.grants.iter().map(|g| g.dependency()))
    }

    pub fn release(self, token: &JobHandle) {
        for grant in self.grants {
            grant.release(token);
        }
    }

    pub fn into_parts(self) -> (ResolveWriter<R>, Vec<AccessGrant>) {
        (self.writer, self.grants)
    }
}

/// Job-side writer that routes results to the stream registered for their
/// origin context.
pub struct ResolveWriter<R> {
    label: Arc<str>,
    appenders: Arc<BTreeMap<DriverContext, StreamAppender<Instance<R>>>>,
}

impl<R> Clone for ResolveWriter<R> {
    fn clone(&self) -> Self {
        Self {
            label: Arc::clone(&self.label),
            appenders: Arc::clone(&self.appenders),
        }
    }
}

impl<R> ResolveWriter<R> {
    pub fn resolve(&self, lane: usize, id: InstanceId, value: R) -> StreamResult<()> {
        let appender = self
            .appenders
            .get(&id.context)
            .ok_or_else(|| StreamError::NoResolveTarget {
                targets: self.label.to_string(),
                context: id.context,
            })?;
        appender.append(lane, Instance::with_id(id, value))
    }

    pub fn has_target(&self, context: DriverContext) -> bool {
        self.appenders.contains_key(&context)
    }
}

impl<R> fmt::Debug for ResolveWriter<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveWriter")
            .field("targets", &self.label)
            .field("contexts", &self.appenders.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::OwnerKey;

    #[test]
    fn routes_by_origin_context() {
        let a = InstanceStream::<Instance<&str>>::new("results-a", 2);
        let b = InstanceStream::<Instance<&str>>::new("results-b", 2);
        let mut targets = ResolveTargets::new("done");
        targets.register(DriverContext(1), a.clone());
        targets.register(DriverContext(2), b.clone());
        assert_eq!(targets.len(), 2);

        let lease = targets.acquire_for_resolve().unwrap();
        assert!(lease.dependency().is_completed());
        let writer = lease.writer().clone();
        writer
            .resolve(0, InstanceId::new(OwnerKey(7), DriverContext(2)), "seven")
            .unwrap();
        let err = writer
            .resolve(0, InstanceId::new(OwnerKey(8), DriverContext(9)), "eight")
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::NoResolveTarget { context: DriverContext(9), .. }
        ));
        lease.release(&JobHandle::completed());

        assert_eq!(a.pending_len().unwrap(), 0);
        assert_eq!(b.pending_len().unwrap(), 1);
        assert_eq!(a.controller().outstanding(), 0);
    }
}
