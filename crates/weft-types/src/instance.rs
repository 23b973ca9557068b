use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::identity::{DriverContext, InstanceId, OwnerKey};

/// A payload tagged with the identity used for cancellation and routing.
///
/// Equality and hashing look at the identity only, so a lookup keyed by
/// `Instance<T>` behaves like one keyed by [`InstanceId`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance<T> {
    pub id: InstanceId,
    pub payload: T,
}

impl<T> Instance<T> {
    pub fn new(owner: OwnerKey, context: DriverContext, payload: T) -> Self {
        Self {
            id: InstanceId::new(owner, context),
            payload,
        }
    }

    pub fn with_id(id: InstanceId, payload: T) -> Self {
        Self { id, payload }
    }

    pub fn owner(&self) -> OwnerKey {
        self.id.owner
    }

    pub fn context(&self) -> DriverContext {
        self.id.context
    }

    /// Replace the payload, keeping the identity.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Instance<U> {
        Instance {
            id: self.id,
            payload: f(self.payload),
        }
    }
}

impl<T> PartialEq for Instance<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Instance<T> {}

impl<T> Hash for Instance<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equality_ignores_payload() {
        let a = Instance::new(OwnerKey(1), DriverContext(2), 10u32);
        let b = Instance::new(OwnerKey(1), DriverContext(2), 99u32);
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn map_keeps_identity() {
        let a = Instance::new(OwnerKey(5), DriverContext(1), 3u8);
        let b = a.clone().map(|v| format!("{v}"));
        assert_eq!(b.id, a.id);
        assert_eq!(b.payload, "3");
        assert_eq!(b.owner(), OwnerKey(5));
        assert_eq!(b.context(), DriverContext(1));
    }
}
