use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Host-assigned key of the record that owns an instance.
///
/// The engine never interprets the value; it only compares and hashes it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerKey(pub u64);

impl OwnerKey {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// Per-system byte identifying which driver an instance originated from.
///
/// Context `0` is reserved for the system itself; drivers receive dense
/// values starting at `1` from their system's registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DriverContext(pub u8);

impl DriverContext {
    /// The context owned by the aggregating system.
    pub const SYSTEM: DriverContext = DriverContext(0);

    /// Convert a registry index into a context byte.
    pub fn from_index(index: usize) -> Result<Self, TypeError> {
        u8::try_from(index)
            .map(Self)
            .map_err(|_| TypeError::ContextOutOfRange(index))
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    pub const fn is_system(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an instance: owner key plus origin context.
///
/// Two instances with the same owner coming from different drivers are
/// distinct; this is what lets a system route a result back to the driver
/// that asked for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId {
    pub owner: OwnerKey,
    pub context: DriverContext,
}

impl InstanceId {
    pub const fn new(owner: OwnerKey, context: DriverContext) -> Self {
        Self { owner, context }
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.owner.0, self.context.0)
    }
}

impl FromStr for InstanceId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::InvalidInstanceId(s.to_string());
        let (owner, context) = s.split_once('@').ok_or_else(invalid)?;
        let owner = owner.parse::<u64>().map_err(|_| invalid())?;
        let context = context.parse::<u8>().map_err(|_| invalid())?;
        Ok(Self::new(OwnerKey(owner), DriverContext(context)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn context_from_index_bounds() {
        assert_eq!(DriverContext::from_index(0).unwrap(), DriverContext::SYSTEM);
        assert_eq!(DriverContext::from_index(255).unwrap(), DriverContext(255));
        assert_eq!(
            DriverContext::from_index(256),
            Err(TypeError::ContextOutOfRange(256))
        );
    }

    #[test]
    fn system_context_is_zero() {
        assert!(DriverContext::SYSTEM.is_system());
        assert!(!DriverContext(3).is_system());
    }

    #[test]
    fn instance_id_display() {
        let id = InstanceId::new(OwnerKey(42), DriverContext(3));
        assert_eq!(id.to_string(), "42@3");
    }

    #[test]
    fn instance_id_parse_rejects_garbage() {
        assert!(matches!(
            "42".parse::<InstanceId>(),
            Err(TypeError::InvalidInstanceId(_))
        ));
        assert!(matches!(
            "42@300".parse::<InstanceId>(),
            Err(TypeError::InvalidInstanceId(_))
        ));
        assert!(matches!(
            "x@1".parse::<InstanceId>(),
            Err(TypeError::InvalidInstanceId(_))
        ));
    }

    #[test]
    fn same_owner_different_context_is_distinct() {
        let a = InstanceId::new(OwnerKey(7), DriverContext(1));
        let b = InstanceId::new(OwnerKey(7), DriverContext(2));
        assert_ne!(a, b);
    }

    #[test]
    fn serde_roundtrip() {
        let id = InstanceId::new(OwnerKey(9), DriverContext(4));
        let json = serde_json::to_string(&id).unwrap();
        let back: InstanceId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    proptest! {
        #[test]
        fn display_parse_roundtrip(owner in any::<u64>(), context in any::<u8>()) {
            let id = InstanceId::new(OwnerKey(owner), DriverContext(context));
            let parsed: InstanceId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
