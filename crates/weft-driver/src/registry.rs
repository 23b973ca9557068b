use std::collections::BTreeMap;

use tracing::debug;
use weft_types::DriverContext;

use crate::error::{DriverError, DriverResult};

/// Hands out driver contexts within one system.
///
/// Context 0 belongs to the system itself; drivers get 1..=255 in
/// registration order. Contexts are never reused.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    names: BTreeMap<DriverContext, String>,
}

impl ContextRegistry {
    /// Number of contexts available to drivers.
    pub const CAPACITY: usize = u8::MAX as usize;

    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next free context to the driver called `name`.
    pub fn register(&mut self, name: impl Into<String>) -> DriverResult<DriverContext> {
        let next = self.names.len() + 1;
        let context = DriverContext::from_index(next).map_err(|_| DriverError::ContextsExhausted {
            max: Self::CAPACITY,
        })?;
        let name = name.into();
        debug!(%context, driver = %name, "driver context registered");
        self.names.insert(context, name);
        Ok(context)
    }

    pub fn name_of(&self, context: DriverContext) -> Option<&str> {
        self.names.get(&context).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn contexts_are_dense_and_skip_system() {
        let mut registry = ContextRegistry::new();
        let a = registry.register("a").unwrap();
        let b = registry.register("b").unwrap();
        assert_eq!(a, DriverContext(1));
        assert_eq!(b, DriverContext(2));
        assert_eq!(registry.name_of(b), Some("b"));
        assert_eq!(registry.name_of(DriverContext::SYSTEM), None);
    }

    #[test]
    fn exhausted_after_capacity() {
        let mut registry = ContextRegistry::new();
        for i in 0..ContextRegistry::CAPACITY {
            registry.register(format!("d{i}")).unwrap();
        }
        assert_eq!(registry.len(), 255);
        let err = registry.register("one-too-many").unwrap_err();
        assert!(matches!(err, DriverError::ContextsExhausted { max: 255 }));
    }

    proptest! {
        #[test]
        fn contexts_are_unique_and_never_system(n in 1usize..=255) {
            let mut registry = ContextRegistry::new();
            let contexts: Vec<_> = (0..n).map(|i| registry.register(format!("d{i}")).unwrap()).collect();
            let mut sorted = contexts.clone();
            sorted.sort();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), n);
            prop_assert!(contexts.iter().all(|c| !c.is_system()));
            prop_assert_eq!(contexts.last().map(|c| c.raw() as usize), Some(n));
        }
    }
}
