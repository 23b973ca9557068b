use std::fmt;

use serde::{Deserialize, Serialize};

/// Mode of an access grant.
///
/// Shared modes may be outstanding together because they touch disjoint
/// parts of a resource: reads look at the consolidated snapshot, shared
/// writes append to per-lane pending buffers. Exclusive modes own the
/// whole resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    SharedRead,
    SharedWrite,
    ExclusiveWrite,
    /// Final exclusive access. Nothing may be acquired afterwards.
    Disposal,
}

impl AccessType {
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::ExclusiveWrite | Self::Disposal)
    }

    pub fn is_shared(self) -> bool {
        !self.is_exclusive()
    }

    /// Whether a holder of this mode may mutate the resource.
    pub fn permits_write(self) -> bool {
        !matches!(self, Self::SharedRead)
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SharedRead => "SharedRead",
            Self::SharedWrite => "SharedWrite",
            Self::ExclusiveWrite => "ExclusiveWrite",
            Self::Disposal => "Disposal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusivity() {
        assert!(AccessType::ExclusiveWrite.is_exclusive());
        assert!(AccessType::Disposal.is_exclusive());
        assert!(AccessType::SharedRead.is_shared());
        assert!(AccessType::SharedWrite.is_shared());
    }

    #[test]
    fn only_shared_read_is_read_only() {
        assert!(!AccessType::SharedRead.permits_write());
        assert!(AccessType::SharedWrite.permits_write());
        assert!(AccessType::ExclusiveWrite.permits_write());
    }
}
