use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use weft_access::AccessType;

/// How a unit of work uses a resource.
///
/// Each usage maps to one [`AccessType`]. Several usages may target the same
/// resource type only when they are compatible, see
/// [`Usage::can_coexist`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Usage {
    /// Sole owner of the whole resource.
    ExclusiveWrite,
    /// Process the current snapshot and continue instances into the next pass.
    Update,
    /// Append into pending lanes.
    Write,
    /// Look at the current snapshot.
    Read,
    /// Append instances whose owners asked to cancel into the pending-cancel
    /// stream.
    WritePendingCancel,
    /// Process the pending-cancel snapshot.
    Cancelling,
    /// Append results into resolve targets.
    Resolve,
}

impl Usage {
    pub const ALL: [Usage; 7] = [
        Usage::ExclusiveWrite,
        Usage::Update,
        Usage::Write,
        Usage::Read,
        Usage::WritePendingCancel,
        Usage::Cancelling,
        Usage::Resolve,
    ];

    pub fn access_type(self) -> AccessType {
        match self {
            Usage::ExclusiveWrite | Usage::Update | Usage::Cancelling => AccessType::ExclusiveWrite,
            Usage::Write | Usage::WritePendingCancel | Usage::Resolve => AccessType::SharedWrite,
            Usage::Read => AccessType::SharedRead,
        }
    }

    /// Usages this one explicitly allows alongside it on the same resource
    /// type.
    pub fn compatible_with(self) -> &'static [Usage] {
        match self {
            Usage::Update => &[Usage::WritePendingCancel],
            Usage::Write => &[Usage::Read],
            Usage::Read => &[Usage::Write],
            Usage::WritePendingCancel => &[Usage::Update],
            Usage::Cancelling => &[Usage::Read, Usage::Write],
            Usage::ExclusiveWrite | Usage::Resolve => &[],
        }
    }

    /// Whether `self` and `other` may both be required on one resource type.
    /// Symmetric: either side listing the other is enough.
    pub fn can_coexist(self, other: Usage) -> bool {
        self.compatible_with().contains(&other) || other.compatible_with().contains(&self)
    }
}

impl fmt::Display for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity of a kind of resource, for keying requirements.
#[derive(Clone, Copy, Debug)]
pub struct ResourceType {
    id: TypeId,
    name: &'static str,
}

impl ResourceType {
    pub fn of<R: 'static>() -> Self {
        Self {
            id: TypeId::of::<R>(),
            name: std::any::type_name::<R>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ResourceType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ResourceType {}

impl Hash for ResourceType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One declared need: a resource type and how it is used.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequirementKey {
    pub resource: ResourceType,
    pub usage: Usage,
}

impl RequirementKey {
    pub fn new(resource: ResourceType, usage: Usage) -> Self {
        Self { resource, usage }
    }

    pub fn of<R: 'static>(usage: Usage) -> Self {
        Self::new(ResourceType::of::<R>(), usage)
    }
}

impl fmt::Display for RequirementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource, self.usage)
    }
}
