use thiserror::Error;
use weft_jobs::JobError;

use crate::access::AccessType;

/// Errors produced by access control.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
    #[error("cannot acquire {requested} on `{controller}`: an exclusive grant is still outstanding")]
    ExclusiveOutstanding {
        controller: String,
        requested: AccessType,
    },

    #[error("cannot acquire {requested} on `{controller}`: resource is disposed")]
    Disposed {
        controller: String,
        requested: AccessType,
    },

    #[error("`{controller}` was acquired for {access}, which does not permit writes")]
    ReadOnly {
        controller: String,
        access: AccessType,
    },

    #[error("`{controller}` was acquired for {access}; writing the whole value needs an exclusive grant")]
    NotExclusive {
        controller: String,
        access: AccessType,
    },

    #[error("lock poisoned on `{0}`")]
    Poisoned(String),

    #[error("waiting for access failed: {0}")]
    Job(#[from] JobError),
}

pub type AccessResult<T> = Result<T, AccessError>;
