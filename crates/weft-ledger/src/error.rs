use thiserror::Error;
use weft_access::AccessError;
use weft_jobs::JobError;
use weft_stream::StreamError;

use crate::usage::Usage;

/// Errors produced by requirement ledgers.
///
/// Every variant except the wrapped lower-level errors is a configuration
/// mistake detectable from the call sequence alone.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger `{ledger}` already requires {resource} for {usage}")]
    DuplicateRequirement {
        ledger: String,
        resource: String,
        usage: Usage,
    },

    #[error("ledger `{ledger}`: {usage} on {resource} conflicts with existing {existing}")]
    ConflictingUsage {
        ledger: String,
        resource: String,
        usage: Usage,
        existing: Usage,
    },

    #[error("ledger `{ledger}` is already hardened")]
    AlreadyHardened { ledger: String },

    #[error("ledger `{ledger}` must be hardened before it executes")]
    NotHardened { ledger: String },

    #[error("ledger `{ledger}` does not require {resource} for {usage}")]
    MissingRequirement {
        ledger: String,
        resource: String,
        usage: Usage,
    },

    #[error("ledger `{ledger}`: {usage} is not valid for {resource}")]
    InvalidUsage {
        ledger: String,
        resource: String,
        usage: Usage,
    },

    #[error("ledger `{ledger}`: binding `{binding}` rejected: {reason}")]
    Binding {
        ledger: String,
        binding: String,
        reason: String,
    },

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("job error: {0}")]
    Job(#[from] JobError),
}

impl LedgerError {
    /// Convert into a job failure so it travels along dependency handles.
    pub fn into_job_error(self, job: &str) -> JobError {
        match self {
            LedgerError::Job(err) | LedgerError::Stream(StreamError::Job(err)) => err,
            other => JobError::failed(job, other.to_string()),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
