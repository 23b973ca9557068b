use thiserror::Error;

/// How a job (or anything it depended on) ended when it did not succeed.
///
/// Errors travel along dependency edges: a job whose dependency failed is
/// skipped and its own handle completes with the same error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("job `{job}` failed: {reason}")]
    Failed { job: String, reason: String },

    #[error("job `{job}` panicked")]
    Panicked { job: String },

    #[error("job `{job}` was dropped before it completed")]
    Abandoned { job: String },
}

impl JobError {
    pub fn failed(job: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            job: job.into(),
            reason: reason.into(),
        }
    }

    /// Name of the job the error originated in.
    pub fn job(&self) -> &str {
        match self {
            Self::Failed { job, .. } | Self::Panicked { job } | Self::Abandoned { job } => job,
        }
    }
}

/// Final state of a completed handle.
pub type JobOutcome = Result<(), JobError>;

/// Errors from building a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("failed to build rayon thread pool: {0}")]
    PoolBuild(String),

    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
}
