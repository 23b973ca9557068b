use thiserror::Error;
use weft_access::AccessError;
use weft_jobs::JobError;
use weft_types::{DriverContext, InstanceId};

/// Errors produced by stream operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream `{stream}` is disposed")]
    Disposed { stream: String },

    #[error("lane {lane} out of range for `{stream}` ({lanes} lanes)")]
    LaneOutOfRange {
        stream: String,
        lane: usize,
        lanes: usize,
    },

    #[error("stream `{stream}` was acquired for reading; cannot continue instances")]
    ReadOnlyConsumer { stream: String },

    #[error("cancellation id {id} submitted twice to `{set}` in one pass")]
    DuplicateCancelRequest { set: String, id: InstanceId },

    #[error("no resolve target registered for context {context} in `{targets}`")]
    NoResolveTarget {
        targets: String,
        context: DriverContext,
    },

    #[error("lock poisoned on `{0}`")]
    Poisoned(String),

    #[error("access error: {0}")]
    Access(#[from] AccessError),

    #[error("job error: {0}")]
    Job(#[from] JobError),
}

impl StreamError {
    /// Convert into a job failure so it travels along dependency handles.
    pub fn into_job_error(self, job: &str) -> JobError {
        match self {
            StreamError::Job(err) => err,
            other => JobError::failed(job, other.to_string()),
        }
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
