use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("context index {0} does not fit in a driver context byte")]
    ContextOutOfRange(usize),

    #[error("invalid instance id `{0}`: expected `<owner>@<context>`")]
    InvalidInstanceId(String),
}
