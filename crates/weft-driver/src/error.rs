use thiserror::Error;
use weft_access::AccessError;
use weft_ledger::LedgerError;
use weft_stream::StreamError;
use weft_types::{DriverContext, TypeError};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("`{node}` is already hardened")]
    AlreadyHardened { node: String },

    #[error("`{node}` has not been hardened")]
    NotHardened { node: String },

    #[error("`{node}` has been disposed")]
    Disposed { node: String },

    #[error("the system behind driver `{driver}` has been dropped")]
    SystemDropped { driver: String },

    #[error("all {max} driver contexts are in use")]
    ContextsExhausted { max: usize },

    #[error("lock poisoned on `{0}`")]
    Poisoned(String),

    #[error("ledger `{ledger}` belongs to context {found}, not {expected}")]
    ContextMismatch {
        ledger: String,
        expected: DriverContext,
        found: DriverContext,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

pub type DriverResult<T> = Result<T, DriverError>;
