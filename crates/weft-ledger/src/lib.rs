//! Requirement ledgers for weft.
//!
//! A ledger is the declared contract of one unit of work: which resources
//! it touches, and how. Declarations are validated as they arrive, frozen
//! by hardening, and then every execution acquires the declared resources,
//! dispatches a [`ScheduleBinding`] behind their combined dependency, and
//! releases them with the binding's token.
//!
//! # Key Types
//!
//! - [`Usage`] — How a ledger uses a resource, and which usages coexist
//! - [`RequirementKey`] — (resource type, usage) pair a ledger declares
//! - [`RequirementLedger`] — Soft declarations, hardening, execution
//! - [`JobData`] — Typed job-side views of the acquired resources
//! - [`ScheduleBinding`] — What a ledger dispatches
//! - [`UpdateBinding`] / [`CancelBinding`] — Parallel passes over task streams
//! - [`StreamBinding`] — Parallel pass over a plain instance stream

pub mod binding;
pub mod error;
pub mod handle;
pub mod job_data;
pub mod ledger;
pub mod stream_binding;
pub mod task_binding;
pub mod usage;

pub use binding::{EntryPoint, ScheduleBinding, SingleJob};
pub use error::{LedgerError, LedgerResult};
pub use handle::{Acquired, GrantedRequirement, ResourceHandle};
pub use job_data::JobData;
pub use ledger::RequirementLedger;
pub use stream_binding::{StreamBinding, StreamItem};
pub use task_binding::{cancel_ledger, update_ledger, CancelBinding, TaskCanceller, TaskUpdater, UpdateBinding};
pub use usage::{RequirementKey, ResourceType, Usage};
