//! Asynchronous access control for weft resources.
//!
//! Every resource the engine arbitrates (instance streams, cancellation
//! sets, plain values) carries an [`AccessController`]. Acquiring access
//! never blocks: the controller hands back an [`AccessGrant`] whose
//! dependency handle the caller's job must wait behind, and the caller
//! releases the grant with the handle of the job that used it.
//!
//! # Key Types
//!
//! - [`AccessType`] — SharedRead, SharedWrite, ExclusiveWrite, Disposal
//! - [`AccessController`] — Per-resource ordering of grants
//! - [`AccessGrant`] — One outstanding acquisition
//! - [`AccessControlledValue`] — A plain value arbitrated by the same protocol

pub mod access;
pub mod controller;
pub mod error;
pub mod value;

pub use access::AccessType;
pub use controller::{AccessController, AccessGrant};
pub use error::{AccessError, AccessResult};
pub use value::{AccessControlledValue, ValueAccess};
