//! Foundation types for weft.
//!
//! Every other weft crate depends on `weft-types`. The types here identify
//! instances as they move between streams, drivers, and cancellation sets.
//!
//! # Key Types
//!
//! - [`OwnerKey`] — Host-assigned key of the record that owns an instance
//! - [`DriverContext`] — Small per-system byte identifying the driver an instance came from
//! - [`InstanceId`] — Owner key + origin context; the unit of cancellation and dedup
//! - [`Instance`] — A payload tagged with its [`InstanceId`]

pub mod error;
pub mod identity;
pub mod instance;

pub use error::TypeError;
pub use identity::{DriverContext, InstanceId, OwnerKey};
pub use instance::Instance;
