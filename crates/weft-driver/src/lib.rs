//! Task systems and drivers for weft.
//!
//! A [`TaskSystem`] is the root of a tree of [`TaskDriver`]s. Every node
//! owns its streams and ledgers; drivers also own a cancellation set whose
//! requests their [`CancellationPropagator`] fans out, once per pass, to the
//! system and to the driver's children. [`TaskSystem::run_pass`] schedules
//! one full pass: propagation, consolidation, ledger execution.
//!
//! # Key Types
//!
//! - [`TaskSystem`] — Root node; owns drivers, runs passes
//! - [`TaskDriver`] — Inner node with a weak back-reference to its system
//! - [`CancellationPropagator`] — Per-driver fan-out of cancellation requests
//! - [`ContextRegistry`] — Assigns driver contexts within one system

pub mod driver;
pub mod error;
pub mod propagator;
pub mod registry;
pub mod system;

pub use driver::TaskDriver;
pub use error::{DriverError, DriverResult};
pub use propagator::CancellationPropagator;
pub use registry::ContextRegistry;
pub use system::TaskSystem;
