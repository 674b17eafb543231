//! Backend selection and bounded concurrent execution.
//!
//! - [`selector`] - Process-wide round-robin cursor ([`RoundRobin`]).
//! - [`executor`] - Global concurrency budget and per-request task batches
//!   ([`BoundedExecutor`], [`Batch`]).

pub mod executor;
pub mod selector;

pub use executor::{Batch, BoundedExecutor};
pub use selector::RoundRobin;
