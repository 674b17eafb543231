//! Backend collaborators of the fan-out engine.
//!
//! - [`client`] - The [`HashBackend`] capability and its gRPC implementation.
//! - [`registry`] - The fixed, ordered [`BackendRegistry`] built at startup.

pub mod client;
pub mod registry;

pub use client::{GrpcBackend, HashBackend};
pub use registry::{BackendHandle, BackendRegistry};
