//! gRPC service implementation and request dispatch.
//!
//! This module contains the client-facing `ParallelHash` handler and the
//! fan-out engine it delegates to, along with the shutdown coordination that
//! decides what happens to in-flight requests when the server stops.
//!
//! ## Structure
//!
//! - [`dispatcher`] - Fan-out of one request over the backend fleet.
//! - [`handler`] - gRPC service entry point (`ParHashService`).
//! - [`lifecycle`] - Admission control and graceful/hard shutdown.

pub mod dispatcher;
pub mod handler;
pub mod lifecycle;

pub use dispatcher::Dispatcher;
pub use handler::ParHashService;
pub use lifecycle::Lifecycle;
