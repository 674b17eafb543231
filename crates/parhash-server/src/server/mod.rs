//! Fan-out engine and gRPC service for parallel hashing.
//!
//! ## Structure
//!
//! - [`config`] - CLI/env configuration and validation.
//! - [`backend`] - Backend clients and the startup-time registry.
//! - [`pool`] - Round-robin selection and the bounded executor.
//! - [`service`] - Request dispatch, the gRPC handler, and shutdown.
//! - [`telemetry`] - Logging, OpenTelemetry export, and the recorder.

pub mod backend;
pub mod config;
pub mod pool;
pub mod service;
pub mod telemetry;
