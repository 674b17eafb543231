//! # Shared buffer and hash types
//!
//! Buffers and hashes are opaque byte strings on both sides of the fan-out.
//! They are carried as [`Bytes`] so that a buffer decoded from a front request
//! can be forwarded to a backend, and a backend hash moved into the front
//! response, without copying.

use bytes::Bytes;

/// A single opaque input buffer of a parallel hash request.
pub type Buffer = Bytes;

/// The hash a backend computed for one [`Buffer`].
pub type Hash = Bytes;

/// Label key attached to per-backend telemetry.
pub const BACKEND_LABEL: &str = "backend";

/// Namespace shared by every metric the service emits.
pub const METRICS_NAMESPACE: &str = "parhash";
