//! Error types for the parallel hash service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! the fan-out engine can report, from startup configuration problems to
//! individual backend sub-call failures. It implements `From<Error>` for
//! `tonic::Status` so that a failed request surfaces to the client as a single
//! gRPC status with no partial data.
//!
//! ## Error Cases
//! - `InvalidConfig`: The server configuration is unusable (fatal at startup).
//! - `Connect`: A backend could not be reached at startup.
//! - `Backend`: A backend rejected or failed a hash sub-call.
//! - `InvalidRequest`: The client request exceeded server limits.
//! - `RequestCancelled`: The request was cancelled, either by the caller or
//!   because a sibling sub-call already failed.
//! - `ServiceShutdown`: The request arrived or was running while the service
//!   was shutting down.
//! - `TaskFailed`: A sub-call task ended abnormally (panic or abort).

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the parallel hash service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The server configuration is invalid.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// A backend channel could not be established.
    #[error("Failed to connect to backend {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// A backend returned an error for a hash sub-call.
    #[error("Backend {addr} failed ({code:?}): {message}")]
    Backend {
        addr: String,
        code: Code,
        message: String,
    },

    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The request was cancelled before all sub-calls completed.
    #[error("Request cancelled")]
    RequestCancelled,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// A sub-call task panicked or was aborted.
    #[error("Task failed: {context}")]
    TaskFailed { context: String },
}

impl Error {
    /// Wraps a backend `Status` together with the address of the backend that
    /// produced it.
    pub fn backend(addr: impl Into<String>, status: &Status) -> Self {
        Self::Backend {
            addr: addr.into(),
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidConfig { reason } => {
                Status::internal(format!("Invalid configuration: {}", reason))
            }
            Error::Connect { addr, reason } => {
                Status::unavailable(format!("Backend {} unreachable: {}", addr, reason))
            }
            // Keep the backend's own code so that clients can tell an
            // overloaded backend from a rejected buffer.
            Error::Backend {
                addr,
                code,
                message,
            } => Status::new(code, format!("Backend {}: {}", addr, message)),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::TaskFailed { context } => {
                Status::internal(format!("Sub-call task failed: {}", context))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_keeps_backend_status_code() {
        let err = Error::backend(
            "10.0.0.1:7000",
            &Status::resource_exhausted("queue full"),
        );
        let status = Status::from(err);

        assert_eq!(status.code(), Code::ResourceExhausted);
        assert!(status.message().contains("10.0.0.1:7000"));
        assert!(status.message().contains("queue full"));
    }

    #[test]
    fn lifecycle_errors_map_to_retryable_codes() {
        assert_eq!(Status::from(Error::ServiceShutdown).code(), Code::Unavailable);
        assert_eq!(Status::from(Error::RequestCancelled).code(), Code::Cancelled);
        assert_eq!(
            Status::from(Error::InvalidRequest {
                reason: "too many buffers".to_string()
            })
            .code(),
            Code::InvalidArgument
        );
    }
}
