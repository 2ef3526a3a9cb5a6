//! Error types for the route guide service.
//!
//! This module defines the central `Error` enum, which captures every
//! recoverable and reportable failure on both sides of a call. It implements
//! `From<Error>` for `tonic::Status` so handler failures reach the client with
//! the right status code, and `From<tonic::Status>` so a client can raise a
//! terminal status as a typed fault.
//!
//! ## Error Cases
//! - `ChannelError`: A per-direction handoff queue was closed unexpectedly.
//! - `RequestCancelled`: The call was cancelled by the peer, the caller, or
//!   the server shutting down.
//! - `DeadlineExceeded`: The call outlived its deadline.
//! - `InvalidRequest`: The request was malformed.
//! - `Internal`: An unexpected handler fault.
//! - `ServiceShutdown`: A call arrived while the service was shutting down.
//! - `FeatureDatabase`: The feature database could not be loaded.
//! - `Transport`: The client could not reach the server.
//! - `Rpc`: A non-OK terminal status returned by the server.
//! - `OperationConsumed`: A deferred operation was executed twice.

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the route guide service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The call was cancelled before it completed.
    #[error("Request cancelled")]
    RequestCancelled,

    /// The call's deadline expired before it completed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A handler failed in a way the caller cannot fix.
    #[error("Internal error: {context}")]
    Internal { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The feature database is missing or malformed.
    #[error("Feature database {path}: {reason}")]
    FeatureDatabase { path: String, reason: String },

    /// The transport failed before any status was produced.
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// The server terminated the call with a non-OK status.
    #[error("RPC failed with {code:?}: {message}")]
    Rpc { code: Code, message: String },

    /// The deferred operation has already been executed.
    #[error("Operation was already executed")]
    OperationConsumed,
}

impl Error {
    /// The gRPC status code this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            Error::ChannelError { .. }
            | Error::Internal { .. }
            | Error::FeatureDatabase { .. } => Code::Internal,
            Error::RequestCancelled => Code::Cancelled,
            Error::DeadlineExceeded => Code::DeadlineExceeded,
            Error::InvalidRequest { .. } => Code::InvalidArgument,
            Error::ServiceShutdown | Error::Transport { .. } => Code::Unavailable,
            Error::Rpc { code, .. } => *code,
            Error::OperationConsumed => Code::FailedPrecondition,
        }
    }

    /// Whether this error ends a call as cancelled rather than failed.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::RequestCancelled | Error::DeadlineExceeded)
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::RequestCancelled => Status::cancelled("Request was cancelled"),
            Error::DeadlineExceeded => Status::deadline_exceeded("Deadline exceeded"),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::Internal { context } => Status::internal(context),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::FeatureDatabase { path, reason } => {
                Status::internal(format!("Feature database {path}: {reason}"))
            }
            Error::Transport { reason } => Status::unavailable(reason),
            Error::Rpc { code, message } => Status::new(code, message),
            Error::OperationConsumed => {
                Status::failed_precondition("Operation was already executed")
            }
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        match status.code() {
            Code::Cancelled => Error::RequestCancelled,
            Code::DeadlineExceeded => Error::DeadlineExceeded,
            code => Error::Rpc {
                code,
                message: status.message().to_string(),
            },
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(err: tonic::transport::Error) -> Self {
        Error::Transport {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_classification() {
        let cases = [
            (
                Error::ChannelError {
                    context: "closed".into(),
                },
                Code::Internal,
            ),
            (Error::RequestCancelled, Code::Cancelled),
            (Error::DeadlineExceeded, Code::DeadlineExceeded),
            (
                Error::InvalidRequest {
                    reason: "bad".into(),
                },
                Code::InvalidArgument,
            ),
            (
                Error::Internal {
                    context: "boom".into(),
                },
                Code::Internal,
            ),
            (Error::ServiceShutdown, Code::Unavailable),
            (
                Error::Transport {
                    reason: "refused".into(),
                },
                Code::Unavailable,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(err.code(), code, "{err}");
            assert_eq!(Status::from(err).code(), code);
        }
    }

    #[test]
    fn remote_status_keeps_code_and_message() {
        let err = Error::from(Status::not_found("no such route"));
        match &err {
            Error::Rpc { code, message } => {
                assert_eq!(*code, Code::NotFound);
                assert_eq!(message, "no such route");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let status = Status::from(err);
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such route");
    }

    #[test]
    fn cancellation_statuses_become_cancellation_errors() {
        assert!(matches!(
            Error::from(Status::cancelled("gone")),
            Error::RequestCancelled
        ));
        assert!(matches!(
            Error::from(Status::deadline_exceeded("late")),
            Error::DeadlineExceeded
        ));
        assert!(Error::DeadlineExceeded.is_cancellation());
        assert!(
            !Error::Internal {
                context: "x".into()
            }
            .is_cancellation()
        );
    }
}
