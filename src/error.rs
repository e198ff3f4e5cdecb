//! Error types for rmq-rpc.
//!
//! [`RpcError`] is the single local failure type of the crate. Protocol
//! errors and application exceptions travel in-band on the wire and are only
//! turned into an `RpcError` once they reach the caller.

use std::fmt;

use thiserror::Error;

use crate::exception::RemoteException;

/// Why a call timed out without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    /// No expiration was set: the request may still sit in the broker queue
    /// and be processed once a server comes online.
    InQueue,
    /// An expiration was set: the broker has dropped the request by now.
    Expired,
}

impl Unavailable {
    /// Whether repeating the call could plausibly double-process it.
    pub fn may_still_run(&self) -> bool {
        matches!(self, Unavailable::InQueue)
    }
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("The requested service is unavailable or unresponsive. ")?;
        match self {
            Unavailable::InQueue => f.write_str(
                "The request has not been expired and will be processed when the service comes online.",
            ),
            Unavailable::Expired => f.write_str("The request has been expired from the queue."),
        }
    }
}

/// Main error type for all rmq-rpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Broker unreachable, handshake failure, or a connection/channel that
    /// went away under us.
    #[error("Transport error: {0}")]
    Transport(String),

    /// JSON serialization/deserialization error on the local side.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol-level error reported by the server (bad request, unknown
    /// method, generic server error).
    #[error("Protocol error {code}: {reason}")]
    Protocol {
        /// Numeric error class, see [`crate::protocol::ErrorCode`].
        code: i32,
        /// Human readable reason.
        reason: String,
        /// Per-parameter messages, empty when the server sent none.
        messages: Vec<String>,
    },

    /// A declared application exception raised by the remote capability.
    #[error("Remote exception {}: {}", .0.exception_type(), .0.message())]
    Remote(RemoteException),

    /// No reply arrived within the client timeout.
    #[error("{0}")]
    ServiceUnavailable(Unavailable),

    /// The reply could not be understood locally.
    #[error("Client error: {0}")]
    Client(String),

    /// A contract declared the same capability name twice.
    #[error("Duplicate capability name: {0}")]
    DuplicateMethod(String),
}

impl RpcError {
    /// Build a transport error from anything displayable.
    pub fn transport(err: impl fmt::Display) -> Self {
        RpcError::Transport(err.to_string())
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_messages() {
        let in_queue = Unavailable::InQueue.to_string();
        assert!(in_queue.starts_with("The requested service is unavailable"));
        assert!(in_queue.contains("will be processed when the service comes online"));

        let expired = Unavailable::Expired.to_string();
        assert!(expired.ends_with("The request has been expired from the queue."));
    }

    #[test]
    fn test_may_still_run() {
        assert!(Unavailable::InQueue.may_still_run());
        assert!(!Unavailable::Expired.may_still_run());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = RpcError::Protocol {
            code: 404,
            reason: "No such method".into(),
            messages: vec![],
        };
        assert_eq!(err.to_string(), "Protocol error 404: No such method");
    }
}
