//! Gateway error types.
//!
//! This module provides the error taxonomy for the gateway core:
//! - Credential verification failures
//! - Snapshot provider failures
//! - Registry lookups on connections that have gone away
//! - Malformed inbound frames
//!
//! None of these are fatal to the process. Each one is resolved on the path of
//! the connection it belongs to.

use thiserror::Error;

use crate::connection::ConnectionId;

/// Credential verification failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The credential is malformed, forged or signed with the wrong key
    #[error("Invalid token: {0}")]
    Invalid(String),

    /// The credential has expired
    #[error("Token expired")]
    Expired,

    /// The credential verified but carries no usable subject
    #[error("Token carries no subject")]
    MissingSubject,

    /// No credential was supplied
    #[error("Missing authentication token")]
    MissingToken,

    /// The verifier did not answer in time
    #[error("Verification timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },
}

impl VerificationError {
    /// Returns the message sent to the client in an `auth_error` frame.
    ///
    /// Internal details such as signature errors are not exposed.
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        match self {
            Self::Invalid(_) | Self::MissingSubject => "Invalid authentication token",
            Self::Expired => "Authentication token expired",
            Self::MissingToken => "Missing authentication token",
            Self::Timeout { .. } => "Authentication service unavailable",
        }
    }
}

/// Snapshot provider failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// The provider could not produce a snapshot
    #[error("Snapshot unavailable: {0}")]
    Unavailable(String),

    /// The provider did not answer in time
    #[error("Snapshot timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured timeout in milliseconds
        timeout_ms: u64,
    },
}

/// Registry operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The connection is not (or no longer) registered
    #[error("Connection not found: {0}")]
    NotFound(ConnectionId),

    /// The connection's outbound queue refused an event; the connection was dropped
    #[error("Outbound queue rejected event for {0}")]
    QueueRejected(ConnectionId),
}

/// Top-level gateway error.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Inbound data could not be parsed into a tagged message
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Credential verification failed
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// The target connection no longer exists
    #[error("Connection gone: {0}")]
    ConnectionGone(ConnectionId),

    /// The snapshot provider failed
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the error code string.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) => "MALFORMED_FRAME",
            Self::Verification(VerificationError::Timeout { .. })
            | Self::Snapshot(SnapshotError::Timeout { .. }) => "COLLABORATOR_TIMEOUT",
            Self::Verification(_) => "VERIFICATION_FAILURE",
            Self::ConnectionGone(_) => "CONNECTION_GONE",
            Self::Snapshot(_) => "SNAPSHOT_UNAVAILABLE",
            Self::Config(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the error only means the connection closed underneath us.
    #[must_use]
    pub const fn is_connection_gone(&self) -> bool {
        matches!(self, Self::ConnectionGone(_))
    }
}

impl From<RegistryError> for GatewayError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) | RegistryError::QueueRejected(id) => {
                Self::ConnectionGone(id)
            }
        }
    }
}
