//! Coordinator error types (spec.md §7 "CoordinatorAuthError").

use thiserror::Error;

/// Errors raised during the coordinator's per-client SRP handshake
/// (spec.md §4.2). Each variant's `Display` is the exact human-readable
/// message sent back to the client on the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// A different IP already registered this username.
    #[error("Username '{0}' already registered with a different address")]
    UsernameCollision(String),

    /// Round 2 arrived from an IP other than the one pinned at round 1.
    #[error("Username does not match initial IP Address")]
    IpMismatch,

    /// This source IP has exhausted its round-2 retry budget.
    #[error("Too many failed authentication attempts. Please try again later.")]
    RetryBudgetExceeded,

    /// The SRP derivation or proof check itself failed.
    #[error("Unable to verify client. Please try joining again.")]
    VerificationFailed,

    /// A message arrived for a client that never completed round 1.
    #[error("No handshake in progress for this connection")]
    NoHandshakeInProgress,

    /// Transport-level failure underneath the coordinator's TLS channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// A wire message could not be parsed.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl From<meshlink_tls::TlsChannelError> for CoordinatorError {
    fn from(e: meshlink_tls::TlsChannelError) -> Self {
        CoordinatorError::Transport(e.to_string())
    }
}

impl From<meshlink_wire::WireError> for CoordinatorError {
    fn from(e: meshlink_wire::WireError) -> Self {
        CoordinatorError::Malformed(e.to_string())
    }
}
