//! Façade error type (spec.md §7 `DiscoveryError`, plus pass-through of
//! the lower layers' errors).

use thiserror::Error;

/// Errors a [`crate::session::Host`] or [`crate::session::Client`] can
/// surface. Lower-layer errors that already have a dedicated enum are
/// wrapped rather than re-described.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The discovery collaborator failed (spec.md §7 "prefixed `Discovery:
    /// `").
    #[error("Discovery: {0}")]
    Discovery(String),

    /// The coordinator handshake failed.
    #[error(transparent)]
    Coordinator(#[from] meshlink_coordinator::CoordinatorError),

    /// Mesh formation or per-peer messaging failed.
    #[error(transparent)]
    Node(#[from] meshlink_node::NodeError),

    /// A TLS channel failed outside the coordinator/node layers.
    #[error(transparent)]
    Tls(#[from] meshlink_tls::TlsChannelError),

    /// RSA keypair or certificate generation failed.
    #[error(transparent)]
    Crypto(#[from] meshlink_crypto::CryptoError),

    /// No advertised session matched the requested name within the
    /// discovery timeout.
    #[error("no session named '{0}' was found")]
    SessionNotFound(String),
}
