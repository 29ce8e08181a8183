//! TLS channel error types.

use thiserror::Error;

/// Errors surfaced by [`crate::channel::TlsChannel`].
#[derive(Error, Debug)]
pub enum TlsChannelError {
    /// Underlying socket I/O failed.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// The rustls handshake or record layer rejected the connection.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// The peer's certificate CN did not match `<sessionName>:<port>`.
    #[error("bad_certificate: {0}")]
    BadCertificate(String),

    /// The TLS session was closed before the handshake completed.
    #[error("connection closed before handshake completed")]
    ClosedBeforeHandshake,

    /// A certificate or private key could not be built or parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// `send` was called after `destroy`.
    #[error("channel already destroyed")]
    Destroyed,
}
