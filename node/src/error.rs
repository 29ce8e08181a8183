//! Node error types (spec.md §7 "NodeEncryptError", "PortExhaustion").

use thiserror::Error;

/// Errors raised by mesh formation and per-peer messaging.
#[derive(Error, Debug)]
pub enum NodeError {
    /// AES encrypt/decrypt of a node envelope failed; the message is
    /// dropped and this error carries the metadata spec.md §7 calls for.
    #[error("encrypt/decrypt failed in {function} for peer {username} ({message_type}): {source}")]
    Encrypt {
        /// Which operation failed (`"hello"`, `"ack-hello"`, `"send"`, ...).
        function: &'static str,
        /// The peer this message concerned.
        username: String,
        /// The envelope's message type.
        message_type: &'static str,
        /// The underlying crypto error.
        source: meshlink_crypto::CryptoError,
    },

    /// `open_port` exhausted the 49152–65535 range in both directions.
    #[error("could not secure a port")]
    PortExhaustion,

    /// No neighbor is registered under this username.
    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    /// Transport-level failure underneath a node's `TlsChannel`.
    #[error("transport error: {0}")]
    Transport(String),

    /// A wire message could not be parsed or decoded.
    #[error("malformed message: {0}")]
    Malformed(String),
}

impl From<meshlink_tls::TlsChannelError> for NodeError {
    fn from(e: meshlink_tls::TlsChannelError) -> Self {
        NodeError::Transport(e.to_string())
    }
}
