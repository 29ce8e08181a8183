//! Crypto error types.

use thiserror::Error;

/// Errors surfaced by crypto primitives.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// AES-CBC encryption failed (should not happen for well-formed input).
    #[error("AES encrypt failed: {0}")]
    EncryptFailed(String),

    /// AES-CBC decryption failed: bad padding, wrong key, or truncated ciphertext.
    #[error("AES decrypt failed: {0}")]
    DecryptFailed(String),

    /// RSA keypair generation failed.
    #[error("RSA keygen failed: {0}")]
    KeygenFailed(String),

    /// Self-signed certificate generation failed.
    #[error("certificate generation failed: {0}")]
    CertFailed(String),

    /// SRP derivation or verification failed.
    #[error("SRP error: {0}")]
    Srp(String),

    /// Hex or base64 decoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}
