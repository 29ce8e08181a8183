//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors.
#[derive(Error, Debug)]
pub enum WireError {
    /// A message arrived that is not valid JSON.
    #[error("malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A message's `type` field did not match any known variant.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// A field that should have been base64 was not.
    #[error("invalid base64 in field {0}")]
    Base64(&'static str),
}
