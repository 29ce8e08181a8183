//! JSON wire message types for the meshlink coordinator and node
//! protocols (spec.md §6.2, §6.3).
//!
//! This crate carries no transport logic — framing, TLS, and base64
//! wrapping live in `meshlink-tls`. It only defines what a message
//! looks like once decoded to a UTF-8 string.

pub mod coordinator;
pub mod error;
pub mod node;

pub use error::WireError;
