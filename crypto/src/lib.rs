//! AES-CBC, RSA-2048 keypair/certificate generation, SRP-6a, and CSPRNG
//! helpers for meshlink.
//!
//! This crate is the leaf of the dependency graph (spec.md §2): it knows
//! nothing about TLS channels, the coordinator protocol, or the mesh —
//! only the primitives those layers are built from.

#![warn(missing_docs)]

pub mod aes;
pub mod error;
pub mod random;
pub mod rsa_cert;
pub mod srp;

pub use crate::error::CryptoError;
pub use crate::random::{random_bytes, random_challenge, random_iv, random_passcode, random_serial};
pub use crate::rsa_cert::{issue_self_signed, parse_cn, RsaKeypair, SelfSignedCert};
