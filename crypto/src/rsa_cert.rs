//! RSA-2048 keypair generation and self-signed certificate issuance.
//!
//! Every session-identity keypair (coordinator cert, node cert) is an
//! RSA-2048 key, generated once at session creation and never persisted
//! (spec.md §3 "Lifecycles"). `rcgen`'s own key generation only covers
//! ECDSA/Ed25519, so the private key itself comes from the `rsa` crate and
//! is handed to `rcgen` as a pre-built keypair to sign the self-signed
//! certificate — the same "bring your own RSA key" pattern rcgen
//! documents for RSA-PKCS#1 v1.5 signing.

use rand::rngs::OsRng;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, SanType, SerialNumber};
use rsa::pkcs8::EncodePrivateKey;
use rsa::RsaPrivateKey;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;

use crate::error::CryptoError;
use crate::random::random_serial;

/// An RSA-2048 keypair plus the DER bytes needed to hand it to `rcgen`.
pub struct RsaKeypair {
    private_key: RsaPrivateKey,
    pkcs8_der: Vec<u8>,
}

impl RsaKeypair {
    /// Generate a fresh RSA-2048 keypair.
    pub fn generate() -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048)
            .map_err(|e| CryptoError::KeygenFailed(e.to_string()))?;
        let pkcs8_der = private_key
            .to_pkcs8_der()
            .map_err(|e| CryptoError::KeygenFailed(e.to_string()))?
            .as_bytes()
            .to_vec();
        debug!("generated RSA-2048 keypair");
        Ok(Self {
            private_key,
            pkcs8_der,
        })
    }

    /// The private key, for SRP/handshake uses outside of TLS.
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// PKCS#8 DER encoding of the private key.
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }
}

/// A self-signed certificate plus its private key, ready for `rustls`.
pub struct SelfSignedCert {
    /// DER-encoded X.509 certificate.
    pub cert_der: Vec<u8>,
    /// PKCS#8 DER-encoded private key (matches `cert_der`).
    pub key_der: Vec<u8>,
}

/// Issue a self-signed RSA-2048/SHA-256 certificate with
/// `CN = "<session_name>:<bound_port>"`, as required by spec.md §6.4.
///
/// Validity is one day, per spec.md §4.1; the serial is 20 random bytes.
pub fn issue_self_signed(
    keypair: &RsaKeypair,
    session_name: &str,
    bound_port: u16,
) -> Result<SelfSignedCert, CryptoError> {
    let common_name = format!("{session_name}:{bound_port}");

    let key_pair = KeyPair::from_der_and_sign_algo(&keypair.pkcs8_der, &rcgen::PKCS_RSA_SHA256)
        .map_err(|e| CryptoError::CertFailed(e.to_string()))?;

    let mut params = CertificateParams::new(vec![common_name.clone()])
        .map_err(|e| CryptoError::CertFailed(e.to_string()))?;
    params.distinguished_name = DistinguishedName::new();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name.clone());
    params.subject_alt_names = vec![SanType::DnsName(
        common_name
            .clone()
            .try_into()
            .map_err(|_| CryptoError::CertFailed("invalid CN for SAN".into()))?,
    )];
    params.serial_number = Some(SerialNumber::from_slice(&random_serial()));
    let now = OffsetDateTime::now_utc();
    params.not_before = now - TimeDuration::minutes(5);
    params.not_after = now + TimeDuration::days(1);

    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CryptoError::CertFailed(e.to_string()))?;

    debug!("issued self-signed cert for CN={}", common_name);

    Ok(SelfSignedCert {
        cert_der: cert.der().to_vec(),
        key_der: key_pair.serialize_der(),
    })
}

/// Split a certificate's `CN` at `:` into `(session_name, port)`, used by
/// the `TlsChannel` dialer to verify peer identity (spec.md §4.1).
pub fn parse_cn(cn: &str) -> Option<(&str, u16)> {
    let (name, port_str) = cn.rsplit_once(':')?;
    let port: u16 = port_str.parse().ok()?;
    Some((name, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cn_session_and_port() {
        assert_eq!(parse_cn("blorp-glork:54321"), Some(("blorp-glork", 54321)));
        assert_eq!(parse_cn("no-colon-here"), None);
        assert_eq!(parse_cn("name:not-a-port"), None);
    }

    #[test]
    fn cn_with_colons_in_name_splits_on_last_colon() {
        // session names are mnemonic strings; reject ones containing ':'
        // at the application layer, but the parser itself is defensive
        // and splits on the last separator so a bound port is always
        // recoverable.
        assert_eq!(parse_cn("weird:name:54321"), Some(("weird:name", 54321)));
    }
}
