//! Certificate-CN-pinning verifier for the dialer side of a [`crate::channel::TlsChannel`]
//! (spec.md §4.1). There is no CA: each endpoint trusts exactly one
//! depth-0 self-signed certificate, identified by splitting its `CN` at
//! the last `:` into a session name and a port.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Verifies that a peer's self-signed certificate carries
/// `CN = "<expected_session>:<expected_port>"`, per spec.md §4.1's dialer
/// verification rule. No chain validation is performed — the pinned CN
/// plus the socket's observed remote port *is* the trust anchor.
#[derive(Debug)]
pub struct CnPinnedVerifier {
    expected_session: String,
    expected_port: u16,
    supported: Arc<rustls::crypto::CryptoProvider>,
}

impl CnPinnedVerifier {
    /// Build a verifier pinned to `expected_session:expected_port`, using
    /// the process default crypto provider's signature algorithms.
    pub fn new(expected_session: impl Into<String>, expected_port: u16) -> Self {
        let supported = rustls::crypto::CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::ring::default_provider()));
        Self {
            expected_session: expected_session.into(),
            expected_port,
            supported,
        }
    }
}

impl ServerCertVerifier for CnPinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, RustlsError> {
        let (_, cert) = X509Certificate::from_der(end_entity.as_ref())
            .map_err(|e| bad_cert(format!("unparsable certificate: {e}")))?;

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|a| a.as_str().ok())
            .ok_or_else(|| bad_cert("certificate has no CN".to_string()))?;

        let (session, port) = meshlink_crypto::parse_cn(cn)
            .ok_or_else(|| bad_cert(format!("CN '{cn}' is not '<session>:<port>'")))?;

        if session != self.expected_session || port != self.expected_port {
            return Err(bad_cert(format!(
                "CN '{cn}' does not match expected '{}:{}'",
                self.expected_session, self.expected_port
            )));
        }

        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.supported.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, RustlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.supported.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported.signature_verification_algorithms.supported_schemes()
    }
}

fn bad_cert(msg: String) -> RustlsError {
    RustlsError::General(format!("bad_certificate: {msg}"))
}
