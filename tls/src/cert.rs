//! Turns a [`meshlink_crypto::SelfSignedCert`] into `rustls` server/client
//! configs (spec.md §4.1 "Certificate policy").

use std::sync::Arc;

use meshlink_crypto::SelfSignedCert;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, ServerConfig};

use crate::error::TlsChannelError;
use crate::verifier::CnPinnedVerifier;

fn cert_chain(cert: &SelfSignedCert) -> Vec<CertificateDer<'static>> {
    vec![CertificateDer::from(cert.cert_der.clone())]
}

fn private_key(cert: &SelfSignedCert) -> PrivateKeyDer<'static> {
    PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_der.clone()))
}

/// Build the listener-side config: serves `cert`, does not request or
/// verify a client certificate — clients are authenticated later by SRP
/// and IP pinning (spec.md §4.1 "Listeners do not verify...").
pub fn server_config(cert: &SelfSignedCert) -> Result<Arc<ServerConfig>, TlsChannelError> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain(cert), private_key(cert))
        .map_err(|e| TlsChannelError::Certificate(e.to_string()))?;
    Ok(Arc::new(config))
}

/// Build the dialer-side config: pins the peer's CN to
/// `expected_session:expected_port` via [`CnPinnedVerifier`]. Listeners
/// never request a client certificate (spec.md §4.1), so the dialer
/// presents none of its own.
pub fn client_config(
    expected_session: &str,
    expected_port: u16,
) -> Result<Arc<ClientConfig>, TlsChannelError> {
    let verifier = Arc::new(CnPinnedVerifier::new(expected_session, expected_port));
    let config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(Arc::new(config))
}
