//! SRP-6a client and server state machines, used by the coordinator
//! handshake (spec.md §4.2) with the standard 2048-bit group.

use sha2::Sha256;
use srp::client::{SrpClient, SrpClientVerifier};
use srp::groups::G_2048;
use srp::server::{SrpServer, SrpServerVerifier};

use crate::error::CryptoError;
use crate::random::random_bytes;

/// Derive the SRP private key and verifier for a `(salt, username, password)`
/// triple — the registration step a coordinator runs the first time it
/// sees a username (spec.md §4.2, NEW state).
pub fn derive_verifier(salt: &[u8], username: &str, password: &str) -> Vec<u8> {
    let client = SrpClient::<Sha256>::new(&G_2048);
    client.compute_verifier(username.as_bytes(), password.as_bytes(), salt)
}

/// Server-side half of one SRP handshake.
pub struct ServerHandshake {
    b: Vec<u8>,
    verifier: Vec<u8>,
    b_pub: Vec<u8>,
}

impl ServerHandshake {
    /// Round 1: given the stored verifier, produce the server's public
    /// ephemeral (`serverEphermalKey` on the wire).
    pub fn begin(verifier: Vec<u8>) -> Self {
        let b = random_bytes(64);
        let server = SrpServer::<Sha256>::new(&G_2048);
        let b_pub = server.compute_public_ephemeral(&b, &verifier);
        Self { b, verifier, b_pub }
    }

    /// The server's public ephemeral, to send back as `serverEphermalKey`.
    pub fn public_ephemeral(&self) -> &[u8] {
        &self.b_pub
    }

    /// Round 2: verify the client's session proof against `a_pub`, derive
    /// the shared session key, and produce the server's proof.
    ///
    /// Returns `(session_key, server_proof)` on success. Any failure here
    /// corresponds to spec.md's `CoordinatorAuthError` "Unable to verify
    /// client" path.
    pub fn verify_client(
        self,
        username: &str,
        a_pub: &[u8],
        client_proof: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        let server = SrpServer::<Sha256>::new(&G_2048);
        let verifier: SrpServerVerifier<Sha256> = server
            .process_reply(&self.b, &self.verifier, a_pub)
            .map_err(|e| CryptoError::Srp(e.to_string()))?;

        verifier
            .verify_client(client_proof)
            .map_err(|e| CryptoError::Srp(e.to_string()))?;

        let _ = username; // username is bound into the verifier derivation, not this step
        Ok((verifier.key().to_vec(), verifier.proof().to_vec()))
    }
}

/// Client-side half of one SRP handshake.
pub struct ClientHandshake {
    a: Vec<u8>,
    a_pub: Vec<u8>,
}

impl ClientHandshake {
    /// Round 1: produce the client's public ephemeral
    /// (`clientEphemeralPublic` on the wire).
    pub fn begin() -> Self {
        let a = random_bytes(64);
        let client = SrpClient::<Sha256>::new(&G_2048);
        let a_pub = client.compute_public_ephemeral(&a);
        Self { a, a_pub }
    }

    /// The client's public ephemeral.
    pub fn public_ephemeral(&self) -> &[u8] {
        &self.a_pub
    }

    /// Round 2: given the salt, server's public ephemeral, username, and
    /// passcode, derive the session key and proof to send as
    /// `sessionProof`. Returns a verifier the caller keeps around to check
    /// the server's returning proof.
    pub fn process_server_reply(
        &self,
        username: &str,
        password: &str,
        salt: &[u8],
        b_pub: &[u8],
    ) -> Result<ClientProof, CryptoError> {
        let client = SrpClient::<Sha256>::new(&G_2048);
        let verifier: SrpClientVerifier<Sha256> = client
            .process_reply(&self.a, username.as_bytes(), password.as_bytes(), salt, b_pub)
            .map_err(|e| CryptoError::Srp(e.to_string()))?;

        Ok(ClientProof {
            proof: verifier.proof().to_vec(),
            key: verifier.key().to_vec(),
            verifier,
        })
    }
}

/// The client's computed proof plus enough state to validate the server's
/// return proof once it arrives.
pub struct ClientProof {
    proof: Vec<u8>,
    key: Vec<u8>,
    verifier: SrpClientVerifier<Sha256>,
}

impl ClientProof {
    /// The client's session proof, sent on the wire as `sessionProof`.
    pub fn proof(&self) -> &[u8] {
        &self.proof
    }

    /// The derived shared session key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Verify the server's returned proof; consumes self since a second
    /// attempt against the same ephemeral state is meaningless.
    pub fn verify_server(self, server_proof: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.verifier
            .verify_server(server_proof)
            .map_err(|e| CryptoError::Srp(e.to_string()))?;
        Ok(self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_handshake_derives_matching_keys() {
        let username = "frulf";
        let password = "123456";
        let salt = random_bytes(16);
        let verifier = derive_verifier(&salt, username, password);

        let server = ServerHandshake::begin(verifier);
        let client = ClientHandshake::begin();

        let client_proof = client
            .process_server_reply(username, password, &salt, server.public_ephemeral())
            .expect("client round 2");

        let (server_key, server_proof) = server
            .verify_client(username, client.public_ephemeral(), client_proof.proof())
            .expect("server round 2");

        let client_key = client_proof
            .verify_server(&server_proof)
            .expect("client verifies server proof");

        assert_eq!(server_key, client_key);
    }

    #[test]
    fn wrong_password_fails_handshake() {
        let username = "frulf";
        let salt = random_bytes(16);
        let verifier = derive_verifier(&salt, username, "123456");

        let server = ServerHandshake::begin(verifier);
        let client = ClientHandshake::begin();

        let client_proof = client
            .process_server_reply(username, "654321", &salt, server.public_ephemeral())
            .expect("client round 2 always succeeds locally");

        let result = server.verify_client(username, client.public_ephemeral(), client_proof.proof());
        assert!(result.is_err());
    }
}
