//! `CoordinatorClient`: dials a session host's `coordinatorPort`, runs the
//! two-round SRP handshake, and decrypts the host's node-endpoint info
//! (spec.md §4.2).

use std::net::SocketAddr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use meshlink_crypto::srp::ClientHandshake;
use meshlink_crypto::{aes, random_bytes};
use meshlink_tls::{ChannelEvent, TlsChannel};
use meshlink_wire::coordinator::{
    ClientMessage, CoordinatorInfo, HandshakeOneRequest, HandshakeOneResponse, HandshakeTwoRequest,
    HandshakeTwoResponse, ServerMessage, Status,
};
use tracing::debug;

use crate::error::CoordinatorError;

/// What a client learns once `connect` succeeds: the host's identity and
/// node endpoint, plus the SRP session key to use as its shared secret
/// with the host until mesh bootstrap assigns per-peer keys.
#[derive(Debug, Clone)]
pub struct CoordinatorAuth {
    pub host_info: CoordinatorInfo,
    pub session_key: Vec<u8>,
}

/// Runs the two-round handshake for one client identity against one
/// coordinator. Consumes its `TlsChannel`.
pub struct CoordinatorClient {
    channel: TlsChannel,
}

impl CoordinatorClient {
    /// Dial `addr`, pinning the session name, and construct a client
    /// ready to authenticate.
    pub async fn connect(addr: SocketAddr, session_name: &str) -> Result<Self, CoordinatorError> {
        let channel = TlsChannel::connect(addr, session_name, false).await?;
        Ok(Self { channel })
    }

    /// Wait for the channel to report it reached `tls-connected`.
    async fn await_connected(&mut self) -> Result<(), CoordinatorError> {
        loop {
            match self.channel.recv().await {
                Some(ChannelEvent::TlsConnected) => return Ok(()),
                Some(ChannelEvent::SocketError(e)) | Some(ChannelEvent::TlsError(e)) => {
                    return Err(CoordinatorError::Transport(e))
                }
                Some(ChannelEvent::SocketClosed) | Some(ChannelEvent::TlsClosed) | None => {
                    return Err(CoordinatorError::Transport("closed before handshake".into()))
                }
                _ => continue,
            }
        }
    }

    async fn recv_data(&mut self) -> Result<Vec<u8>, CoordinatorError> {
        loop {
            match self.channel.recv().await {
                Some(ChannelEvent::Data(bytes)) => return Ok(bytes),
                Some(ChannelEvent::SocketError(e)) | Some(ChannelEvent::TlsError(e)) => {
                    return Err(CoordinatorError::Transport(e))
                }
                Some(ChannelEvent::SocketClosed) | Some(ChannelEvent::TlsClosed) | None => {
                    return Err(CoordinatorError::Transport("closed mid-handshake".into()))
                }
                _ => continue,
            }
        }
    }

    /// Run both SRP rounds for `username`/`passcode`, announcing
    /// `node_port` as where this client's `MeshNode` listens.
    pub async fn authenticate(
        mut self,
        username: &str,
        passcode: &str,
        node_port: u16,
    ) -> Result<CoordinatorAuth, CoordinatorError> {
        self.await_connected().await?;

        let salt = random_bytes(16);
        let client = ClientHandshake::begin();
        let round1 = ClientMessage::HandshakeOne(HandshakeOneRequest {
            username: username.to_string(),
            salt: hex::encode(&salt),
            client_ephemeral_public: hex::encode(client.public_ephemeral()),
        });
        self.channel
            .send(serde_json::to_vec(&round1).map_err(|e| CoordinatorError::Malformed(e.to_string()))?)
            .await?;

        let reply_bytes = self.recv_data().await?;
        let reply: ServerMessage<HandshakeOneResponse> =
            serde_json::from_slice(&reply_bytes).map_err(|e| CoordinatorError::Malformed(e.to_string()))?;
        if reply.status != Status::Success {
            return Err(reply_to_error(reply.error));
        }
        let server_ephemeral_hex = reply
            .payload
            .and_then(|p| p.server_ephemeral_key)
            .ok_or_else(|| CoordinatorError::Malformed("missing serverEphermalKey".into()))?;
        let server_ephemeral =
            hex::decode(&server_ephemeral_hex).map_err(|_| CoordinatorError::Malformed("serverEphermalKey".into()))?;

        let client_proof = client
            .process_server_reply(username, passcode, &salt, &server_ephemeral)
            .map_err(|e| CoordinatorError::Malformed(e.to_string()))?;

        let round2 = ClientMessage::HandshakeTwo(HandshakeTwoRequest {
            session_proof: hex::encode(client_proof.proof()),
            username: username.to_string(),
            node_port,
        });
        self.channel
            .send(serde_json::to_vec(&round2).map_err(|e| CoordinatorError::Malformed(e.to_string()))?)
            .await?;

        let reply_bytes = self.recv_data().await?;
        let reply: ServerMessage<HandshakeTwoResponse> =
            serde_json::from_slice(&reply_bytes).map_err(|e| CoordinatorError::Malformed(e.to_string()))?;
        if reply.status != Status::Success {
            return Err(reply_to_error(reply.error));
        }
        let payload = reply
            .payload
            .ok_or_else(|| CoordinatorError::Malformed("missing round-2 payload".into()))?;

        let server_proof =
            hex::decode(payload.server_proof.ok_or_else(|| CoordinatorError::Malformed("serverProof".into()))?)
                .map_err(|_| CoordinatorError::Malformed("serverProof".into()))?;
        let session_key = client_proof
            .verify_server(&server_proof)
            .map_err(|_| CoordinatorError::VerificationFailed)?;

        let iv = BASE64
            .decode(payload.iv.ok_or_else(|| CoordinatorError::Malformed("iv".into()))?)
            .map_err(|_| CoordinatorError::Malformed("iv".into()))?;
        let ciphertext = BASE64
            .decode(payload.encrypted.ok_or_else(|| CoordinatorError::Malformed("encrypted".into()))?)
            .map_err(|_| CoordinatorError::Malformed("encrypted".into()))?;
        let mut iv_arr = [0u8; 16];
        if iv.len() != 16 {
            return Err(CoordinatorError::Malformed("iv must be 16 bytes".into()));
        }
        iv_arr.copy_from_slice(&iv);

        let plaintext = aes::decrypt(&session_key, &iv_arr, &ciphertext)
            .map_err(|e| CoordinatorError::Malformed(e.to_string()))?;
        let host_info: CoordinatorInfo =
            serde_json::from_slice(&plaintext).map_err(|e| CoordinatorError::Malformed(e.to_string()))?;

        debug!(host = %host_info.user_name, "coordinator handshake authenticated");
        Ok(CoordinatorAuth { host_info, session_key })
    }
}

fn reply_to_error(message: Option<String>) -> CoordinatorError {
    let message = message.unwrap_or_default();
    if message.contains("already registered") {
        CoordinatorError::UsernameCollision(message)
    } else if message.contains("does not match initial IP") {
        CoordinatorError::IpMismatch
    } else if message.contains("Too many failed") {
        CoordinatorError::RetryBudgetExceeded
    } else {
        CoordinatorError::VerificationFailed
    }
}
