//! `CoordinatorServer`: the passcode-authenticated SRP handshake service
//! a session host runs on `coordinatorPort` (spec.md §4.2).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use meshlink_crypto::srp::{derive_verifier, ServerHandshake};
use meshlink_crypto::{random_bytes, SelfSignedCert};
use meshlink_tls::{ChannelEvent, TlsListener};
use meshlink_wire::coordinator::{
    ClientMessage, CoordinatorInfo, HandshakeOneResponse, HandshakeTwoResponse, ServerMessage,
};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;

const MAX_RETRIES_PER_IP: u32 = 3;

/// Per-client state machine position (spec.md §4.2 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    New,
    AwaitProof,
    Done,
}

struct UserState {
    salt: Vec<u8>,
    ip: IpAddr,
    retry_count: u32,
    state: ClientState,
    client_ephemeral_public: Vec<u8>,
    handshake: Option<ServerHandshake>,
}

/// A member who has completed the handshake, ready for `export_users`.
#[derive(Debug, Clone)]
pub struct AuthenticatedMember {
    pub user_name: String,
    pub ip: IpAddr,
    pub node_port: u16,
    pub server_session_key: Vec<u8>,
}

/// Events the coordinator emits as clients progress through the handshake
/// (spec.md §4.2 "Emit ...").
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    /// A client began (or restarted) round 1.
    ConnectionAttempt { username: String },
    /// A client completed round 2 successfully.
    Connected { username: String },
    /// A client's round 1 or round 2 was rejected.
    ConnectionAttemptFail { username: String, error: String },
}

/// The SRP coordinator service. Shared across all accepted connections
/// via `Arc`; each connection runs its own message loop but mutates the
/// same user/client tables.
pub struct CoordinatorServer {
    session_name: String,
    host_ip: IpAddr,
    host_node_port: u16,
    passcode: String,
    users: DashMap<String, UserState>,
    authenticated: RwLock<Vec<AuthenticatedMember>>,
    events: broadcast::Sender<CoordinatorEvent>,
}

impl CoordinatorServer {
    /// Construct a coordinator for `session_name`, authenticating with
    /// `passcode` as the well-known SRP password. `host_ip`/`host_node_port`
    /// are what gets encrypted into each client's round-2 reply.
    pub fn new(session_name: impl Into<String>, passcode: impl Into<String>, host_ip: IpAddr, host_node_port: u16) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            session_name: session_name.into(),
            host_ip,
            host_node_port,
            passcode: passcode.into(),
            users: DashMap::new(),
            authenticated: RwLock::new(Vec::new()),
            events,
        })
    }

    /// Subscribe to coordinator lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    /// Bind `addr`, serve `cert`, and accept connections until the
    /// returned task is aborted. Each accepted socket runs its own
    /// handshake loop against this coordinator's shared tables.
    pub async fn listen(self: Arc<Self>, addr: SocketAddr, cert: &SelfSignedCert) -> Result<tokio::task::JoinHandle<()>, CoordinatorError> {
        let listener = TlsListener::bind(addr, cert, false).await?;
        info!(%addr, session = %self.session_name, "coordinator listening");
        let this = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((channel, peer)) => {
                        let this = this.clone();
                        tokio::spawn(async move {
                            if let Err(e) = this.serve_client(channel, peer.ip()).await {
                                warn!(error = %e, %peer, "coordinator connection ended with an error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "coordinator accept failed");
                        break;
                    }
                }
            }
        }))
    }

    async fn serve_client(&self, mut channel: meshlink_tls::TlsChannel, peer_ip: IpAddr) -> Result<(), CoordinatorError> {
        while let Some(event) = channel.recv().await {
            match event {
                ChannelEvent::Data(bytes) => {
                    let msg: ClientMessage = serde_json::from_slice(&bytes).map_err(|e| CoordinatorError::Malformed(e.to_string()))?;
                    let reply_bytes = match msg {
                        ClientMessage::HandshakeOne(req) => {
                            let reply = self.handle_round1(peer_ip, req.username, req.salt, req.client_ephemeral_public);
                            serde_json::to_vec(&reply).map_err(|e| CoordinatorError::Malformed(e.to_string()))?
                        }
                        ClientMessage::HandshakeTwo(req) => {
                            let reply = self.handle_round2(peer_ip, req.username, req.session_proof, req.node_port).await;
                            serde_json::to_vec(&reply).map_err(|e| CoordinatorError::Malformed(e.to_string()))?
                        }
                    };
                    channel.send(reply_bytes).await?;
                }
                ChannelEvent::SocketClosed | ChannelEvent::TlsClosed => break,
                ChannelEvent::SocketError(e) | ChannelEvent::TlsError(e) => {
                    return Err(CoordinatorError::Transport(e));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_round1(
        &self,
        peer_ip: IpAddr,
        username: String,
        salt_hex: String,
        client_ephemeral_hex: String,
    ) -> ServerMessage<HandshakeOneResponse> {
        if let Some(existing) = self.users.get(&username) {
            if existing.ip != peer_ip {
                let err = CoordinatorError::UsernameCollision(username.clone());
                self.emit_fail(&username, &err);
                return ServerMessage::error("srp-handshake_1", err.to_string());
            }
        }

        let salt = match hex::decode(&salt_hex) {
            Ok(s) => s,
            Err(_) => return ServerMessage::error("srp-handshake_1", CoordinatorError::Malformed("salt".into()).to_string()),
        };
        let client_ephemeral_public = match hex::decode(&client_ephemeral_hex) {
            Ok(s) => s,
            Err(_) => return ServerMessage::error("srp-handshake_1", CoordinatorError::Malformed("clientEphemeralPublic".into()).to_string()),
        };

        let is_retry = self.users.contains_key(&username);
        let retry_count = if is_retry {
            self.users.get(&username).map(|e| e.retry_count + 1).unwrap_or(0)
        } else {
            0
        };

        let verifier = derive_verifier(&salt, &username, &self.passcode);
        let handshake = ServerHandshake::begin(verifier);
        let server_ephemeral = hex::encode(handshake.public_ephemeral());

        self.users.insert(
            username.clone(),
            UserState {
                salt,
                ip: peer_ip,
                retry_count,
                state: ClientState::AwaitProof,
                client_ephemeral_public,
                handshake: Some(handshake),
            },
        );

        self.emit(CoordinatorEvent::ConnectionAttempt { username });
        ServerMessage::success(
            "srp-handshake_1",
            HandshakeOneResponse {
                server_ephemeral_key: Some(server_ephemeral),
            },
        )
    }

    async fn handle_round2(
        &self,
        peer_ip: IpAddr,
        username: String,
        session_proof_hex: String,
        node_port: u16,
    ) -> ServerMessage<HandshakeTwoResponse> {
        let mut entry = match self.users.get_mut(&username) {
            Some(e) => e,
            None => {
                let err = CoordinatorError::NoHandshakeInProgress;
                self.emit_fail(&username, &err);
                return ServerMessage::error("srp-handshake_2", err.to_string());
            }
        };

        if entry.ip != peer_ip {
            let err = CoordinatorError::IpMismatch;
            drop(entry);
            self.emit_fail(&username, &err);
            return ServerMessage::error("srp-handshake_2", err.to_string());
        }

        let total_retries_for_ip: u32 = self
            .users
            .iter()
            .filter(|e| e.ip == peer_ip)
            .map(|e| e.retry_count)
            .sum();
        if total_retries_for_ip >= MAX_RETRIES_PER_IP {
            let err = CoordinatorError::RetryBudgetExceeded;
            drop(entry);
            self.emit_fail(&username, &err);
            return ServerMessage::error("srp-handshake_2", err.to_string());
        }

        let client_ephemeral_public = entry.client_ephemeral_public.clone();

        let client_proof = match hex::decode(&session_proof_hex) {
            Ok(p) => p,
            Err(_) => {
                drop(entry);
                let err = CoordinatorError::VerificationFailed;
                self.emit_fail(&username, &err);
                return ServerMessage::error("srp-handshake_2", err.to_string());
            }
        };

        let handshake = match entry.handshake.take() {
            Some(h) => h,
            None => {
                let err = CoordinatorError::NoHandshakeInProgress;
                drop(entry);
                self.emit_fail(&username, &err);
                return ServerMessage::error("srp-handshake_2", err.to_string());
            }
        };

        match handshake.verify_client(&username, &client_ephemeral_public, &client_proof) {
            Ok((session_key, server_proof)) => {
                entry.state = ClientState::Done;
                drop(entry);

                let iv = random_bytes(16);
                let mut iv_arr = [0u8; 16];
                iv_arr.copy_from_slice(&iv);
                let info = CoordinatorInfo {
                    user_name: self.session_name.clone(),
                    ip: self.host_ip.to_string(),
                    port: self.host_node_port,
                };
                let plaintext = serde_json::to_vec(&info).expect("CoordinatorInfo always serializes");
                let encrypted = match meshlink_crypto::aes::encrypt(&session_key, &iv_arr, &plaintext) {
                    Ok(ct) => ct,
                    Err(e) => {
                        let err = CoordinatorError::VerificationFailed;
                        self.emit_fail(&username, &err);
                        warn!(error = %e, "failed to encrypt coordinator info");
                        return ServerMessage::error("srp-handshake_2", err.to_string());
                    }
                };

                self.authenticated.write().await.push(AuthenticatedMember {
                    user_name: username.clone(),
                    ip: peer_ip,
                    node_port,
                    server_session_key: session_key,
                });

                self.emit(CoordinatorEvent::Connected { username });
                ServerMessage::success(
                    "srp-handshake_2",
                    HandshakeTwoResponse {
                        iv: Some(BASE64.encode(iv)),
                        encrypted: Some(BASE64.encode(encrypted)),
                        server_proof: Some(hex::encode(server_proof)),
                    },
                )
            }
            Err(_) => {
                drop(entry);
                let err = CoordinatorError::VerificationFailed;
                self.emit_fail(&username, &err);
                ServerMessage::error("srp-handshake_2", err.to_string())
            }
        }
    }

    fn emit(&self, event: CoordinatorEvent) {
        let _ = self.events.send(event);
    }

    fn emit_fail(&self, username: &str, err: &CoordinatorError) {
        debug!(username, error = %err, "coordinator rejecting handshake message");
        let _ = self.events.send(CoordinatorEvent::ConnectionAttemptFail {
            username: username.to_string(),
            error: err.to_string(),
        });
    }

    /// Return every authenticated member, asserting username uniqueness
    /// (this implementation's resolution of the spec's Open Question:
    /// the NEW-state collision rule already forbids two live
    /// registrations of the same username, so a duplicate here is a
    /// program bug, not a runtime condition).
    pub async fn export_users(&self) -> Vec<AuthenticatedMember> {
        let members = self.authenticated.read().await;
        let mut seen = std::collections::HashSet::new();
        for member in members.iter() {
            assert!(
                seen.insert(member.user_name.clone()),
                "duplicate authenticated username '{}' in coordinator roster",
                member.user_name
            );
        }
        members.clone()
    }
}
