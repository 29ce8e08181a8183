//! `MeshNode`: the shared base for [`crate::host::HostNode`] and
//! [`crate::client::ClientNode`] (spec.md §4.3) — one TLS listener on
//! `nodePort`, a map of [`Neighbor`] by username, and the reconnection
//! controller (spec.md §4.4).

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dashmap::DashMap;
use meshlink_crypto::{aes, random_iv, SelfSignedCert};
use meshlink_tls::{ChannelEvent, TlsChannel, TlsListener};
use meshlink_wire::node::{ApplicationPayload, NodeEnvelope, NodeMessageType};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::neighbor::Neighbor;

/// Events a [`MeshNode`] emits as neighbors connect, peers send envelopes,
/// and liveness changes (spec.md §4.1, §4.3, §4.4).
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// A neighbor's dialer reached `tls-connected` for the first time (or
    /// again after a full reconnect).
    NeighborConnected { username: String },
    /// A neighbor's dialer or listener-side channel reported a liveness
    /// failure (spec.md §4.4 "emit `disconnected` unless already down").
    NeighborDisconnected { username: String },
    /// A neighbor's heartbeat matched again after `NeighborDisconnected`.
    NeighborReconnected { username: String },
    /// A decrypted `hello` arrived from `from`, carrying the roster.
    Hello {
        from: String,
        nodes: Vec<meshlink_wire::node::RosterEntry>,
    },
    /// A decrypted `ack-hello` arrived from `from`.
    AckHello { from: String },
    /// A decrypted application `message`/`broadcast` arrived.
    Message { from: String, body: String, broadcast: bool },
}

/// Shared mesh-node plumbing: listener, neighbor table, event bus, and
/// the reconnection controller's `reconnecting` guard.
pub struct MeshNode {
    pub(crate) username: String,
    pub(crate) session_name: String,
    cert: SelfSignedCert,
    bind_addr: SocketAddr,
    neighbors: DashMap<String, Arc<Neighbor>>,
    events: broadcast::Sender<NodeEvent>,
    reconnecting: AtomicBool,
    listener: Mutex<Option<Arc<TlsListener>>>,
}

impl MeshNode {
    /// Construct a node identified by `username`, pinned to `session_name`
    /// for every pairwise TLS handshake, bound to `bind_addr` once
    /// [`MeshNode::start_listener`] runs.
    pub fn new(username: impl Into<String>, session_name: impl Into<String>, cert: SelfSignedCert, bind_addr: SocketAddr) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            username: username.into(),
            session_name: session_name.into(),
            cert,
            bind_addr,
            neighbors: DashMap::new(),
            events,
            reconnecting: AtomicBool::new(false),
            listener: Mutex::new(None),
        })
    }

    /// Subscribe to this node's event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    /// The port this node's listener is bound to.
    pub fn node_port(&self) -> u16 {
        self.bind_addr.port()
    }

    /// Look up a neighbor by username.
    pub fn neighbor(&self, username: &str) -> Option<Arc<Neighbor>> {
        self.neighbors.get(username).map(|e| e.value().clone())
    }

    /// Every currently-known neighbor.
    pub fn neighbors(&self) -> Vec<Arc<Neighbor>> {
        self.neighbors.iter().map(|e| e.value().clone()).collect()
    }

    /// Bind the listener and start accepting inbound neighbor dials.
    pub async fn start_listener(self: &Arc<Self>) -> Result<(), NodeError> {
        let listener = TlsListener::bind(self.bind_addr, &self.cert, true).await?;
        info!(addr = %self.bind_addr, "mesh node listening");
        *self.listener.lock().await = Some(Arc::new(listener));
        self.spawn_accept_loop();
        Ok(())
    }

    fn spawn_accept_loop(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let listener = this.listener.lock().await.clone();
                let Some(listener) = listener else { break };
                match listener.accept().await {
                    Ok((channel, peer)) => {
                        let this = this.clone();
                        tokio::spawn(async move {
                            this.run_inbound_channel(channel, peer).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "mesh node accept loop ending");
                        break;
                    }
                }
            }
        });
    }

    async fn run_inbound_channel(self: Arc<Self>, mut channel: TlsChannel, peer: SocketAddr) {
        // spec.md §4.4: a new connection from a known peer IP on a
        // different remote port than last recorded means the peer
        // rebuilt its dialer; record the new port and kick a per-peer
        // reconnect so our own dialer doesn't keep talking to a stale
        // socket.
        if let Some(neighbor) = self.neighbor_by_ip(peer.ip()) {
            if let Some(previous) = neighbor.note_inbound_port(peer.port()) {
                if previous != peer.port() {
                    debug!(username = %neighbor.username, previous, new = peer.port(), "peer redialed from a new port");
                    neighbor.disconnected.store(true, Ordering::Release);
                    self.per_peer_reconnect(&neighbor).await;
                }
            }
        }

        while let Some(event) = channel.recv().await {
            match event {
                ChannelEvent::Data(bytes) => {
                    if let Err(e) = self.handle_inbound(&bytes, peer.ip()).await {
                        warn!(error = %e, %peer, "dropped inbound node envelope");
                    }
                }
                ChannelEvent::Disconnected => {
                    if let Some(neighbor) = self.neighbor_by_ip(peer.ip()) {
                        neighbor.server_soft_disconnected.store(true, Ordering::Release);
                        if self.all_server_soft_disconnected() {
                            self.trigger_full_reconnect().await;
                        }
                    }
                }
                ChannelEvent::SocketClosed | ChannelEvent::TlsClosed => break,
                _ => {}
            }
        }
    }

    fn neighbor_by_ip(&self, ip: IpAddr) -> Option<Arc<Neighbor>> {
        self.neighbors.iter().find(|e| e.value().ip == ip).map(|e| e.value().clone())
    }

    async fn handle_inbound(&self, bytes: &[u8], peer_ip: IpAddr) -> Result<(), NodeError> {
        let env: NodeEnvelope = serde_json::from_slice(bytes).map_err(|e| NodeError::Malformed(e.to_string()))?;
        let neighbor = match self.neighbor(&env.from) {
            Some(n) => n,
            None => {
                warn!(from = %env.from, "envelope from unknown user, dropping");
                return Ok(());
            }
        };
        // spec.md §3: a received hello/ack-hello/message from a known
        // user must arrive from that user's pinned IP, else silently
        // dropped.
        if neighbor.ip != peer_ip {
            warn!(from = %env.from, expected = %neighbor.ip, actual = %peer_ip, "ip mismatch on inbound envelope, dropping");
            return Ok(());
        }

        let iv = BASE64.decode(&env.iv).map_err(|_| NodeError::Malformed("iv".into()))?;
        if iv.len() != 16 {
            return Err(NodeError::Malformed("iv must be 16 bytes".into()));
        }
        let mut iv_arr = [0u8; 16];
        iv_arr.copy_from_slice(&iv);
        let ciphertext = BASE64
            .decode(&env.encrypted_message)
            .map_err(|_| NodeError::Malformed("encryptedMessage".into()))?;

        let message_type = message_type_name(env.typ);
        let plaintext = aes::decrypt(&neighbor.receive_key, &iv_arr, &ciphertext).map_err(|source| NodeError::Encrypt {
            function: "handle_inbound",
            username: env.from.clone(),
            message_type,
            source,
        })?;

        match env.typ {
            NodeMessageType::Hello => {
                let payload: meshlink_wire::node::HelloPayload =
                    serde_json::from_slice(&plaintext).map_err(|e| NodeError::Malformed(e.to_string()))?;
                let _ = self.events.send(NodeEvent::Hello {
                    from: env.from,
                    nodes: payload.nodes,
                });
            }
            NodeMessageType::AckHello => {
                let _ = self.events.send(NodeEvent::AckHello { from: env.from });
            }
            NodeMessageType::Message | NodeMessageType::Broadcast => {
                let payload: ApplicationPayload =
                    serde_json::from_slice(&plaintext).map_err(|e| NodeError::Malformed(e.to_string()))?;
                let _ = self.events.send(NodeEvent::Message {
                    from: env.from,
                    body: payload.body,
                    broadcast: matches!(env.typ, NodeMessageType::Broadcast),
                });
            }
        }
        Ok(())
    }

    /// Register a neighbor and start an eager dialer toward it (spec.md
    /// §4.3 `addNeighbor`). Does not await the dial — failures go through
    /// the reconnect path.
    pub fn add_neighbor(
        self: &Arc<Self>,
        username: impl Into<String>,
        ip: IpAddr,
        server_port: u16,
        send_key: Vec<u8>,
        receive_key: Vec<u8>,
    ) -> Arc<Neighbor> {
        let username = username.into();
        let neighbor = Neighbor::new(username.clone(), ip, server_port, send_key, receive_key);
        self.neighbors.insert(username, neighbor.clone());
        self.spawn_dial(neighbor.clone());
        neighbor
    }

    fn spawn_dial(self: &Arc<Self>, neighbor: Arc<Neighbor>) {
        let this = self.clone();
        tokio::spawn(async move {
            this.dial_once(&neighbor).await;
        });
    }

    async fn dial_once(self: &Arc<Self>, neighbor: &Arc<Neighbor>) {
        let addr = SocketAddr::new(neighbor.ip, neighbor.server_port);
        match TlsChannel::connect(addr, &self.session_name, true).await {
            Ok(channel) => {
                neighbor.mark_connected(channel.sender());
                let _ = self.events.send(NodeEvent::NeighborConnected {
                    username: neighbor.username.clone(),
                });
                self.run_dialer_channel(neighbor.clone(), channel).await;
            }
            Err(e) => {
                debug!(username = %neighbor.username, error = %e, "initial dial failed, leaving to reconnect path");
                neighbor.disconnected.store(true, Ordering::Release);
            }
        }
    }

    async fn run_dialer_channel(self: Arc<Self>, neighbor: Arc<Neighbor>, mut channel: TlsChannel) {
        while let Some(event) = channel.recv().await {
            match event {
                ChannelEvent::SocketClosed | ChannelEvent::TlsClosed => {
                    let was_down = neighbor.disconnected.swap(true, Ordering::AcqRel);
                    if !was_down {
                        let _ = self.events.send(NodeEvent::NeighborDisconnected {
                            username: neighbor.username.clone(),
                        });
                    }
                    if self.all_disconnected() {
                        self.trigger_full_reconnect().await;
                    }
                    break;
                }
                ChannelEvent::Disconnected => {
                    let was_down = neighbor.soft_disconnected.swap(true, Ordering::AcqRel);
                    if !was_down && !neighbor.disconnected.load(Ordering::Acquire) {
                        let _ = self.events.send(NodeEvent::NeighborDisconnected {
                            username: neighbor.username.clone(),
                        });
                    }
                    if self.all_soft_disconnected_none_hard() {
                        self.trigger_full_reconnect().await;
                    }
                }
                ChannelEvent::Reconnected => {
                    neighbor.soft_disconnected.store(false, Ordering::Release);
                    let _ = self.events.send(NodeEvent::NeighborReconnected {
                        username: neighbor.username.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    fn all_disconnected(&self) -> bool {
        !self.neighbors.is_empty() && self.neighbors.iter().all(|e| e.value().disconnected.load(Ordering::Acquire))
    }

    fn all_soft_disconnected_none_hard(&self) -> bool {
        if self.neighbors.is_empty() {
            return false;
        }
        let mut any_hard = false;
        let all_soft = self.neighbors.iter().all(|e| {
            let n = e.value();
            if n.disconnected.load(Ordering::Acquire) {
                any_hard = true;
            }
            n.soft_disconnected.load(Ordering::Acquire)
        });
        all_soft && !any_hard
    }

    fn all_server_soft_disconnected(&self) -> bool {
        !self.neighbors.is_empty()
            && self
                .neighbors
                .iter()
                .all(|e| e.value().server_soft_disconnected.load(Ordering::Acquire))
    }

    /// Full reconnect (spec.md §4.4): guarded by `reconnecting` so
    /// concurrent triggers collapse into one rebuild. Rebuilds the
    /// listener if any neighbor is unhealthy, then re-dials every
    /// neighbor that is hard-disconnected and not already rebuilding.
    async fn trigger_full_reconnect(self: &Arc<Self>) {
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!("triggering full mesh reconnect");

        if self.neighbors.iter().any(|e| e.value().is_unhealthy()) {
            self.rebuild_listener().await;
        }

        for entry in self.neighbors.iter() {
            let neighbor = entry.value().clone();
            self.per_peer_reconnect(&neighbor).await;
        }

        self.reconnecting.store(false, Ordering::Release);
    }

    /// Per-peer reconnect path (spec.md §4.4): only one concurrent
    /// re-handshake per neighbor.
    async fn per_peer_reconnect(self: &Arc<Self>, neighbor: &Arc<Neighbor>) {
        if !neighbor.disconnected.load(Ordering::Acquire) {
            return;
        }
        if neighbor.rebuilding_socket.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        let neighbor = neighbor.clone();
        tokio::spawn(async move {
            this.dial_once(&neighbor).await;
        });
    }

    async fn rebuild_listener(self: &Arc<Self>) {
        {
            let mut guard = self.listener.lock().await;
            *guard = None;
        }
        match TlsListener::bind(self.bind_addr, &self.cert, true).await {
            Ok(listener) => {
                *self.listener.lock().await = Some(Arc::new(listener));
                self.spawn_accept_loop();
                info!(addr = %self.bind_addr, "mesh node listener rebuilt");
            }
            Err(e) => {
                warn!(error = %e, "failed to rebuild mesh node listener");
            }
        }
    }

    /// Await a neighbor's dialer, encrypt `body` under its send key, and
    /// send as a `message` or `broadcast` envelope (spec.md §4.3
    /// `sendMessage`).
    pub async fn send_to(&self, username: &str, body: &str, broadcast: bool) -> Result<(), NodeError> {
        let neighbor = self.neighbor(username).ok_or_else(|| NodeError::UnknownPeer(username.to_string()))?;
        neighbor.connection_ready().await;

        let typ = if broadcast { NodeMessageType::Broadcast } else { NodeMessageType::Message };
        let message_type = message_type_name(typ);
        let payload = ApplicationPayload { body: body.to_string() };
        let plaintext = serde_json::to_vec(&payload).expect("ApplicationPayload always serializes");

        let iv = random_iv();
        let ciphertext = aes::encrypt(&neighbor.send_key, &iv, &plaintext).map_err(|source| NodeError::Encrypt {
            function: "send_to",
            username: username.to_string(),
            message_type,
            source,
        })?;

        let env = NodeEnvelope::new(typ, self.username.clone(), BASE64.encode(iv), BASE64.encode(ciphertext));
        let bytes = serde_json::to_vec(&env).map_err(|e| NodeError::Malformed(e.to_string()))?;
        neighbor.send(bytes).await?;
        Ok(())
    }

    /// `broadcastMessage`: send to every neighbor (spec.md §4.3).
    pub async fn broadcast(&self, body: &str) -> Result<(), NodeError> {
        for neighbor in self.neighbors() {
            self.send_to(&neighbor.username, body, true).await?;
        }
        Ok(())
    }

    /// Encrypt and send a `hello` or `ack-hello` envelope to `username`,
    /// keyed under that neighbor's current `send_key` (spec.md §4.3).
    pub(crate) async fn send_envelope(&self, username: &str, typ: NodeMessageType, plaintext: &[u8]) -> Result<(), NodeError> {
        let neighbor = self.neighbor(username).ok_or_else(|| NodeError::UnknownPeer(username.to_string()))?;
        neighbor.connection_ready().await;
        let message_type = message_type_name(typ);
        let iv = random_iv();
        let ciphertext = aes::encrypt(&neighbor.send_key, &iv, plaintext).map_err(|source| NodeError::Encrypt {
            function: "send_envelope",
            username: username.to_string(),
            message_type,
            source,
        })?;
        let env = NodeEnvelope::new(typ, self.username.clone(), BASE64.encode(iv), BASE64.encode(ciphertext));
        let bytes = serde_json::to_vec(&env).map_err(|e| NodeError::Malformed(e.to_string()))?;
        neighbor.send(bytes).await?;
        Ok(())
    }
}

fn message_type_name(typ: NodeMessageType) -> &'static str {
    match typ {
        NodeMessageType::Hello => "hello",
        NodeMessageType::AckHello => "ack-hello",
        NodeMessageType::Message => "message",
        NodeMessageType::Broadcast => "broadcast",
    }
}
