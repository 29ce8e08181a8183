//! `ClientNode` (spec.md §4.3): the mesh side run by each joining member —
//! starts with exactly one neighbor (the host), processes the roster
//! `hello`, and fans out to every other member.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshlink_crypto::SelfSignedCert;
use meshlink_wire::node::{AckHelloPayload, NodeMessageType};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::NodeError;
use crate::mesh::{MeshNode, NodeEvent};

/// Events a `ClientNode` emits: every [`NodeEvent`] plus `SessionStarted`.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Pass-through of the underlying mesh node's events.
    Node(NodeEvent),
    /// The dialer to the host's listener completed (spec.md §4.3 "On the
    /// first `tls-connected` to the host's listener it emits
    /// `session-started`").
    SessionStarted,
}

/// The mesh-formation side a joining member runs once the coordinator
/// handshake hands it the host's info and shared SRP key.
pub struct ClientNode {
    mesh: Arc<MeshNode>,
    host_username: String,
    session_started: AtomicBool,
    events: broadcast::Sender<ClientEvent>,
}

impl ClientNode {
    /// Construct a client node for `username`, with `host_username`'s
    /// `nodePort` at `host_addr` reachable using `host_session_key` as
    /// the (send = receive) key for that first neighbor (spec.md §4.3:
    /// "the only key the recipient knows at this moment").
    pub fn new(
        username: impl Into<String>,
        session_name: impl Into<String>,
        cert: SelfSignedCert,
        bind_addr: SocketAddr,
        host_username: impl Into<String>,
        host_addr: SocketAddr,
        host_session_key: Vec<u8>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        let mesh = MeshNode::new(username, session_name, cert, bind_addr);
        let host_username = host_username.into();
        mesh.add_neighbor(
            host_username.clone(),
            host_addr.ip(),
            host_addr.port(),
            host_session_key.clone(),
            host_session_key,
        );
        Arc::new(Self {
            mesh,
            host_username,
            session_started: AtomicBool::new(false),
            events,
        })
    }

    /// Subscribe to this client's event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// The mesh node's bound port.
    pub fn node_port(&self) -> u16 {
        self.mesh.node_port()
    }

    /// Send a unicast application message to `username`.
    pub async fn send_message(&self, username: &str, body: &str) -> Result<(), NodeError> {
        self.mesh.send_to(username, body, false).await
    }

    /// `broadcastMessage`: send to every neighbor.
    pub async fn broadcast_message(&self, body: &str) -> Result<(), NodeError> {
        self.mesh.broadcast(body).await
    }

    /// Bind the listener and start bridging mesh events, including
    /// `hello` processing.
    pub async fn start(self: &Arc<Self>) -> Result<(), NodeError> {
        self.mesh.start_listener().await?;
        self.spawn_event_bridge();
        Ok(())
    }

    fn spawn_event_bridge(self: &Arc<Self>) {
        let this = self.clone();
        let mut rx = self.mesh.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match &event {
                    NodeEvent::NeighborConnected { username } if *username == this.host_username => {
                        if !this.session_started.swap(true, Ordering::AcqRel) {
                            let _ = this.events.send(ClientEvent::SessionStarted);
                        }
                    }
                    NodeEvent::Hello { from, nodes } if *from == this.host_username => {
                        if let Err(e) = this.process_hello(nodes).await {
                            warn!(error = %e, "failed to process hello roster");
                        }
                    }
                    _ => {}
                }
                let _ = this.events.send(ClientEvent::Node(event));
            }
        });
    }

    /// spec.md §4.3 ClientNode `hello` handling, including the
    /// asymmetric key-assignment rule from §9: every new neighbor gets
    /// `sendKey` from *that neighbor's* roster row, but `receiveKey` from
    /// the row matching *self* — i.e. every peer the payload mentions
    /// shares one fixed receive key (this node's own), while each peer
    /// gets its own distinct send key. This must not be "corrected" to
    /// read `receiveKey` from the neighbor's own row; that breaks
    /// interop with the host's assignment.
    async fn process_hello(self: &Arc<Self>, nodes: &[meshlink_wire::node::RosterEntry]) -> Result<(), NodeError> {
        // Only act on the very first hello — spec.md §4.3 "only when it
        // currently has exactly one neighbor, the host".
        if self.mesh.neighbors().len() != 1 {
            return Ok(());
        }

        let self_row = nodes
            .iter()
            .find(|n| n.username == self.mesh.username)
            .ok_or_else(|| NodeError::Malformed("hello roster missing self".into()))?;
        let my_receive_key = hex::decode(&self_row.receive_key).map_err(|_| NodeError::Malformed("receiveKey".into()))?;

        for entry in nodes {
            if entry.username == self.mesh.username {
                continue;
            }
            let ip = entry.ip.parse().map_err(|_| NodeError::Malformed("ip".into()))?;
            let send_key = hex::decode(&entry.send_key).map_err(|_| NodeError::Malformed("sendKey".into()))?;
            self.mesh.add_neighbor(entry.username.clone(), ip, entry.port, send_key, my_receive_key.clone());
        }

        let ack = serde_json::to_vec(&AckHelloPayload::default()).expect("AckHelloPayload always serializes");
        self.mesh.send_envelope(&self.host_username, NodeMessageType::AckHello, &ack).await?;
        Ok(())
    }
}
