//! `HostNode` (spec.md §4.3): the mesh side run by the session host —
//! builds the roster `hello` payload from the coordinator's authenticated
//! members and counts `ack-hello` replies to `session-started`.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meshlink_crypto::SelfSignedCert;
use meshlink_wire::node::{HelloPayload, NodeMessageType, RosterEntry};
use tokio::sync::{broadcast, Mutex};
use tracing::info;

use crate::error::NodeError;
use crate::mesh::{MeshNode, NodeEvent};

/// What a `HostNode` needs about one authenticated member to add it as a
/// neighbor and include it in the `hello` roster (spec.md §3
/// "Authenticated member record"). Deliberately not
/// `meshlink_coordinator::AuthenticatedMember` itself, so `meshlink-node`
/// doesn't have to depend on the coordinator crate — the façade converts.
#[derive(Debug, Clone)]
pub struct RosterMember {
    pub user_name: String,
    pub ip: IpAddr,
    pub node_port: u16,
    pub session_key: Vec<u8>,
}

/// Events a `HostNode` emits: every [`NodeEvent`] plus `SessionStarted`.
#[derive(Debug, Clone)]
pub enum HostEvent {
    /// Pass-through of the underlying mesh node's events.
    Node(NodeEvent),
    /// Every member has acknowledged the roster `hello` (spec.md §4.3
    /// "emit `session-started` exactly once per mesh").
    SessionStarted,
}

/// The mesh-formation side a session host runs after the coordinator
/// phase closes.
pub struct HostNode {
    mesh: Arc<MeshNode>,
    acked: Mutex<HashSet<String>>,
    session_started: AtomicBool,
    events: broadcast::Sender<HostEvent>,
}

impl HostNode {
    /// Construct a host node identified by `username`, listening on
    /// `bind_addr` once [`HostNode::start`] runs.
    pub fn new(username: impl Into<String>, session_name: impl Into<String>, cert: SelfSignedCert, bind_addr: SocketAddr) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            mesh: MeshNode::new(username, session_name, cert, bind_addr),
            acked: Mutex::new(HashSet::new()),
            session_started: AtomicBool::new(false),
            events,
        })
    }

    /// Subscribe to this host's event bus.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
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

    /// Start the listener, add every authenticated member as a neighbor
    /// with `sendKey = receiveKey = serverSessionKey` (spec.md §4.3 step
    /// 2), and send each of them the roster `hello` (step 3).
    pub async fn start(self: &Arc<Self>, members: Vec<RosterMember>) -> Result<(), NodeError> {
        self.mesh.start_listener().await?;
        self.spawn_event_bridge();

        for member in &members {
            self.mesh.add_neighbor(
                member.user_name.clone(),
                member.ip,
                member.node_port,
                member.session_key.clone(),
                member.session_key.clone(),
            );
        }

        let nodes: Vec<RosterEntry> = members
            .iter()
            .map(|m| RosterEntry {
                username: m.user_name.clone(),
                ip: m.ip.to_string(),
                port: m.node_port,
                send_key: hex::encode(&m.session_key),
                receive_key: hex::encode(&m.session_key),
            })
            .collect();
        let payload = HelloPayload { nodes };
        let plaintext = serde_json::to_vec(&payload).expect("HelloPayload always serializes");

        for member in &members {
            self.mesh.send_envelope(&member.user_name, NodeMessageType::Hello, &plaintext).await?;
        }

        info!(members = members.len(), "host sent roster hello to all members");
        Ok(())
    }

    fn spawn_event_bridge(self: &Arc<Self>) {
        let this = self.clone();
        let mut rx = self.mesh.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let NodeEvent::AckHello { from } = &event {
                    this.record_ack(from).await;
                }
                let _ = this.events.send(HostEvent::Node(event));
            }
        });
    }

    async fn record_ack(&self, from: &str) {
        let mut acked = self.acked.lock().await;
        acked.insert(from.to_string());
        if acked.len() == self.mesh.neighbors().len() {
            acked.clear();
            if !self.session_started.swap(true, Ordering::AcqRel) {
                let _ = self.events.send(HostEvent::SessionStarted);
            }
        }
    }
}
