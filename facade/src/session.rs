//! `P2PSession` façade (spec.md §2 "Session façade", §5.5): `Host` and
//! `Client` compose discovery, the coordinator, and the mesh node, and
//! translate their separate event buses into one [`SessionEvent`] stream.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use meshlink_coordinator::{CoordinatorClient, CoordinatorEvent, CoordinatorServer};
use meshlink_crypto::{issue_self_signed, random_passcode, RsaKeypair};
use meshlink_node::{open_port, ClientEvent, ClientNode, HostEvent, HostNode, NodeEvent, RosterMember};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::discovery::{Discovery, DiscoveryEvent, SERVICE_TYPE};
use crate::error::SessionError;
use crate::identity::random_identifier;

const DEFAULT_DISCOVERY_PORT: u16 = 5330;
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle events a [`Host`] or [`Client`] emits (spec.md §5.5).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A member completed the coordinator handshake.
    MemberJoined { user_name: String, ip: IpAddr, port: u16 },
    /// The coordinator rejected a handshake attempt.
    CoordinatorError(String),
    /// This node's mesh is fully formed (every neighbor acknowledged).
    SessionStarted,
    /// An application message arrived from a neighbor.
    Message { from: String, body: String, broadcast: bool },
    /// A neighbor's channel went down.
    Disconnected { user_name: String },
    /// A previously-disconnected neighbor is reachable again.
    Reconnected { user_name: String },
}

/// The session host: runs the coordinator until mesh start, then the
/// `HostNode`, and advertises itself via [`Discovery`] in between.
pub struct Host {
    /// The session name, also this host's own mesh username.
    pub identifier: String,
    /// The SRP passcode members must supply to join.
    pub passcode: String,
    discovery_port: u16,
    coordinator_port: u16,
    node_port: u16,
    coordinator: Arc<CoordinatorServer>,
    node: Arc<HostNode>,
    discovery: Arc<dyn Discovery>,
    coordinator_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Host {
    /// Generate session identity and keypairs, probe the three ports,
    /// start the coordinator, and publish the session via `discovery`.
    pub async fn create(bind_ip: IpAddr, identifier: Option<String>, discovery: Arc<dyn Discovery>) -> Result<Arc<Self>, SessionError> {
        let identifier = identifier.unwrap_or_else(random_identifier);
        let passcode = random_passcode();

        let discovery_port = open_port(Some(DEFAULT_DISCOVERY_PORT)).await?;
        let coordinator_port = open_port(None).await?;
        let node_port = open_port(None).await?;

        let coordinator_keypair = RsaKeypair::generate()?;
        let node_keypair = RsaKeypair::generate()?;
        let coordinator_cert = issue_self_signed(&coordinator_keypair, &identifier, coordinator_port)?;
        let node_cert = issue_self_signed(&node_keypair, &identifier, node_port)?;

        let coordinator = CoordinatorServer::new(identifier.clone(), passcode.clone(), bind_ip, node_port);
        let node = HostNode::new(identifier.clone(), identifier.clone(), node_cert, SocketAddr::new(bind_ip, node_port));
        let (events, _) = broadcast::channel(256);

        let host = Arc::new(Self {
            identifier: identifier.clone(),
            passcode: passcode.clone(),
            discovery_port,
            coordinator_port,
            node_port,
            coordinator: coordinator.clone(),
            node,
            discovery,
            coordinator_task: Mutex::new(None),
            events,
        });

        host.spawn_coordinator_bridge();

        let coordinator_addr = SocketAddr::new(bind_ip, coordinator_port);
        let task = coordinator.clone().listen(coordinator_addr, &coordinator_cert).await?;
        *host.coordinator_task.lock().await = Some(task);

        let mut txt = HashMap::new();
        txt.insert("coordinatorPort".to_string(), coordinator_port.to_string());
        host.discovery.publish(&identifier, SERVICE_TYPE, discovery_port, txt).await?;

        info!(identifier, discovery_port, coordinator_port, node_port, "host session created");
        Ok(host)
    }

    /// Subscribe to this session's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// This host's `nodePort`.
    pub fn node_port(&self) -> u16 {
        self.node_port
    }

    /// This host's `coordinatorPort`.
    pub fn coordinator_port(&self) -> u16 {
        self.coordinator_port
    }

    /// This host's `discoveryPort`.
    pub fn discovery_port(&self) -> u16 {
        self.discovery_port
    }

    /// Every member the coordinator has authenticated so far.
    pub async fn authenticated_members(&self) -> Vec<meshlink_coordinator::AuthenticatedMember> {
        self.coordinator.export_users().await
    }

    /// `startMesh` (spec.md §4.2/§4.3): stop advertising and the
    /// coordinator, export the authenticated roster, and start the
    /// `HostNode` against it.
    pub async fn start_mesh(self: &Arc<Self>) -> Result<(), SessionError> {
        if let Some(task) = self.coordinator_task.lock().await.take() {
            task.abort();
        }
        if let Err(e) = self.discovery.remove(&self.identifier).await {
            warn!(error = %e, "failed to withdraw discovery advertisement at mesh start");
        }

        let members = self.coordinator.export_users().await;
        let roster: Vec<RosterMember> = members
            .into_iter()
            .map(|m| RosterMember {
                user_name: m.user_name,
                ip: m.ip,
                node_port: m.node_port,
                session_key: m.server_session_key,
            })
            .collect();

        self.spawn_node_bridge();
        self.node.start(roster).await?;
        Ok(())
    }

    /// Send a unicast application message to `user_name`.
    pub async fn send_message(&self, user_name: &str, body: &str) -> Result<(), SessionError> {
        self.node.send_message(user_name, body).await?;
        Ok(())
    }

    /// Send an application message to every neighbor.
    pub async fn broadcast_message(&self, body: &str) -> Result<(), SessionError> {
        self.node.broadcast_message(body).await?;
        Ok(())
    }

    fn spawn_coordinator_bridge(self: &Arc<Self>) {
        let this = self.clone();
        let mut rx = self.coordinator.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    CoordinatorEvent::Connected { username } => {
                        let members = this.coordinator.export_users().await;
                        if let Some(m) = members.into_iter().find(|m| m.user_name == username) {
                            let _ = this.events.send(SessionEvent::MemberJoined {
                                user_name: m.user_name,
                                ip: m.ip,
                                port: m.node_port,
                            });
                        }
                    }
                    CoordinatorEvent::ConnectionAttemptFail { error, .. } => {
                        let _ = this.events.send(SessionEvent::CoordinatorError(error));
                    }
                    CoordinatorEvent::ConnectionAttempt { .. } => {}
                }
            }
        });
    }

    fn spawn_node_bridge(self: &Arc<Self>) {
        let this = self.clone();
        let mut rx = self.node.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Some(translated) = translate_host_event(event) {
                    let _ = this.events.send(translated);
                }
            }
        });
    }
}

fn translate_host_event(event: HostEvent) -> Option<SessionEvent> {
    match event {
        HostEvent::SessionStarted => Some(SessionEvent::SessionStarted),
        HostEvent::Node(node_event) => translate_node_event(node_event),
    }
}

fn translate_client_event(event: ClientEvent) -> Option<SessionEvent> {
    match event {
        ClientEvent::SessionStarted => Some(SessionEvent::SessionStarted),
        ClientEvent::Node(node_event) => translate_node_event(node_event),
    }
}

fn translate_node_event(event: NodeEvent) -> Option<SessionEvent> {
    match event {
        NodeEvent::Message { from, body, broadcast } => Some(SessionEvent::Message { from, body, broadcast }),
        NodeEvent::NeighborDisconnected { username } => Some(SessionEvent::Disconnected { user_name: username }),
        NodeEvent::NeighborReconnected { username } => Some(SessionEvent::Reconnected { user_name: username }),
        NodeEvent::NeighborConnected { .. } | NodeEvent::Hello { .. } | NodeEvent::AckHello { .. } => None,
    }
}

/// A joining member: holds identity until [`Client::connect_session`]
/// learns the session name and builds the `ClientNode`.
pub struct Client {
    /// This client's username within whatever session it joins.
    pub identifier: String,
    bind_ip: IpAddr,
    node_port: u16,
    node_keypair: RsaKeypair,
    node: Mutex<Option<Arc<ClientNode>>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Client {
    /// Generate identity and probe a `nodePort`; does not contact any
    /// session yet.
    pub async fn create(bind_ip: IpAddr, identifier: Option<String>) -> Result<Arc<Self>, SessionError> {
        let identifier = identifier.unwrap_or_else(random_identifier);
        let node_port = open_port(None).await?;
        let node_keypair = RsaKeypair::generate()?;
        let (events, _) = broadcast::channel(256);
        Ok(Arc::new(Self {
            identifier,
            bind_ip,
            node_port,
            node_keypair,
            node: Mutex::new(None),
            events,
        }))
    }

    /// Subscribe to this session's lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// This client's `nodePort`.
    pub fn node_port(&self) -> u16 {
        self.node_port
    }

    /// Browse for `session_name` via `discovery`, authenticate with
    /// `passcode`, and start the `ClientNode` (spec.md §4.2 `CoordinatorClient`
    /// plus §4.3 `ClientNode` construction).
    pub async fn connect_session(self: &Arc<Self>, discovery: &dyn Discovery, session_name: &str, passcode: &str) -> Result<(), SessionError> {
        let mut rx = discovery.browse(SERVICE_TYPE).await?;
        let (host_ip, coordinator_port) = tokio::time::timeout(DISCOVERY_TIMEOUT, async {
            loop {
                match rx.recv().await {
                    Ok(DiscoveryEvent::Resolved { name, addresses, txt }) if name == session_name => {
                        // spec.md §6.1's loopback/non-IPv4 filtering is the
                        // `Discovery` implementation's job (see
                        // `MdnsDiscovery::browse`); `addresses` here is
                        // already the resolved candidate list, so just take
                        // the first one rather than filtering again.
                        let ip = match addresses.into_iter().next() {
                            Some(ip) => ip,
                            None => continue,
                        };
                        let port = match txt.get("coordinatorPort").and_then(|s| s.parse().ok()) {
                            Some(p) => p,
                            None => continue,
                        };
                        return Some((ip, port));
                    }
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| SessionError::SessionNotFound(session_name.to_string()))?;

        let coordinator_addr = SocketAddr::new(host_ip, coordinator_port);
        let auth = CoordinatorClient::connect(coordinator_addr, session_name)
            .await?
            .authenticate(&self.identifier, passcode, self.node_port)
            .await?;

        let node_cert = issue_self_signed(&self.node_keypair, session_name, self.node_port)?;
        let host_ip: IpAddr = auth
            .host_info
            .ip
            .parse()
            .map_err(|_| SessionError::SessionNotFound(session_name.to_string()))?;
        let host_addr = SocketAddr::new(host_ip, auth.host_info.port);

        let client_node = ClientNode::new(
            self.identifier.clone(),
            session_name,
            node_cert,
            SocketAddr::new(self.bind_ip, self.node_port),
            auth.host_info.user_name.clone(),
            host_addr,
            auth.session_key,
        );
        client_node.start().await?;
        self.spawn_node_bridge(client_node.clone());
        *self.node.lock().await = Some(client_node);

        info!(session_name, identifier = %self.identifier, "client joined session");
        Ok(())
    }

    /// Send a unicast application message to `user_name`.
    pub async fn send_message(&self, user_name: &str, body: &str) -> Result<(), SessionError> {
        let node = self.node.lock().await.clone().ok_or_else(|| SessionError::SessionNotFound("<no active session>".into()))?;
        node.send_message(user_name, body).await?;
        Ok(())
    }

    /// Send an application message to every neighbor.
    pub async fn broadcast_message(&self, body: &str) -> Result<(), SessionError> {
        let node = self.node.lock().await.clone().ok_or_else(|| SessionError::SessionNotFound("<no active session>".into()))?;
        node.broadcast_message(body).await?;
        Ok(())
    }

    fn spawn_node_bridge(self: &Arc<Self>, client_node: Arc<ClientNode>) {
        let this = self.clone();
        let mut rx = client_node.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let Some(translated) = translate_client_event(event) {
                    let _ = this.events.send(translated);
                }
            }
        });
    }
}
