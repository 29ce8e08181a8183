//! `Neighbor`: per-peer state held by a [`crate::mesh::MeshNode`]
//! (spec.md §3 "Neighbor").

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use meshlink_tls::{ChannelSender, TlsChannelError};
use tokio::sync::Notify;

/// One other mesh member, from the perspective of a given node.
///
/// `connection_ready` is modeled as an async wait rather than a stored
/// future, per the design note in spec.md §9 ("single-assignment
/// future/notification primitive"): [`Neighbor::connection_ready`] can be
/// awaited any number of times, by any number of callers, and always
/// resolves once the backing dialer reaches `tls-connected`.
///
/// The dialer's `recv()` loop runs on a dedicated task that owns the
/// `TlsChannel` by value (spec.md §5 concurrency model: one task per
/// suspending I/O source); this struct only holds a [`ChannelSender`]
/// handle, so `sendMessage` can enqueue bytes without contending with
/// that task's receive loop.
pub struct Neighbor {
    /// The peer's session username.
    pub username: String,
    /// The peer's pinned IP address (spec.md §3 invariants).
    pub ip: IpAddr,
    /// The peer's `nodePort`.
    pub server_port: u16,
    /// AES key this node uses to encrypt messages *to* this peer.
    pub send_key: Vec<u8>,
    /// AES key this node uses to decrypt messages *from* this peer.
    pub receive_key: Vec<u8>,

    sender: StdMutex<Option<ChannelSender>>,
    ready: Notify,
    connected: AtomicBool,

    /// Dialer-side TCP closed.
    pub disconnected: AtomicBool,
    /// Dialer-side heartbeat timeout.
    pub soft_disconnected: AtomicBool,
    /// Listener-side heartbeat timeout for this peer's inbound channel.
    pub server_soft_disconnected: AtomicBool,
    /// Only one concurrent re-handshake per neighbor (spec.md §3 invariant).
    pub rebuilding_socket: AtomicBool,
    /// The last remote port the listener observed an inbound connection
    /// from this peer's IP on (spec.md §4.4 "different remote port than
    /// recorded").
    last_seen_remote_port: StdMutex<Option<u16>>,
}

impl Neighbor {
    /// Construct a fresh neighbor entry, not yet connected.
    pub fn new(username: String, ip: IpAddr, server_port: u16, send_key: Vec<u8>, receive_key: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            username,
            ip,
            server_port,
            send_key,
            receive_key,
            sender: StdMutex::new(None),
            ready: Notify::new(),
            connected: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            soft_disconnected: AtomicBool::new(false),
            server_soft_disconnected: AtomicBool::new(false),
            rebuilding_socket: AtomicBool::new(false),
            last_seen_remote_port: StdMutex::new(None),
        })
    }

    /// Install the dialer's send handle and resolve every pending
    /// [`Neighbor::connection_ready`] waiter (spec.md §4.4 "Dialer-side
    /// `tls-connected`"). Clears all four health flags.
    pub fn mark_connected(&self, sender: ChannelSender) {
        *self.sender.lock().unwrap() = Some(sender);
        self.disconnected.store(false, Ordering::Release);
        self.soft_disconnected.store(false, Ordering::Release);
        self.server_soft_disconnected.store(false, Ordering::Release);
        self.rebuilding_socket.store(false, Ordering::Release);
        self.connected.store(true, Ordering::Release);
        self.ready.notify_waiters();
    }

    /// Await until a dialer channel has been installed at least once.
    /// Gates `sendMessage` per spec.md §4.3.
    pub async fn connection_ready(&self) {
        if self.connected.load(Ordering::Acquire) {
            return;
        }
        loop {
            let notified = self.ready.notified();
            if self.connected.load(Ordering::Acquire) {
                return;
            }
            notified.await;
            if self.connected.load(Ordering::Acquire) {
                return;
            }
        }
    }

    /// Send raw bytes over the installed dialer channel.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), TlsChannelError> {
        let sender = self.sender.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(bytes).await,
            None => Err(TlsChannelError::Destroyed),
        }
    }

    /// True if any of the three liveness flags indicate this neighbor is
    /// not fully healthy (spec.md §4.4 "Full reconnect").
    pub fn is_unhealthy(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
            || self.soft_disconnected.load(Ordering::Acquire)
            || self.server_soft_disconnected.load(Ordering::Acquire)
    }

    /// Record the remote port of an inbound connection observed from this
    /// peer's IP, returning the previously recorded port (if any) so the
    /// caller can detect a change (spec.md §4.4).
    pub fn note_inbound_port(&self, port: u16) -> Option<u16> {
        self.last_seen_remote_port.lock().unwrap().replace(port)
    }
}
