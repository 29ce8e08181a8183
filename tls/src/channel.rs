//! `TlsChannel`: a mutually-TLS duplex with optional heartbeat liveness
//! (spec.md §4.1). Each instance models one peer connection — the
//! listener side accepts and hands off one connected channel per
//! incoming socket via [`crate::listener::TlsListener`]; the dialer side
//! is constructed directly with [`TlsChannel::connect`].

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use meshlink_crypto::SelfSignedCert;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error, warn};

use crate::cert::{client_config, server_config};
use crate::error::TlsChannelError;
use crate::framing::Base64Framed;
use crate::heartbeat::{self, HeartbeatAction, HeartbeatCommand, LivenessState};
use crate::record::{self, TAG_DATA, TAG_HEARTBEAT};

/// Observable events (spec.md §4.1 "Observable events").
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// The raw TCP socket connected (dialer) or was accepted (listener).
    SocketConnected,
    /// The TLS handshake completed.
    TlsConnected,
    /// Application-layer bytes arrived via `send` on the peer.
    Data(Vec<u8>),
    /// The TCP socket closed.
    SocketClosed,
    /// The TLS session closed.
    TlsClosed,
    /// A socket-level I/O error occurred.
    SocketError(String),
    /// A TLS-level error occurred.
    TlsError(String),
    /// Heartbeat-only: the disconnect timer fired with no matching reply.
    Disconnected,
    /// Heartbeat-only: a heartbeat matched again after `Disconnected`.
    Reconnected,
}

enum Stream {
    Server(tokio_rustls::server::TlsStream<Base64Framed<TcpStream>>),
    Client(tokio_rustls::client::TlsStream<Base64Framed<TcpStream>>),
}

impl AsyncRead for Stream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Server(s) => Pin::new(s).poll_read(cx, buf),
            Stream::Client(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Stream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Stream::Server(s) => Pin::new(s).poll_write(cx, buf),
            Stream::Client(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Server(s) => Pin::new(s).poll_flush(cx),
            Stream::Client(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Stream::Server(s) => Pin::new(s).poll_shutdown(cx),
            Stream::Client(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// A cloneable handle onto a [`TlsChannel`]'s outbound queue, obtained via
/// [`TlsChannel::sender`].
#[derive(Clone)]
pub struct ChannelSender {
    outbound: mpsc::Sender<Vec<u8>>,
    destroyed: Arc<AtomicBool>,
}

impl ChannelSender {
    /// Enqueue application-layer bytes for TLS encryption and transmission.
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), TlsChannelError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(TlsChannelError::Destroyed);
        }
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| TlsChannelError::Destroyed)
    }
}

/// A connected, optionally-heartbeating TLS channel.
pub struct TlsChannel {
    outbound: mpsc::Sender<Vec<u8>>,
    events: mpsc::Receiver<ChannelEvent>,
    destroyed: Arc<AtomicBool>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl TlsChannel {
    /// Dialer-side constructor: connect to `addr`, verify the peer's
    /// certificate CN against `expected_session:<remote port>`
    /// (spec.md §4.1), and complete the handshake.
    pub async fn connect(
        addr: SocketAddr,
        expected_session: &str,
        keep_alive: bool,
    ) -> Result<Self, TlsChannelError> {
        let tcp = TcpStream::connect(addr).await?;
        debug!(%addr, "tls channel socket connected (dialer)");
        let framed = Base64Framed::new(tcp);

        let config = client_config(expected_session, addr.port())?;
        let connector = TlsConnector::from(config);
        // The verifier pins on CN, not on this name; any syntactically valid
        // ServerName satisfies rustls's own API surface.
        let server_name = ServerName::IpAddress(addr.ip().into());
        let tls = connector
            .connect(server_name, framed)
            .await
            .map_err(TlsChannelError::Socket)?;
        debug!(%addr, "tls channel handshake complete (dialer)");

        Ok(Self::from_stream(Stream::Client(tls), keep_alive))
    }

    pub(crate) async fn from_accepted(
        tcp: TcpStream,
        acceptor: TlsAcceptor,
        keep_alive: bool,
    ) -> Result<Self, TlsChannelError> {
        let framed = Base64Framed::new(tcp);
        let tls = acceptor.accept(framed).await.map_err(TlsChannelError::Socket)?;
        Ok(Self::from_stream(Stream::Server(tls), keep_alive))
    }

    /// Build the listener-side `rustls::ServerConfig` and acceptor for a
    /// given certificate — exposed so [`crate::listener::TlsListener`]
    /// can share one acceptor across every accepted socket.
    pub fn acceptor_for(cert: &SelfSignedCert) -> Result<TlsAcceptor, TlsChannelError> {
        Ok(TlsAcceptor::from(server_config(cert)?))
    }

    fn from_stream(stream: Stream, keep_alive: bool) -> Self {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let (event_tx, events) = mpsc::channel(64);
        let (outbound, mut outbound_rx) = mpsc::channel::<Vec<u8>>(256);
        let destroyed = Arc::new(AtomicBool::new(false));

        let _ = event_tx.try_send(ChannelEvent::SocketConnected);
        let _ = event_tx.try_send(ChannelEvent::TlsConnected);

        let (heartbeat_cmd_tx, heartbeat_cmd_rx) = mpsc::channel::<HeartbeatCommand>(16);
        let (heartbeat_action_tx, mut heartbeat_action_rx) = mpsc::unbounded_channel::<HeartbeatAction>();

        let writer_events = event_tx.clone();
        let writer_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_data = outbound_rx.recv() => {
                        match maybe_data {
                            Some(bytes) => {
                                if let Err(e) = record::write_record(&mut write_half, TAG_DATA, &bytes).await {
                                    let _ = writer_events.send(ChannelEvent::SocketError(e.to_string())).await;
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    maybe_action = heartbeat_action_rx.recv(), if keep_alive => {
                        match maybe_action {
                            Some(HeartbeatAction::SendChallenge(challenge)) => {
                                if let Err(e) = record::write_record(&mut write_half, TAG_HEARTBEAT, &challenge).await {
                                    let _ = writer_events.send(ChannelEvent::SocketError(e.to_string())).await;
                                    break;
                                }
                            }
                            Some(HeartbeatAction::StateChanged(LivenessState::SoftDisconnected)) => {
                                let _ = writer_events.send(ChannelEvent::Disconnected).await;
                            }
                            Some(HeartbeatAction::StateChanged(LivenessState::Alive)) => {
                                let _ = writer_events.send(ChannelEvent::Reconnected).await;
                            }
                            None => {}
                        }
                    }
                }
            }
        });

        let reader_events = event_tx.clone();
        let heartbeat_feed = heartbeat_cmd_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match record::read_record(&mut read_half).await {
                    Ok(Some((TAG_DATA, payload))) => {
                        if reader_events.send(ChannelEvent::Data(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some((TAG_HEARTBEAT, payload))) => {
                        let _ = heartbeat_feed.send(HeartbeatCommand::Received(payload)).await;
                    }
                    Ok(Some((other, _))) => {
                        warn!(tag = other, "dropping record with unknown tag");
                    }
                    Ok(None) => {
                        let _ = reader_events.send(ChannelEvent::TlsClosed).await;
                        let _ = reader_events.send(ChannelEvent::SocketClosed).await;
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "tls channel read error");
                        let _ = reader_events.send(ChannelEvent::TlsError(e.to_string())).await;
                        break;
                    }
                }
            }
            let _ = heartbeat_feed.send(HeartbeatCommand::Stop).await;
        });

        let heartbeat_task = if keep_alive {
            Some(tokio::spawn(heartbeat::run(heartbeat_cmd_rx, heartbeat_action_tx)))
        } else {
            drop(heartbeat_cmd_rx);
            drop(heartbeat_action_tx);
            None
        };

        Self {
            outbound,
            events,
            destroyed,
            reader_task,
            writer_task,
            heartbeat_task,
        }
    }

    /// Enqueue application-layer bytes for TLS encryption and transmission.
    /// Ordering is preserved (spec.md §4.1).
    pub async fn send(&self, bytes: Vec<u8>) -> Result<(), TlsChannelError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(TlsChannelError::Destroyed);
        }
        self.outbound
            .send(bytes)
            .await
            .map_err(|_| TlsChannelError::Destroyed)
    }

    /// A cheap, cloneable handle that can enqueue outbound bytes without
    /// borrowing this channel. Lets a caller hand the channel itself to a
    /// dedicated task that owns `recv()`'s `&mut self` loop, while other
    /// callers keep sending through the handle (spec.md §4.3 neighbors
    /// need to `send` concurrently with their own receive loop).
    pub fn sender(&self) -> ChannelSender {
        ChannelSender {
            outbound: self.outbound.clone(),
            destroyed: self.destroyed.clone(),
        }
    }

    /// Receive the next observable event.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Close the TLS session, then the underlying TCP socket. Resolves
    /// when both are torn down. Idempotent.
    pub async fn destroy(&mut self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reader_task.abort();
        self.writer_task.abort();
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
    }

    /// Reset internal state so another `connect`/accept can follow. Per
    /// this implementation's resolved design question, `rebuild` tears
    /// down the current channel and returns a caller-driven signal that a
    /// fresh `TlsChannel` (with its own event stream) must be built —
    /// there is no in-place handle to resubscribe to.
    pub async fn rebuild(mut self) {
        self.destroy().await;
    }
}
